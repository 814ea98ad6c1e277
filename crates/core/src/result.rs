//! Result type definition and extension traits.
//!
//! Continuations launched by the orchestrators have nobody to return an error
//! to, so their failure paths end in one of the logging combinators below.

use crate::error::Error;

/// The standard Result type for app manager operations.
///
/// # Examples
///
/// ```ignore
/// fn operation() -> Result<Version> {
///     let version: Version = "1.0.0".parse()?;
///     Ok(version)
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait providing logging combinators for Results.
pub trait ResultExt<T> {
    /// Convert to an Option, logging the error at `warn` with `context`.
    ///
    /// Used for best-effort work such as cleanup of temporary artifacts.
    fn log_failure(self, context: &str) -> Option<T>;

    /// Convert to an Option, logging the error at `error` with `context`.
    ///
    /// Used when even the error-reporting path failed and the reconciler
    /// is the only remaining recovery.
    fn log_double_failure(self, context: &str) -> Option<T>;

    /// Inspect the error without consuming the Result.
    fn inspect_error<F: FnOnce(&Error)>(self, f: F) -> Self;
}

impl<T> ResultExt<T> for Result<T> {
    fn log_failure(self, context: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, "{context}");
                None
            }
        }
    }

    fn log_double_failure(self, context: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(error = %e, "{context}; leaving recovery to the reconciler");
                None
            }
        }
    }

    fn inspect_error<F: FnOnce(&Error)>(self, f: F) -> Self {
        if let Err(ref e) = self {
            f(e);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_failure_keeps_ok() {
        let result: Result<u32> = Ok(7);
        assert_eq!(result.log_failure("cleanup"), Some(7));
    }

    #[test]
    fn test_log_failure_swallows_err() {
        let result: Result<u32> = Err(Error::invalid_input("nope"));
        assert_eq!(result.log_failure("cleanup"), None);
    }

    #[test]
    fn test_inspect_error_sees_error() {
        let mut seen = false;
        let result: Result<()> = Err(Error::invalid_input("nope"));
        let _ = result.inspect_error(|_| seen = true);
        assert!(seen);
    }
}
