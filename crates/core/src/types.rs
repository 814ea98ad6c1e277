//! Identifiers and the status lattice shared by every orchestrated resource.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::Error;

/// Unique identifier for a resource record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(Ulid);

impl ResourceId {
    /// Create a new random resource ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Create from a ULID.
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// Get the inner ULID.
    pub const fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl Default for ResourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tenant identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(String);

impl TenantId {
    /// Create a tenant ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of a resource record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceKind {
    Component,
    Library,
    ApiVersion,
    LibraryApiVersion,
    CatalogPackage,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Component => "component",
            Self::Library => "library",
            Self::ApiVersion => "api version",
            Self::LibraryApiVersion => "library api version",
            Self::CatalogPackage => "catalog package",
        };
        f.write_str(name)
    }
}

/// Overall status of a resource.
///
/// `Ready`, `Error` and `Deleted` are absorbing for the convergence check.
/// `Unstable` is terminal-for-now: the reconciler may revisit it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceStatus {
    Pending,
    Updating,
    Ready,
    Error,
    Unstable,
    Deleted,
}

impl ResourceStatus {
    /// Whether no convergence check may change this status any more.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Error | Self::Deleted)
    }

    /// Whether a workflow is still expected to move this resource.
    #[must_use]
    pub const fn is_in_progress(self) -> bool {
        matches!(self, Self::Pending | Self::Updating)
    }

    /// Whether the reconciler should look at this resource.
    #[must_use]
    pub const fn needs_reconcile(self) -> bool {
        matches!(self, Self::Pending | Self::Updating | Self::Unstable)
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "PENDING",
            Self::Updating => "UPDATING",
            Self::Ready => "READY",
            Self::Error => "ERROR",
            Self::Unstable => "UNSTABLE",
            Self::Deleted => "DELETED",
        };
        f.write_str(name)
    }
}

/// Status of one progress axis (source-control stage or build stage).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    #[default]
    Pending,
    Running,
    Ready,
    Error,
    Unstable,
}

impl StageStatus {
    /// Whether the stage has stopped moving.
    #[must_use]
    pub const fn is_resolved(self) -> bool {
        matches!(self, Self::Ready | Self::Error | Self::Unstable)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Ready => "READY",
            Self::Error => "ERROR",
            Self::Unstable => "UNSTABLE",
        };
        f.write_str(name)
    }
}

/// Kind of generated library artifact.
///
/// The derived ordering is the build order inside one language.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArtifactType {
    Model,
    Interface,
    Client,
}

impl ArtifactType {
    /// All artifact types in build order.
    pub const ALL: [Self; 3] = [Self::Model, Self::Interface, Self::Client];
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Model => "MODEL",
            Self::Interface => "INTERFACE",
            Self::Client => "CLIENT",
        };
        f.write_str(name)
    }
}

/// Target language of a library.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Language(String);

impl Language {
    /// Create a language, normalised to lowercase.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_lowercase())
    }

    /// Get the language name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

static VERSION_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}$").ok());

/// A validated `MAJOR.MINOR.PATCH` version string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version(String);

impl Version {
    /// Get the version string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = VERSION_PATTERN
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(s));
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(Error::invalid_version(s))
        }
    }
}

impl TryFrom<String> for Version {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Version> for String {
    fn from(version: Version) -> Self {
        version.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(ResourceStatus::Ready.is_terminal());
        assert!(ResourceStatus::Error.is_terminal());
        assert!(ResourceStatus::Deleted.is_terminal());
        assert!(!ResourceStatus::Unstable.is_terminal());
        assert!(!ResourceStatus::Pending.is_terminal());
        assert!(!ResourceStatus::Updating.is_terminal());
    }

    #[test]
    fn test_reconcile_candidates() {
        assert!(ResourceStatus::Unstable.needs_reconcile());
        assert!(!ResourceStatus::Ready.needs_reconcile());
    }

    #[test]
    fn test_artifact_build_order() {
        assert!(ArtifactType::Model < ArtifactType::Interface);
        assert!(ArtifactType::Interface < ArtifactType::Client);
    }

    #[test]
    fn test_language_is_normalised() {
        assert_eq!(Language::new(" Java "), Language::new("java"));
    }

    #[test]
    fn test_version_accepts_plain_semver() {
        assert!("1.0.0".parse::<Version>().is_ok());
        assert!("999.999.999".parse::<Version>().is_ok());
    }

    #[test]
    fn test_version_rejects_snapshot() {
        let err = "1.2.0-SNAPSHOT".parse::<Version>().err();
        assert!(matches!(err, Some(Error::InvalidVersion { .. })));
    }

    #[test]
    fn test_version_rejects_four_digit_part() {
        assert!("1000.0.0".parse::<Version>().is_err());
        assert!("1.0".parse::<Version>().is_err());
        assert!("".parse::<Version>().is_err());
    }

    #[test]
    fn test_version_deserialize_validates() {
        let ok: Result<Version, _> = serde_json::from_str("\"2.1.3\"");
        assert!(ok.is_ok());
        let bad: Result<Version, _> = serde_json::from_str("\"2.1\"");
        assert!(bad.is_err());
    }

    proptest! {
        #[test]
        fn prop_three_short_numbers_are_valid(a in 0u32..1000, b in 0u32..1000, c in 0u32..1000) {
            let text = format!("{a}.{b}.{c}");
            prop_assert!(text.parse::<Version>().is_ok());
        }

        #[test]
        fn prop_suffixes_are_rejected(a in 0u32..1000, suffix in "[A-Za-z-]{1,8}") {
            let text = format!("{a}.0.0{suffix}");
            prop_assert!(text.parse::<Version>().is_err());
        }
    }
}
