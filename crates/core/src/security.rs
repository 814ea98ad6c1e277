//! Caller identity, carried explicitly through every continuation.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::TenantId;

/// Identity on whose behalf a remote call is made.
///
/// Captured by value when a continuation is launched and passed by
/// reference to every collaborator call; never read from ambient state.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityContext {
    pub principal: String,
    pub tenant: Option<TenantId>,
    #[serde(default, skip_serializing)]
    token: Option<String>,
}

impl SecurityContext {
    /// Context of the system principal, scoped to shared resources.
    pub fn system() -> Self {
        Self {
            principal: "system".to_string(),
            tenant: None,
            token: None,
        }
    }

    /// Context of a user or service principal.
    pub fn new(principal: impl Into<String>, tenant: Option<TenantId>) -> Self {
        Self {
            principal: principal.into(),
            tenant,
            token: None,
        }
    }

    /// Attach the session token forwarded to collaborators.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Session token, if any.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Whether a record scoped to `tenant` is visible to this context.
    #[must_use]
    pub fn can_see(&self, tenant: Option<&TenantId>) -> bool {
        match tenant {
            None => true,
            Some(t) => self.tenant.as_ref() == Some(t),
        }
    }
}

impl fmt::Debug for SecurityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityContext")
            .field("principal", &self.principal)
            .field("tenant", &self.tenant)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
