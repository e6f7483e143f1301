//! Authentication and Access Policy
//!
//! Session handling for organization members:
//! - Role hierarchy (viewer < manager < admin)
//! - Session token issue / resolve / revoke
//! - Role checks for protected operations
//! - Shared keys for the identity provider and the operator
//!
//! Credentials are verified by the upstream identity provider; this crate
//! only deals with the tokens handed out once a member is known.

mod key;
mod role;
mod session;

pub use key::SharedKey;
pub use role::Role;
pub use session::{Session, SessionStore, DEFAULT_SESSION_TTL_HOURS};

use thiserror::Error;

/// Authentication error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing session token")]
    MissingToken,

    #[error("Invalid session token")]
    InvalidToken,

    #[error("Session expired")]
    Expired,

    #[error("Identity provider key missing or invalid")]
    UnverifiedIssuer,

    #[error("Operator key missing or invalid")]
    NotOperator,

    #[error("Not a member of this organization")]
    NotMember,

    #[error("Role {actual} is not allowed, {required} required")]
    Forbidden { required: Role, actual: Role },

    #[error("Session store error: {0}")]
    Store(String),
}

impl AuthError {
    /// Whether the caller is unauthenticated (as opposed to unauthorized)
    pub fn is_unauthenticated(&self) -> bool {
        matches!(
            self,
            AuthError::MissingToken
                | AuthError::InvalidToken
                | AuthError::Expired
                | AuthError::UnverifiedIssuer
        )
    }
}

/// Check that `actual` grants at least `required`
pub fn authorize(actual: Role, required: Role) -> Result<(), AuthError> {
    if actual.allows(required) {
        Ok(())
    } else {
        Err(AuthError::Forbidden { required, actual })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorize() {
        assert!(authorize(Role::Admin, Role::Manager).is_ok());
        assert!(authorize(Role::Manager, Role::Manager).is_ok());
        assert_eq!(
            authorize(Role::Viewer, Role::Manager),
            Err(AuthError::Forbidden {
                required: Role::Manager,
                actual: Role::Viewer,
            })
        );
    }

    #[test]
    fn test_unauthenticated_classification() {
        assert!(AuthError::MissingToken.is_unauthenticated());
        assert!(AuthError::Expired.is_unauthenticated());
        assert!(AuthError::UnverifiedIssuer.is_unauthenticated());
        assert!(!AuthError::NotMember.is_unauthenticated());
        assert!(!AuthError::NotOperator.is_unauthenticated());
    }
}
