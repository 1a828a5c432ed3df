//! Admission check performed once per join.
//!
//! The relay only supports a shared session password. The check still sits
//! behind the [`Authenticator`] trait so a host can plug in something else
//! (an allow-list, a test double) without touching the handler.

use pocket_protocol::JoinRequest;

use crate::SessionError;

/// Reason text sent to a client whose password didn't match.
pub const INVALID_PASSWORD: &str = "Invalid password";

/// Decides whether a join request is admitted.
pub trait Authenticator: Send + Sync + 'static {
    /// Returns `Ok(())` to admit, or `Err(SessionError::AuthFailed(reason))`
    /// to reject with `reason`.
    fn authorize(&self, request: &JoinRequest) -> Result<(), SessionError>;
}

/// Shared-password admission.
///
/// An empty password admits everyone. Otherwise the supplied password must
/// match exactly, case included.
#[derive(Debug, Clone, Default)]
pub struct SessionPassword {
    password: String,
}

impl SessionPassword {
    /// Creates a check for `password`. Empty means open session.
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
        }
    }

    /// Returns `true` if joins must supply a password.
    pub fn is_required(&self) -> bool {
        !self.password.is_empty()
    }
}

impl Authenticator for SessionPassword {
    fn authorize(&self, request: &JoinRequest) -> Result<(), SessionError> {
        if self.is_required() && request.password() != self.password {
            return Err(SessionError::AuthFailed(INVALID_PASSWORD.into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn join_with(password: Option<&str>) -> JoinRequest {
        JoinRequest {
            username: Some("Alice".into()),
            password: password.map(str::to_string),
            session_name: Some("Jam".into()),
        }
    }

    #[test]
    fn test_authorize_open_session_accepts_any_password() {
        let auth = SessionPassword::new("");
        assert!(!auth.is_required());

        for password in [None, Some(""), Some("anything"), Some("XYZ")] {
            assert!(auth.authorize(&join_with(password)).is_ok());
        }
    }

    #[test]
    fn test_authorize_matching_password_accepted() {
        let auth = SessionPassword::new("xyz");
        assert!(auth.authorize(&join_with(Some("xyz"))).is_ok());
    }

    #[test]
    fn test_authorize_mismatch_rejected_with_reason() {
        let auth = SessionPassword::new("xyz");

        for password in [None, Some(""), Some("wrong"), Some("XYZ"), Some("xyz ")] {
            let result = auth.authorize(&join_with(password));
            assert!(
                matches!(&result, Err(SessionError::AuthFailed(reason)) if reason == INVALID_PASSWORD),
                "password {password:?} should be rejected, got {result:?}"
            );
        }
    }
}
