//! What a session is: its advertised name and optional password.

use serde::Deserialize;

use crate::SessionPassword;

/// Identity of the single session a coordinator hosts.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Shown to the host in status notices. Clients may send a session
    /// name when joining; it is not checked.
    pub name: String,

    /// Shared plaintext password. Empty means anyone may join.
    pub password: String,
}

impl SessionConfig {
    pub fn new(name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            password: password.into(),
        }
    }

    /// The admission check this session uses by default.
    pub fn authenticator(&self) -> SessionPassword {
        SessionPassword::new(self.password.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_missing_fields_default_to_empty() {
        let config: SessionConfig = serde_json::from_str(r#"{"name":"Jam"}"#).unwrap();
        assert_eq!(config.name, "Jam");
        assert!(config.password.is_empty());
        assert!(!config.authenticator().is_required());
    }

    #[test]
    fn test_session_config_password_makes_join_protected() {
        let config = SessionConfig::new("Secret", "xyz");
        assert!(config.authenticator().is_required());
    }
}
