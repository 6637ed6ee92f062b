//! Session configuration.
//!
//! The session service itself performs no file IO; hosts construct a
//! [`SessionConfig`] directly or deserialize one from their own config file.

use serde::{Deserialize, Serialize};

/// Default storage-key template. `${siteName}` is replaced by the repository
/// URL and `${tokenName}` by the token role (`access`/`refresh`).
const DEFAULT_KEY_TEMPLATE: &str = "sn-${siteName}-${tokenName}";

/// How long persisted tokens should outlive the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenPersist {
    /// Tokens live for the browser/host session only.
    #[default]
    Session,
    /// Tokens persist until the token's own expiry.
    Expiration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Base URL of the content repository, also used as the storage-key
    /// namespace.
    pub repository_url: String,
    /// Template for storage keys, with `${siteName}` and `${tokenName}`
    /// substitution points.
    #[serde(default = "default_key_template")]
    pub token_key_template: String,
    #[serde(default)]
    pub persistence: TokenPersist,
}

fn default_key_template() -> String {
    DEFAULT_KEY_TEMPLATE.to_string()
}

impl SessionConfig {
    pub fn new(repository_url: impl Into<String>) -> Self {
        Self {
            repository_url: repository_url.into(),
            token_key_template: default_key_template(),
            persistence: TokenPersist::default(),
        }
    }

    pub fn with_persistence(mut self, persistence: TokenPersist) -> Self {
        self.persistence = persistence;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistence_uses_wire_names() {
        let config: SessionConfig = serde_json::from_str(
            r#"{"repository_url":"https://repo.example.com","persistence":"expiration"}"#,
        )
        .expect("config should deserialize");
        assert_eq!(config.persistence, TokenPersist::Expiration);
        assert_eq!(config.token_key_template, DEFAULT_KEY_TEMPLATE);
    }

    #[test]
    fn defaults_to_session_persistence() {
        let config = SessionConfig::new("https://repo.example.com");
        assert_eq!(config.persistence, TokenPersist::Session);
    }
}
