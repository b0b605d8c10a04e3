//! Access-key configuration.

use serde::{Deserialize, Serialize};

/// Shared-secret access control.
///
/// The key is read once at startup (from `config/*.toml` or
/// `MODELCONV__AUTH__API_KEY`) and handed to the orchestrator. When unset,
/// every request is accepted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Expected value of the `x-api-key` request header.
    #[serde(default)]
    pub api_key: Option<String>,
}

impl AuthConfig {
    /// Returns the configured key, treating an empty string as unset.
    pub fn effective_api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.is_empty())
    }
}
