//! Field client configuration, loaded from TOML.
//!
//! ```toml
//! server_url = "https://sync.example.com"
//! state_dir = "/var/lib/fieldsync"
//! max_conflict_retries = 3
//!
//! [backoff]
//! base_ms = 500
//! max_ms = 60000
//!
//! [tokens]
//! "3f0c...-work-order-id" = "asg_..."
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use super::secrets::SecretString;
use crate::error::{Error, Result};
use crate::model::WorkOrderId;

#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    pub server_url: String,
    /// Where the offline queue and job cache are persisted.
    pub state_dir: PathBuf,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default = "default_conflict_retries")]
    pub max_conflict_retries: u32,
    /// Pre-issued bearer token per work order.
    #[serde(default)]
    pub tokens: HashMap<WorkOrderId, SecretString>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_max_ms")]
    pub max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: default_base_ms(),
            max_ms: default_max_ms(),
        }
    }
}

impl BackoffConfig {
    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at `max_ms`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        let ms = self.base_ms.saturating_mul(1u64 << shift).min(self.max_ms);
        Duration::from_millis(ms)
    }
}

fn default_conflict_retries() -> u32 {
    3
}

fn default_base_ms() -> u64 {
    500
}

fn default_max_ms() -> u64 {
    60_000
}

impl ClientConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read client config {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
            .map_err(|e| Error::Config(format!("bad client config {}: {e}", path.display())))
    }

    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn token(&self, id: WorkOrderId) -> Option<&SecretString> {
        self.tokens.get(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn parses_full_file() {
        let id = WorkOrderId::new();
        let toml = format!(
            r#"
server_url = "http://localhost:8080"
state_dir = "/tmp/fs"
max_conflict_retries = 5

[backoff]
base_ms = 100

[tokens]
"{id}" = "asg_abc"
"#
        );
        let config = ClientConfig::from_toml(&toml).unwrap();
        assert_eq!(config.max_conflict_retries, 5);
        assert_eq!(config.backoff.base_ms, 100);
        assert_eq!(config.backoff.max_ms, 60_000);
        assert_eq!(config.token(id).unwrap().expose_secret(), "asg_abc");
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let backoff = BackoffConfig {
            base_ms: 100,
            max_ms: 1_000,
        };
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(3), Duration::from_millis(400));
        assert_eq!(backoff.delay(10), Duration::from_millis(1_000));
        assert_eq!(backoff.delay(200), Duration::from_millis(1_000));
    }
}
