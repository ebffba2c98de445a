//! Typed configuration.
//!
//! The server reads environment variables once at startup and fails fast if
//! a required one is missing. The field client reads a TOML file (see
//! [`client`]). Credentials are wrapped in `SecretString` so they never end
//! up in logs.

pub mod client;
pub mod secrets;

pub use client::{BackoffConfig, ClientConfig};

use std::net::SocketAddr;

use crate::error::{Error, Result};
use crate::sync::SyncConfig;
use secrets::SecretString;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_MAX_CLOCK_SKEW_SECS: i64 = 300;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub bind_addr: SocketAddr,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// How far ahead of server time a client timestamp may be.
    pub max_clock_skew_secs: i64,
}

impl Config {
    /// Load server configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let bind_addr = optional_var("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse()
            .map_err(|e| Error::Config(format!("BIND_ADDR is not a socket address: {e}")))?;

        let max_clock_skew_secs = match optional_var("MAX_CLOCK_SKEW_SECS") {
            Some(raw) => raw.parse().map_err(|e| {
                Error::Config(format!("MAX_CLOCK_SKEW_SECS is not an integer: {e}"))
            })?,
            None => DEFAULT_MAX_CLOCK_SKEW_SECS,
        };
        if max_clock_skew_secs < 0 {
            return Err(Error::Config(
                "MAX_CLOCK_SKEW_SECS must not be negative".to_string(),
            ));
        }

        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            bind_addr,
            otel_endpoint: optional_var("OTEL_ENDPOINT"),
            log_level: optional_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            max_clock_skew_secs,
        })
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            max_clock_skew: chrono::Duration::seconds(self.max_clock_skew_secs),
        }
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

/// Unset and empty are treated the same.
fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
