//! Server configuration
//!
//! Loaded from an optional TOML file. `CASEWORK_BIND` and
//! `CASEWORK_GATEWAY_URL` take precedence over the file.

use casework_core::EngineConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const BIND_ENV: &str = "CASEWORK_BIND";
pub const GATEWAY_URL_ENV: &str = "CASEWORK_GATEWAY_URL";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid bind address {0:?}")]
    Bind(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub log_filter: String,
    pub log_json: bool,
    /// Period of the background audit outbox redelivery; 0 disables it
    pub outbox_retry_ms: u64,
    pub gateway: GatewayConfig,
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".into(),
            log_filter: "casework=info".into(),
            log_json: false,
            outbox_retry_ms: 5_000,
            gateway: GatewayConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

/// Extraction service endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub url: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub connect_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:9000/extract".into(),
            model: "default".into(),
            api_key: None,
            connect_timeout_ms: 5_000,
        }
    }
}

impl ServerConfig {
    /// File contents (or defaults without a path), then the environment
    ///
    /// # Errors
    /// Unreadable file or invalid TOML.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml(&raw)?
            }
            None => Self::default(),
        };
        Ok(config.with_overrides(|key| std::env::var(key).ok()))
    }

    /// # Errors
    /// Invalid TOML or unknown value types.
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply `CASEWORK_*` overrides from `lookup`
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let set = |value: Option<String>| value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        if let Some(bind) = set(lookup(BIND_ENV)) {
            self.bind = bind;
        }
        if let Some(url) = set(lookup(GATEWAY_URL_ENV)) {
            self.gateway.url = url;
        }
        self
    }

    #[must_use]
    pub fn outbox_retry(&self) -> Option<Duration> {
        (self.outbox_retry_ms > 0).then(|| Duration::from_millis(self.outbox_retry_ms))
    }

    /// # Errors
    /// `Bind` when the address does not parse.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind.parse().map_err(|_| ConfigError::Bind(self.bind.clone()))
    }
}
