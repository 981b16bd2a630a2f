//! Configuration management for Monitor.
//!
//! Configuration is read from a TOML file. Every section except
//! `[endpoint]` is optional and falls back to defaults.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// `host:port[/path]` without scheme
    pub uri: String,
    #[serde(default = "default_secure")]
    pub secure: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_liveness_interval")]
    pub liveness_interval_ms: u64,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    #[serde(default)]
    pub history_retry_delay_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub json: bool,
}

fn default_secure() -> bool {
    true
}

fn default_liveness_interval() -> u64 {
    10_000
}

fn default_reconnect_delay() -> u64 {
    1_000
}

fn default_connect_timeout() -> u64 {
    10_000
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            liveness_interval_ms: default_liveness_interval(),
            reconnect_delay_ms: default_reconnect_delay(),
            connect_timeout_ms: default_connect_timeout(),
            history_retry_delay_ms: 0,
        }
    }
}

impl TimingConfig {
    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn history_retry_delay(&self) -> Duration {
        Duration::from_millis(self.history_retry_delay_ms)
    }
}

impl AuthConfig {
    /// Login and password, only when both are set.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.login, &self.password) {
            (Some(login), Some(password)) => Some((login.as_str(), password.as_str())),
            _ => None,
        }
    }
}

impl LinkConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), uri = %config.endpoint.uri, "Configuration loaded");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: LinkConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Local plaintext endpoint with default timings and no auth.
    pub fn local(uri: impl Into<String>) -> Self {
        Self {
            endpoint: EndpointConfig {
                uri: uri.into(),
                secure: false,
            },
            auth: AuthConfig::default(),
            timing: TimingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.uri.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "endpoint.uri must not be empty".to_string(),
            ));
        }
        if self.timing.liveness_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "timing.liveness_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.auth.login.is_some() != self.auth.password.is_some() {
            return Err(ConfigError::ValidationError(
                "auth.login and auth.password must be set together".to_string(),
            ));
        }
        if self.auth.token.is_none() && self.auth.credentials().is_none() {
            return Err(ConfigError::ValidationError(
                "either auth.token or auth.login/auth.password is required".to_string(),
            ));
        }
        Ok(())
    }
}
