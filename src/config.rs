//! Session configuration
//!
//! Connection parameters are passed through to the protocol engine unchanged;
//! the session actor itself only reads `reconnect_ms`. Options can be built in
//! code or loaded from a TOML file.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Default delay between failed reconnect attempts, in milliseconds.
pub const DEFAULT_RECONNECT_MS: u64 = 5000;

/// Configuration for one broker session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionOptions {
    /// Broker URL with scheme and optional port (`mqtt://` or `mqtts://`).
    pub broker_url: String,
    /// Environment variable containing the username.
    pub username_env: Option<String>,
    /// Environment variable containing the password.
    pub password_env: Option<String>,
    /// MQTT keep-alive interval in seconds.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// How long to wait for the broker's connection acknowledgement.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Start with a clean broker-side session.
    #[serde(default = "default_clean_start")]
    pub clean_start: bool,
    /// Maximum inbound packet size advertised to the broker.
    pub max_packet_size: Option<u32>,
    /// Delay before retrying after a failed reconnect attempt, in ms.
    #[serde(default = "default_reconnect_ms")]
    pub reconnect_ms: u64,
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_clean_start() -> bool {
    true
}

fn default_reconnect_ms() -> u64 {
    DEFAULT_RECONNECT_MS
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            broker_url: "mqtt://localhost:1883".to_string(),
            username_env: None,
            password_env: None,
            keep_alive_secs: default_keep_alive_secs(),
            connect_timeout_ms: default_connect_timeout_ms(),
            clean_start: default_clean_start(),
            max_packet_size: None,
            reconnect_ms: default_reconnect_ms(),
        }
    }
}

impl SessionOptions {
    /// Options for the given broker URL, everything else defaulted.
    pub fn new(broker_url: impl Into<String>) -> Self {
        Self {
            broker_url: broker_url.into(),
            ..Default::default()
        }
    }

    /// Load options from a TOML file.
    pub fn from_toml_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let options: SessionOptions = toml::from_str(&contents)?;
        options.validate()?;
        Ok(options)
    }

    /// Validate fields that would otherwise fail deep inside the engine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = url::Url::parse(&self.broker_url)
            .map_err(|_| ConfigError::InvalidBrokerUrl(self.broker_url.clone()))?;

        match url.scheme() {
            "mqtt" | "mqtts" => {}
            other => {
                return Err(ConfigError::InvalidBrokerUrl(format!(
                    "unsupported scheme '{other}' in {}",
                    self.broker_url
                )))
            }
        }

        if url.host_str().is_none() {
            return Err(ConfigError::InvalidBrokerUrl(self.broker_url.clone()));
        }

        if self.reconnect_ms == 0 {
            return Err(ConfigError::InvalidField {
                field: "reconnect_ms",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),

    #[error("invalid broker URL: {0}")]
    InvalidBrokerUrl(String),

    #[error("invalid value for {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = SessionOptions::default();
        assert_eq!(options.broker_url, "mqtt://localhost:1883");
        assert_eq!(options.keep_alive_secs, 60);
        assert_eq!(options.connect_timeout_ms, 10_000);
        assert_eq!(options.reconnect_ms, 5000);
        assert!(options.clean_start);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_toml_defaults_applied() {
        let options: SessionOptions = toml::from_str(
            r#"
            broker_url = "mqtt://broker.example:1883"
            "#,
        )
        .unwrap();

        assert_eq!(options.broker_url, "mqtt://broker.example:1883");
        assert_eq!(options.reconnect_ms, DEFAULT_RECONNECT_MS);
        assert_eq!(options.username_env, None);
    }

    #[test]
    fn test_toml_overrides() {
        let options: SessionOptions = toml::from_str(
            r#"
            broker_url = "mqtts://broker.example"
            username_env = "MQTT_USER"
            password_env = "MQTT_PASS"
            keep_alive_secs = 30
            reconnect_ms = 1000
            "#,
        )
        .unwrap();

        assert_eq!(options.reconnect_ms, 1000);
        assert_eq!(options.keep_alive_secs, 30);
        assert_eq!(options.username_env.as_deref(), Some("MQTT_USER"));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_invalid_broker_url_rejected() {
        let mut options = SessionOptions::default();
        options.broker_url = "not-a-url".to_string();
        assert!(matches!(
            options.validate(),
            Err(ConfigError::InvalidBrokerUrl(_))
        ));

        options.broker_url = "http://broker.example".to_string();
        assert!(matches!(
            options.validate(),
            Err(ConfigError::InvalidBrokerUrl(_))
        ));
    }

    #[test]
    fn test_zero_reconnect_rejected() {
        let mut options = SessionOptions::default();
        options.reconnect_ms = 0;
        assert!(matches!(
            options.validate(),
            Err(ConfigError::InvalidField { field: "reconnect_ms", .. })
        ));
    }

    #[test]
    fn test_from_toml_path_missing_file() {
        let result = SessionOptions::from_toml_path("/nonexistent/session.toml");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
