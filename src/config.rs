//! Configuration.
//!
//! Everything has a default; a TOML file only needs the keys it changes:
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0:8080"
//! header_read_timeout_secs = 10
//!
//! [dispatch]
//! compression_threshold = 1024
//! error_format = "json"
//!
//! [cors]
//! allow_origin = "https://app.example.com"
//! allow_methods = ["GET", "POST"]
//! max_age = 600
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::middleware::CorsOptions;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Root configuration.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub dispatch: DispatchConfig,
    /// Consumed by [`middleware::cors`](crate::middleware::cors) when set.
    pub cors: Option<CorsOptions>,
}

/// Transport settings.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// How long a client may take to send request headers. `0` disables the limit.
    pub header_read_timeout_secs: u64,

    /// HTTP/1.1 keep-alive.
    pub keep_alive: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_owned(),
            header_read_timeout_secs: 30,
            keep_alive: true,
        }
    }
}

impl ServerConfig {
    pub fn header_read_timeout(&self) -> Option<Duration> {
        (self.header_read_timeout_secs > 0).then(|| Duration::from_secs(self.header_read_timeout_secs))
    }
}

/// How errors are rendered.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorFormat {
    /// The message as `text/plain`.
    #[default]
    Text,
    /// `{"status": 404, "message": "..."}` as `application/json`.
    Json,
}

/// Dispatcher settings.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Gzip responses for clients that accept it.
    pub compress: bool,

    /// Bodies of this many bytes or fewer are never compressed.
    pub compression_threshold: usize,

    pub error_format: ErrorFormat,

    /// Emit one access-log line per request through `tracing`.
    pub access_log: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            compress: true,
            compression_threshold: 1024,
            error_format: ErrorFormat::Text,
            access_log: false,
        }
    }
}

impl Config {
    /// Load and validate configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "server.bind_address `{}` is not host:port",
                self.server.bind_address
            )));
        }
        if let Some(cors) = &self.cors {
            if cors.allow_credentials && cors.allow_origin == "*" {
                return Err(ConfigError::Invalid(
                    "cors.allow_credentials cannot be combined with a `*` origin".to_owned(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.server.bind_address, "0.0.0.0:8080");
        assert!(config.dispatch.compress);
        assert_eq!(config.dispatch.compression_threshold, 1024);
        assert!(config.cors.is_none());
    }

    #[test]
    fn sections_override_defaults() {
        let config = Config::from_toml_str(
            r#"
            [server]
            bind_address = "127.0.0.1:3000"
            header_read_timeout_secs = 0

            [dispatch]
            error_format = "json"
            compression_threshold = 64

            [cors]
            allow_origin = "https://app.example.com"
            allow_methods = ["GET", "POST"]
            max_age = 600
            "#,
        )
        .unwrap();
        assert_eq!(config.server.header_read_timeout(), None);
        assert_eq!(config.dispatch.error_format, ErrorFormat::Json);
        assert_eq!(config.dispatch.compression_threshold, 64);
        let cors = config.cors.unwrap();
        assert_eq!(cors.allow_methods, ["GET", "POST"]);
        assert_eq!(cors.max_age, 600);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = Config::from_toml_str("[server]\nbind_address = \"nope\"").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "{err}");

        let err = Config::from_toml_str("[cors]\nallow_origin = \"*\"\nallow_credentials = true")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "{err}");

        let err = Config::from_toml_str("[dispatch]\nerror_format = \"xml\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)), "{err}");
    }
}
