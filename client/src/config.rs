//! Configuration management for the sync client.

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Client configuration loaded from environment variables.
#[derive(Clone)]
pub struct Config {
    /// Spreadsheet endpoint URL
    pub endpoint: String,
    /// Shared access token; never printed
    pub token: String,
    /// Directory holding the persisted keys
    pub data_dir: PathBuf,
    /// Background pull interval
    pub pull_interval: Duration,
    /// Outbox-only flush interval
    pub flush_interval: Duration,
    /// Timeout for GET requests
    pub get_timeout: Duration,
    /// Timeout for POST requests
    pub post_timeout: Duration,
    /// Bundled catalog JSON used until the remote catalog is fetched
    pub catalog_defaults: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let endpoint = lookup("STAYSHARP_ENDPOINT")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::MissingEndpoint)?;
        let endpoint = endpoint.trim().to_string();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ConfigError::InvalidEndpoint(endpoint));
        }

        let token = lookup("STAYSHARP_TOKEN")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::MissingToken)?;

        let data_dir = lookup("STAYSHARP_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data"));

        let number = |name: &'static str, default: u64| -> Result<u64, ConfigError> {
            match lookup(name) {
                Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidNumber {
                    name,
                    value: raw.clone(),
                }),
                None => Ok(default),
            }
        };

        Ok(Self {
            endpoint,
            token,
            data_dir,
            pull_interval: Duration::from_secs(number("STAYSHARP_PULL_INTERVAL_SECS", 30)?),
            flush_interval: Duration::from_secs(number("STAYSHARP_FLUSH_INTERVAL_SECS", 7)?),
            get_timeout: Duration::from_millis(number("STAYSHARP_GET_TIMEOUT_MS", 5500)?),
            post_timeout: Duration::from_millis(number("STAYSHARP_POST_TIMEOUT_MS", 6500)?),
            catalog_defaults: lookup("STAYSHARP_CATALOG_DEFAULTS").map(PathBuf::from),
        })
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("endpoint", &self.endpoint)
            .field("token", &"[REDACTED]")
            .field("data_dir", &self.data_dir)
            .field("pull_interval", &self.pull_interval)
            .field("flush_interval", &self.flush_interval)
            .field("get_timeout", &self.get_timeout)
            .field("post_timeout", &self.post_timeout)
            .field("catalog_defaults", &self.catalog_defaults)
            .finish()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("STAYSHARP_ENDPOINT environment variable is required")]
    MissingEndpoint,

    #[error("STAYSHARP_ENDPOINT must be an http(s) URL, got {0}")]
    InvalidEndpoint(String),

    #[error("STAYSHARP_TOKEN environment variable is required")]
    MissingToken,

    #[error("Invalid {name} value: {value}")]
    InvalidNumber { name: &'static str, value: String },
}
