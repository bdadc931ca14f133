//! Configuration for the P2P envelope layer
//!
//! Everything the layer once hard-coded — backend origin, relay URL, polling
//! interval — is injected here instead. Defaults can be overridden from the
//! environment (`WEFT_<SECTION>_<KEY>`) or a TOML file.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::logging::LogLevel;

mod error;

pub use error::ConfigError;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct P2pConfig {
    /// Authoritative store client
    pub store: StoreConfig,

    /// Overlay relay transport
    pub overlay: OverlayConfig,

    /// Sync orchestrator
    pub sync: SyncConfig,

    /// Logging
    pub logging: LoggingConfig,
}

/// Envelope store client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend base URL
    pub base_url: String,

    /// Deadline for any single store round-trip
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

/// Overlay transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayConfig {
    /// Relay WebSocket URL
    pub relay_url: String,

    /// First reconnect delay after a drop
    #[serde(with = "humantime_serde")]
    pub reconnect_initial: Duration,

    /// Reconnect delay cap
    #[serde(with = "humantime_serde")]
    pub reconnect_max: Duration,
}

/// Sync orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Interval between reconciliation pulls from the store
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Page size for `list_for_recipient` walks
    pub page_size: usize,

    /// Backoff cap when consecutive pulls fail
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: LogLevel,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include target module
    pub with_target: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://127.0.0.1:8081/ws".to_string(),
            reconnect_initial: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(30),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            page_size: 100,
            max_backoff: Duration::from_secs(300),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            json_format: false,
            with_target: true,
        }
    }
}

impl P2pConfig {
    /// Load configuration from environment variables.
    ///
    /// Variables follow the pattern `WEFT_<SECTION>_<KEY>`, e.g.
    /// `WEFT_STORE_BASE_URL=https://api.example.net`. Durations are given
    /// in whole seconds (`WEFT_SYNC_INTERVAL_SECS=30`).
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(url) = env::var("WEFT_STORE_BASE_URL") {
            config.store.base_url = url;
        }
        if let Ok(secs) = env::var("WEFT_STORE_REQUEST_TIMEOUT_SECS") {
            config.store.request_timeout = Duration::from_secs(parse_secs(&secs, "request timeout")?);
        }

        if let Ok(url) = env::var("WEFT_OVERLAY_RELAY_URL") {
            config.overlay.relay_url = url;
        }
        if let Ok(secs) = env::var("WEFT_OVERLAY_RECONNECT_INITIAL_SECS") {
            config.overlay.reconnect_initial =
                Duration::from_secs(parse_secs(&secs, "reconnect initial")?);
        }
        if let Ok(secs) = env::var("WEFT_OVERLAY_RECONNECT_MAX_SECS") {
            config.overlay.reconnect_max = Duration::from_secs(parse_secs(&secs, "reconnect max")?);
        }

        if let Ok(secs) = env::var("WEFT_SYNC_INTERVAL_SECS") {
            config.sync.interval = Duration::from_secs(parse_secs(&secs, "sync interval")?);
        }
        if let Ok(size) = env::var("WEFT_SYNC_PAGE_SIZE") {
            config.sync.page_size = size
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid page size: {}", e)))?;
        }

        if let Ok(level) = env::var("WEFT_LOG_LEVEL") {
            config.logging.level = LogLevel::parse(&level)
                .ok_or_else(|| ConfigError::InvalidValue(format!("Invalid log level: {}", level)))?;
        }
        if let Ok(json) = env::var("WEFT_LOG_JSON") {
            config.logging.json_format = json
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid JSON flag: {}", e)))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError(e.to_string()))?;

        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.store.base_url.starts_with("http://") && !self.store.base_url.starts_with("https://")
        {
            return Err(ConfigError::ValidationFailed(format!(
                "store base_url must be http(s): {}",
                self.store.base_url
            )));
        }
        if self.store.request_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "request_timeout must be non-zero".to_string(),
            ));
        }

        if !self.overlay.relay_url.starts_with("ws://") && !self.overlay.relay_url.starts_with("wss://")
        {
            return Err(ConfigError::ValidationFailed(format!(
                "overlay relay_url must be ws(s): {}",
                self.overlay.relay_url
            )));
        }
        if self.overlay.reconnect_initial.is_zero()
            || self.overlay.reconnect_initial > self.overlay.reconnect_max
        {
            return Err(ConfigError::ValidationFailed(
                "reconnect backoff must start non-zero and below its cap".to_string(),
            ));
        }

        if self.sync.interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "sync interval must be non-zero".to_string(),
            ));
        }
        if self.sync.page_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "page_size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_secs(raw: &str, what: &str) -> Result<u64, ConfigError> {
    raw.parse()
        .map_err(|e| ConfigError::InvalidValue(format!("Invalid {}: {}", what, e)))
}
