//! Configuration management for ChatLink
//!
//! Environment-based configuration with defaults, TOML file support, and
//! validation. Every tunable the session manager exposes lives here: store
//! paths, remote archive endpoint, reconnect delay, QR lockout policy, and
//! pairing-code lifetime.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Credential storage (tier 1 + tier 2)
    pub store: StoreConfig,

    /// Remote archive (tier 3)
    pub archive: ArchiveConfig,

    /// Connection supervision
    pub session: SessionConfig,

    /// Pairing flows (QR and numeric code)
    pub pairing: PairingConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Tier-1/2 storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root directory for per-tenant local state (credential cache,
    /// identity mapping files)
    pub data_dir: PathBuf,

    /// Path of the durable SQLite database
    pub db_path: PathBuf,

    /// Optional passphrase sealing tier-1 credential files at rest
    pub seal_passphrase: Option<String>,
}

/// Tier-3 remote archive configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Whether the remote archive tier is used at all
    pub enabled: bool,

    /// Base URL of the archive service
    pub endpoint: Option<String>,

    /// Bearer token for the archive service
    pub api_token: Option<String>,

    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

/// Connection supervision configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Fixed delay before reconnecting a dropped registered session
    #[serde(with = "humantime_serde")]
    pub reconnect_delay: Duration,

    /// Seen-message cache size before a wholesale clear
    pub dedup_threshold: usize,

    /// Buffer size of the inbound message channel
    pub inbound_buffer: usize,

    /// Buffer size of the per-tenant status event channel
    pub event_buffer: usize,
}

/// Pairing flow configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingConfig {
    /// Lifetime of an issued pairing code
    #[serde(with = "humantime_serde")]
    pub code_ttl: Duration,

    /// QR issuances without a successful connection before lockout
    pub qr_lock_threshold: u32,

    /// How long a QR lockout lasts
    #[serde(with = "humantime_serde")]
    pub qr_lock_cooldown: Duration,

    /// Grace period after tearing down a stale transport before opening a
    /// fresh one for a pairing-code request
    #[serde(with = "humantime_serde")]
    pub teardown_wait: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include target module
    pub with_target: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            db_path: PathBuf::from("./data/chatlink.db"),
            seal_passphrase: None,
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            api_token: None,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
            dedup_threshold: 2000,
            inbound_buffer: 256,
            event_buffer: 64,
        }
    }
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            code_ttl: Duration::from_secs(120),
            qr_lock_threshold: 10,
            qr_lock_cooldown: Duration::from_secs(300),
            teardown_wait: Duration::from_millis(500),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_target: true,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Variables follow the pattern: CHATLINK_<SECTION>_<KEY>
    /// Example: CHATLINK_STORE_DATA_DIR=/var/lib/chatlink
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // Store config
        if let Ok(dir) = env::var("CHATLINK_STORE_DATA_DIR") {
            config.store.data_dir = PathBuf::from(dir);
        }
        if let Ok(path) = env::var("CHATLINK_STORE_DB_PATH") {
            config.store.db_path = PathBuf::from(path);
        }
        if let Ok(pass) = env::var("CHATLINK_STORE_SEAL_PASSPHRASE") {
            config.store.seal_passphrase = Some(pass);
        }

        // Archive config
        if let Ok(enabled) = env::var("CHATLINK_ARCHIVE_ENABLED") {
            config.archive.enabled = enabled
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid archive flag: {}", e)))?;
        }
        if let Ok(endpoint) = env::var("CHATLINK_ARCHIVE_ENDPOINT") {
            config.archive.endpoint = Some(endpoint);
        }
        if let Ok(token) = env::var("CHATLINK_ARCHIVE_API_TOKEN") {
            config.archive.api_token = Some(token);
        }

        // Session config
        if let Ok(delay) = env::var("CHATLINK_SESSION_RECONNECT_DELAY_SECS") {
            let secs: u64 = delay
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid reconnect delay: {}", e)))?;
            config.session.reconnect_delay = Duration::from_secs(secs);
        }
        if let Ok(threshold) = env::var("CHATLINK_SESSION_DEDUP_THRESHOLD") {
            config.session.dedup_threshold = threshold
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid dedup threshold: {}", e)))?;
        }

        // Pairing config
        if let Ok(ttl) = env::var("CHATLINK_PAIRING_CODE_TTL_SECS") {
            let secs: u64 = ttl
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid code TTL: {}", e)))?;
            config.pairing.code_ttl = Duration::from_secs(secs);
        }
        if let Ok(threshold) = env::var("CHATLINK_PAIRING_QR_LOCK_THRESHOLD") {
            config.pairing.qr_lock_threshold = threshold
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid QR threshold: {}", e)))?;
        }
        if let Ok(cooldown) = env::var("CHATLINK_PAIRING_QR_LOCK_COOLDOWN_SECS") {
            let secs: u64 = cooldown
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid QR cooldown: {}", e)))?;
            config.pairing.qr_lock_cooldown = Duration::from_secs(secs);
        }

        // Logging config
        if let Ok(level) = env::var("CHATLINK_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(json) = env::var("CHATLINK_LOG_JSON") {
            config.logging.json_format = json
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid JSON flag: {}", e)))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError(e.to_string()))?;

        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.archive.enabled && self.archive.endpoint.is_none() {
            return Err(ConfigError::ValidationFailed(
                "archive enabled but no endpoint provided".to_string(),
            ));
        }

        if self.session.dedup_threshold == 0 {
            return Err(ConfigError::ValidationFailed(
                "dedup_threshold must be greater than 0".to_string(),
            ));
        }

        if self.session.inbound_buffer == 0 || self.session.event_buffer == 0 {
            return Err(ConfigError::ValidationFailed(
                "channel buffers must be greater than 0".to_string(),
            ));
        }

        if self.pairing.qr_lock_threshold == 0 {
            return Err(ConfigError::ValidationFailed(
                "qr_lock_threshold must be greater than 0".to_string(),
            ));
        }

        if self.pairing.code_ttl.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "code_ttl must be greater than 0".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save_to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), ConfigError> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::FileWriteError(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pairing.qr_lock_threshold, 10);
        assert_eq!(config.pairing.code_ttl, Duration::from_secs(120));
        assert_eq!(config.pairing.qr_lock_cooldown, Duration::from_secs(300));
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.archive.enabled = true;
        assert!(config.validate().is_err());

        config = Config::default();
        config.session.dedup_threshold = 0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.pairing.qr_lock_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_level_validation() {
        let mut config = Config::default();

        config.logging.level = "chatty".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "warn".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let back: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(back.session.reconnect_delay, config.session.reconnect_delay);
        assert_eq!(back.pairing.qr_lock_threshold, config.pairing.qr_lock_threshold);
    }
}
