//! # loopguard-config
//!
//! Configuration management for loopguard.
//!
//! Loads configuration from:
//! 1. `~/.loopguard/config.toml` (global)
//! 2. `.loopguard/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)

pub mod logging;
pub mod path;
pub mod testing;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

/// Default state directory, relative to the home directory
pub const DEFAULT_STATE_DIR: &str = "~/.loopguard/state";

/// Expected upper bound of one device document (200 KB)
pub const DEFAULT_ALLOCATION_HINT_BYTES: usize = 204_800;

/// Status code a folder-listing command reports when it already asked the
/// device for a full hierarchy resync (invalid hierarchy sync key).
pub const DEFAULT_RESYNC_REQUESTED_STATUS: i32 = 9;

/// Global config instance
static CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| RwLock::new(Config::load().unwrap_or_default()));

/// Get a snapshot of the global config
pub fn config() -> Config {
    match CONFIG.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Reload config from disk
pub fn reload() -> Result<(), ConfigError> {
    let new_config = Config::load()?;
    match CONFIG.write() {
        Ok(mut guard) => *guard = new_config,
        Err(poisoned) => *poisoned.into_inner() = new_config,
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub detection: DetectionConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                let contents = std::fs::read_to_string(&global_path)?;
                config = toml::from_str(&contents)?;
            }
        }

        let project_path = Self::project_config_path();
        if project_path.exists() {
            debug!("Loading project config from {:?}", project_path);
            let contents = std::fs::read_to_string(&project_path)?;
            let project_config: Config = toml::from_str(&contents)?;
            config.merge(project_config);
        }

        config.apply_env_overrides();

        Ok(config)
    }

    /// Global config path: ~/.loopguard/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".loopguard/config.toml"))
    }

    /// Project config path: .loopguard/config.toml
    pub fn project_config_path() -> PathBuf {
        Path::new(".loopguard/config.toml").to_path_buf()
    }

    /// Merge a project config over this one.
    ///
    /// Fields still holding their default value in `other` keep the global
    /// setting.
    fn merge(&mut self, other: Config) {
        let store_defaults = StoreConfig::default();
        if other.store.state_dir != store_defaults.state_dir {
            self.store.state_dir = other.store.state_dir;
        }
        if other.store.lock_timeout_ms != store_defaults.lock_timeout_ms {
            self.store.lock_timeout_ms = other.store.lock_timeout_ms;
        }
        if other.store.lock_poll_ms != store_defaults.lock_poll_ms {
            self.store.lock_poll_ms = other.store.lock_poll_ms;
        }
        if other.store.allocation_hint_bytes != store_defaults.allocation_hint_bytes {
            self.store.allocation_hint_bytes = other.store.allocation_hint_bytes;
        }

        let detection_defaults = DetectionConfig::default();
        if other.detection.ledger_capacity != detection_defaults.ledger_capacity {
            self.detection.ledger_capacity = other.detection.ledger_capacity;
        }
        if other.detection.confirm_threshold != detection_defaults.confirm_threshold {
            self.detection.confirm_threshold = other.detection.confirm_threshold;
        }
        if other.detection.resync_lookback_secs != detection_defaults.resync_lookback_secs {
            self.detection.resync_lookback_secs = other.detection.resync_lookback_secs;
        }
        if other.detection.resync_requested_status != detection_defaults.resync_requested_status {
            self.detection.resync_requested_status = other.detection.resync_requested_status;
        }

        if other.logging.level != LoggingConfig::default().level {
            self.logging.level = other.logging.level;
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("LOOPGUARD_STATE_DIR") {
            self.store.state_dir = PathBuf::from(path);
        }
        if let Ok(timeout) = std::env::var("LOOPGUARD_LOCK_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.store.lock_timeout_ms = ms;
            }
        }
        if let Ok(level) = std::env::var("LOOPGUARD_LOG") {
            self.logging.level = level;
        }
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        Config::default().to_toml()
    }

    /// Render this config as pretty TOML
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

/// Shared state store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding one document and one lock file per device
    pub state_dir: PathBuf,
    /// How long to wait for a device lock before giving up
    pub lock_timeout_ms: u64,
    /// Delay between lock attempts
    pub lock_poll_ms: u64,
    /// Expected maximum size of one device document
    pub allocation_hint_bytes: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            lock_timeout_ms: 5_000,
            lock_poll_ms: 25,
            allocation_hint_bytes: DEFAULT_ALLOCATION_HINT_BYTES,
        }
    }
}

/// Loop detection tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Number of process entries kept per device and user
    pub ledger_capacity: usize,
    /// Consecutive repeats before the suspected item is ignored
    pub confirm_threshold: u32,
    /// How far back the hierarchy resync check looks
    pub resync_lookback_secs: i64,
    /// Folder-listing status meaning "full resync already requested"
    pub resync_requested_status: i32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            ledger_capacity: 10,
            confirm_threshold: 3,
            resync_lookback_secs: 300,
            resync_requested_status: DEFAULT_RESYNC_REQUESTED_STATUS,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when neither LOOPGUARD_LOG nor RUST_LOG is set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.detection.ledger_capacity, 10);
        assert_eq!(config.detection.confirm_threshold, 3);
        assert_eq!(config.store.allocation_hint_bytes, 204_800);
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[store]"));
        assert!(toml_str.contains("[detection]"));
        assert!(toml_str.contains("ledger_capacity = 10"));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.detection, parsed.detection);
        assert_eq!(config.store.state_dir, parsed.store.state_dir);
    }

    #[test]
    fn test_merge_keeps_global_when_project_is_default() {
        let mut global = Config::default();
        global.store.lock_timeout_ms = 250;

        let mut project = Config::default();
        project.detection.ledger_capacity = 4;

        global.merge(project);
        assert_eq!(global.store.lock_timeout_ms, 250);
        assert_eq!(global.detection.ledger_capacity, 4);
    }

    #[test]
    fn test_merge_detection_per_field() {
        let mut global = Config::default();
        global.detection.confirm_threshold = 5;
        global.detection.resync_lookback_secs = 600;

        let project: Config = toml::from_str("[detection]\nledger_capacity = 4\n").unwrap();

        global.merge(project);
        assert_eq!(global.detection.ledger_capacity, 4);
        assert_eq!(global.detection.confirm_threshold, 5);
        assert_eq!(global.detection.resync_lookback_secs, 600);
        assert_eq!(global.detection.resync_requested_status, DEFAULT_RESYNC_REQUESTED_STATUS);
    }
}
