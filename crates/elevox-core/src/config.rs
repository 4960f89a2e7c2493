//! Application configuration management.
//!
//! Tunes the detection constants, the scan cadence, where the reading is
//! persisted, where the HTTP server listens and how the daemon logs. The beacon table itself is
//! compiled in (see [`crate::registry`]).
//!
//! Sources, lowest priority first:
//! - built-in defaults
//! - TOML file (`/etc/elevox/config.toml` on Linux, or `ELEVOX_CONFIG`)
//! - environment variables such as `ELEVOX__SCAN__WINDOW_MS=1500`

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::reading::default_reading_path;
use crate::registry::{HYSTERESIS_MARGIN_DB, RSSI_THRESHOLD, SCAN_INTERVAL, SCAN_WINDOW};
use crate::scanner::DEFAULT_CHANNEL_CAPACITY;

/// Environment variable naming an alternative config file.
pub const CONFIG_PATH_ENV: &str = "ELEVOX_CONFIG";

/// Errors loading, saving or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration sources could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// The configuration could not be serialized.
    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The configuration file could not be written.
    #[error("Failed to write {path}: {source}")]
    Write {
        /// File path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A single field holds an invalid value.
    #[error("Invalid value for '{field}': {message}")]
    Validation {
        /// Dotted field name.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields are invalid.
    #[error("{} configuration errors: {}", .0.len(), join_errors(.0))]
    MultipleValidationErrors(Vec<ConfigError>),
}

fn join_errors(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElevoxConfig {
    /// Floor estimator tuning.
    pub detection: DetectionConfig,
    /// Scan duty cycle.
    pub scan: ScanConfig,
    /// Reading persistence.
    pub storage: StorageConfig,
    /// HTTP server.
    pub server: ServerConfig,
    /// Daemon logging.
    pub logging: LoggingConfig,
}

/// Floor estimator tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Beacons weaker than this (dBm) are ignored.
    pub rssi_threshold: i16,
    /// Advantage (dB) a new floor needs before the estimate switches.
    pub hysteresis_margin_db: i16,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            rssi_threshold: RSSI_THRESHOLD,
            hysteresis_margin_db: HYSTERESIS_MARGIN_DB,
        }
    }
}

/// Scan duty cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Cycle period in milliseconds.
    pub interval_ms: u64,
    /// Scan window in milliseconds, at most `interval_ms`.
    pub window_ms: u64,
    /// Bluetooth adapter name (e.g. `hci0`); the system default when unset.
    pub adapter: Option<String>,
    /// Bound of the advertisement queue.
    pub channel_capacity: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval_ms: duration_ms(SCAN_INTERVAL),
            window_ms: duration_ms(SCAN_WINDOW),
            adapter: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl ScanConfig {
    /// Cycle period.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Scan window.
    #[must_use]
    pub const fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Reading persistence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Where the last reading is stored; the platform default when unset.
    pub reading_path: Option<PathBuf>,
}

impl StorageConfig {
    /// Effective reading path.
    #[must_use]
    pub fn reading_path(&self) -> PathBuf {
        self.reading_path.clone().unwrap_or_else(default_reading_path)
    }
}

/// HTTP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address.
    pub bind_address: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 3000)),
        }
    }
}

/// Daemon logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when neither `RUST_LOG` nor `ELEVOX_LOG_LEVEL` is set.
    pub level: String,
    /// Where production log files go; the platform default when unset.
    pub directory: Option<PathBuf>,
    /// Log the open and close of every scan cycle span in development.
    pub cycle_spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            cycle_spans: true,
        }
    }
}

impl ElevoxConfig {
    /// Load configuration from `path` (if it exists) layered under the
    /// environment, then validate it.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or validation fails.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        debug!(path = %path.display(), "Loading configuration");

        let config: Self = config::Config::builder()
            .add_source(File::new(&path.to_string_lossy(), FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix("ELEVOX")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Load from `ELEVOX_CONFIG` or the platform default path.
    ///
    /// # Errors
    ///
    /// See [`ElevoxConfig::load`].
    pub fn load_default() -> ConfigResult<Self> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map_or_else(default_config_path, PathBuf::from);
        Self::load(&path)
    }

    /// Write this configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)?;
        let write_err = |source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        std::fs::write(path, content).map_err(write_err)
    }

    /// Check every field, reporting all problems at once.
    ///
    /// # Errors
    ///
    /// Returns the single violation, or [`ConfigError::MultipleValidationErrors`].
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if !(-127..=0).contains(&self.detection.rssi_threshold) {
            errors.push(ConfigError::Validation {
                field: "detection.rssi_threshold",
                message: format!(
                    "must be between -127 and 0 dBm, got {}",
                    self.detection.rssi_threshold
                ),
            });
        }
        if self.detection.hysteresis_margin_db < 0 {
            errors.push(ConfigError::Validation {
                field: "detection.hysteresis_margin_db",
                message: format!(
                    "must not be negative, got {}",
                    self.detection.hysteresis_margin_db
                ),
            });
        }
        if self.scan.window_ms == 0 {
            errors.push(ConfigError::Validation {
                field: "scan.window_ms",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.scan.window_ms > self.scan.interval_ms {
            errors.push(ConfigError::Validation {
                field: "scan.window_ms",
                message: format!(
                    "must not exceed scan.interval_ms ({} > {})",
                    self.scan.window_ms, self.scan.interval_ms
                ),
            });
        }
        if self.scan.channel_capacity == 0 {
            errors.push(ConfigError::Validation {
                field: "scan.channel_capacity",
                message: "must be greater than zero".to_string(),
            });
        }

        if self.logging.level.trim().is_empty() {
            errors.push(ConfigError::Validation {
                field: "logging.level",
                message: "must not be empty".to_string(),
            });
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }
}

/// Default configuration file location.
///
/// On Linux: `/etc/elevox/config.toml`.
/// Elsewhere: the platform config directory.
#[must_use]
pub fn default_config_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/etc/elevox/config.toml")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "elevox").map_or_else(
            || PathBuf::from("./config.toml"),
            |dirs| dirs.config_dir().join("config.toml"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_constants() {
        let config = ElevoxConfig::default();
        assert_eq!(config.detection.rssi_threshold, -90);
        assert_eq!(config.detection.hysteresis_margin_db, 5);
        assert_eq!(config.scan.interval(), Duration::from_millis(5000));
        assert_eq!(config.scan.window(), Duration::from_millis(2000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[scan]\nwindow_ms = 1500\nadapter = \"hci1\"\n\n[detection]\nrssi_threshold = -85\n",
        )
        .unwrap();

        let config = ElevoxConfig::load(&path).unwrap();
        assert_eq!(config.scan.window_ms, 1500);
        assert_eq!(config.scan.interval_ms, 5000);
        assert_eq!(config.scan.adapter.as_deref(), Some("hci1"));
        assert_eq!(config.detection.rssi_threshold, -85);
        assert_eq!(config.detection.hysteresis_margin_db, 5);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ElevoxConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.scan, ScanConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = ElevoxConfig::default();
        config.detection.hysteresis_margin_db = 8;
        config.storage.reading_path = Some(dir.path().join("reading.json"));

        config.save(&path).unwrap();
        assert_eq!(ElevoxConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_validation_reports_every_problem() {
        let mut config = ElevoxConfig::default();
        config.detection.rssi_threshold = 10;
        config.scan.window_ms = 6000;

        match config.validate().unwrap_err() {
            ConfigError::MultipleValidationErrors(errors) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_logging_section_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[logging]\nlevel = \"debug,hyper=warn\"\ndirectory = \"/tmp/elevox-logs\"\n",
        )
        .unwrap();

        let config = ElevoxConfig::load(&path).unwrap();
        assert_eq!(config.logging.level, "debug,hyper=warn");
        assert_eq!(
            config.logging.directory,
            Some(PathBuf::from("/tmp/elevox-logs"))
        );
        assert!(config.logging.cycle_spans);
    }

    #[test]
    fn test_empty_log_level_is_rejected() {
        let mut config = ElevoxConfig::default();
        config.logging.level = "  ".to_string();
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::Validation {
                field: "logging.level",
                ..
            }
        ));
    }

    #[test]
    fn test_single_validation_error() {
        let mut config = ElevoxConfig::default();
        config.scan.channel_capacity = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Validation {
                field: "scan.channel_capacity",
                ..
            }
        ));
    }
}
