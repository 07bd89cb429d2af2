use anyhow::{Context, Result};
use history_expiry::ExpiryConfig;
use history_types::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;
const MICROS_PER_SECOND: u64 = 1_000_000;

/// Complete service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Store configuration
    pub storage: StorageConfig,
    /// Expiration and archival configuration
    pub expiry: ExpirySettings,
    /// Bookmarked URLs, never deleted while bookmarked
    pub bookmarks: BookmarkConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Rocksdb,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Data directory
    pub datadir: PathBuf,
    /// Store backend
    pub backend: StorageBackend,
    /// Keep an archived history store
    pub archive: bool,
    /// Keep a favicon store
    pub favicons: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpirySettings {
    /// Visits older than this many days are archived
    pub threshold_days: u64,
    /// Visits per background batch
    pub batch_size: usize,
    /// Seconds between batches while work remains
    pub expiration_delay_secs: u64,
    /// Seconds to wait once every reader is drained
    pub empty_delay_secs: u64,
    /// Days ahead of the threshold that subframe visits expire
    pub early_expiration_days: u64,
    /// Archive in the background while running
    pub auto_archive: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BookmarkConfig {
    pub urls: Vec<Url>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level or `EnvFilter` directive
    pub level: String,
    /// Emit JSON lines
    pub json: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            datadir: default_datadir(),
            backend: if cfg!(feature = "rocksdb") {
                StorageBackend::Rocksdb
            } else {
                StorageBackend::Memory
            },
            archive: true,
            favicons: true,
        }
    }
}

impl Default for ExpirySettings {
    fn default() -> Self {
        Self {
            threshold_days: 90,
            batch_size: 32,
            expiration_delay_secs: 30,
            empty_delay_secs: 5 * 60,
            early_expiration_days: 3,
            auto_archive: true,
        }
    }
}

impl ExpirySettings {
    pub fn threshold(&self) -> Result<Duration> {
        days_to_duration(self.threshold_days).context("threshold_days is out of range")
    }

    pub fn to_expiry_config(&self) -> Result<ExpiryConfig> {
        Ok(ExpiryConfig {
            expiration_threshold: self.threshold()?,
            batch_size: self.batch_size,
            expiration_delay: Duration::from_secs(self.expiration_delay_secs),
            empty_delay: Duration::from_secs(self.empty_delay_secs),
            early_expiration_advance: days_to_duration(self.early_expiration_days)
                .context("early_expiration_days is out of range")?,
            auto_archive: self.auto_archive,
        })
    }
}

/// Converts a day count into a duration that fits a microsecond timestamp
pub fn days_to_duration(days: u64) -> Result<Duration> {
    days.checked_mul(SECONDS_PER_DAY)
        .and_then(|secs| secs.checked_mul(MICROS_PER_SECOND))
        .filter(|micros| i64::try_from(*micros).is_ok())
        .map(Duration::from_micros)
        .with_context(|| format!("{} days does not fit in a timestamp", days))
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Platform data directory, or `./data` when there is none
pub fn default_datadir() -> PathBuf {
    directories::ProjectDirs::from("org", "history-rust", "history-rust")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./data"))
}

impl Config {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read configuration file")?;

        let config: Config = toml::from_str(&content).context("Failed to parse configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Save configuration to file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        fs::write(path, content).context("Failed to write configuration file")?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.expiry.batch_size == 0 {
            anyhow::bail!("batch_size must be greater than 0");
        }

        if self.expiry.threshold_days == 0 {
            anyhow::bail!("threshold_days must be greater than 0");
        }

        self.expiry.to_expiry_config()?;

        if self.expiry.expiration_delay_secs == 0 || self.expiry.empty_delay_secs == 0 {
            anyhow::bail!("archive delays must be greater than 0");
        }

        if self.storage.backend == StorageBackend::Rocksdb && !cfg!(feature = "rocksdb") {
            anyhow::bail!("rocksdb backend requested but this build lacks the rocksdb feature");
        }

        Ok(())
    }
}
