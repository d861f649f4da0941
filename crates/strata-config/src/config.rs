//! Storage settings with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// File name of the persisted config inside the config directory.
pub const CONFIG_FILE: &str = "storage.ron";

/// Platform config directory for Strata, e.g. `~/.config/strata` on Linux.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("strata"))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Top-level storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding `r.<x>.<z>.mca` region files.
    pub world_dir: PathBuf,
    /// Compression for newly written chunks.
    pub compression: CompressionSetting,
    /// Compression level, 0 (fastest) to 9 (smallest).
    pub compression_level: u32,
    /// Sync region files to disk after each payload and header write.
    pub sync_writes: bool,
    /// Background I/O worker threads (0 = one per CPU).
    pub io_threads: usize,
    /// Maximum queued I/O jobs before submissions are refused.
    pub queue_capacity: usize,
    /// Region file handles kept open before idle ones are closed.
    pub max_open_regions: usize,
    /// Retry policy for failed loads and saves.
    pub retry: RetryConfig,
    /// Log filter, e.g. "info" or "warn,strata_storage=debug".
    pub log_level: String,
}

/// Chunk compression scheme as written in config files and on the CLI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum CompressionSetting {
    /// Uncompressed.
    None,
    /// Gzip.
    Gzip,
    /// Zlib.
    #[default]
    Zlib,
}

/// Retry policy for I/O-boundary failures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per operation, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds; doubled for each further retry.
    pub backoff_ms: u64,
}

// --- Default implementations ---

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            world_dir: PathBuf::from("world"),
            compression: CompressionSetting::Zlib,
            compression_level: 6,
            sync_writes: true,
            io_threads: 0,
            queue_capacity: 256,
            max_open_regions: 64,
            retry: RetryConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff_ms: 50,
        }
    }
}

// --- Load / Save / Reload ---

impl StorageConfig {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let config = Self::read(&config_path)?;
            log::info!("Loaded storage config from {}", config_path.display());
            Ok(config)
        } else {
            let config = StorageConfig::default();
            config.save(config_dir)?;
            log::info!("Created default storage config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `storage.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(2)
            .separate_tuple_members(true)
            .enumerate_arrays(false);
        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(config_dir.join(CONFIG_FILE), serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let new_config = Self::read(&config_dir.join(CONFIG_FILE))?;
        if &new_config != self {
            log::info!("Storage config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }

    /// Checks value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.compression_level > 9 {
            return Err(ConfigError::InvalidValue {
                field: "compression_level",
                reason: format!("{} is above 9", self.compression_level),
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "queue_capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_open_regions == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_open_regions",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retry.max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: StorageConfig = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }
}
