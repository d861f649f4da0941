//! Configuration for the Strata storage engine.
//!
//! Settings persist to disk as `storage.ron` and can be overridden from the
//! command line via clap. Unknown or missing fields fall back to defaults so
//! older and newer config files keep loading.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{CONFIG_FILE, CompressionSetting, RetryConfig, StorageConfig, default_config_dir};
pub use error::ConfigError;
