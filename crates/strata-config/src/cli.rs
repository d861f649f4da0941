//! Command-line overrides for storage settings.

use std::path::PathBuf;

use crate::{CompressionSetting, StorageConfig};

/// Global command-line flags shared by Strata binaries.
///
/// CLI values override settings loaded from `storage.ron`.
#[derive(clap::Args, Debug, Default, Clone)]
pub struct CliArgs {
    /// Path to config directory (overrides default location).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Compression for chunks written by this run.
    #[arg(long, global = true, value_enum)]
    pub compression: Option<CompressionSetting>,

    /// World directory holding region files.
    #[arg(long, global = true)]
    pub world: Option<PathBuf>,

    /// Background I/O worker threads.
    #[arg(long, global = true)]
    pub io_threads: Option<usize>,
}

impl StorageConfig {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref level) = args.log_level {
            self.log_level = level.clone();
        }
        if let Some(compression) = args.compression {
            self.compression = compression;
        }
        if let Some(ref world) = args.world {
            self.world_dir = world.clone();
        }
        if let Some(threads) = args.io_threads {
            self.io_threads = threads;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = StorageConfig::default();
        let args = CliArgs {
            log_level: Some("debug".to_string()),
            compression: Some(CompressionSetting::Gzip),
            world: Some(PathBuf::from("/tmp/w")),
            ..CliArgs::default()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.compression, CompressionSetting::Gzip);
        assert_eq!(config.world_dir, PathBuf::from("/tmp/w"));
        // Non-overridden fields retain defaults
        assert_eq!(config.io_threads, 0);
        assert_eq!(config.compression_level, 6);
    }

    #[test]
    fn test_cli_no_override() {
        let original = StorageConfig::default();
        let mut config = StorageConfig::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, original);
    }

    #[test]
    fn test_flags_parse_through_clap() {
        use clap::Parser;

        #[derive(Parser)]
        struct Harness {
            #[command(flatten)]
            args: CliArgs,
        }

        let harness =
            Harness::try_parse_from(["strata", "--compression", "none", "--io-threads", "4"])
                .unwrap();
        assert_eq!(harness.args.compression, Some(CompressionSetting::None));
        assert_eq!(harness.args.io_threads, Some(4));
        assert!(harness.args.config.is_none());
    }
}
