//! `strata`: inspect, verify and dump region files.
//!
//! Configuration is loaded from `storage.ron` and can be overridden via the
//! global flags, e.g. `strata --log-level debug verify world/r.0.0.mca`.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use strata_config::{CliArgs, StorageConfig, default_config_dir};

#[derive(Parser, Debug)]
#[command(name = "strata", version, about = "Inspect Strata region files")]
struct Cli {
    #[command(flatten)]
    args: CliArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Chunk count, sector usage and timestamp range.
    Info {
        /// Region file, or a name inside the world directory.
        region: PathBuf,
    },
    /// Check the sector table and decode every chunk.
    Verify {
        /// Region file, or a name inside the world directory.
        region: PathBuf,
    },
    /// Print a summary of one chunk.
    Dump {
        /// Region file, or a name inside the world directory.
        region: PathBuf,
        /// Chunk X (masked to the region).
        #[arg(allow_negative_numbers = true)]
        x: i32,
        /// Chunk Z (masked to the region).
        #[arg(allow_negative_numbers = true)]
        z: i32,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config_dir = cli.args.config.clone().unwrap_or_else(default_config_dir);
    let mut config = StorageConfig::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        StorageConfig::default()
    });
    config.apply_cli_overrides(&cli.args);

    let log_dir = config_dir.join("logs");
    if let Err(e) = strata_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config))
    {
        eprintln!("Failed to initialize logging: {e}");
    }

    let result = match &cli.command {
        Command::Info { region } => commands::info(&config, region).map(|info| {
            print!("{info}");
            ExitCode::SUCCESS
        }),
        Command::Verify { region } => commands::verify(&config, region).map(|outcome| {
            print!("{outcome}");
            if outcome.is_ok() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }),
        Command::Dump { region, x, z } => commands::dump(&config, region, *x, *z).map(|dump| {
            print!("{dump}");
            ExitCode::SUCCESS
        }),
    };

    result.unwrap_or_else(|e| {
        tracing::error!(error = %e, "command failed");
        eprintln!("error: {e}");
        ExitCode::FAILURE
    })
}
