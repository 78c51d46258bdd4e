//! Hostplane - unified CLI entrypoint.
//!
//! Usage:
//!   hostplane start --config config/hostplane.toml
//!   hostplane config validate --config config/hostplane.toml
//!   hostplane inspect scope --user carol [--table mailboxes]
//!   hostplane inspect chain --account 3
//!   hostplane inspect bridge --version 2019.9 [--table 4]

use anyhow::Result;
use clap::Parser;
use hostplane::cli::commands::{run_config, run_inspect, run_start_with_config};
use hostplane::cli::{Cli, Commands};
use hostplane::config::ConfigOverrides;
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Determine config path - use global --config or default
    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config/hostplane.toml"));

    let overrides = ConfigOverrides {
        log_level: cli.log_level,
        metadata: cli.metadata,
    };

    match cli.command {
        Commands::Start(_args) => run_start_with_config(&config_path, &overrides).await,
        Commands::Config(args) => run_config(args, &config_path),
        Commands::Inspect(args) => run_inspect(args, &config_path, &overrides),
    }
}
