//! Command-line interface.
//!
//! Unified CLI for Hostplane operations.

pub mod commands;

use clap::{Parser, Subcommand};

/// Hostplane - control-plane master core of a multi-tenant hosting platform.
#[derive(Parser, Debug)]
#[command(name = "hostplane")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path.
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Metadata snapshot path.
    #[arg(long, global = true)]
    pub metadata: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the Hostplane master.
    Start(commands::StartArgs),
    /// Configuration operations.
    Config(commands::ConfigArgs),
    /// Inspect scopes, ownership chains and protocol views.
    Inspect(commands::InspectArgs),
}
