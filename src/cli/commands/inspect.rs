//! Inspect command implementation.

use crate::cli::commands::start::{init_tracing, load_config};
use crate::control::identity::AccountId;
use crate::core::config::ConfigOverrides;
use crate::master::{Master, Providers};
use crate::metadata::fixture::StaticMetadata;
use crate::protocol::bridge::UNMAPPED;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

/// Inspect scopes, ownership chains and protocol views.
#[derive(Args, Debug)]
pub struct InspectArgs {
    #[command(subcommand)]
    pub command: InspectCommand,
}

/// Inspect subcommands.
#[derive(Subcommand, Debug)]
pub enum InspectCommand {
    /// Show a user's identity and scope.
    Scope {
        /// Username.
        #[arg(short, long)]
        user: String,
        /// Table to authorize against; every rule when absent.
        #[arg(short, long)]
        table: Option<String>,
    },
    /// Show an account's ownership chain.
    Chain {
        /// Account id.
        #[arg(short, long)]
        account: u64,
    },
    /// Show the table (or column) enumeration of a protocol version.
    Bridge {
        /// Protocol version token.
        #[arg(short, long)]
        version: String,
        /// Canonical table id whose columns to list.
        #[arg(short, long)]
        table: Option<i32>,
    },
}

/// Run the inspect command.
pub fn run_inspect(args: InspectArgs, config_path: &Path, overrides: &ConfigOverrides) -> Result<()> {
    let config = load_config(config_path, overrides)?;
    init_tracing(&config.telemetry.log_level);

    let metadata = Arc::new(StaticMetadata::from_file(Path::new(&config.paths.metadata))?);
    let master = Master::new(&config, Providers::from_static(metadata))?;

    let report = match args.command {
        InspectCommand::Scope { user, table } => inspect_scope(&master, &user, table.as_deref())?,
        InspectCommand::Chain { account } => {
            let chain = master
                .ownership_chain(AccountId(account))
                .with_context(|| format!("failed to walk ownership chain of {}", account))?;
            serde_json::to_value(chain)?
        }
        InspectCommand::Bridge { version, table } => inspect_bridge(&master, &version, table)?,
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn inspect_scope(master: &Master, user: &str, table: Option<&str>) -> Result<serde_json::Value> {
    let identity = master
        .resolve_identity(user)
        .with_context(|| format!("failed to resolve user {}", user))?;

    let tables: Vec<String> = match table {
        Some(table) => vec![table.to_string()],
        None => master
            .table_rules()
            .iter()
            .map(|rule| rule.table.clone())
            .collect(),
    };

    let mut scopes = serde_json::Map::new();
    for table in tables {
        let entry = match master.scoped_query(&identity, &table) {
            Ok(query) => serde_json::to_value(query)?,
            Err(e) => json!({ "error": e.client_code() }),
        };
        scopes.insert(table, entry);
    }

    Ok(json!({
        "identity": identity.as_ref(),
        "tables": scopes,
    }))
}

fn inspect_bridge(master: &Master, version: &str, table: Option<i32>) -> Result<serde_json::Value> {
    let view = master
        .bridge()
        .view(version)
        .with_context(|| format!("failed to build view for protocol version {}", version))?;

    let ids = match table {
        Some(table) => match view.columns(table) {
            Some(columns) => columns.canonical_ids().to_vec(),
            None => anyhow::bail!("table {} does not exist at version {}", table, version),
        },
        None => view.tables().canonical_ids().to_vec(),
    };

    let ordinals: Vec<_> = ids
        .iter()
        .enumerate()
        .map(|(ordinal, canonical)| json!({ "ordinal": ordinal, "canonical": canonical }))
        .collect();

    Ok(json!({
        "version": view.version(),
        "table": table,
        "unmapped": UNMAPPED,
        "ordinals": ordinals,
    }))
}
