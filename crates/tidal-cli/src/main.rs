//! Tidal CLI - queue record writes, run sync sessions, resolve conflicts and
//! manage the media cache from the terminal.

mod cli;
mod commands;
mod error;

use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::cache::run_cache;
use crate::commands::common::CliContext;
use crate::commands::config::run_config;
use crate::commands::conflicts::{run_conflicts, run_resolve};
use crate::commands::records::{run_delete, run_get, run_save};
use crate::commands::sync::run_sync;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(
        "tidal=info"
            .parse()
            .map_err(|error| CliError::Config(format!("invalid log directive: {error}")))?,
    );
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let ctx = CliContext::resolve(cli.db_path, cli.config);

    match cli.command {
        Commands::Save {
            table,
            id,
            payload,
            create,
        } => run_save(&ctx, &table, &id, &payload, create).await?,
        Commands::Delete { table, id } => run_delete(&ctx, &table, &id).await?,
        Commands::Get { table, id } => run_get(&ctx, &table, &id).await?,
        Commands::Sync { command } => run_sync(&ctx, command).await?,
        Commands::Conflicts { table, json } => run_conflicts(&ctx, table.as_deref(), json).await?,
        Commands::Resolve {
            id,
            strategy,
            payload,
        } => run_resolve(&ctx, &id, &strategy, payload.as_deref()).await?,
        Commands::Cache { command } => run_cache(&ctx, command).await?,
        Commands::Config { command } => run_config(&ctx, command)?,
    }

    Ok(())
}
