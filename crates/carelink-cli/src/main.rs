//! carelink - command-line interface for Carelink offline-first sync
//!
//! Reads and writes records through the cloud, local cache and memory tiers,
//! and manages conflicts, audit entries and the settings file.

mod cli;
mod commands;
mod error;


use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::audit::run_audit;
use crate::commands::common::StoragePaths;
use crate::commands::config::run_config;
use crate::commands::conflicts::run_conflicts;
use crate::commands::delete::run_delete;
use crate::commands::get::run_get;
use crate::commands::put::run_put;
use crate::commands::reconcile::{run_reconcile, run_retry, run_watch};
use crate::commands::status::run_status;
use crate::commands::user::run_user;
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

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("carelink=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let paths = StoragePaths::resolve(cli.db_path, cli.config);

    match cli.command {
        Commands::Put {
            feature,
            key,
            value,
        } => run_put(&feature, &key, &value, &paths).await,
        Commands::Get { feature, key, json } => run_get(&feature, &key, json, &paths).await,
        Commands::Delete { feature, key } => run_delete(&feature, &key, &paths).await,
        Commands::Status { json } => run_status(json, &paths).await,
        Commands::Reconcile => run_reconcile(&paths).await,
        Commands::Retry { feature, key } => run_retry(&feature, &key, &paths).await,
        Commands::Watch => run_watch(&paths).await,
        Commands::Conflicts {
            limit,
            record,
            json,
        } => run_conflicts(limit, record.as_deref(), json, &paths).await,
        Commands::User { id, email } => run_user(id.as_deref(), email.as_deref(), &paths).await,
        Commands::Audit { command } => run_audit(command, &paths).await,
        Commands::Config { command } => run_config(command, &paths),
    }
}
