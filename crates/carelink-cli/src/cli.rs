use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "carelink")]
#[command(about = "Offline-first record sync for the Carelink CRM client")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local cache database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to the settings file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a record through every tier
    Put {
        /// Feature name (notes, profile, settings, ...)
        feature: String,
        /// Record key
        key: String,
        /// JSON value; anything that does not parse is stored as a string
        value: String,
    },
    /// Read a record, walking memory, remote, local and backup tiers
    Get {
        feature: String,
        key: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a record everywhere
    #[command(alias = "rm")]
    Delete { feature: String, key: String },
    /// Show per-feature sync status counts
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Push every pending record once
    Reconcile,
    /// Requeue a record that failed permanently
    Retry { feature: String, key: String },
    /// Run the periodic reconciler until interrupted
    Watch,
    /// List recently resolved conflicts
    Conflicts {
        /// Number of resolutions to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Only show resolutions for one record, as TABLE/RECORD_ID
        #[arg(long, value_name = "TABLE/ID")]
        record: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve a user by id or email through the lookup layers
    User {
        /// User id
        id: Option<String>,
        /// Email address
        #[arg(long)]
        email: Option<String>,
    },
    /// Write or read encrypted audit entries
    Audit {
        #[command(subcommand)]
        command: AuditCommands,
    },
    /// Manage the settings file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum Outcome {
    Success,
    Failure,
}

#[derive(Subcommand)]
pub enum AuditCommands {
    /// Record an audited action
    Record {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        user_name: String,
        #[arg(long)]
        action: String,
        #[arg(long)]
        resource: String,
        #[arg(long, value_enum, default_value_t = Outcome::Success)]
        outcome: Outcome,
        /// Failure reason, only kept for failed actions
        #[arg(long)]
        reason: Option<String>,
        /// Extra JSON details
        #[arg(long)]
        details: Option<String>,
    },
    /// Show one audit entry with its sealed fields opened
    Show { id: String },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Write a settings file
    Init {
        #[arg(long, value_name = "URL")]
        supabase_url: Option<String>,
        #[arg(long, value_name = "KEY")]
        supabase_anon_key: Option<String>,
        #[arg(long, value_name = "ID")]
        tenant_id: Option<String>,
        #[arg(long, value_name = "ID")]
        device_id: Option<String>,
        /// Generate a field encryption key for the audit log
        #[arg(long)]
        generate_key: bool,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective settings with secrets redacted
    Show,
    /// Print a fresh base64 field encryption key
    Keygen,
}
