use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "tidal")]
#[command(about = "Offline-first record sync from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to the JSON config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Queue a record write
    Save {
        /// Table name
        table: String,
        /// Record ID
        id: String,
        /// JSON object payload
        payload: String,
        /// Queue as a create instead of an update
        #[arg(long)]
        create: bool,
    },
    /// Queue a record delete
    Delete {
        /// Table name
        table: String,
        /// Record ID
        id: String,
    },
    /// Show the local value of a record
    Get {
        /// Table name
        table: String,
        /// Record ID
        id: String,
    },
    /// Run a sync session or inspect sync state
    Sync {
        #[command(subcommand)]
        command: Option<SyncCommands>,
    },
    /// List unresolved conflicts
    Conflicts {
        /// Only show conflicts for this table
        #[arg(long)]
        table: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve a conflict
    Resolve {
        /// Conflict ID
        id: String,
        /// local, remote, merge, manual or defer
        strategy: String,
        /// JSON object payload for manual merges
        #[arg(long, value_name = "JSON")]
        payload: Option<String>,
    },
    /// Manage the media cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
    /// Show or initialize configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Show queue counts and the last session
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List recent sync sessions
    History {
        /// Number of sessions to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Reset failed mutations for another attempt
    Retry,
    /// Pull remote records into the local snapshot
    Refresh {
        /// Tables to refresh
        #[arg(required = true)]
        tables: Vec<String>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum PriorityArg {
    Low,
    Normal,
    High,
    Critical,
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Fetch an asset into the cache (or hit it)
    Fetch {
        /// Asset URL
        url: String,
        #[arg(long, value_enum, default_value_t = PriorityArg::Normal)]
        priority: PriorityArg,
        /// Keep through eviction
        #[arg(long)]
        essential: bool,
        /// Remove on `cache clear-temp`
        #[arg(long)]
        temporary: bool,
        /// Lifetime in seconds
        #[arg(long, value_name = "SECS")]
        ttl: Option<u64>,
        /// Owner/context ID for bulk eviction
        #[arg(long, value_name = "ID")]
        owner: Option<String>,
    },
    /// Purge expired entries and evict down to the target usage
    Optimize,
    /// Remove temporary entries
    ClearTemp,
    /// Remove every entry of an owner
    EvictOwner {
        /// Owner/context ID
        owner: String,
    },
    /// Remove every entry
    Clear,
    /// Show cache usage
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Print the config file path
    Path,
    /// Write a config file with defaults and the given remote
    Init {
        /// Remote base URL
        #[arg(long, value_name = "URL")]
        remote_url: Option<String>,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
