use std::time::Duration;

use tidal_core::models::CachePriority;
use tidal_core::FetchOptions;

use crate::cli::{CacheCommands, PriorityArg};
use crate::commands::common::{format_bytes, print_json, CliContext};
use crate::error::CliError;

impl From<PriorityArg> for CachePriority {
    fn from(value: PriorityArg) -> Self {
        match value {
            PriorityArg::Low => Self::Low,
            PriorityArg::Normal => Self::Normal,
            PriorityArg::High => Self::High,
            PriorityArg::Critical => Self::Critical,
        }
    }
}

pub async fn run_cache(ctx: &CliContext, command: CacheCommands) -> Result<(), CliError> {
    let cache = ctx.open_cache().await?;

    match command {
        CacheCommands::Fetch {
            url,
            priority,
            essential,
            temporary,
            ttl,
            owner,
        } => {
            let options = FetchOptions {
                priority: priority.into(),
                is_essential: essential,
                is_temporary: temporary,
                ttl: ttl.map(Duration::from_secs),
                owner_id: owner,
                ..FetchOptions::default()
            };
            let entry = cache.get(&url, options).await?;
            println!("{}", entry.local_path);
        }
        CacheCommands::Optimize => {
            let removed = cache.optimize().await?;
            println!("Removed {removed} entr{}", plural_y(removed));
        }
        CacheCommands::ClearTemp => {
            let removed = cache.clear_temporary().await?;
            println!("Removed {removed} temporary entr{}", plural_y(removed));
        }
        CacheCommands::EvictOwner { owner } => {
            let removed = cache.evict_owner(&owner).await?;
            println!("Removed {removed} entr{} for {owner}", plural_y(removed));
        }
        CacheCommands::Clear => {
            let removed = cache.clear_all().await?;
            println!("Removed {removed} entr{}", plural_y(removed));
        }
        CacheCommands::Stats { json } => {
            let stats = cache.stats().await?;
            if json {
                return print_json(&stats);
            }
            println!("Directory: {}", cache.cache_dir().display());
            println!("Entries:   {}", stats.entry_count);
            println!(
                "Usage:     {} / {} ({:.1}%)",
                format_bytes(stats.total_size),
                format_bytes(stats.max_size),
                stats.usage_ratio * 100.0
            );
            println!("Expired:   {}", stats.expired_count);
            println!("Temporary: {}", stats.temporary_count);
            println!("Essential: {}", stats.essential_count);
        }
    }
    Ok(())
}

const fn plural_y(count: u64) -> &'static str {
    if count == 1 {
        "y"
    } else {
        "ies"
    }
}
