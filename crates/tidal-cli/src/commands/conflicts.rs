use chrono::Utc;
use tidal_core::conflict::Resolution;
use tidal_core::models::ConflictId;
use tidal_core::ResolutionStrategy;

use crate::commands::common::{
    format_conflict_lines, parse_payload, print_json, print_lines, CliContext,
};
use crate::error::CliError;

pub async fn run_conflicts(
    ctx: &CliContext,
    table: Option<&str>,
    as_json: bool,
) -> Result<(), CliError> {
    let engine = ctx.open_engine().await?;
    let conflicts = match table {
        Some(table) => engine.get_conflicts_for_table(table).await?,
        None => engine.get_unresolved_conflicts().await?,
    };

    if as_json {
        return print_json(&conflicts);
    }
    print_lines(
        &format_conflict_lines(&conflicts, Utc::now().timestamp_millis()),
        "No unresolved conflicts.",
    );
    Ok(())
}

pub async fn run_resolve(
    ctx: &CliContext,
    id: &str,
    strategy: &str,
    raw_payload: Option<&str>,
) -> Result<(), CliError> {
    let id = id
        .trim()
        .parse::<ConflictId>()
        .map_err(|_| CliError::InvalidConflictId(id.to_string()))?;
    let strategy = strategy.parse::<ResolutionStrategy>()?;
    let manual = raw_payload.map(parse_payload).transpose()?;
    if strategy == ResolutionStrategy::ManualMerge && manual.is_none() {
        return Err(CliError::MissingManualPayload);
    }

    let engine = ctx.open_engine().await?;
    match engine
        .resolve_conflict(&id, strategy, manual.as_ref())
        .await?
    {
        Resolution::Resolved(payload) => {
            println!("Resolved {id} with {strategy}");
            print_json(&payload)?;
        }
        Resolution::Deferred => println!("Deferred {id}"),
    }
    Ok(())
}
