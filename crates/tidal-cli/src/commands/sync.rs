use crate::cli::SyncCommands;
use crate::commands::common::{format_session_lines, print_json, print_lines, CliContext};
use crate::error::CliError;

pub async fn run_sync(ctx: &CliContext, command: Option<SyncCommands>) -> Result<(), CliError> {
    match command {
        None => run_sync_now(ctx).await,
        Some(SyncCommands::Status { json }) => run_sync_status(ctx, json).await,
        Some(SyncCommands::History { limit, json }) => run_sync_history(ctx, limit, json).await,
        Some(SyncCommands::Retry) => {
            let engine = ctx.open_engine().await?;
            let reset = engine.retry_failed().await?;
            println!("Reset {reset} failed mutation(s)");
            Ok(())
        }
        Some(SyncCommands::Refresh { tables }) => {
            let engine = ctx.open_engine().await?;
            let refreshed = engine.refresh_from_server(&tables).await?;
            println!("Refreshed {refreshed} record(s)");
            Ok(())
        }
    }
}

pub async fn run_sync_now(ctx: &CliContext) -> Result<(), CliError> {
    let engine = ctx.open_engine().await?;
    let session = engine.sync_now().await?;

    println!(
        "Sync {}: {}/{} processed, {} conflict(s), {} error(s)",
        session.status,
        session.records_processed,
        session.records_total,
        session.conflicts_detected,
        session.errors_encountered
    );
    for message in &session.error_messages {
        println!("  {message}");
    }
    Ok(())
}

async fn run_sync_status(ctx: &CliContext, as_json: bool) -> Result<(), CliError> {
    let engine = ctx.open_engine().await?;
    let status = engine.get_sync_status().await?;
    if as_json {
        return print_json(&status);
    }

    println!("Backend:   {}", status.backend);
    println!("Pending:   {}", status.pending_count);
    println!("Conflicts: {}", status.conflict_count);
    println!("Failed:    {}", status.failed_count);
    match &status.last_session {
        Some(session) => {
            println!("Last sync:");
            print_lines(&format_session_lines(std::slice::from_ref(session)), "");
        }
        None => println!("Last sync: never"),
    }
    Ok(())
}

async fn run_sync_history(ctx: &CliContext, limit: usize, as_json: bool) -> Result<(), CliError> {
    let engine = ctx.open_engine().await?;
    let sessions = engine.get_sync_history(limit).await?;
    if as_json {
        return print_json(&sessions);
    }
    print_lines(&format_session_lines(&sessions), "No sync sessions recorded.");
    Ok(())
}
