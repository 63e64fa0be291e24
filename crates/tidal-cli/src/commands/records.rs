use tidal_core::Operation;

use crate::commands::common::{parse_payload, print_json, CliContext};
use crate::error::CliError;

pub async fn run_save(
    ctx: &CliContext,
    table: &str,
    record_id: &str,
    raw_payload: &str,
    create: bool,
) -> Result<(), CliError> {
    let payload = parse_payload(raw_payload)?;
    let operation = if create {
        Operation::Create
    } else {
        Operation::Update
    };

    let engine = ctx.open_engine().await?;
    match engine
        .save_for_sync(table, record_id, payload, operation)
        .await?
    {
        Some(mutation) => println!("{} {}", mutation.operation, mutation.id),
        None => println!("Cancelled unsent create"),
    }
    Ok(())
}

pub async fn run_delete(ctx: &CliContext, table: &str, record_id: &str) -> Result<(), CliError> {
    let engine = ctx.open_engine().await?;
    match engine.delete_for_sync(table, record_id).await? {
        Some(mutation) => println!("{} {}", mutation.operation, mutation.id),
        None => println!("Cancelled unsent create"),
    }
    Ok(())
}

pub async fn run_get(ctx: &CliContext, table: &str, record_id: &str) -> Result<(), CliError> {
    let engine = ctx.open_engine().await?;
    match engine.get_record(table, record_id).await? {
        Some(payload) => print_json(&payload)?,
        None => println!("Record not found: {table}/{record_id}"),
    }
    Ok(())
}
