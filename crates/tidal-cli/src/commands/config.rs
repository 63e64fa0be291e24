use std::path::Path;

use tidal_core::util::normalize_text_option;
use tidal_core::EngineConfig;

use crate::cli::ConfigCommands;
use crate::commands::common::{print_json, CliContext};
use crate::error::CliError;

pub fn run_config(ctx: &CliContext, command: ConfigCommands) -> Result<(), CliError> {
    match command {
        ConfigCommands::Show => print_json(&ctx.load_config()?),
        ConfigCommands::Path => {
            println!("{}", ctx.config_path.display());
            Ok(())
        }
        ConfigCommands::Init { remote_url, force } => {
            run_config_init(&ctx.config_path, remote_url, force)
        }
    }
}

#[allow(clippy::needless_pass_by_value)]
pub fn run_config_init(
    path: &Path,
    remote_url: Option<String>,
    force: bool,
) -> Result<(), CliError> {
    if path.exists() && !force {
        return Err(CliError::Config(format!(
            "{} already exists; pass --force to overwrite",
            path.display()
        )));
    }

    let mut config = EngineConfig::default();
    config.sync.remote_url = normalize_text_option(remote_url);
    config
        .validate()
        .map_err(|error| CliError::Config(error.to_string()))?;
    config.save_to_path(path)?;

    println!("Config written to {}", path.display());
    if config.sync.remote_url.is_none() {
        println!("No remote configured; records stay local until `remote_url` is set.");
    }
    Ok(())
}
