//! Command implementations

mod config;
mod mosaic;
mod plan;
mod run;
mod suggest;

use crate::cli::{Cli, Commands};
use crate::config_loader::load_config_with_overrides;
use crate::output::OutputWriter;
use anyhow::Result;
use geobatch_core::config::CliConfigOverrides;

/// Execute a CLI command
pub async fn execute(cli: Cli) -> Result<()> {
    let output = OutputWriter::new(cli.json);
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Plan(args) => {
            let config = load_config_with_overrides(config_path, args.overrides())?;
            plan::execute(args, &config, &output)
        }
        Commands::Suggest(args) => suggest::execute(args, &output),
        Commands::Mosaic(args) => {
            let config = load_config_with_overrides(config_path, args.overrides())?;
            mosaic::execute(args, &config, &output)
        }
        Commands::Run(args) => {
            let config = load_config_with_overrides(config_path, args.overrides())?;
            run::execute(args, &config, &output).await
        }
        Commands::Config => {
            let config = load_config_with_overrides(config_path, CliConfigOverrides::default())?;
            config::execute(&config, &output)
        }
    }
}
