//! Command execution

use tracing::info;

use crate::cli::Commands;
use crate::config::CliConfig;
use crate::demo::run_demo;
use crate::error::Result;

/// Executes one parsed subcommand against the loaded configuration
pub struct CommandDispatcher;

impl CommandDispatcher {
    pub async fn execute(command: Commands, config: CliConfig) -> Result<()> {
        match command {
            Commands::Demo { requests, clients } => {
                let report = run_demo(&config, requests, clients).await?;
                println!(
                    "answered {}/{} requests, served {} clients ({} messages dispatched)",
                    report.requests_answered,
                    requests,
                    report.clients_served,
                    report.messages_dispatched
                );
            }
            Commands::Check => {
                config.validate()?;
                info!(local = %config.app.base().local_name, "configuration is valid");
                println!("configuration OK");
            }
            Commands::ShowConfig => {
                print!("{}", config.to_redacted_toml()?);
            }
        }
        Ok(())
    }
}
