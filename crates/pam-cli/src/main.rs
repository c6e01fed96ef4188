//! pam - Pattern Agentic Messaging command-line entry point

use clap::Parser;
use tracing::{error, info, Level};

use pam_cli::{cli::Cli, commands::CommandDispatcher, config::CliConfig, error::Result};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_configuration(&cli) {
        Ok(config) => config,
        Err(e) => {
            setup_logging(Level::INFO);
            error!("Failed to load configuration: {}", e);
            std::process::exit(2);
        }
    };

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        config.log_level().unwrap_or(Level::INFO)
    };
    setup_logging(level);

    if let Err(e) = CommandDispatcher::execute(cli.command, config).await {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }

    info!("pam exited successfully");
}

/// Setup logging at the given maximum level
fn setup_logging(level: Level) {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Load configuration from file or use defaults
fn load_configuration(cli: &Cli) -> Result<CliConfig> {
    match &cli.config {
        Some(path) => CliConfig::load_from_file(path),
        None => Ok(CliConfig::default()),
    }
}
