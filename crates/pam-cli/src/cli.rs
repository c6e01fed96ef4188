//! Command-line interface definitions and parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path (TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a loopback echo demo over the in-memory transport
    Demo {
        /// Requests sent on the outbound session
        #[arg(short, long, default_value_t = 3)]
        requests: usize,
        /// Inbound clients served by the dispatch loop
        #[arg(long, default_value_t = 2)]
        clients: usize,
    },
    /// Load and validate the configuration, then exit
    Check,
    /// Print the effective configuration as TOML
    ShowConfig,
}
