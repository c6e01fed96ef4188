//! pam CLI library
//!
//! Configuration loading, the loopback demo and command execution behind
//! the `pam` binary.

pub mod cli;
pub mod commands;
pub mod config;
pub mod demo;
pub mod error;

pub use cli::{Cli, Commands};
pub use config::CliConfig;
pub use demo::{run_demo, DemoReport};
pub use error::{CliError, Result};
