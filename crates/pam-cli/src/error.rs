//! Error handling for the pam CLI

use thiserror::Error;

use pam_core::PamError;
use pam_runtime::RuntimeError;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Messaging error: {0}")]
    Pam(#[from] PamError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Demo failed: {0}")]
    Demo(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),
}

impl From<pam_core::ConfigError> for CliError {
    fn from(err: pam_core::ConfigError) -> Self {
        CliError::Pam(err.into())
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
