//! pam CLI configuration
//!
//! A single TOML file with the application endpoint under `[app]`, runtime
//! tuning under `[runtime]`, and the log level:
//!
//! ```toml
//! log_level = "info"
//!
//! [app]
//! kind = "p2p"
//! local_name = "org/default/pam-demo"
//! endpoint = "memory://loopback"
//! auth_secret = "change-me"
//! peer_name = "org/default/echo"
//!
//! [runtime]
//! shutdown_grace_ms = 2000
//! ```
//!
//! Without a file the defaults below are used.

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::Level;

use pam_core::{AppConfig, P2pConfig, RuntimeConfig, SessionMode};

use crate::error::{CliError, Result};

pub const DEFAULT_LOCAL_NAME: &str = "org/default/pam-demo";
pub const DEFAULT_ENDPOINT: &str = "memory://loopback";
pub const DEFAULT_PEER: &str = "org/default/echo";
const DEMO_SECRET: &str = "loopback-demo-secret";

fn default_log_level() -> String {
    "info".to_string()
}

/// Complete configuration for the pam binary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Application endpoint, point-to-point or group
    pub app: AppConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        let mut app = P2pConfig::new(DEFAULT_LOCAL_NAME, DEFAULT_ENDPOINT).with_peer(DEFAULT_PEER);
        app.base.auth_secret = Some(DEMO_SECRET.to_string());
        app.mode = SessionMode::Active;

        Self {
            log_level: default_log_level(),
            app: app.into(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl CliConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: CliConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to TOML with the auth secret masked
    pub fn to_redacted_toml(&self) -> Result<String> {
        let mut shown = self.clone();
        let base = match &mut shown.app {
            AppConfig::P2p(config) => &mut config.base,
            AppConfig::Group(config) => &mut config.base,
        };
        if base.auth_secret.is_some() {
            base.auth_secret = Some("<redacted>".to_string());
        }
        Ok(toml::to_string_pretty(&shown)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.app.validate()?;
        self.runtime.validate()?;
        self.log_level()?;
        Ok(())
    }

    /// Parsed `log_level`
    pub fn log_level(&self) -> Result<Level> {
        Level::from_str(&self.log_level)
            .map_err(|_| CliError::Config(format!("unknown log level `{}`", self.log_level)))
    }

    /// Peer dialled by the demo's outbound session
    pub fn demo_peer(&self) -> &str {
        match &self.app {
            AppConfig::P2p(config) => config.peer_name.as_deref().unwrap_or(DEFAULT_PEER),
            AppConfig::Group(_) => DEFAULT_PEER,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;
    use pam_core::GroupMode;

    #[test]
    fn test_default_config_is_valid() {
        let config = CliConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.log_level().unwrap(), Level::INFO);
        assert_eq!(config.demo_peer(), DEFAULT_PEER);
    }

    #[test]
    fn test_load_p2p_from_toml() {
        let config = CliConfig::from_toml_str(
            r#"
            log_level = "debug"

            [app]
            kind = "p2p"
            local_name = "acme/prod/agent/1"
            endpoint = "http://localhost:46357"
            auth_secret = "s3cret"
            peer_name = "acme/prod/tools"
            timeout_ms = 1500

            [runtime]
            default_request_timeout_ms = 750
            "#,
        )
        .unwrap();

        assert_eq!(config.log_level().unwrap(), Level::DEBUG);
        let AppConfig::P2p(app) = &config.app else {
            panic!("expected a point-to-point config");
        };
        assert_eq!(app.base.timeout, Duration::from_millis(1500));
        assert_eq!(app.base.max_retries, 5);
        assert_eq!(app.mode, SessionMode::Active);
        assert_eq!(config.demo_peer(), "acme/prod/tools");
        assert_eq!(config.runtime.shutdown_grace, Duration::from_secs(2));
        assert_eq!(
            config.runtime.default_request_timeout,
            Some(Duration::from_millis(750))
        );
    }

    #[test]
    fn test_load_group_from_toml() {
        let config = CliConfig::from_toml_str(
            r#"
            [app]
            kind = "group"
            local_name = "acme/prod/moderator"
            endpoint = "http://localhost:46357"
            channel_name = "acme/prod/room"
            invites = ["acme/prod/alice", "acme/prod/bob"]
            mls_enabled = false
            "#,
        )
        .unwrap();

        let AppConfig::Group(app) = &config.app else {
            panic!("expected a group config");
        };
        assert_eq!(app.mode, GroupMode::Moderator);
        assert_eq!(app.invites.len(), 2);
        assert!(!app.base.mls_enabled);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_invalid_configs_are_rejected() {
        let bad_name = r#"
            [app]
            kind = "p2p"
            local_name = "not-a-name"
            endpoint = "memory://x"
        "#;
        assert!(matches!(CliConfig::from_toml_str(bad_name), Err(CliError::Pam(_))));

        let bad_level = r#"
            log_level = "chatty"
            [app]
            kind = "p2p"
            local_name = "org/ns/app"
            endpoint = "memory://x"
        "#;
        assert!(matches!(CliConfig::from_toml_str(bad_level), Err(CliError::Config(_))));

        assert!(matches!(
            CliConfig::from_toml_str("[app]\nkind = \"carrier-pigeon\""),
            Err(CliError::TomlParsing(_))
        ));
    }

    #[test]
    fn test_redacted_toml_round_trips_without_secret() {
        let config = CliConfig::default();
        let shown = config.to_redacted_toml().unwrap();
        assert!(!shown.contains(DEMO_SECRET));
        assert!(shown.contains("<redacted>"));

        let reloaded = CliConfig::from_toml_str(&shown).unwrap();
        assert_eq!(reloaded.app.base().local_name, DEFAULT_LOCAL_NAME);
    }
}
