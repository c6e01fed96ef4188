//! Configuration
//!
//! Application configuration (point-to-point and group flavours), runtime
//! tuning, and the session configuration handed to the transport when a
//! session is created locally.

use core::time::Duration;
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::types::{GroupMode, Name, SessionMode};

/// Whole milliseconds of `duration`, saturating at `u64::MAX`
pub(crate) fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Serialize `Duration` as integer milliseconds
mod duration_ms {
    use core::time::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(super::saturating_millis(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod option_duration_ms {
    use core::time::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&super::saturating_millis(*duration)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}

// ----------------------------------------------------------------------------
// Base Configuration
// ----------------------------------------------------------------------------

fn default_max_retries() -> u32 {
    5
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_mls_enabled() -> bool {
    true
}

/// Settings shared by every kind of application endpoint
#[derive(Clone, Serialize, Deserialize)]
pub struct BaseConfig {
    /// Local name, `org/namespace/app[/instance]`
    pub local_name: String,
    /// Transport endpoint to connect to
    pub endpoint: String,
    /// Shared secret used for identity; required to start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_secret: Option<String>,
    /// Transport-level retries for sessions created locally
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Transport-level timeout for sessions created locally
    #[serde(
        default = "default_timeout",
        rename = "timeout_ms",
        with = "duration_ms"
    )]
    pub timeout: Duration,
    /// Whether group encryption is requested from the transport
    #[serde(default = "default_mls_enabled")]
    pub mls_enabled: bool,
}

impl BaseConfig {
    pub fn new(local_name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            local_name: local_name.into(),
            endpoint: endpoint.into(),
            auth_secret: None,
            max_retries: default_max_retries(),
            timeout: default_timeout(),
            mls_enabled: default_mls_enabled(),
        }
    }

    pub fn with_auth_secret(mut self, secret: impl Into<String>) -> Self {
        self.auth_secret = Some(secret.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_mls(mut self, enabled: bool) -> Self {
        self.mls_enabled = enabled;
        self
    }

    /// Parsed local name
    pub fn local_name(&self) -> Result<Name, ConfigError> {
        Name::parse(&self.local_name)
    }

    /// The shared secret, or an authentication error when it is missing
    pub fn require_secret(&self) -> Result<&str, ConfigError> {
        match self.auth_secret.as_deref() {
            Some(secret) if !secret.is_empty() => Ok(secret),
            _ => Err(ConfigError::Authentication {
                reason: "auth_secret is required".to_string(),
            }),
        }
    }

    /// Validate the configuration for consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.local_name()?;
        if self.endpoint.trim().is_empty() {
            return Err(invalid("endpoint cannot be empty"));
        }
        if self.timeout.is_zero() {
            return Err(invalid("timeout cannot be zero"));
        }
        Ok(())
    }

    /// Session configuration for a locally created point-to-point session
    pub fn point_to_point(&self, peer: Name) -> SessionConfig {
        SessionConfig::PointToPoint {
            peer,
            max_retries: self.max_retries,
            timeout: self.timeout,
            mls_enabled: self.mls_enabled,
        }
    }

    /// Session configuration for a locally created group channel
    pub fn group(&self, channel: Name) -> SessionConfig {
        SessionConfig::Group {
            channel,
            max_retries: self.max_retries,
            timeout: self.timeout,
            mls_enabled: self.mls_enabled,
        }
    }
}

impl core::fmt::Debug for BaseConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BaseConfig")
            .field("local_name", &self.local_name)
            .field("endpoint", &self.endpoint)
            .field("auth_secret", &self.auth_secret.as_ref().map(|_| "<redacted>"))
            .field("max_retries", &self.max_retries)
            .field("timeout", &self.timeout)
            .field("mls_enabled", &self.mls_enabled)
            .finish()
    }
}

fn invalid(reason: &str) -> ConfigError {
    ConfigError::Invalid {
        reason: reason.to_string(),
    }
}

// ----------------------------------------------------------------------------
// Point-to-Point and Group Configuration
// ----------------------------------------------------------------------------

/// Configuration of a point-to-point endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct P2pConfig {
    #[serde(flatten)]
    pub base: BaseConfig,
    /// Peer to dial in active mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_name: Option<String>,
    #[serde(default)]
    pub mode: SessionMode,
}

impl P2pConfig {
    pub fn new(local_name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            base: BaseConfig::new(local_name, endpoint),
            peer_name: None,
            mode: SessionMode::default(),
        }
    }

    pub fn with_peer(mut self, peer_name: impl Into<String>) -> Self {
        self.peer_name = Some(peer_name.into());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base.validate()?;
        if let Some(peer) = &self.peer_name {
            Name::parse_remote(peer)?;
        }
        Ok(())
    }
}

/// Configuration of a group channel endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    #[serde(flatten)]
    pub base: BaseConfig,
    /// Channel to create (moderator) or expect (participant)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_name: Option<String>,
    /// Participants invited when the channel is created
    #[serde(default)]
    pub invites: Vec<String>,
    #[serde(default)]
    pub mode: GroupMode,
}

impl GroupConfig {
    pub fn new(local_name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            base: BaseConfig::new(local_name, endpoint),
            channel_name: None,
            invites: Vec::new(),
            mode: GroupMode::default(),
        }
    }

    pub fn with_channel(mut self, channel_name: impl Into<String>) -> Self {
        self.channel_name = Some(channel_name.into());
        self
    }

    pub fn with_invites<I, S>(mut self, invites: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.invites = invites.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base.validate()?;
        if let Some(channel) = &self.channel_name {
            Name::parse_remote(channel)?;
        }
        for invite in &self.invites {
            Name::parse_remote(invite)?;
        }
        if self.mode == GroupMode::Moderator && self.channel_name.is_none() && !self.invites.is_empty() {
            return Err(invalid("invites require a channel_name"));
        }
        Ok(())
    }
}

/// Either flavour of application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AppConfig {
    P2p(P2pConfig),
    Group(GroupConfig),
}

impl AppConfig {
    pub fn base(&self) -> &BaseConfig {
        match self {
            AppConfig::P2p(config) => &config.base,
            AppConfig::Group(config) => &config.base,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            AppConfig::P2p(config) => config.validate(),
            AppConfig::Group(config) => config.validate(),
        }
    }
}

impl From<P2pConfig> for AppConfig {
    fn from(config: P2pConfig) -> Self {
        AppConfig::P2p(config)
    }
}

impl From<GroupConfig> for AppConfig {
    fn from(config: GroupConfig) -> Self {
        AppConfig::Group(config)
    }
}

impl From<BaseConfig> for AppConfig {
    fn from(base: BaseConfig) -> Self {
        AppConfig::P2p(P2pConfig {
            base,
            peer_name: None,
            mode: SessionMode::Passive,
        })
    }
}

// ----------------------------------------------------------------------------
// Runtime Configuration
// ----------------------------------------------------------------------------

/// Tuning of the session and multiplexer runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// How long teardown waits for readers to finish before aborting them
    #[serde(rename = "shutdown_grace_ms", with = "duration_ms")]
    pub shutdown_grace: Duration,
    /// Timeout applied to requests issued without an explicit one
    #[serde(
        default,
        rename = "default_request_timeout_ms",
        with = "option_duration_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub default_request_timeout: Option<Duration>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            shutdown_grace: Duration::from_secs(2),
            default_request_timeout: None,
        }
    }
}

impl RuntimeConfig {
    /// Create configuration optimized for testing
    pub fn testing() -> Self {
        Self {
            shutdown_grace: Duration::from_millis(200),
            default_request_timeout: Some(Duration::from_secs(2)),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shutdown_grace.is_zero() {
            return Err(invalid("shutdown grace cannot be zero"));
        }
        if self.default_request_timeout.is_some_and(|t| t.is_zero()) {
            return Err(invalid("default request timeout cannot be zero"));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Session Configuration
// ----------------------------------------------------------------------------

/// Parameters for a session created locally through the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionConfig {
    PointToPoint {
        peer: Name,
        max_retries: u32,
        #[serde(rename = "timeout_ms", with = "duration_ms")]
        timeout: Duration,
        mls_enabled: bool,
    },
    Group {
        channel: Name,
        max_retries: u32,
        #[serde(rename = "timeout_ms", with = "duration_ms")]
        timeout: Duration,
        mls_enabled: bool,
    },
}

impl SessionConfig {
    /// Name of the remote side: the peer or the channel
    pub fn remote(&self) -> &Name {
        match self {
            SessionConfig::PointToPoint { peer, .. } => peer,
            SessionConfig::Group { channel, .. } => channel,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_p2p_config_defaults() {
        let mut config = P2pConfig::new("org/ns/app/inst", "https://example.com");
        config.base.auth_secret = Some("secret123".into());

        assert_eq!(config.base.max_retries, 5);
        assert_eq!(config.base.timeout, Duration::from_secs(5));
        assert!(config.base.mls_enabled);
        assert_eq!(config.mode, SessionMode::Active);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_group_config_defaults() {
        let config = GroupConfig::new("org/ns/app/inst", "https://example.com")
            .with_channel("org/ns/channel");

        assert_eq!(config.mode, GroupMode::Moderator);
        assert!(config.invites.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_millis_saturate_instead_of_wrapping() {
        assert_eq!(saturating_millis(Duration::from_millis(1500)), 1500);
        assert_eq!(saturating_millis(Duration::MAX), u64::MAX);

        let runtime = RuntimeConfig {
            shutdown_grace: Duration::MAX,
            default_request_timeout: Some(Duration::MAX),
        };
        let json = serde_json::to_value(&runtime).unwrap();
        assert_eq!(json["shutdown_grace_ms"], serde_json::json!(u64::MAX));
        assert_eq!(json["default_request_timeout_ms"], serde_json::json!(u64::MAX));
    }

    #[test]
    fn test_missing_secret_is_authentication_error() {
        let config = BaseConfig::new("org/ns/app", "http://localhost");
        assert!(matches!(
            config.require_secret(),
            Err(ConfigError::Authentication { .. })
        ));
        let config = config.with_auth_secret("s");
        assert_eq!(config.require_secret().unwrap(), "s");
    }

    #[test]
    fn test_validate_rejects_bad_names() {
        let config = BaseConfig::new("org/ns", "http://localhost");
        assert!(matches!(config.validate(), Err(ConfigError::InvalidName { .. })));

        let config = GroupConfig::new("org/ns/app", "http://localhost")
            .with_channel("org/ns/chan")
            .with_invites(["org/ns"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = BaseConfig::new("org/ns/app", "http://localhost").with_auth_secret("hunter2");
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: AppConfig = serde_json::from_str(
            r#"{"kind": "p2p", "local_name": "org/ns/app", "endpoint": "http://x", "timeout_ms": 250}"#,
        )
        .unwrap();
        let base = config.base();
        assert_eq!(base.timeout, Duration::from_millis(250));
        assert_eq!(base.max_retries, 5);
        assert!(base.auth_secret.is_none());
    }

    #[test]
    fn test_session_config_from_base() {
        let base = BaseConfig::new("org/ns/app", "http://x").with_max_retries(2);
        let peer = Name::parse("org/ns/peer").unwrap();
        let config = base.point_to_point(peer.clone());
        assert_eq!(config.remote(), &peer);
        assert!(matches!(config, SessionConfig::PointToPoint { max_retries: 2, .. }));
    }
}
