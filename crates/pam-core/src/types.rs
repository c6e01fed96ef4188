//! Core types for Pattern Agentic Messaging
//!
//! Newtypes for session identifiers and hierarchical names, the per-message
//! transport context, and the mode enums used by configuration.

use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::ConfigError;

// ----------------------------------------------------------------------------
// Session Identifier
// ----------------------------------------------------------------------------

/// Transport-assigned identifier of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(u64);

impl SessionId {
    /// Create a new SessionId
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw value
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Hierarchical Name
// ----------------------------------------------------------------------------

const NAME_FORMAT: &str = "expected org/namespace/app or org/namespace/app/instance";

/// `org/namespace/app[/instance]` name of an application, peer or channel
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Name {
    org: String,
    namespace: String,
    app: String,
    instance: Option<String>,
}

impl Name {
    /// Create a name from its three mandatory components
    pub fn new(
        org: impl Into<String>,
        namespace: impl Into<String>,
        app: impl Into<String>,
    ) -> Self {
        Self {
            org: org.into(),
            namespace: namespace.into(),
            app: app.into(),
            instance: None,
        }
    }

    /// Attach an instance component
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    /// Parse a local application name: exactly 3 or 4 components
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let parts = split_components(raw)?;
        match parts.as_slice() {
            [org, namespace, app] => Ok(Self::new(*org, *namespace, *app)),
            [org, namespace, app, instance] => {
                Ok(Self::new(*org, *namespace, *app).with_instance(*instance))
            }
            _ => Err(invalid_name(raw)),
        }
    }

    /// Parse a peer, channel or invite name
    ///
    /// At least three components are required; only the first three address
    /// the remote side, anything after them is ignored.
    pub fn parse_remote(raw: &str) -> Result<Self, ConfigError> {
        let parts = split_components(raw)?;
        match parts.as_slice() {
            [org, namespace, app, ..] => Ok(Self::new(*org, *namespace, *app)),
            _ => Err(invalid_name(raw)),
        }
    }

    pub fn org(&self) -> &str {
        &self.org
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn instance(&self) -> Option<&str> {
        self.instance.as_deref()
    }

    /// The name without its instance component
    pub fn without_instance(&self) -> Self {
        Self::new(&self.org, &self.namespace, &self.app)
    }
}

fn split_components(raw: &str) -> Result<Vec<&str>, ConfigError> {
    let parts: Vec<&str> = raw.split('/').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(invalid_name(raw));
    }
    Ok(parts)
}

fn invalid_name(raw: &str) -> ConfigError {
    ConfigError::InvalidName {
        name: raw.to_string(),
        expected: NAME_FORMAT,
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.org, self.namespace, self.app)?;
        if let Some(instance) = &self.instance {
            write!(f, "/{}", instance)?;
        }
        Ok(())
    }
}

impl FromStr for Name {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Name {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Name> for String {
    fn from(name: Name) -> Self {
        name.to_string()
    }
}

// ----------------------------------------------------------------------------
// Message Context
// ----------------------------------------------------------------------------

/// Transport metadata delivered alongside each inbound frame
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContext {
    /// Sender of the frame, when the transport knows it
    pub source: Option<String>,
    /// Destination the frame was addressed to
    pub destination: Option<String>,
    /// Free-form transport metadata
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl MessageContext {
    pub fn from_source(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            ..Self::default()
        }
    }
}

// ----------------------------------------------------------------------------
// Session Kinds and Modes
// ----------------------------------------------------------------------------

/// Shape of a transport session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    PointToPoint,
    Group,
}

/// Whether a point-to-point endpoint dials out or waits for peers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    #[default]
    Active,
    Passive,
}

/// Role of an endpoint in a group channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupMode {
    #[default]
    Moderator,
    Participant,
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
