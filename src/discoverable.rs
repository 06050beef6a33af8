//! Discovered instance state and lifecycle event types

use crate::types::{keys, AttributeRecord, Attributes, Identity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

/// Externally visible state of one announcing instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discoverable {
    identity: Identity,
    attributes: Attributes,
}

impl Discoverable {
    /// Create a discoverable from an identity and its attributes
    pub fn new(identity: Identity, attributes: Attributes) -> Self {
        Self {
            identity,
            attributes,
        }
    }

    /// Get the identity
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Get all attributes
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Get an attribute value
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Human-readable name: the instance name if announced, else the main class
    pub fn name(&self) -> Option<&str> {
        self.attribute(keys::INSTANCE_NAME)
            .or_else(|| self.attribute(keys::MAIN_CLASS))
    }

    /// Get the main class
    pub fn main_class(&self) -> Option<&str> {
        self.attribute(keys::MAIN_CLASS)
    }

    /// Address used to open a management session against this instance
    pub fn connector_address(&self) -> Option<&str> {
        self.attribute(keys::CONNECTOR_ADDRESS)
    }

    /// Get the announced process id
    pub fn process_id(&self) -> Option<u32> {
        self.attribute(keys::PROCESS_ID)?.trim().parse().ok()
    }

    /// Get the announced broadcast interval
    pub fn broadcast_interval(&self) -> Option<Duration> {
        self.attribute(keys::BROADCAST_INTERVAL)?
            .trim()
            .parse()
            .ok()
            .map(Duration::from_millis)
    }
}

impl From<AttributeRecord> for Discoverable {
    fn from(record: AttributeRecord) -> Self {
        let (identity, attributes) = record.into_parts();
        Self::new(identity, attributes)
    }
}

impl fmt::Display for Discoverable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.name(), self.connector_address()) {
            (Some(name), Some(addr)) => write!(f, "{name} [{}] at {addr}", self.identity),
            (Some(name), None) => write!(f, "{name} [{}]", self.identity),
            (None, _) => write!(f, "[{}]", self.identity),
        }
    }
}

/// Lifecycle transition carried by a [`DiscoveryEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiscoveryKind {
    /// A previously unseen identity announced itself
    Found,
    /// A known identity's lease expired
    Lost,
    /// A known identity announced different attributes
    Changed,
}

impl fmt::Display for DiscoveryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Found => write!(f, "FOUND"),
            Self::Lost => write!(f, "LOST"),
            Self::Changed => write!(f, "CHANGED"),
        }
    }
}

/// Lifecycle event handed to subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryEvent {
    kind: DiscoveryKind,
    discoverable: Discoverable,
    at: DateTime<Utc>,
}

impl DiscoveryEvent {
    /// Create an event stamped with the current time
    pub fn new(kind: DiscoveryKind, discoverable: Discoverable) -> Self {
        Self {
            kind,
            discoverable,
            at: Utc::now(),
        }
    }

    /// Create a FOUND event
    pub fn found(discoverable: Discoverable) -> Self {
        Self::new(DiscoveryKind::Found, discoverable)
    }

    /// Create a LOST event
    pub fn lost(discoverable: Discoverable) -> Self {
        Self::new(DiscoveryKind::Lost, discoverable)
    }

    /// Create a CHANGED event
    pub fn changed(discoverable: Discoverable) -> Self {
        Self::new(DiscoveryKind::Changed, discoverable)
    }

    /// Get the event kind
    pub fn kind(&self) -> DiscoveryKind {
        self.kind
    }

    /// Get the discoverable snapshot
    pub fn discoverable(&self) -> &Discoverable {
        &self.discoverable
    }

    /// Get the identity the event is about
    pub fn identity(&self) -> &Identity {
        self.discoverable.identity()
    }

    /// Wall-clock time the event was produced
    pub fn at(&self) -> DateTime<Utc> {
        self.at
    }

    /// Take ownership of the discoverable
    pub fn into_discoverable(self) -> Discoverable {
        self.discoverable
    }
}

impl fmt::Display for DiscoveryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.discoverable)
    }
}
