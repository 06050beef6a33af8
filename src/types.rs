//! Type definitions for the presence-discovery library

use crate::error::DecodeError;
use serde::{Deserialize, Serialize};
use std::{borrow::Borrow, collections::BTreeMap, fmt};

/// Well-known attribute keys carried in announcements
pub mod keys {
    /// Session identifier, unique per running instance
    pub const IDENTITY: &str = "DISCOVERABLE_SESSION_UUID";
    /// Human-readable instance name
    pub const INSTANCE_NAME: &str = "INSTANCE_NAME";
    /// Entry point of the announcing process
    pub const MAIN_CLASS: &str = "MAIN_CLASS";
    /// Connector address used to open a management session
    pub const CONNECTOR_ADDRESS: &str = "JMX_SERVICE_URL";
    /// Operating system process id
    pub const PROCESS_ID: &str = "PROCESS_ID";
    /// Announcement period of the broadcaster, in milliseconds
    pub const BROADCAST_INTERVAL: &str = "BROADCAST_INTERVAL";
    /// Host name the connector is bound to
    pub const RMI_HOSTNAME: &str = "RMI_HOSTNAME";
}

/// Attribute payload of one announcement, ordered by key
pub type Attributes = BTreeMap<String, String>;

/// Opaque token naming one running instance across announcements
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Create a new identity
    pub fn new<S: Into<String>>(token: S) -> Self {
        Self(token.into())
    }

    /// Get the identity as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

impl From<String> for Identity {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl Borrow<str> for Identity {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A decoded announcement: attributes plus the identity extracted from them.
///
/// The identity attribute stays in `attributes` so that re-encoding a record
/// reproduces what was received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeRecord {
    identity: Identity,
    attributes: Attributes,
}

impl AttributeRecord {
    /// Build a record from a full attribute map.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::MissingIdentity`] if the identity attribute is
    /// absent or empty.
    pub fn from_attributes(attributes: Attributes) -> Result<Self, DecodeError> {
        let identity = match attributes.get(keys::IDENTITY) {
            Some(token) if !token.is_empty() => Identity::new(token.clone()),
            _ => {
                return Err(DecodeError::MissingIdentity {
                    key: keys::IDENTITY,
                })
            }
        };
        Ok(Self {
            identity,
            attributes,
        })
    }

    /// Create a record for `identity` with no other attributes
    pub fn new<I: Into<Identity>>(identity: I) -> Self {
        let identity = identity.into();
        let mut attributes = Attributes::new();
        attributes.insert(keys::IDENTITY.to_string(), identity.as_str().to_string());
        Self {
            identity,
            attributes,
        }
    }

    /// Set a single attribute.
    ///
    /// Setting the identity key through this method is ignored; the identity
    /// of a record is fixed at construction.
    pub fn with_attribute<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        let key = key.into();
        if key != keys::IDENTITY {
            self.attributes.insert(key, value.into());
        }
        self
    }

    /// Get the identity
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Get all attributes, including the identity attribute
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Split into identity and attributes
    pub fn into_parts(self) -> (Identity, Attributes) {
        (self.identity, self.attributes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_requires_identity() {
        let mut attrs = Attributes::new();
        attrs.insert(keys::MAIN_CLASS.to_string(), "com.example.Main".to_string());
        assert_eq!(
            AttributeRecord::from_attributes(attrs.clone()),
            Err(DecodeError::MissingIdentity {
                key: keys::IDENTITY
            })
        );

        attrs.insert(keys::IDENTITY.to_string(), String::new());
        assert!(AttributeRecord::from_attributes(attrs.clone()).is_err());

        attrs.insert(keys::IDENTITY.to_string(), "S1".to_string());
        let record = AttributeRecord::from_attributes(attrs).unwrap();
        assert_eq!(record.identity().as_str(), "S1");
    }

    #[test]
    fn test_builder_keeps_identity_fixed() {
        let record = AttributeRecord::new("S1")
            .with_attribute(keys::INSTANCE_NAME, "app-a")
            .with_attribute(keys::IDENTITY, "S2");

        assert_eq!(record.identity(), &Identity::from("S1"));
        assert_eq!(record.attributes().get(keys::IDENTITY).unwrap(), "S1");
        assert_eq!(record.attributes().len(), 2);
    }

    #[test]
    fn test_identity_display() {
        let identity = Identity::from("8f2c-11");
        assert_eq!(identity.to_string(), "8f2c-11");
        assert_eq!(serde_json::to_string(&identity).unwrap(), "\"8f2c-11\"");
    }
}
