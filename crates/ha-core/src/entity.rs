//! Entity type representing one element of a remote state snapshot

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::EntityId;

/// Attribute map as returned by the remote API
pub type Attributes = serde_json::Map<String, serde_json::Value>;

/// A single entity as reported by Home Assistant
///
/// Entities are immutable once constructed. The category and name are always
/// derived from `entity_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// The entity this state belongs to
    pub entity_id: EntityId,

    /// The state value (e.g., "on", "off", "23.5", "unavailable")
    #[serde(default)]
    pub state: String,

    /// Additional attributes associated with the state
    #[serde(default)]
    pub attributes: Attributes,

    /// When the state was last changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_changed: Option<DateTime<Utc>>,

    /// When the state was last updated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Entity {
    /// Create an entity with the given state and attributes
    pub fn new(entity_id: EntityId, state: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            entity_id,
            state: state.into(),
            attributes,
            last_changed: None,
            last_updated: None,
        }
    }

    /// The category this entity belongs to (the id prefix)
    pub fn category(&self) -> &str {
        self.entity_id.category()
    }

    /// The entity name within its category
    pub fn name(&self) -> &str {
        self.entity_id.name()
    }

    /// Check if the state value represents an unavailable entity
    pub fn is_unavailable(&self) -> bool {
        self.state == "unavailable"
    }

    /// Get an attribute value by key
    pub fn attribute<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.attributes
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        // Timestamps are not compared
        self.entity_id == other.entity_id
            && self.state == other.state
            && self.attributes == other.attributes
    }
}
