//! Payload type for service calls against the Home Assistant REST API

use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::EntityId;

/// Body of a service call targeting a single entity
///
/// Always carries `entity_id`; category-specific fields (color, brightness)
/// are added by validated setters in the controllers. Built fresh for every
/// request.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    entity_id: EntityId,
    fields: serde_json::Map<String, Value>,
}

impl Payload {
    /// Create a payload containing only the target entity
    pub fn new(entity_id: EntityId) -> Self {
        let mut fields = serde_json::Map::new();
        fields.insert(
            "entity_id".to_string(),
            Value::String(entity_id.to_string()),
        );
        Self { entity_id, fields }
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    /// Set a field. `entity_id` itself cannot be overwritten.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        if key != "entity_id" {
            self.fields.insert(key, value.into());
        }
    }

    /// Get a field value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &serde_json::Map<String, Value> {
        &self.fields
    }

    /// The JSON body as sent on the wire
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}
