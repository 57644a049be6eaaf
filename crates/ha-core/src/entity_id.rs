//! Entity ID type representing a category.name pair

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for invalid entity IDs
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EntityIdError {
    #[error("entity_id must contain a '.' separator")]
    MissingSeparator,

    #[error("category cannot be empty")]
    EmptyCategory,

    #[error("name cannot be empty")]
    EmptyName,

    #[error("category contains invalid characters (must be lowercase alphanumeric with underscores)")]
    InvalidCategory,
}

/// Represents a Home Assistant entity ID (e.g., "light.living_room")
///
/// The category is everything before the first `.`, the name is the
/// remainder. Only the full id is stored; both parts are re-derived from it
/// so they can never drift apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId {
    id: String,
    split: usize,
}

impl EntityId {
    /// Create a new EntityId from category and name parts
    pub fn new(category: &str, name: &str) -> Result<Self, EntityIdError> {
        format!("{category}.{name}").parse()
    }

    /// Get the category part of the entity ID
    pub fn category(&self) -> &str {
        &self.id[..self.split]
    }

    /// Get the name part of the entity ID
    pub fn name(&self) -> &str {
        &self.id[self.split + 1..]
    }

    /// The full id as it appears on the wire
    pub fn as_str(&self) -> &str {
        &self.id
    }

    fn is_valid_category(s: &str) -> bool {
        s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    }
}

impl FromStr for EntityId {
    type Err = EntityIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let split = s.find('.').ok_or(EntityIdError::MissingSeparator)?;
        let (category, name) = (&s[..split], &s[split + 1..]);

        if category.is_empty() {
            return Err(EntityIdError::EmptyCategory);
        }
        if name.is_empty() {
            return Err(EntityIdError::EmptyName);
        }
        if !Self::is_valid_category(category) {
            return Err(EntityIdError::InvalidCategory);
        }

        Ok(Self {
            id: s.to_string(),
            split,
        })
    }
}

impl TryFrom<String> for EntityId {
    type Error = EntityIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> String {
        id.id
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_entity_id() {
        let id = EntityId::new("light", "living_room").unwrap();
        assert_eq!(id.category(), "light");
        assert_eq!(id.name(), "living_room");
        assert_eq!(id.to_string(), "light.living_room");
    }

    #[test]
    fn test_parse_splits_on_first_separator() {
        let id: EntityId = "sensor.outdoor.temperature".parse().unwrap();
        assert_eq!(id.category(), "sensor");
        assert_eq!(id.name(), "outdoor.temperature");
    }

    #[test]
    fn test_missing_separator() {
        assert_eq!(
            "no_separator".parse::<EntityId>().unwrap_err(),
            EntityIdError::MissingSeparator
        );
    }

    #[test]
    fn test_empty_parts() {
        assert_eq!(
            ".object".parse::<EntityId>().unwrap_err(),
            EntityIdError::EmptyCategory
        );
        assert_eq!(
            "light.".parse::<EntityId>().unwrap_err(),
            EntityIdError::EmptyName
        );
    }

    #[test]
    fn test_invalid_category() {
        assert_eq!(
            "Light.kitchen".parse::<EntityId>().unwrap_err(),
            EntityIdError::InvalidCategory
        );
        assert_eq!(
            "with-dash.object".parse::<EntityId>().unwrap_err(),
            EntityIdError::InvalidCategory
        );
    }

    #[test]
    fn test_serde_roundtrip() {
        let id = EntityId::new("switch", "kitchen").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"switch.kitchen\"");

        let parsed: EntityId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
        assert_eq!(parsed.name(), "kitchen");
    }
}
