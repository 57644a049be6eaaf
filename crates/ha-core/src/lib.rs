//! Core types for the Home Assistant control client
//!
//! This crate provides the data model shared by every other crate in the
//! workspace: EntityId, Entity, Snapshot and Payload.

mod entity;
mod entity_id;
mod payload;
mod snapshot;

pub use entity::{Attributes, Entity};
pub use entity_id::{EntityId, EntityIdError};
pub use payload::Payload;
pub use snapshot::Snapshot;

/// REST API paths exposed by Home Assistant
pub mod api {
    /// Base endpoint, answers 200 for a valid token
    pub const BASE: &str = "/api/";

    /// All entity states
    pub const STATES: &str = "/api/states";

    /// Path for a single entity state
    pub fn state(entity_id: &crate::EntityId) -> String {
        format!("{STATES}/{entity_id}")
    }

    /// Path for a service call in a category
    pub fn service(category: &str, service: &str) -> String {
        format!("/api/services/{category}/{service}")
    }
}

/// Well-known category names
pub mod categories {
    pub const LIGHT: &str = "light";
}

/// Well-known service names
pub mod services {
    pub const TURN_ON: &str = "turn_on";
    pub const TURN_OFF: &str = "turn_off";
    pub const TOGGLE: &str = "toggle";
}
