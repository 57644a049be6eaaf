//! The contract the cache and controllers consume

use async_trait::async_trait;
use ha_core::{Entity, EntityId, Payload, Snapshot};

use crate::RemoteResult;

/// Raw response to a service call
///
/// The caller decides whether the status counts as success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    pub status: u16,
    pub body: String,
}

impl CommandResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The body parsed as JSON, if it is JSON
    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_str(&self.body).ok()
    }
}

/// A source of entity state and a sink for service calls
///
/// Every method is one logical request. Implementations attach whatever
/// credentials they hold; callers never see them.
#[async_trait]
pub trait RemoteStateSource: Send + Sync {
    /// Fetch the full list of entity states
    async fn fetch_all_states(&self) -> RemoteResult<Snapshot>;

    /// Fetch the state of a single entity
    async fn fetch_state(&self, entity_id: &EntityId) -> RemoteResult<Entity>;

    /// Post a service call payload to `path`
    async fn post_command(&self, path: &str, payload: &Payload) -> RemoteResult<CommandResponse>;
}
