//! In-memory remote state source
//!
//! Holds a list of entities and applies the generic `turn_on` / `turn_off` /
//! `toggle` services to them, so the full write-then-confirm cycle can run
//! without a server. Used by the test suites and for offline runs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use ha_core::{Entity, EntityId, Payload, Snapshot};
use serde_json::Value;
use tracing::trace;

use crate::{CommandResponse, RemoteError, RemoteResult, RemoteStateSource};

/// A service call recorded by [`InMemoryStateSource`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCommand {
    pub path: String,
    pub payload: Value,
}

#[derive(Default)]
struct Inner {
    entities: Vec<Entity>,
    fetch_failures: Vec<RemoteError>,
    command_status: Option<(u16, String)>,
    commands: Vec<RecordedCommand>,
}

/// Remote state source backed by an in-memory entity list
#[derive(Default)]
pub struct InMemoryStateSource {
    inner: Mutex<Inner>,
    fetch_delay: Mutex<Duration>,
    fetch_all_calls: AtomicUsize,
    fetch_state_calls: AtomicUsize,
}

impl InMemoryStateSource {
    pub fn new(entities: Vec<Entity>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entities,
                ..Inner::default()
            }),
            ..Self::default()
        }
    }

    /// Build from the JSON array `/api/states` would return
    pub fn from_json(states: Value) -> Result<Self, serde_json::Error> {
        let snapshot: Snapshot = serde_json::from_value(states)?;
        Ok(Self::new(
            snapshot.iter().map(|e| e.as_ref().clone()).collect(),
        ))
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the entity list
    pub fn set_entities(&self, entities: Vec<Entity>) {
        self.lock().entities = entities;
    }

    /// Make the next `fetch_all_states` fail with `error`
    pub fn fail_next_fetch(&self, error: RemoteError) {
        self.lock().fetch_failures.push(error);
    }

    /// Answer every service call with this status and body instead of applying it
    pub fn reject_commands(&self, status: u16, body: impl Into<String>) {
        self.lock().command_status = Some((status, body.into()));
    }

    /// Delay every `fetch_all_states` call
    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Number of `fetch_all_states` calls made so far
    pub fn fetch_all_calls(&self) -> usize {
        self.fetch_all_calls.load(Ordering::SeqCst)
    }

    /// Number of `fetch_state` calls made so far
    pub fn fetch_state_calls(&self) -> usize {
        self.fetch_state_calls.load(Ordering::SeqCst)
    }

    /// Every service call received, in order
    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.lock().commands.clone()
    }

    fn apply(entity: &mut Entity, service: &str, payload: &Payload) {
        let next = match service {
            "turn_on" => "on",
            "turn_off" => "off",
            "toggle" if entity.state == "on" => "off",
            "toggle" => "on",
            _ => return,
        };
        entity.state = next.to_string();

        if next == "on" {
            for (key, value) in payload.fields() {
                if key != "entity_id" {
                    entity.attributes.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

#[async_trait]
impl RemoteStateSource for InMemoryStateSource {
    async fn fetch_all_states(&self) -> RemoteResult<Snapshot> {
        self.fetch_all_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.fetch_delay.lock().unwrap_or_else(PoisonError::into_inner);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.lock();
        if !inner.fetch_failures.is_empty() {
            return Err(inner.fetch_failures.remove(0));
        }
        Ok(Snapshot::new(inner.entities.clone()))
    }

    async fn fetch_state(&self, entity_id: &EntityId) -> RemoteResult<Entity> {
        self.fetch_state_calls.fetch_add(1, Ordering::SeqCst);
        self.lock()
            .entities
            .iter()
            .find(|e| &e.entity_id == entity_id)
            .cloned()
            .ok_or_else(|| RemoteError::Fetch {
                path: ha_core::api::state(entity_id),
                status: 404,
                body: format!("Entity not found: {entity_id}"),
            })
    }

    async fn post_command(&self, path: &str, payload: &Payload) -> RemoteResult<CommandResponse> {
        trace!(path, "Recording service call");
        let mut inner = self.lock();
        inner.commands.push(RecordedCommand {
            path: path.to_string(),
            payload: payload.to_value(),
        });

        if let Some((status, body)) = inner.command_status.clone() {
            return Ok(CommandResponse { status, body });
        }

        let service = path.rsplit('/').next().unwrap_or_default();
        let mut changed = Vec::new();
        if let Some(entity) = inner
            .entities
            .iter_mut()
            .find(|e| &e.entity_id == payload.entity_id())
        {
            Self::apply(entity, service, payload);
            changed.push(serde_json::to_value(&*entity).unwrap_or_default());
        }

        Ok(CommandResponse {
            status: 200,
            body: Value::Array(changed).to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source() -> InMemoryStateSource {
        InMemoryStateSource::from_json(json!([
            {"entity_id": "light.kitchen", "state": "off"},
            {"entity_id": "switch.fan", "state": "on"}
        ]))
        .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_counts_calls() {
        let source = source();
        let snapshot = source.fetch_all_states().await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(source.fetch_all_calls(), 1);
    }

    #[tokio::test]
    async fn test_injected_failure_is_used_once() {
        let source = source();
        source.fail_next_fetch(RemoteError::Timeout);

        assert_eq!(source.fetch_all_states().await.unwrap_err(), RemoteError::Timeout);
        assert!(source.fetch_all_states().await.is_ok());
    }

    #[tokio::test]
    async fn test_turn_on_applies_attributes() {
        let source = source();
        let mut payload = Payload::new("light.kitchen".parse().unwrap());
        payload.insert("brightness", 200);

        let response = source
            .post_command("/api/services/light/turn_on", &payload)
            .await
            .unwrap();
        assert!(response.is_success());

        let entity = source
            .fetch_state(&"light.kitchen".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(entity.state, "on");
        assert_eq!(entity.attribute::<u8>("brightness"), Some(200));
        assert_eq!(source.commands().len(), 1);
    }

    #[tokio::test]
    async fn test_toggle_flips_state() {
        let source = source();
        let payload = Payload::new("switch.fan".parse().unwrap());
        source
            .post_command("/api/services/switch/toggle", &payload)
            .await
            .unwrap();

        let entity = source
            .fetch_state(&"switch.fan".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(entity.state, "off");
    }

    #[tokio::test]
    async fn test_unknown_entity_is_404() {
        let err = source()
            .fetch_state(&"light.nowhere".parse().unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(404));
    }
}
