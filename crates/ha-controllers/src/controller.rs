//! Write-then-confirm protocol for a single entity

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use ha_core::{api, Entity, EntityId, Payload};
use ha_remote::{CommandResponse, SharedStateSource};
use tracing::{debug, instrument, warn};

use crate::{ControllerError, ControllerResult};

/// Pause between a write and the confirming read
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// How commands are confirmed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerOptions {
    /// Read the entity back after every successful write
    pub confirm_writes: bool,
    /// Fixed wait before the confirming read
    pub settle_delay: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            confirm_writes: true,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }
}

/// State of the last command issued through a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    /// No command issued yet
    Idle,
    /// Written, waiting for the response or the confirming read
    Sent,
    /// Written and read back
    Confirmed,
    /// Written without a confirming read
    Unconfirmed,
    /// The write was rejected or never reached the server
    Failed,
}

/// Result of a successful command
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// The entity as read back after the settle delay
    Confirmed(Arc<Entity>),
    /// The raw write response; no read-back was made
    Unconfirmed(CommandResponse),
}

impl CommandOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed(_))
    }

    /// The confirmed entity, if the write was read back
    pub fn entity(&self) -> Option<&Arc<Entity>> {
        match self {
            Self::Confirmed(entity) => Some(entity),
            Self::Unconfirmed(_) => None,
        }
    }
}

/// Issues service calls for one entity
///
/// The target is addressed by id only; the controller holds no copy of the
/// entity's state between commands.
pub struct Controller {
    entity_id: EntityId,
    source: SharedStateSource,
    options: ControllerOptions,
    state: Mutex<CommandState>,
}

impl Controller {
    pub fn new(entity_id: EntityId, source: SharedStateSource, options: ControllerOptions) -> Self {
        Self {
            entity_id,
            source,
            options,
            state: Mutex::new(CommandState::Idle),
        }
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    pub fn options(&self) -> ControllerOptions {
        self.options
    }

    /// State of the last command
    pub fn state(&self) -> CommandState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: CommandState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// A payload targeting this entity and nothing else
    pub fn payload(&self) -> Payload {
        Payload::new(self.entity_id.clone())
    }

    /// Call `service` in the entity's category with `payload`
    ///
    /// A non-success status fails with [`ControllerError::CommandRejected`].
    /// Nothing is retried.
    #[instrument(skip(self, payload), fields(entity_id = %self.entity_id))]
    pub async fn call_service(&self, service: &str, payload: Payload) -> ControllerResult<CommandOutcome> {
        let path = api::service(self.entity_id.category(), service);
        self.set_state(CommandState::Sent);

        let response = match self.source.post_command(&path, &payload).await {
            Ok(response) => response,
            Err(e) => {
                self.set_state(CommandState::Failed);
                return Err(e.into());
            }
        };

        if !response.is_success() {
            warn!(status = response.status, body = %response.body, "Command rejected");
            self.set_state(CommandState::Failed);
            return Err(ControllerError::CommandRejected {
                status: response.status,
                body: response.body,
            });
        }

        if !self.options.confirm_writes {
            debug!(status = response.status, "Command sent without confirmation");
            self.set_state(CommandState::Unconfirmed);
            return Ok(CommandOutcome::Unconfirmed(response));
        }

        if !self.options.settle_delay.is_zero() {
            tokio::time::sleep(self.options.settle_delay).await;
        }

        // The write went through even if the read-back fails.
        self.set_state(CommandState::Unconfirmed);
        let entity = self.fetch_entity().await?;
        debug!(state = %entity.state, "Command confirmed");
        self.set_state(CommandState::Confirmed);
        Ok(CommandOutcome::Confirmed(entity))
    }

    /// Read the entity from the remote source
    pub async fn fetch_entity(&self) -> ControllerResult<Arc<Entity>> {
        Ok(Arc::new(self.source.fetch_state(&self.entity_id).await?))
    }

    /// The entity's current state string, read from the remote source
    pub async fn current_state(&self) -> ControllerResult<String> {
        Ok(self.source.fetch_state(&self.entity_id).await?.state)
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("entity_id", &self.entity_id)
            .field("options", &self.options)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ha_core::services;
    use ha_remote::{InMemoryStateSource, RemoteError};
    use serde_json::json;

    fn make_test_setup(options: ControllerOptions) -> (Arc<InMemoryStateSource>, Controller) {
        let source = Arc::new(
            InMemoryStateSource::from_json(json!([
                {"entity_id": "switch.fan", "state": "off"}
            ]))
            .unwrap(),
        );
        let controller = Controller::new("switch.fan".parse().unwrap(), source.clone(), options);
        (source, controller)
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmed_command_waits_then_reads_back() {
        let (source, controller) = make_test_setup(ControllerOptions::default());
        assert_eq!(controller.state(), CommandState::Idle);

        let started = tokio::time::Instant::now();
        let outcome = controller
            .call_service(services::TURN_ON, controller.payload())
            .await
            .unwrap();

        assert!(started.elapsed() >= DEFAULT_SETTLE_DELAY);
        assert_eq!(outcome.entity().unwrap().state, "on");
        assert_eq!(controller.state(), CommandState::Confirmed);
        assert_eq!(source.fetch_state_calls(), 1);
        assert_eq!(source.commands()[0].path, "/api/services/switch/turn_on");
    }

    #[tokio::test]
    async fn test_unconfirmed_command_skips_read() {
        let (source, controller) = make_test_setup(ControllerOptions {
            confirm_writes: false,
            ..ControllerOptions::default()
        });

        let outcome = controller
            .call_service(services::TOGGLE, controller.payload())
            .await
            .unwrap();

        assert!(matches!(outcome, CommandOutcome::Unconfirmed(ref r) if r.status == 200));
        assert_eq!(controller.state(), CommandState::Unconfirmed);
        assert_eq!(source.fetch_state_calls(), 0);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let (source, controller) = make_test_setup(ControllerOptions::default());
        source.reject_commands(400, "Invalid service data");

        let err = controller
            .call_service(services::TURN_ON, controller.payload())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ControllerError::CommandRejected {
                status: 400,
                body: "Invalid service data".into()
            }
        );
        assert_eq!(controller.state(), CommandState::Failed);
        assert_eq!(source.commands().len(), 1);
        assert_eq!(source.fetch_state_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_read_back_leaves_command_unconfirmed() {
        let source = Arc::new(InMemoryStateSource::default());
        let controller = Controller::new(
            "switch.gone".parse().unwrap(),
            source.clone(),
            ControllerOptions::default(),
        );

        let err = controller
            .call_service(services::TURN_OFF, controller.payload())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ControllerError::Remote(RemoteError::Fetch { status: 404, .. })
        ));
        assert_eq!(controller.state(), CommandState::Unconfirmed);
    }

    #[tokio::test]
    async fn test_current_state() {
        let (_source, controller) = make_test_setup(ControllerOptions::default());
        assert_eq!(controller.current_state().await.unwrap(), "off");
    }
}
