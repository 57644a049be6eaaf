//! Light commands

use ha_core::{services, EntityId, Payload};
use ha_remote::SharedStateSource;
use serde_json::json;

use crate::{lookup_color, CommandOutcome, Controller, ControllerError, ControllerOptions, ControllerResult};

/// Highest brightness a light accepts
pub const MAX_BRIGHTNESS: i64 = 255;

/// Payload for a light service call with validated fields
#[derive(Debug, Clone)]
pub struct LightPayload {
    payload: Payload,
}

impl LightPayload {
    pub fn new(entity_id: EntityId) -> Self {
        Self {
            payload: Payload::new(entity_id),
        }
    }

    /// Set `rgb_color` from a named color
    pub fn set_color(&mut self, color: &str) -> ControllerResult<&mut Self> {
        let rgb = lookup_color(color).ok_or_else(|| ControllerError::UnknownColor(color.to_string()))?;
        self.payload.insert("rgb_color", json!(rgb));
        Ok(self)
    }

    /// Set `brightness`, which must lie in `0..=255`
    pub fn set_brightness(&mut self, brightness: i64) -> ControllerResult<&mut Self> {
        if !(0..=MAX_BRIGHTNESS).contains(&brightness) {
            return Err(ControllerError::InvalidBrightness(brightness));
        }
        self.payload.insert("brightness", brightness);
        Ok(self)
    }

    pub fn as_payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }
}

/// Attributes to apply to a light in one command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LightAttributes {
    pub color: Option<String>,
    pub brightness: Option<i64>,
}

impl LightAttributes {
    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn with_brightness(mut self, brightness: i64) -> Self {
        self.brightness = Some(brightness);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.color.is_none() && self.brightness.is_none()
    }
}

/// Controller for a single light
#[derive(Debug)]
pub struct LightController {
    controller: Controller,
}

impl LightController {
    pub fn new(entity_id: EntityId, source: SharedStateSource, options: ControllerOptions) -> Self {
        Self {
            controller: Controller::new(entity_id, source, options),
        }
    }

    /// The generic controller underneath
    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn entity_id(&self) -> &EntityId {
        self.controller.entity_id()
    }

    pub fn payload(&self) -> LightPayload {
        LightPayload::new(self.entity_id().clone())
    }

    pub async fn turn_on(&self) -> ControllerResult<CommandOutcome> {
        self.turn_on_with(self.payload()).await
    }

    /// Turn on with extra fields already validated into `payload`
    pub async fn turn_on_with(&self, payload: LightPayload) -> ControllerResult<CommandOutcome> {
        self.controller
            .call_service(services::TURN_ON, payload.into_payload())
            .await
    }

    pub async fn turn_off(&self) -> ControllerResult<CommandOutcome> {
        self.controller
            .call_service(services::TURN_OFF, self.controller.payload())
            .await
    }

    pub async fn toggle(&self) -> ControllerResult<CommandOutcome> {
        self.controller
            .call_service(services::TOGGLE, self.controller.payload())
            .await
    }

    /// Validate `attributes`, then turn the light on with them
    ///
    /// Nothing is sent if any attribute is invalid.
    pub async fn set_attributes(&self, attributes: &LightAttributes) -> ControllerResult<CommandOutcome> {
        let payload = self.validate(attributes)?;
        self.turn_on_with(payload).await
    }

    /// Build the payload for `attributes` without sending it
    pub fn validate(&self, attributes: &LightAttributes) -> ControllerResult<LightPayload> {
        let mut payload = self.payload();
        if let Some(color) = &attributes.color {
            payload.set_color(color)?;
        }
        if let Some(brightness) = attributes.brightness {
            payload.set_brightness(brightness)?;
        }
        Ok(payload)
    }

    pub async fn current_state(&self) -> ControllerResult<String> {
        self.controller.current_state().await
    }
}
