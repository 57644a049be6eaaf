//! Command controllers for Home Assistant entities
//!
//! A [`Controller`] issues service calls for one entity and, when write
//! confirmation is enabled, reads the entity back after a settle delay.
//! [`LightController`] adds the light services with validated color and
//! brightness fields.

mod colors;
mod controller;
mod error;
mod light;

pub use colors::{lookup_color, Rgb, COLORS};
pub use controller::{CommandOutcome, CommandState, Controller, ControllerOptions, DEFAULT_SETTLE_DELAY};
pub use error::{ControllerError, ControllerResult};
pub use light::{LightAttributes, LightController, LightPayload, MAX_BRIGHTNESS};
