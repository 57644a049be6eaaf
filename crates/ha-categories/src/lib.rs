//! Category handlers for Home Assistant entity groups
//!
//! A [`CategoryHandler`] exposes the members of one category of the
//! [`EntityIndex`](ha_entity_index::EntityIndex). Categories without special
//! behavior get a [`GenericCategory`]; specialized handlers such as
//! [`LightCategory`] add domain operations on top. The
//! [`CategoryRegistry`] maps category names to handler factories and caches
//! the handlers it builds for the current index generation.

mod generic;
mod handler;
mod light;
mod registry;

pub use generic::GenericCategory;
pub use handler::{CategoryError, CategoryHandler, CategoryResult};
pub use light::{BulkOutcome, LightCategory};
pub use registry::{CategoryContext, CategoryFactory, CategoryRegistry};
