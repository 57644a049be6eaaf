//! Handler for categories without special behavior

use std::any::Any;
use std::sync::Arc;

use ha_entity_index::{CategoryGroup, EntityIndex};

use crate::{CategoryHandler, CategoryResult};

/// Plain view over one category of the index
#[derive(Debug, Clone)]
pub struct GenericCategory {
    name: String,
    index: Arc<EntityIndex>,
}

impl GenericCategory {
    pub const KIND: &'static str = "generic";

    pub fn new(name: impl Into<String>, index: Arc<EntityIndex>) -> Self {
        Self {
            name: name.into().to_lowercase(),
            index,
        }
    }
}

impl CategoryHandler for GenericCategory {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn group(&self) -> CategoryResult<Arc<CategoryGroup>> {
        Ok(self.index.category(&self.name)?)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
