//! The handler contract shared by all categories

use std::any::Any;
use std::sync::Arc;

use ha_controllers::ControllerError;
use ha_core::Entity;
use ha_entity_index::{CategoryGroup, IndexError};
use thiserror::Error;

/// Result type for category operations
pub type CategoryResult<T> = Result<T, CategoryError>;

/// Errors that can occur when resolving or using a category
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CategoryError {
    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Controller(#[from] ControllerError),

    #[error("category '{category}' is handled by {actual}, not {expected}")]
    WrongHandler {
        category: String,
        expected: &'static str,
        actual: &'static str,
    },
}

/// Access to the members of one category
///
/// Members are looked up in the index on every call, so a handler never
/// serves entities from a generation it was not built for.
pub trait CategoryHandler: Send + Sync {
    /// Category name, lowercase
    fn name(&self) -> &str;

    /// Short name of the handler type, e.g. `generic` or `light`
    fn kind(&self) -> &'static str;

    /// The category's group in the current index generation
    fn group(&self) -> CategoryResult<Arc<CategoryGroup>>;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    /// All members in snapshot order
    fn members(&self) -> CategoryResult<Vec<Arc<Entity>>> {
        Ok(self.group()?.members().to_vec())
    }

    /// Member whose name matches exactly, ignoring case
    fn find_by_name(&self, name: &str) -> CategoryResult<Option<Arc<Entity>>> {
        Ok(find_in(&*self.group()?, name))
    }

    /// Members whose name contains `query`, ignoring case
    fn search_by_name(&self, query: &str) -> CategoryResult<Vec<Arc<Entity>>> {
        let query = query.to_lowercase();
        Ok(self
            .group()?
            .members()
            .iter()
            .filter(|e| e.name().to_lowercase().contains(&query))
            .cloned()
            .collect())
    }
}

/// Exact name first, then a case-insensitive scan in member order
pub(crate) fn find_in(group: &CategoryGroup, name: &str) -> Option<Arc<Entity>> {
    if let Some(entity) = group.get(name) {
        return Some(Arc::clone(entity));
    }
    let wanted = name.to_lowercase();
    group
        .members()
        .iter()
        .find(|e| e.name().to_lowercase() == wanted)
        .cloned()
}

impl std::fmt::Debug for dyn CategoryHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CategoryHandler")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .finish()
    }
}
