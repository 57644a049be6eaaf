//! Snapshot type: one full fetch of all entity states

use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::Entity;

/// An immutable, ordered list of entities produced by a single fetch
///
/// Order is the order the remote returned them in. Entities are shared so
/// that derived indices can hold them without copying.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    entities: Vec<Arc<Entity>>,
}

impl Snapshot {
    pub fn new(entities: Vec<Entity>) -> Self {
        Self {
            entities: entities.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn entities(&self) -> &[Arc<Entity>] {
        &self.entities
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Entity>> {
        self.entities.iter()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl FromIterator<Entity> for Snapshot {
    fn from_iter<I: IntoIterator<Item = Entity>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.entities.iter().map(|e| e.as_ref()))
    }
}

impl<'de> Deserialize<'de> for Snapshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<Entity>::deserialize(deserializer).map(Self::new)
    }
}
