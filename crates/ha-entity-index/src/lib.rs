//! Categorized entity index for Home Assistant
//!
//! The EntityIndex subscribes to a snapshot cache and, on every
//! invalidation, partitions the new snapshot into [`CategoryGroup`]s keyed
//! by the part of the entity id before the first `.`.
//!
//! Each rebuild produces a new immutable [`IndexGeneration`] that is swapped
//! in atomically. Readers holding a group from an older generation keep a
//! consistent view of it; they never observe a half-built index.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use arc_swap::ArcSwap;
use ha_core::{Entity, EntityId, Snapshot};
use ha_event_bus::{BusError, Subscriber, SubscriberError, SubscriberId};
use ha_state_cache::{CacheBus, Invalidation, SnapshotCache};
use indexmap::IndexMap;
use thiserror::Error;
use tracing::{debug, instrument, trace};

/// Errors that can occur when querying the index
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IndexError {
    #[error("Unknown category: {0}")]
    UnknownCategory(String),
}

/// All entities of one category in one index generation
#[derive(Debug)]
pub struct CategoryGroup {
    name: String,
    generation: u64,
    /// In order of first appearance in the snapshot
    members: Vec<Arc<Entity>>,
    /// First member wins when two share a name
    member_by_name: HashMap<String, Arc<Entity>>,
}

impl CategoryGroup {
    fn new(name: &str, generation: u64) -> Self {
        Self {
            name: name.to_string(),
            generation,
            members: Vec::new(),
            member_by_name: HashMap::new(),
        }
    }

    fn push(&mut self, entity: &Arc<Entity>) {
        self.members.push(Arc::clone(entity));
        self.member_by_name
            .entry(entity.name().to_string())
            .or_insert_with(|| Arc::clone(entity));
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Generation this group was built in
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn members(&self) -> &[Arc<Entity>] {
        &self.members
    }

    /// Member with exactly this name
    pub fn get(&self, name: &str) -> Option<&Arc<Entity>> {
        self.member_by_name.get(name)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// One immutable build of the index
#[derive(Debug, Default)]
pub struct IndexGeneration {
    number: u64,
    /// Cache refresh the snapshot came from, 0 if not from a cache
    refresh_count: u64,
    snapshot: Arc<Snapshot>,
    groups: IndexMap<String, Arc<CategoryGroup>>,
    by_id: HashMap<EntityId, Arc<Entity>>,
}

impl IndexGeneration {
    /// Partition a snapshot in a single pass
    pub fn build(number: u64, snapshot: Arc<Snapshot>) -> Self {
        let mut groups: IndexMap<String, CategoryGroup> = IndexMap::new();
        let mut by_id = HashMap::with_capacity(snapshot.len());

        for entity in snapshot.iter() {
            groups
                .entry(entity.category().to_string())
                .or_insert_with(|| CategoryGroup::new(entity.category(), number))
                .push(entity);
            by_id
                .entry(entity.entity_id.clone())
                .or_insert_with(|| Arc::clone(entity));
        }

        Self {
            number,
            refresh_count: 0,
            snapshot,
            groups: groups
                .into_iter()
                .map(|(name, group)| (name, Arc::new(group)))
                .collect(),
            by_id,
        }
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    /// Cache refresh count of the snapshot this generation was built from
    pub fn refresh_count(&self) -> u64 {
        self.refresh_count
    }

    /// The snapshot this generation was built from
    pub fn snapshot(&self) -> &Arc<Snapshot> {
        &self.snapshot
    }

    /// Groups in order of first appearance
    pub fn groups(&self) -> impl Iterator<Item = &Arc<CategoryGroup>> {
        self.groups.values()
    }
}

/// Categorized view of the latest snapshot
///
/// Generation 0 is the empty index before any snapshot has been seen.
///
/// Readers never lock. Writers are serialized so that a snapshot from an
/// older cache refresh, delivered late, cannot replace a newer one.
pub struct EntityIndex {
    current: ArcSwap<IndexGeneration>,
    /// Number of the next generation
    writer: Mutex<u64>,
    subscription: OnceLock<SubscriberId>,
}

impl Default for EntityIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityIndex {
    /// Create an empty, unattached index
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(IndexGeneration::default()),
            writer: Mutex::new(1),
            subscription: OnceLock::new(),
        }
    }

    /// Create an unattached index built from `snapshot`
    pub fn from_snapshot(snapshot: Arc<Snapshot>) -> Self {
        let index = Self::new();
        index.rebuild(snapshot);
        index
    }

    /// Create an index subscribed to `cache`
    ///
    /// If the cache already holds a snapshot the index is built from it
    /// right away; otherwise it stays empty until the first refresh.
    pub fn attach(cache: &SnapshotCache) -> Result<Arc<Self>, BusError> {
        let index = Arc::new(Self::new());
        let id = cache.bus().subscribe(index.clone())?;
        let _ = index.subscription.set(id);

        // A refresh delivered between subscribe and here is newer or equal,
        // and wins.
        if let Some((snapshot, refresh_count)) = cache.peek_with_refresh_count() {
            index.rebuild_at(refresh_count, snapshot);
        }

        debug!(subscriber = %id, generation = index.generation(), "Entity index attached");
        Ok(index)
    }

    /// Stop receiving invalidations from `bus`
    pub fn detach(&self, bus: &CacheBus) -> Result<(), BusError> {
        match self.subscription.get() {
            Some(id) => bus.unsubscribe(*id),
            None => Ok(()),
        }
    }

    /// Bus registration, if attached
    pub fn subscription(&self) -> Option<SubscriberId> {
        self.subscription.get().copied()
    }

    /// Replace the index with one built from `snapshot`
    #[instrument(skip_all, fields(entities = snapshot.len()))]
    pub fn rebuild(&self, snapshot: Arc<Snapshot>) -> Arc<IndexGeneration> {
        let mut next = self.lock_writer();
        let refresh_count = self.current.load().refresh_count;
        self.install(&mut next, refresh_count, snapshot)
    }

    /// Replace the index with one built from the snapshot of cache refresh
    /// `refresh_count`
    ///
    /// Returns `None`, leaving the index as it is, when the current
    /// generation already comes from that refresh or a later one.
    #[instrument(skip_all, fields(refresh_count = refresh_count, entities = snapshot.len()))]
    pub fn rebuild_at(&self, refresh_count: u64, snapshot: Arc<Snapshot>) -> Option<Arc<IndexGeneration>> {
        let mut next = self.lock_writer();
        let held = self.current.load().refresh_count;
        if refresh_count <= held {
            debug!(held, "Skipping snapshot from an older refresh");
            return None;
        }
        Some(self.install(&mut next, refresh_count, snapshot))
    }

    fn lock_writer(&self) -> MutexGuard<'_, u64> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn install(&self, next: &mut u64, refresh_count: u64, snapshot: Arc<Snapshot>) -> Arc<IndexGeneration> {
        let number = *next;
        *next += 1;
        let generation = Arc::new(IndexGeneration {
            refresh_count,
            ..IndexGeneration::build(number, snapshot)
        });
        self.current.store(Arc::clone(&generation));
        debug!(
            generation = number,
            refresh_count,
            categories = generation.groups.len(),
            "Rebuilt entity index"
        );
        generation
    }

    /// The current generation
    pub fn current(&self) -> Arc<IndexGeneration> {
        self.current.load_full()
    }

    pub fn generation(&self) -> u64 {
        self.current.load().number
    }

    /// Names of all categories present, sorted
    pub fn categories(&self) -> BTreeSet<String> {
        self.current.load().groups.keys().cloned().collect()
    }

    /// Group for `name`; the lookup is case-insensitive
    pub fn category(&self, name: &str) -> Result<Arc<CategoryGroup>, IndexError> {
        let key = name.to_lowercase();
        let group = self.current.load().groups.get(&key).cloned();
        trace!(category = %key, found = group.is_some(), "Category lookup");
        group.ok_or(IndexError::UnknownCategory(key))
    }

    /// Entity by id in the current generation
    pub fn entity(&self, entity_id: &EntityId) -> Option<Arc<Entity>> {
        self.current.load().by_id.get(entity_id).cloned()
    }

    /// Number of entities in the current generation
    pub fn len(&self) -> usize {
        self.current.load().snapshot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Subscriber<Invalidation> for EntityIndex {
    fn on_invalidate(&self, event: &Invalidation) -> Result<(), SubscriberError> {
        self.rebuild_at(event.refresh_count, Arc::clone(&event.snapshot));
        Ok(())
    }

    fn name(&self) -> &str {
        "entity-index"
    }
}

impl std::fmt::Debug for EntityIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let current = self.current.load();
        f.debug_struct("EntityIndex")
            .field("generation", &current.number)
            .field("entities", &current.snapshot.len())
            .field("categories", &current.groups.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ha_remote::InMemoryStateSource;
    use serde_json::json;
    use std::time::Duration;

    fn snapshot(value: serde_json::Value) -> Arc<Snapshot> {
        Arc::new(serde_json::from_value(value).unwrap())
    }

    fn mixed_snapshot() -> Arc<Snapshot> {
        snapshot(json!([
            {"entity_id": "light.kitchen", "state": "off"},
            {"entity_id": "switch.fan", "state": "on"},
            {"entity_id": "light.porch", "state": "on"},
            {"entity_id": "sensor.outdoor.temperature", "state": "12.5"},
            {"entity_id": "light.attic", "state": "off"}
        ]))
    }

    #[test]
    fn test_empty_index() {
        let index = EntityIndex::new();
        assert_eq!(index.generation(), 0);
        assert!(index.is_empty());
        assert!(index.categories().is_empty());
        assert_eq!(
            index.category("light").unwrap_err(),
            IndexError::UnknownCategory("light".into())
        );
    }

    #[test]
    fn test_groups_hold_exactly_their_members_in_order() {
        let snapshot = mixed_snapshot();
        let index = EntityIndex::from_snapshot(snapshot.clone());

        for category in index.categories() {
            let group = index.category(&category).unwrap();
            let expected: Vec<&str> = snapshot
                .iter()
                .filter(|e| e.entity_id.as_str().split_once('.').unwrap().0 == category)
                .map(|e| e.entity_id.as_str())
                .collect();
            let actual: Vec<&str> = group.members().iter().map(|e| e.entity_id.as_str()).collect();
            assert_eq!(actual, expected, "category {category}");
        }

        let total: usize = index.current().groups().map(|g| g.len()).sum();
        assert_eq!(total, snapshot.len());
    }

    #[test]
    fn test_name_is_remainder_after_first_dot() {
        let index = EntityIndex::from_snapshot(mixed_snapshot());
        let sensors = index.category("sensor").unwrap();
        assert!(sensors.get("outdoor.temperature").is_some());
    }

    #[test]
    fn test_categories_sorted_and_lookup_case_insensitive() {
        let index = EntityIndex::from_snapshot(mixed_snapshot());
        let names: Vec<String> = index.categories().into_iter().collect();
        assert_eq!(names, vec!["light", "sensor", "switch"]);

        let group = index.category("LIGHT").unwrap();
        assert_eq!(group.name(), "light");
        assert_eq!(group.len(), 3);
    }

    #[test]
    fn test_duplicate_name_first_wins() {
        let index = EntityIndex::from_snapshot(snapshot(json!([
            {"entity_id": "light.kitchen", "state": "off"},
            {"entity_id": "light.kitchen", "state": "on"}
        ])));
        let group = index.category("light").unwrap();
        assert_eq!(group.len(), 2);
        assert_eq!(group.get("kitchen").unwrap().state, "off");
    }

    #[test]
    fn test_old_group_survives_rebuild() {
        let index = EntityIndex::from_snapshot(mixed_snapshot());
        let old = index.category("light").unwrap();

        index.rebuild(snapshot(json!([{"entity_id": "switch.fan", "state": "off"}])));

        assert_eq!(old.len(), 3);
        assert_eq!(old.generation(), 1);
        assert_eq!(index.generation(), 2);
        assert!(index.category("light").is_err());
    }

    #[test]
    fn test_entity_lookup() {
        let index = EntityIndex::from_snapshot(mixed_snapshot());
        let id: EntityId = "switch.fan".parse().unwrap();
        assert_eq!(index.entity(&id).unwrap().state, "on");
        assert!(index.entity(&"switch.none".parse().unwrap()).is_none());
    }

    fn invalidation(refresh_count: u64, snapshot: Arc<Snapshot>) -> Invalidation {
        Invalidation {
            snapshot,
            refresh_count,
            refreshed_at: Utc::now(),
            forced: false,
        }
    }

    #[test]
    fn test_late_invalidation_does_not_roll_back() {
        let index = EntityIndex::new();
        let older = snapshot(json!([{"entity_id": "light.kitchen", "state": "off"}]));
        let newer = mixed_snapshot();

        index.on_invalidate(&invalidation(2, newer.clone())).unwrap();
        index.on_invalidate(&invalidation(1, older)).unwrap();

        assert!(Arc::ptr_eq(index.current().snapshot(), &newer));
        assert_eq!(index.current().refresh_count(), 2);
        assert_eq!(index.generation(), 1);

        // The same refresh delivered twice builds once
        index.on_invalidate(&invalidation(2, newer)).unwrap();
        assert_eq!(index.generation(), 1);
    }

    #[test]
    fn test_manual_rebuild_keeps_refresh_count() {
        let index = EntityIndex::new();
        index.rebuild_at(3, mixed_snapshot()).unwrap();
        index.rebuild(snapshot(json!([])));

        assert_eq!(index.generation(), 2);
        assert_eq!(index.current().refresh_count(), 3);
        assert!(index.rebuild_at(3, mixed_snapshot()).is_none());
        assert!(index.rebuild_at(4, mixed_snapshot()).is_some());
        assert_eq!(index.len(), 5);
    }

    fn make_cache() -> (Arc<InMemoryStateSource>, SnapshotCache) {
        let source = Arc::new(
            InMemoryStateSource::from_json(json!([
                {"entity_id": "light.kitchen", "state": "off"},
                {"entity_id": "switch.fan", "state": "on"}
            ]))
            .unwrap(),
        );
        let cache = SnapshotCache::new(source.clone(), Duration::from_secs(60));
        (source, cache)
    }

    #[tokio::test(start_paused = true)]
    async fn test_attached_index_follows_cache() {
        let (source, cache) = make_cache();
        let index = EntityIndex::attach(&cache).unwrap();
        assert_eq!(index.generation(), 0);

        cache.get().await.unwrap();
        let names: Vec<String> = index.categories().into_iter().collect();
        assert_eq!(names, vec!["light", "switch"]);
        let lights = index.category("light").unwrap();
        assert_eq!(lights.len(), 1);
        assert_eq!(lights.members()[0].name(), "kitchen");

        source.set_entities(vec![]);
        cache.force_refresh().await.unwrap();
        assert!(index.is_empty());
        assert_eq!(index.generation(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_builds_from_existing_snapshot() {
        let (_source, cache) = make_cache();
        cache.get().await.unwrap();
        cache.force_refresh().await.unwrap();

        let index = EntityIndex::attach(&cache).unwrap();
        assert_eq!(index.generation(), 1);
        assert_eq!(index.current().refresh_count(), 2);
        assert_eq!(index.len(), 2);

        // Later refreshes still land
        cache.force_refresh().await.unwrap();
        assert_eq!(index.generation(), 2);
        assert_eq!(index.current().refresh_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hits_do_not_rebuild() {
        let (_source, cache) = make_cache();
        let index = EntityIndex::attach(&cache).unwrap();

        cache.get().await.unwrap();
        cache.get().await.unwrap();
        assert_eq!(index.generation(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_stops_rebuilds() {
        let (_source, cache) = make_cache();
        let index = EntityIndex::attach(&cache).unwrap();
        index.detach(cache.bus()).unwrap();
        assert_eq!(cache.bus().subscriber_count(), 0);

        cache.get().await.unwrap();
        assert_eq!(index.generation(), 0);
    }
}
