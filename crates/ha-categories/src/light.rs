//! Handler for the `light` category

use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ha_controllers::{CommandOutcome, ControllerOptions, ControllerResult, LightAttributes, LightController};
use ha_core::EntityId;
use ha_entity_index::CategoryGroup;
use ha_remote::SharedStateSource;
use indexmap::IndexMap;
use tracing::{debug, info, instrument, warn};

use crate::handler::find_in;
use crate::{CategoryContext, CategoryHandler, CategoryResult, GenericCategory};

/// Per-member results of a bulk command, in member order
pub type BulkOutcome = Vec<(EntityId, ControllerResult<CommandOutcome>)>;

#[derive(Clone, Copy)]
enum BulkCommand<'a> {
    TurnOn,
    TurnOff,
    Toggle,
    SetAttributes(&'a LightAttributes),
}

/// Controllers bound to the members of one index generation
#[derive(Debug)]
struct BoundLights {
    generation: u64,
    controllers: IndexMap<EntityId, Arc<LightController>>,
}

/// Lights with one controller bound to each member
///
/// The controller set follows the index: when the category's group comes
/// from a newer generation, controllers are bound to its members and those
/// of vanished lights are dropped. A light present in both keeps its
/// controller, and with it the state of its last command.
pub struct LightCategory {
    generic: GenericCategory,
    source: SharedStateSource,
    options: ControllerOptions,
    bound: Mutex<BoundLights>,
}

impl LightCategory {
    pub const KIND: &'static str = "light";

    /// Bind a controller to every member of the category as it is now
    pub fn new(context: &CategoryContext) -> CategoryResult<Self> {
        let generic = GenericCategory::new(context.name.as_str(), Arc::clone(&context.index));
        let group = generic.group()?;
        let category = Self {
            generic,
            source: Arc::clone(&context.source),
            options: context.options,
            bound: Mutex::new(BoundLights {
                generation: group.generation(),
                controllers: IndexMap::new(),
            }),
        };
        let controllers = category.bind(&group, &IndexMap::new());
        category.lock().controllers = controllers;
        Ok(category)
    }

    fn lock(&self) -> MutexGuard<'_, BoundLights> {
        self.bound.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bind(
        &self,
        group: &CategoryGroup,
        previous: &IndexMap<EntityId, Arc<LightController>>,
    ) -> IndexMap<EntityId, Arc<LightController>> {
        group
            .members()
            .iter()
            .map(|entity| {
                let controller = previous.get(&entity.entity_id).cloned().unwrap_or_else(|| {
                    Arc::new(LightController::new(
                        entity.entity_id.clone(),
                        Arc::clone(&self.source),
                        self.options,
                    ))
                });
                (entity.entity_id.clone(), controller)
            })
            .collect()
    }

    /// Controllers for the members of `group`, rebinding if it is newer
    fn controllers_for(&self, group: &CategoryGroup) -> IndexMap<EntityId, Arc<LightController>> {
        let mut bound = self.lock();
        if bound.generation != group.generation() {
            let controllers = self.bind(group, &bound.controllers);
            debug!(
                from = bound.generation,
                to = group.generation(),
                lights = controllers.len(),
                "Rebound light controllers"
            );
            *bound = BoundLights {
                generation: group.generation(),
                controllers,
            };
        }
        bound.controllers.clone()
    }

    fn controllers(&self) -> CategoryResult<IndexMap<EntityId, Arc<LightController>>> {
        Ok(self.controllers_for(&*self.group()?))
    }

    /// Controllers for every light, in member order
    pub fn lights(&self) -> CategoryResult<Vec<Arc<LightController>>> {
        Ok(self.controllers()?.into_values().collect())
    }

    /// Controller for the light named `name`, ignoring case
    pub fn light(&self, name: &str) -> CategoryResult<Option<Arc<LightController>>> {
        let group = self.group()?;
        let controllers = self.controllers_for(&group);
        Ok(find_in(&group, name).and_then(|entity| controllers.get(&entity.entity_id).cloned()))
    }

    pub async fn turn_all_on(&self) -> CategoryResult<BulkOutcome> {
        Ok(self.run_all(self.controllers()?, BulkCommand::TurnOn).await)
    }

    pub async fn turn_all_off(&self) -> CategoryResult<BulkOutcome> {
        Ok(self.run_all(self.controllers()?, BulkCommand::TurnOff).await)
    }

    pub async fn toggle_all(&self) -> CategoryResult<BulkOutcome> {
        Ok(self.run_all(self.controllers()?, BulkCommand::Toggle).await)
    }

    /// Apply `attributes` to every light
    ///
    /// Invalid attributes fail before any light is written.
    pub async fn change_attributes_of_all(&self, attributes: &LightAttributes) -> CategoryResult<BulkOutcome> {
        let controllers = self.controllers()?;
        if let Some(first) = controllers.values().next() {
            first.validate(attributes)?;
        }
        Ok(self
            .run_all(controllers, BulkCommand::SetAttributes(attributes))
            .await)
    }

    #[instrument(skip_all, fields(lights = controllers.len()))]
    async fn run_all(
        &self,
        controllers: IndexMap<EntityId, Arc<LightController>>,
        command: BulkCommand<'_>,
    ) -> BulkOutcome {
        let mut results = Vec::with_capacity(controllers.len());
        for (entity_id, light) in controllers {
            let result = match command {
                BulkCommand::TurnOn => light.turn_on().await,
                BulkCommand::TurnOff => light.turn_off().await,
                BulkCommand::Toggle => light.toggle().await,
                BulkCommand::SetAttributes(attributes) => light.set_attributes(attributes).await,
            };
            if let Err(e) = &result {
                warn!(entity_id = %entity_id, error = %e, "Light command failed");
            }
            results.push((entity_id, result));
        }

        let failed = results.iter().filter(|(_, r)| r.is_err()).count();
        info!(total = results.len(), failed, "Bulk light command finished");
        results
    }
}

impl std::fmt::Debug for LightCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bound = self.lock();
        f.debug_struct("LightCategory")
            .field("name", &self.generic.name())
            .field("generation", &bound.generation)
            .field("lights", &bound.controllers.len())
            .finish()
    }
}

impl CategoryHandler for LightCategory {
    fn name(&self) -> &str {
        self.generic.name()
    }

    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn group(&self) -> CategoryResult<Arc<CategoryGroup>> {
        self.generic.group()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CategoryError;
    use ha_controllers::{CommandState, ControllerError};
    use ha_core::Snapshot;
    use ha_entity_index::{EntityIndex, IndexError};
    use ha_remote::InMemoryStateSource;
    use serde_json::json;

    fn make_category(states: serde_json::Value) -> (Arc<InMemoryStateSource>, Arc<EntityIndex>, LightCategory) {
        let source = Arc::new(InMemoryStateSource::from_json(states.clone()).unwrap());
        let index = Arc::new(EntityIndex::from_snapshot(Arc::new(
            serde_json::from_value(states).unwrap(),
        )));
        let context = CategoryContext {
            name: "light".into(),
            index: index.clone(),
            source: source.clone(),
            options: ControllerOptions::default(),
        };
        (source, index, LightCategory::new(&context).unwrap())
    }

    fn make_test_setup() -> (Arc<InMemoryStateSource>, LightCategory) {
        let (source, _index, lights) = make_category(json!([
            {"entity_id": "light.kitchen", "state": "off"},
            {"entity_id": "switch.fan", "state": "on"},
            {"entity_id": "light.porch", "state": "on"}
        ]));
        (source, lights)
    }

    fn rebuild(index: &EntityIndex, source: &InMemoryStateSource, states: serde_json::Value) {
        let snapshot: Snapshot = serde_json::from_value(states).unwrap();
        source.set_entities(snapshot.iter().map(|e| (**e).clone()).collect());
        index.rebuild(Arc::new(snapshot));
    }

    #[test]
    fn test_one_controller_per_member() {
        let (_source, lights) = make_test_setup();
        let ids: Vec<String> = lights
            .lights()
            .unwrap()
            .iter()
            .map(|l| l.entity_id().to_string())
            .collect();
        assert_eq!(ids, vec!["light.kitchen", "light.porch"]);

        let porch = lights.light("PORCH").unwrap().unwrap();
        assert_eq!(porch.entity_id().as_str(), "light.porch");
        assert!(lights.light("garage").unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bulk_commands_hit_every_light_in_order() {
        let (source, lights) = make_test_setup();

        let results = lights.toggle_all().await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, r)| r.is_ok()));

        let commands = source.commands();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].payload, json!({"entity_id": "light.kitchen"}));
        assert_eq!(commands[1].payload, json!({"entity_id": "light.porch"}));

        let states: Vec<String> = results
            .iter()
            .map(|(_, r)| r.as_ref().unwrap().entity().unwrap().state.clone())
            .collect();
        assert_eq!(states, vec!["on", "off"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bulk_failures_are_reported_per_light() {
        let (source, lights) = make_test_setup();
        source.reject_commands(500, "boom");

        let results = lights.turn_all_off().await.unwrap();
        assert_eq!(results.len(), 2);
        for (_, result) in results {
            assert!(matches!(
                result,
                Err(ControllerError::CommandRejected { status: 500, .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_invalid_attributes_write_nothing() {
        let (source, lights) = make_test_setup();

        let err = lights
            .change_attributes_of_all(&LightAttributes::default().with_brightness(999))
            .await
            .unwrap_err();
        assert_eq!(err, ControllerError::InvalidBrightness(999).into());
        assert!(source.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_change_attributes_of_all() {
        let (source, lights) = make_test_setup();

        let results = lights
            .change_attributes_of_all(&LightAttributes::default().with_color("green"))
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        for command in source.commands() {
            assert_eq!(command.path, "/api/services/light/turn_on");
            assert_eq!(command.payload["rgb_color"], json!([0, 255, 0]));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_controllers_follow_index_rebuilds() {
        let (source, index, lights) = make_category(json!([
            {"entity_id": "light.kitchen", "state": "off"}
        ]));
        let kitchen = lights.light("kitchen").unwrap().unwrap();

        rebuild(
            &index,
            &source,
            json!([
                {"entity_id": "light.kitchen", "state": "off"},
                {"entity_id": "light.porch", "state": "off"}
            ]),
        );

        assert_eq!(lights.members().unwrap().len(), 2);
        let porch = lights.light("porch").unwrap().unwrap();
        assert_eq!(porch.entity_id().as_str(), "light.porch");
        // A light that stays keeps its controller
        assert!(Arc::ptr_eq(&kitchen, &lights.light("kitchen").unwrap().unwrap()));

        let results = lights.turn_all_on().await.unwrap();
        let ids: Vec<&str> = results.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["light.kitchen", "light.porch"]);
        assert_eq!(kitchen.controller().state(), CommandState::Confirmed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_lights_are_not_commanded() {
        let (source, index, lights) = make_category(json!([
            {"entity_id": "light.kitchen", "state": "off"},
            {"entity_id": "light.porch", "state": "off"}
        ]));
        assert_eq!(lights.lights().unwrap().len(), 2);

        rebuild(&index, &source, json!([{"entity_id": "light.porch", "state": "off"}]));

        assert!(lights.light("kitchen").unwrap().is_none());
        let results = lights.turn_all_off().await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(source.commands()[0].payload, json!({"entity_id": "light.porch"}));
    }

    #[tokio::test]
    async fn test_vanished_category_is_an_error() {
        let (source, index, lights) = make_category(json!([
            {"entity_id": "light.kitchen", "state": "off"}
        ]));

        rebuild(&index, &source, json!([{"entity_id": "switch.fan", "state": "on"}]));

        assert!(matches!(
            lights.turn_all_on().await,
            Err(CategoryError::Index(IndexError::UnknownCategory(_)))
        ));
        assert!(source.commands().is_empty());
    }
}
