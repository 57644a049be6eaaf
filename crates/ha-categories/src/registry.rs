//! Category name to handler resolution

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use ha_controllers::ControllerOptions;
use ha_core::categories;
use ha_entity_index::EntityIndex;
use ha_remote::SharedStateSource;
use tracing::{debug, instrument, trace};

use crate::{CategoryError, CategoryHandler, CategoryResult, GenericCategory, LightCategory};

/// Everything a factory needs to build a handler
#[derive(Clone)]
pub struct CategoryContext {
    /// Category name, lowercase
    pub name: String,
    pub index: Arc<EntityIndex>,
    pub source: SharedStateSource,
    pub options: ControllerOptions,
}

/// Builds the handler for one category
pub type CategoryFactory =
    Arc<dyn Fn(&CategoryContext) -> CategoryResult<Arc<dyn CategoryHandler>> + Send + Sync>;

#[derive(Default)]
struct HandlerCache {
    generation: u64,
    handlers: HashMap<String, Arc<dyn CategoryHandler>>,
}

/// Resolves category names to handlers
///
/// The CategoryRegistry is responsible for:
/// - Mapping category names to specialized handler factories
/// - Falling back to [`GenericCategory`] for unregistered categories
/// - Caching built handlers until the index moves to a new generation
pub struct CategoryRegistry {
    index: Arc<EntityIndex>,
    source: SharedStateSource,
    options: ControllerOptions,
    factories: DashMap<String, CategoryFactory>,
    cache: Mutex<HandlerCache>,
}

impl CategoryRegistry {
    /// Create a registry with no specialized handlers
    pub fn new(index: Arc<EntityIndex>, source: SharedStateSource, options: ControllerOptions) -> Self {
        Self {
            index,
            source,
            options,
            factories: DashMap::new(),
            cache: Mutex::new(HandlerCache::default()),
        }
    }

    /// Create a registry with the built-in handlers registered
    pub fn with_defaults(index: Arc<EntityIndex>, source: SharedStateSource, options: ControllerOptions) -> Self {
        let registry = Self::new(index, source, options);
        registry.register(categories::LIGHT, |context| {
            Ok(Arc::new(LightCategory::new(context)?) as Arc<dyn CategoryHandler>)
        });
        registry
    }

    /// Register a factory for `category`, replacing any previous one
    pub fn register<F>(&self, category: &str, factory: F)
    where
        F: Fn(&CategoryContext) -> CategoryResult<Arc<dyn CategoryHandler>> + Send + Sync + 'static,
    {
        let category = category.to_lowercase();
        debug!(category = %category, "Registering category handler");
        self.factories.insert(category.clone(), Arc::new(factory));
        self.lock_cache().handlers.remove(&category);
    }

    /// Whether `category` has a specialized handler
    pub fn is_registered(&self, category: &str) -> bool {
        self.factories.contains_key(&category.to_lowercase())
    }

    /// Names with a specialized handler, sorted
    pub fn registered(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn index(&self) -> &Arc<EntityIndex> {
        &self.index
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, HandlerCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handler for `category`
    ///
    /// Fails with an unknown-category error when the current index has no
    /// such category. Handlers are built on first access and reused until
    /// the index is rebuilt.
    #[instrument(skip(self))]
    pub fn resolve(&self, category: &str) -> CategoryResult<Arc<dyn CategoryHandler>> {
        let name = category.to_lowercase();
        self.index.category(&name)?;
        let generation = self.index.generation();

        {
            let mut cache = self.lock_cache();
            if cache.generation != generation {
                trace!(old = cache.generation, new = generation, "Discarding cached handlers");
                cache.handlers.clear();
                cache.generation = generation;
            }
            if let Some(handler) = cache.handlers.get(&name) {
                return Ok(Arc::clone(handler));
            }
        }

        // Built without holding the cache lock; factories may resolve other categories.
        let handler = self.build(&name)?;
        debug!(category = %name, kind = handler.kind(), generation, "Built category handler");

        let mut cache = self.lock_cache();
        if cache.generation != generation {
            return Ok(handler);
        }
        Ok(Arc::clone(cache.handlers.entry(name).or_insert(handler)))
    }

    fn build(&self, name: &str) -> CategoryResult<Arc<dyn CategoryHandler>> {
        let factory = self.factories.get(name).map(|f| Arc::clone(f.value()));
        match factory {
            Some(factory) => factory(&CategoryContext {
                name: name.to_string(),
                index: Arc::clone(&self.index),
                source: Arc::clone(&self.source),
                options: self.options,
            }),
            None => Ok(Arc::new(GenericCategory::new(name, Arc::clone(&self.index)))),
        }
    }

    /// Handler for `category`, downcast to the concrete type `T`
    pub fn resolve_as<T: CategoryHandler + 'static>(&self, category: &str, expected: &'static str) -> CategoryResult<Arc<T>> {
        let handler = self.resolve(category)?;
        let actual = handler.kind();
        handler
            .into_any()
            .downcast::<T>()
            .map_err(|_| CategoryError::WrongHandler {
                category: category.to_lowercase(),
                expected,
                actual,
            })
    }

    /// The light handler
    pub fn lights(&self) -> CategoryResult<Arc<LightCategory>> {
        self.resolve_as(categories::LIGHT, LightCategory::KIND)
    }
}

impl std::fmt::Debug for CategoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CategoryRegistry")
            .field("registered", &self.registered())
            .field("generation", &self.lock_cache().generation)
            .finish_non_exhaustive()
    }
}
