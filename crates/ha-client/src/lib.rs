//! Home Assistant control client
//!
//! The [`Client`] wires the pieces together: a remote state source, one
//! [`SnapshotCache`] in front of it, an [`EntityIndex`] subscribed to the
//! cache, and a [`CategoryRegistry`] resolving handlers over the index.
//!
//! # Example
//!
//! ```ignore
//! use ha_client::Client;
//! use ha_config::ClientConfig;
//!
//! let client = Client::connect(&ClientConfig::load(".")?).await?;
//! for name in client.category_names().await? {
//!     println!("{name}");
//! }
//! client.lights().await?.turn_all_off().await?;
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use ha_categories::{CategoryError, CategoryHandler, CategoryRegistry, LightCategory};
use ha_config::{ClientConfig, ConfigError};
use ha_controllers::{ControllerError, ControllerOptions};
use ha_core::Snapshot;
use ha_entity_index::EntityIndex;
use ha_event_bus::BusError;
use ha_remote::{HttpStateSource, RemoteError, SharedStateSource};
use ha_state_cache::{CacheError, SnapshotCache, DEFAULT_TTL};
use thiserror::Error;
use tracing::{info, instrument};

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Any error the client can surface
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Category(#[from] CategoryError),

    #[error(transparent)]
    Controller(#[from] ControllerError),
}

/// Cache and command settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
    pub cache_ttl: Duration,
    pub controller: ControllerOptions,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_TTL,
            controller: ControllerOptions::default(),
        }
    }
}

impl From<&ClientConfig> for ClientOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            cache_ttl: config.cache_ttl,
            controller: ControllerOptions {
                confirm_writes: config.confirm_writes,
                settle_delay: config.settle_delay,
            },
        }
    }
}

/// Entry point for reading and commanding entities
pub struct Client {
    source: SharedStateSource,
    cache: SnapshotCache,
    index: Arc<EntityIndex>,
    registry: CategoryRegistry,
}

impl Client {
    /// Connect over HTTP, validating the token once
    #[instrument(skip(config), fields(url = %config.url))]
    pub async fn connect(config: &ClientConfig) -> ClientResult<Self> {
        let source =
            HttpStateSource::connect(&config.url, config.token.clone(), config.request_timeout)
                .await?;
        info!(url = %source.base_url(), "Connected to Home Assistant");
        Self::with_source(Arc::new(source), ClientOptions::from(config))
    }

    /// Build a client over any state source
    pub fn with_source(source: SharedStateSource, options: ClientOptions) -> ClientResult<Self> {
        let cache = SnapshotCache::new(Arc::clone(&source), options.cache_ttl);
        let index = EntityIndex::attach(&cache)?;
        let registry =
            CategoryRegistry::with_defaults(Arc::clone(&index), Arc::clone(&source), options.controller);

        Ok(Self {
            source,
            cache,
            index,
            registry,
        })
    }

    /// Fetch a new snapshot regardless of the TTL
    pub async fn refresh(&self) -> ClientResult<Arc<Snapshot>> {
        Ok(self.cache.force_refresh().await?)
    }

    /// The current snapshot, fetched if missing or expired
    pub async fn snapshot(&self) -> ClientResult<Arc<Snapshot>> {
        Ok(self.cache.get().await?)
    }

    /// Names of all categories, sorted
    pub async fn category_names(&self) -> ClientResult<BTreeSet<String>> {
        self.snapshot().await?;
        Ok(self.index.categories())
    }

    /// Handler for the category `name`
    pub async fn category(&self, name: &str) -> ClientResult<Arc<dyn CategoryHandler>> {
        self.snapshot().await?;
        Ok(self.registry.resolve(name)?)
    }

    /// The light handler
    pub async fn lights(&self) -> ClientResult<Arc<LightCategory>> {
        self.snapshot().await?;
        Ok(self.registry.lights()?)
    }

    pub fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    pub fn index(&self) -> &Arc<EntityIndex> {
        &self.index
    }

    pub fn registry(&self) -> &CategoryRegistry {
        &self.registry
    }

    pub fn source(&self) -> &SharedStateSource {
        &self.source
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("cache", &self.cache)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}
