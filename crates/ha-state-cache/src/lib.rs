//! TTL snapshot cache for Home Assistant entity states
//!
//! This crate provides the SnapshotCache, the single authority for the
//! full entity list fetched from a [`RemoteStateSource`]. It is responsible
//! for:
//! - Serving the cached snapshot while it is younger than the TTL
//! - Refetching on expiry or on request, with concurrent callers collapsed
//!   into one remote call
//! - Publishing an [`Invalidation`] on its bus after every successful fetch
//! - Tracking cache age and the number of refreshes

mod age;

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use ha_core::Snapshot;
use ha_event_bus::{InvalidationBus, PublishError};
use ha_remote::{RemoteError, SharedStateSource};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, instrument, trace, warn};

pub use age::describe_age;

/// Default time-to-live for a snapshot
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Event published after every successful fetch
#[derive(Debug, Clone)]
pub struct Invalidation {
    /// The snapshot that was just installed
    pub snapshot: Arc<Snapshot>,
    /// Refresh count after this fetch
    pub refresh_count: u64,
    /// Wall-clock time of the fetch
    pub refreshed_at: DateTime<Utc>,
    /// Whether the fetch was started by a forced refresh
    ///
    /// A forced refresh that joins a fetch already started by an expired
    /// [`get`](SnapshotCache::get) does not set this.
    pub forced: bool,
}

/// Bus carrying cache invalidations
pub type CacheBus = InvalidationBus<Invalidation>;

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur when reading through the cache
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    /// The fetch failed; nothing was installed
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The new snapshot was installed but some subscribers failed on it
    #[error("snapshot installed, but delivery failed: {0}")]
    Delivery(#[from] PublishError),
}

type Flight = Shared<BoxFuture<'static, CacheResult<Arc<Snapshot>>>>;

#[derive(Default)]
struct CacheState {
    value: Option<Arc<Snapshot>>,
    fetched_at: Option<Instant>,
    last_refreshed: Option<DateTime<Utc>>,
    refresh_count: u64,
    in_flight: Option<Flight>,
}

impl CacheState {
    fn fresh(&self, ttl: Duration) -> Option<Arc<Snapshot>> {
        match (&self.value, self.fetched_at) {
            (Some(value), Some(at)) if at.elapsed() < ttl => Some(Arc::clone(value)),
            _ => None,
        }
    }
}

struct Inner {
    source: SharedStateSource,
    bus: Arc<CacheBus>,
    ttl: Duration,
    state: Mutex<CacheState>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install a fetch result and publish it. Runs once per flight, in the
    /// fetch task, as soon as the fetch finishes.
    fn complete(&self, fetched: Result<Snapshot, RemoteError>, forced: bool) -> CacheResult<Arc<Snapshot>> {
        let mut state = self.lock();
        state.in_flight = None;

        let snapshot = match fetched {
            Ok(snapshot) => Arc::new(snapshot),
            Err(e) => {
                warn!(error = %e, "Snapshot fetch failed, keeping previous value");
                return Err(e.into());
            }
        };

        state.value = Some(Arc::clone(&snapshot));
        state.fetched_at = Some(Instant::now());
        let refreshed_at = Utc::now();
        state.last_refreshed = Some(refreshed_at);
        state.refresh_count += 1;

        let event = Invalidation {
            snapshot: Arc::clone(&snapshot),
            refresh_count: state.refresh_count,
            refreshed_at,
            forced,
        };
        // Subscribers may read the cache back, so the lock must be released first.
        drop(state);

        info!(
            entities = snapshot.len(),
            refresh_count = event.refresh_count,
            forced,
            "Snapshot refreshed"
        );
        self.bus.publish(&event)?;
        Ok(snapshot)
    }
}

/// Start a fetch, or join the one already running
fn join_or_start(inner: &Arc<Inner>, state: &mut CacheState, forced: bool) -> Flight {
    if let Some(flight) = &state.in_flight {
        trace!("Joining in-flight fetch");
        return flight.clone();
    }

    debug!(forced, "Starting snapshot fetch");
    // The task installs and publishes the result itself, so it lands when the
    // fetch finishes even if every caller has stopped waiting.
    let task_inner = Arc::clone(inner);
    let task = tokio::spawn(async move {
        let fetched = AssertUnwindSafe(task_inner.source.fetch_all_states())
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(fetch_task_error("fetch panicked")));
        task_inner.complete(fetched, forced)
    });

    let flight = async move {
        task.await
            .unwrap_or_else(|e| Err(fetch_task_error(&format!("fetch task failed: {e}")).into()))
    }
    .boxed()
    .shared();

    state.in_flight = Some(flight.clone());
    flight
}

fn fetch_task_error(message: &str) -> RemoteError {
    RemoteError::Network {
        path: ha_core::api::STATES.to_string(),
        message: message.to_string(),
    }
}

/// Time-bounded cache of the full entity list
///
/// Cloning is cheap and yields a handle to the same cache.
#[derive(Clone)]
pub struct SnapshotCache {
    inner: Arc<Inner>,
}

impl SnapshotCache {
    /// Create a cache with its own bus
    pub fn new(source: SharedStateSource, ttl: Duration) -> Self {
        Self::with_bus(source, ttl, Arc::new(CacheBus::new()))
    }

    /// Create a cache publishing on an existing bus
    pub fn with_bus(source: SharedStateSource, ttl: Duration, bus: Arc<CacheBus>) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                bus,
                ttl,
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    /// Get the snapshot, fetching if it is missing or older than the TTL
    ///
    /// Concurrent callers during an expired window share a single fetch and
    /// all observe its result, snapshot or error.
    #[instrument(skip(self))]
    pub async fn get(&self) -> CacheResult<Arc<Snapshot>> {
        let flight = {
            let mut state = self.inner.lock();
            if let Some(snapshot) = state.fresh(self.inner.ttl) {
                trace!("Cache hit");
                return Ok(snapshot);
            }
            join_or_start(&self.inner, &mut state, false)
        };
        flight.await
    }

    /// Fetch regardless of the TTL
    ///
    /// Joins a fetch that is already running instead of starting a second.
    #[instrument(skip(self))]
    pub async fn force_refresh(&self) -> CacheResult<Arc<Snapshot>> {
        let flight = {
            let mut state = self.inner.lock();
            join_or_start(&self.inner, &mut state, true)
        };
        flight.await
    }

    /// [`get`](Self::get) with a caller-supplied deadline
    ///
    /// On expiry the caller gets [`RemoteError::Timeout`]. The fetch itself
    /// keeps running and installs its result when it finishes.
    pub async fn get_within(&self, deadline: Duration) -> CacheResult<Arc<Snapshot>> {
        tokio::time::timeout(deadline, self.get())
            .await
            .unwrap_or(Err(CacheError::Remote(RemoteError::Timeout)))
    }

    /// [`force_refresh`](Self::force_refresh) with a caller-supplied deadline
    pub async fn force_refresh_within(&self, deadline: Duration) -> CacheResult<Arc<Snapshot>> {
        tokio::time::timeout(deadline, self.force_refresh())
            .await
            .unwrap_or(Err(CacheError::Remote(RemoteError::Timeout)))
    }

    /// The current snapshot without fetching, fresh or not
    pub fn peek(&self) -> Option<Arc<Snapshot>> {
        self.inner.lock().value.clone()
    }

    /// The current snapshot with the refresh count it was installed at
    pub fn peek_with_refresh_count(&self) -> Option<(Arc<Snapshot>, u64)> {
        let state = self.inner.lock();
        state.value.clone().map(|value| (value, state.refresh_count))
    }

    /// Time since the last successful fetch
    pub fn age(&self) -> Option<Duration> {
        self.inner.lock().fetched_at.map(|at| at.elapsed())
    }

    /// Human-readable cache age
    pub fn age_description(&self) -> String {
        describe_age(self.age())
    }

    /// Wall-clock time of the last successful fetch
    pub fn last_refreshed(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().last_refreshed
    }

    /// Number of successful fetches so far
    pub fn refresh_count(&self) -> u64 {
        self.inner.lock().refresh_count
    }

    /// Whether a fetch is currently running
    pub fn is_refreshing(&self) -> bool {
        self.inner.lock().in_flight.is_some()
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// The bus invalidations are published on
    pub fn bus(&self) -> &Arc<CacheBus> {
        &self.inner.bus
    }

    /// The underlying remote source
    pub fn source(&self) -> &SharedStateSource {
        &self.inner.source
    }
}

impl std::fmt::Debug for SnapshotCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("SnapshotCache")
            .field("ttl", &self.inner.ttl)
            .field("age", &state.fetched_at.map(|at| at.elapsed()))
            .field("refresh_count", &state.refresh_count)
            .field("entities", &state.value.as_ref().map(|s| s.len()))
            .finish()
    }
}
