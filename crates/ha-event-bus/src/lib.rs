//! Invalidation bus with synchronous, ordered pub/sub
//!
//! This crate provides the InvalidationBus, the one-to-many notification
//! channel between the snapshot cache and the views derived from it.
//! Delivery is synchronous: when `publish()` returns, every subscriber has
//! been called, in subscription order. A failing subscriber does not stop
//! delivery to the ones after it; all failures are handed back to the
//! publisher together.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Error returned by a subscriber's callback
pub type SubscriberError = Box<dyn std::error::Error + Send + Sync>;

/// A consumer of invalidation events
pub trait Subscriber<E>: Send + Sync {
    /// Called once per published event, before `publish()` returns
    fn on_invalidate(&self, event: &E) -> Result<(), SubscriberError>;

    /// Name used in logs and delivery failures
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// A unique identifier for a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Errors from misusing the bus
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("subscriber is already registered as {0}")]
    AlreadySubscribed(SubscriberId),

    #[error("subscriber {0} is not subscribed")]
    NotSubscribed(SubscriberId),
}

/// One subscriber that failed during a publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub subscriber: SubscriberId,
    pub name: String,
    pub message: String,
}

/// All failures collected during one publish
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{} of {delivered} subscriber(s) failed: {}", .failures.len(), summary(.failures))]
pub struct PublishError {
    /// Number of subscribers the event was delivered to, failed ones included
    pub delivered: usize,
    pub failures: Vec<DeliveryFailure>,
}

fn summary(failures: &[DeliveryFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({}): {}", f.name, f.subscriber, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

struct Registration<E> {
    id: SubscriberId,
    subscriber: Arc<dyn Subscriber<E>>,
}

impl<E> Clone for Registration<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            subscriber: Arc::clone(&self.subscriber),
        }
    }
}

/// The bus for publishing invalidation events to subscribers
pub struct InvalidationBus<E> {
    /// Subscribers in registration order
    subscribers: Mutex<Vec<Registration<E>>>,
    /// Counter for generating unique subscriber IDs
    next_id: AtomicU64,
}

impl<E> InvalidationBus<E> {
    /// Create a new bus with no subscribers
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Registration<E>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a subscriber
    ///
    /// Registering the same subscriber (the same `Arc`) twice is an error.
    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber<E>>) -> Result<SubscriberId, BusError> {
        let mut subscribers = self.lock();

        if let Some(existing) = subscribers
            .iter()
            .find(|r| same_subscriber(&r.subscriber, &subscriber))
        {
            return Err(BusError::AlreadySubscribed(existing.id));
        }

        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::SeqCst));
        trace!(subscriber = %id, name = subscriber.name(), "Subscribing");
        subscribers.push(Registration { id, subscriber });
        Ok(id)
    }

    /// Remove a subscriber
    pub fn unsubscribe(&self, id: SubscriberId) -> Result<(), BusError> {
        let mut subscribers = self.lock();
        let position = subscribers
            .iter()
            .position(|r| r.id == id)
            .ok_or(BusError::NotSubscribed(id))?;
        subscribers.remove(position);
        trace!(subscriber = %id, "Unsubscribed");
        Ok(())
    }

    /// Deliver an event to every current subscriber, in subscription order
    ///
    /// The subscriber list is captured when the call starts, so callbacks may
    /// subscribe or unsubscribe without deadlocking; such changes take effect
    /// from the next publish. Returns the number of subscribers reached.
    pub fn publish(&self, event: &E) -> Result<usize, PublishError> {
        let recipients: Vec<Registration<E>> = self.lock().clone();
        debug!(subscribers = recipients.len(), "Publishing invalidation");

        let mut failures = Vec::new();
        for registration in &recipients {
            if let Err(e) = registration.subscriber.on_invalidate(event) {
                warn!(
                    subscriber = %registration.id,
                    name = registration.subscriber.name(),
                    error = %e,
                    "Subscriber failed to handle invalidation"
                );
                failures.push(DeliveryFailure {
                    subscriber: registration.id,
                    name: registration.subscriber.name().to_string(),
                    message: e.to_string(),
                });
            }
        }

        if failures.is_empty() {
            Ok(recipients.len())
        } else {
            Err(PublishError {
                delivered: recipients.len(),
                failures,
            })
        }
    }

    /// Get the number of registered subscribers
    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    /// Check whether a subscription is still registered
    pub fn is_subscribed(&self, id: SubscriberId) -> bool {
        self.lock().iter().any(|r| r.id == id)
    }
}

impl<E> Default for InvalidationBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

fn same_subscriber<E>(a: &Arc<dyn Subscriber<E>>, b: &Arc<dyn Subscriber<E>>) -> bool {
    // Compare data pointers only; vtable pointers are not guaranteed unique.
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Thread-safe wrapper for InvalidationBus
pub type SharedInvalidationBus<E> = Arc<InvalidationBus<E>>;
