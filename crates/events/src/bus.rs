//! Event bus: the simulator's watch mechanism.
//!
//! Publishing appends to the store first, then fans the event out to every
//! subscriber. Pattern subscribers only see matching events.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::sync::{RwLock, broadcast};
use tracing::debug;

use crate::error::{Error, Result};
use crate::event::ClusterEvent;
use crate::store::EventStore;
use crate::types::{EventId, ObjectKey, ResourceKind};

const DEFAULT_CHANNEL_CAPACITY: usize = 1000;
const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Circuit breaker to prevent cascading failures.
pub struct CircuitBreaker {
    failure_count: AtomicU32,
    threshold: u32,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given failure threshold.
    pub fn new(threshold: u32) -> Self {
        Self {
            failure_count: AtomicU32::new(0),
            threshold,
        }
    }

    /// Check if a request should be allowed.
    pub fn allow_request(&self) -> bool {
        self.failure_count.load(Ordering::Relaxed) < self.threshold
    }

    /// Record a successful request.
    pub fn record_success(&self) {
        self.failure_count.store(0, Ordering::Relaxed);
    }

    /// Record a failed request.
    pub fn record_failure(&self) {
        let _ = self
            .failure_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_add(1))
            });
    }

    /// Get the current failure count.
    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::Relaxed)
    }

    /// Reset the circuit breaker.
    pub fn reset(&self) {
        self.failure_count.store(0, Ordering::Relaxed);
    }
}

struct Subscriber {
    sender: broadcast::Sender<ClusterEvent>,
    pattern: EventPattern,
    breaker: Arc<CircuitBreaker>,
}

/// Subscription handle for receiving events.
pub struct EventSubscription {
    receiver: broadcast::Receiver<ClusterEvent>,
}

impl EventSubscription {
    /// Receive the next event.
    pub async fn recv(&mut self) -> Result<ClusterEvent> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => Error::ChannelClosed,
            broadcast::error::RecvError::Lagged(skipped) => Error::Lagged { skipped },
        })
    }

    /// Try to receive an event without waiting.
    pub fn try_recv(&mut self) -> Result<ClusterEvent> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Lagged(skipped) => Error::Lagged { skipped },
            broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed => {
                Error::ChannelClosed
            }
        })
    }
}

/// Pattern for filtering events.
#[derive(Debug, Clone)]
pub enum EventPattern {
    /// Match all events.
    All,
    /// Match events by type.
    ByType(String),
    /// Match events about one kind of object.
    ByKind(ResourceKind),
    /// Match events about one object.
    ByObject(ObjectKey),
    /// Match events by multiple types.
    ByTypes(Vec<String>),
}

impl EventPattern {
    /// Check if an event matches this pattern.
    pub fn matches(&self, event: &ClusterEvent) -> bool {
        match self {
            Self::All => true,
            Self::ByType(t) => event.event_type() == t,
            Self::ByKind(kind) => event.kind() == *kind,
            Self::ByObject(key) => event.key() == *key,
            Self::ByTypes(types) => types.iter().any(|t| event.event_type() == t),
        }
    }
}

/// Event bus for publishing and subscribing to events.
pub struct EventBus {
    store: Arc<dyn EventStore>,
    broadcast: broadcast::Sender<ClusterEvent>,
    subscribers: RwLock<HashMap<String, Subscriber>>,
    next_id: RwLock<u64>,
    channel_capacity: usize,
    failure_threshold: u32,
}

impl EventBus {
    /// Create a new event bus with the given store.
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self::with_settings(store, DEFAULT_CHANNEL_CAPACITY, DEFAULT_FAILURE_THRESHOLD)
    }

    fn with_settings(
        store: Arc<dyn EventStore>,
        channel_capacity: usize,
        failure_threshold: u32,
    ) -> Self {
        let (broadcast, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            store,
            broadcast,
            subscribers: RwLock::new(HashMap::new()),
            next_id: RwLock::new(0),
            channel_capacity,
            failure_threshold,
        }
    }

    /// Publish an event.
    ///
    /// The event is stored and broadcast to all subscribers.
    pub async fn publish(&self, event: ClusterEvent) -> Result<EventId> {
        let event_id = self.store.append(event.clone()).await?;

        debug!(
            event_id = %event_id,
            event_type = event.event_type(),
            object = %event.key(),
            "Publishing event"
        );

        // No receivers is fine: the store already has the event.
        let _ = self.broadcast.send(event.clone());

        let subscribers = self.subscribers.read().await;
        for (id, sub) in subscribers
            .iter()
            .filter(|(_, sub)| sub.pattern.matches(&event))
        {
            if !sub.breaker.allow_request() {
                debug!(
                    subscriber = %id,
                    subscriber_failures = sub.breaker.failure_count(),
                    "Skipping subscriber due to circuit breaker"
                );
                continue;
            }

            match sub.sender.send(event.clone()) {
                Ok(_) => sub.breaker.record_success(),
                Err(broadcast::error::SendError(_)) => {
                    sub.breaker.record_failure();
                    debug!(
                        subscriber = %id,
                        subscriber_failures = sub.breaker.failure_count(),
                        "Failed to deliver event to subscriber"
                    );
                }
            }
        }

        Ok(event_id)
    }

    /// Subscribe to all events.
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            receiver: self.broadcast.subscribe(),
        }
    }

    /// Subscribe to events matching a pattern.
    pub async fn subscribe_with_pattern(
        &self,
        pattern: EventPattern,
    ) -> (String, EventSubscription) {
        let (sender, receiver) = broadcast::channel(self.channel_capacity.max(1));

        let id = {
            let mut next_id = self.next_id.write().await;
            let id = format!("sub_{}", *next_id);
            *next_id = next_id.saturating_add(1);
            id
        };

        let mut subscribers = self.subscribers.write().await;
        subscribers.insert(
            id.clone(),
            Subscriber {
                sender,
                pattern,
                breaker: Arc::new(CircuitBreaker::new(self.failure_threshold)),
            },
        );

        (id, EventSubscription { receiver })
    }

    /// Unsubscribe a pattern-based subscriber.
    pub async fn unsubscribe(&self, subscriber_id: &str) {
        let mut subscribers = self.subscribers.write().await;
        subscribers.remove(subscriber_id);
    }

    /// Number of pattern-based subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Replay events after a given event ID.
    pub async fn replay_from(&self, from: Option<EventId>) -> Result<Vec<ClusterEvent>> {
        self.store.read(from).await
    }

    /// Get the underlying event store.
    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    /// Get the circuit breaker failure threshold.
    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }
}

/// Builder for EventBus.
pub struct EventBusBuilder {
    store: Option<Arc<dyn EventStore>>,
    channel_capacity: usize,
    failure_threshold: u32,
}

impl EventBusBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            store: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }

    /// Set the event store.
    pub fn with_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the broadcast channel capacity.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Set the circuit breaker failure threshold.
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Build the event bus.
    pub fn build(self) -> Result<EventBus> {
        let store = self
            .store
            .ok_or_else(|| Error::invalid_event("No event store configured"))?;

        if self.channel_capacity == 0 {
            return Err(Error::invalid_event("Channel capacity must be positive"));
        }

        Ok(EventBus::with_settings(
            store,
            self.channel_capacity,
            self.failure_threshold,
        ))
    }
}

impl Default for EventBusBuilder {
    fn default() -> Self {
        Self::new()
    }
}
