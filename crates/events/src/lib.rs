//! Cluster state via event sourcing.
//!
//! Every change to the simulated cluster is a [`ClusterEvent`]. Key features:
//!
//! - **Object model**: a small, Kubernetes-shaped set of resources
//! - **Event store**: append-only storage, in memory or journaled to disk
//! - **Event bus**: pub/sub that acts as the cluster's watch
//! - **Projections**: the observed cluster state, rebuilt from events
//!
//! # Example
//!
//! ```ignore
//! use kubeloop_events::{
//!     ClusterEvent, ClusterProjection, EventBus, InMemoryEventStore, ManagedProjection,
//!     ObjectKey, ResourceKind,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(InMemoryEventStore::new());
//!     let bus = EventBus::new(store.clone());
//!     let mut sub = bus.subscribe();
//!
//!     let key = ObjectKey::default_ns(ResourceKind::Pod, "web-0");
//!     bus.publish(ClusterEvent::pod_bound(key, "node-a")).await.unwrap();
//!
//!     let event = sub.recv().await.unwrap();
//!     println!("Received: {:?}", event.event_type());
//!
//!     let projection = ManagedProjection::new(ClusterProjection::new());
//!     projection.catch_up(store.as_ref()).await.unwrap();
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod bus;
pub mod error;
pub mod event;
pub mod projection;
pub mod store;
pub mod types;

// Re-export main types
pub use bus::{CircuitBreaker, EventBus, EventBusBuilder, EventPattern, EventSubscription};
pub use error::{Error, Result};
pub use event::ClusterEvent;
pub use projection::{ClusterProjection, ClusterState, ManagedProjection, ObjectRecord, Projection};
pub use store::{read_journal, EventStore, InMemoryEventStore, JournalEventStore, TracingEventStore};
pub use types::{
    validate_name, ClaimPhase, ClaimSpec, DeploymentSpec, EventId, ObjectKey, ObjectMeta, OwnerRef,
    PhaseTransition, PodManagementPolicy, PodPhase, PodSpec, PodTemplate, ReplicaSetSpec, Resource,
    ResourceKind, ResourceSpec, StatefulSetSpec, UpdateStrategy, VolumeClaimTemplate,
    DEFAULT_NAMESPACE, MAX_NAME_LEN,
};
