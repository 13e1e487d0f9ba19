//! Projections for materialized views from events.
//!
//! `ClusterProjection` folds the event log into the observed state of the
//! cluster. Controllers never read the log directly; they read this view.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::Result;
use crate::event::ClusterEvent;
use crate::store::EventStore;
use crate::types::{
    ClaimPhase, EventId, ObjectKey, PhaseTransition, PodPhase, Resource, ResourceKind,
};

/// Trait for projections (materialized views).
#[async_trait]
pub trait Projection: Send + Sync {
    /// The state type this projection produces.
    type State: Send + Sync + Clone;

    /// Apply an event to the state.
    fn apply(&self, state: &mut Self::State, event: &ClusterEvent);

    /// Get the initial state.
    fn initial_state(&self) -> Self::State;

    /// Rebuild the state from a store.
    async fn rebuild(&self, store: &dyn EventStore) -> Result<Self::State> {
        let events = store.read(None).await?;
        let mut state = self.initial_state();
        for event in &events {
            self.apply(&mut state, event);
        }
        Ok(state)
    }
}

/// Observed state of a single object.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectRecord {
    /// The object as last created or updated.
    pub resource: Resource,
    /// Set for pods.
    pub pod_phase: Option<PodPhase>,
    /// Set for claims.
    pub claim_phase: Option<ClaimPhase>,
    /// Node a pod is bound to.
    pub node: Option<String>,
    /// Pod phase history.
    pub history: Vec<PhaseTransition>,
    /// When the object was created.
    pub created_at: DateTime<Utc>,
    /// A pod on its way out.
    pub deleting: bool,
}

impl ObjectRecord {
    /// Record for a freshly created object.
    pub fn new(resource: Resource, created_at: DateTime<Utc>) -> Self {
        let kind = resource.kind();
        let node = resource.as_pod().and_then(|p| p.node_name.clone());
        Self {
            pod_phase: (kind == ResourceKind::Pod).then_some(PodPhase::Pending),
            claim_phase: (kind == ResourceKind::PersistentVolumeClaim)
                .then_some(ClaimPhase::Pending),
            node,
            history: Vec::new(),
            created_at,
            deleting: false,
            resource,
        }
    }

    /// The object's identity.
    pub fn key(&self) -> ObjectKey {
        self.resource.key()
    }

    /// A pod that counts towards a replica total.
    pub fn is_live_pod(&self) -> bool {
        self.pod_phase.is_some_and(|p| p.is_live()) && !self.deleting
    }

    /// A pod that is Running and not being deleted.
    pub fn is_running_pod(&self) -> bool {
        self.pod_phase == Some(PodPhase::Running) && !self.deleting
    }

    /// A claim that has been bound.
    pub fn is_bound_claim(&self) -> bool {
        self.claim_phase == Some(ClaimPhase::Bound)
    }
}

/// Observed state of the whole cluster.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterState {
    /// Every object, ordered by key.
    pub objects: BTreeMap<ObjectKey, ObjectRecord>,
}

impl ClusterState {
    /// Create a new empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get an object.
    pub fn get(&self, key: &ObjectKey) -> Option<&ObjectRecord> {
        self.objects.get(key)
    }

    /// Whether an object exists.
    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.objects.contains_key(key)
    }

    /// Number of objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the cluster holds no objects.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Objects of one kind, in key order.
    pub fn of_kind(&self, kind: ResourceKind) -> Vec<&ObjectRecord> {
        self.objects
            .values()
            .filter(|r| r.resource.kind() == kind)
            .collect()
    }

    /// Objects owned by `owner`, in key order.
    pub fn owned_by(&self, owner: &ObjectKey) -> Vec<&ObjectRecord> {
        self.objects
            .values()
            .filter(|r| r.resource.is_owned_by(owner))
            .collect()
    }

    /// Pods bound to `node` that are not finished.
    pub fn pods_on_node(&self, node: &str) -> Vec<&ObjectRecord> {
        self.of_kind(ResourceKind::Pod)
            .into_iter()
            .filter(|r| r.node.as_deref() == Some(node))
            .filter(|r| !r.pod_phase.is_some_and(|p| p.is_finished()))
            .collect()
    }

    /// Pod count per phase.
    pub fn phase_counts(&self) -> BTreeMap<PodPhase, usize> {
        let mut counts = BTreeMap::new();
        for phase in self.objects.values().filter_map(|r| r.pod_phase) {
            let count = counts.entry(phase).or_insert(0usize);
            *count = count.saturating_add(1);
        }
        counts
    }
}

/// Projection of the whole cluster.
#[derive(Debug, Default)]
pub struct ClusterProjection;

impl ClusterProjection {
    /// Create a new projection.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Projection for ClusterProjection {
    type State = ClusterState;

    fn apply(&self, state: &mut Self::State, event: &ClusterEvent) {
        match event {
            ClusterEvent::Created {
                resource, timestamp, ..
            } => {
                state
                    .objects
                    .insert(resource.key(), ObjectRecord::new(resource.clone(), *timestamp));
            }
            ClusterEvent::SpecUpdated { resource, .. } => {
                if let Some(record) = state.objects.get_mut(&resource.key()) {
                    record.resource.spec = resource.spec.clone();
                    record.resource.meta.labels = resource.meta.labels.clone();
                }
            }
            ClusterEvent::Scaled { key, to, .. } => {
                if let Some(record) = state.objects.get_mut(key) {
                    record.resource.spec.set_replicas(*to);
                }
            }
            ClusterEvent::PodBound { key, node, .. } => {
                if let Some(record) = state.objects.get_mut(key) {
                    record.node = Some(node.clone());
                }
            }
            ClusterEvent::PodPhaseChanged {
                key,
                from,
                to,
                reason,
                timestamp,
                ..
            } => {
                if let Some(record) = state.objects.get_mut(key) {
                    record.pod_phase = Some(*to);
                    record.deleting = *to == PodPhase::Terminating;
                    record.history.push(
                        PhaseTransition::new(*from, *to, *timestamp).with_reason(reason.clone()),
                    );
                }
            }
            ClusterEvent::ClaimBound { key, .. } => {
                if let Some(record) = state.objects.get_mut(key) {
                    record.claim_phase = Some(ClaimPhase::Bound);
                }
            }
            ClusterEvent::Deleted { key, .. } => {
                state.objects.remove(key);
            }
        }
    }

    fn initial_state(&self) -> Self::State {
        ClusterState::new()
    }
}

/// A managed projection that remembers how far into the log it has read.
pub struct ManagedProjection<P: Projection> {
    projection: P,
    state: RwLock<P::State>,
    last_seen: RwLock<Option<EventId>>,
    // Applied directly, not yet met by `catch_up`.
    applied_ahead: RwLock<HashSet<EventId>>,
}

impl<P: Projection> ManagedProjection<P> {
    /// Create a new managed projection.
    pub fn new(projection: P) -> Self {
        let state = projection.initial_state();
        Self {
            projection,
            state: RwLock::new(state),
            last_seen: RwLock::new(None),
            applied_ahead: RwLock::new(HashSet::new()),
        }
    }

    /// Apply an event directly.
    ///
    /// The read position is left alone. When the event is also in the
    /// store, the next `catch_up` skips it instead of folding it in twice.
    pub async fn apply(&self, event: &ClusterEvent) {
        let mut state = self.state.write().await;
        self.projection.apply(&mut state, event);
        self.applied_ahead.write().await.insert(event.event_id());
    }

    /// Get the current state.
    pub async fn state(&self) -> P::State {
        self.state.read().await.clone()
    }

    /// Last event folded into the state.
    pub async fn last_seen(&self) -> Option<EventId> {
        *self.last_seen.read().await
    }

    /// Replace the state with one rebuilt from every event in the store.
    pub async fn rebuild(&self, store: &dyn EventStore) -> Result<()> {
        let events = store.read(None).await?;
        let mut new_state = self.projection.initial_state();
        for event in &events {
            self.projection.apply(&mut new_state, event);
        }

        let mut state = self.state.write().await;
        *state = new_state;
        *self.last_seen.write().await = events.last().map(ClusterEvent::event_id);
        self.applied_ahead.write().await.clear();
        Ok(())
    }

    /// Apply events appended since the last one seen, skipping any already
    /// given to `apply`. Returns how many were applied.
    pub async fn catch_up(&self, store: &dyn EventStore) -> Result<usize> {
        let mut state = self.state.write().await;
        let mut last_seen = self.last_seen.write().await;
        let events = store.read(*last_seen).await?;
        if events.is_empty() {
            return Ok(0);
        }

        let mut applied_ahead = self.applied_ahead.write().await;
        let mut applied = 0usize;
        for event in &events {
            if !applied_ahead.remove(&event.event_id()) {
                self.projection.apply(&mut state, event);
                applied = applied.saturating_add(1);
            }
        }
        *last_seen = events.last().map(ClusterEvent::event_id);

        tracing::trace!(applied, skipped = events.len().saturating_sub(applied), "Projection caught up");
        Ok(applied)
    }
}
