//! Helpers for building cluster snapshots in unit tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use kubeloop_events::{
    ClusterEvent, ClusterProjection, ClusterState, DeploymentSpec, ObjectKey, ObjectMeta,
    OwnerRef, PodManagementPolicy, PodPhase, PodSpec, PodTemplate, Projection, Resource,
    ResourceSpec, StatefulSetSpec, UpdateStrategy, VolumeClaimTemplate,
};

use crate::reconciler::event_for;
use crate::types::{ActualState, ReconcileAction};

pub fn deployment(name: &str, replicas: u32, image: &str) -> Resource {
    deployment_with_strategy(name, replicas, image, UpdateStrategy::default())
}

pub fn deployment_with_strategy(
    name: &str,
    replicas: u32,
    image: &str,
    strategy: UpdateStrategy,
) -> Resource {
    Resource::deployment(
        ObjectMeta::new(name).with_label("app", name),
        DeploymentSpec {
            replicas,
            strategy,
            template: PodTemplate::new(image).with_label("app", name),
        },
    )
}

pub fn stateful_set(
    name: &str,
    replicas: u32,
    image: &str,
    policy: PodManagementPolicy,
    claims: &[&str],
) -> Resource {
    Resource::stateful_set(
        ObjectMeta::new(name).with_label("app", name),
        StatefulSetSpec {
            replicas,
            template: PodTemplate::new(image).with_label("app", name),
            pod_management_policy: policy,
            volume_claim_templates: claims
                .iter()
                .map(|c| VolumeClaimTemplate::new(*c, "1Gi"))
                .collect(),
        },
    )
}

/// A bare pod owned by `owner`, the way the ReplicaSet controller makes them.
pub fn pod_of(owner: &ObjectKey, name: &str) -> Resource {
    Resource::new(
        ObjectMeta::new(name)
            .with_namespace(&owner.namespace)
            .with_owner(OwnerRef::new(owner.kind, &owner.name)),
        ResourceSpec::Pod(PodSpec {
            template: PodTemplate::new("nginx"),
            template_hash: String::new(),
            node_name: None,
            ordinal: None,
        }),
    )
}

/// A projected cluster that tests drive directly with events.
pub struct TestCluster {
    projection: ClusterProjection,
    pub state: ClusterState,
}

impl TestCluster {
    pub fn new() -> Self {
        let projection = ClusterProjection::new();
        let state = projection.initial_state();
        Self { projection, state }
    }

    pub fn apply(&mut self, event: ClusterEvent) {
        self.projection.apply(&mut self.state, &event);
    }

    pub fn create(&mut self, resource: Resource) -> ObjectKey {
        let key = resource.key();
        self.apply(ClusterEvent::created(resource));
        key
    }

    pub fn bind(&mut self, key: &ObjectKey, node: &str) {
        self.apply(ClusterEvent::pod_bound(key.clone(), node));
    }

    pub fn set_phase(&mut self, key: &ObjectKey, to: PodPhase) {
        let from = self
            .state
            .get(key)
            .and_then(|r| r.pod_phase)
            .expect("pod exists");
        self.apply(ClusterEvent::pod_phase_changed(key.clone(), from, to));
    }

    /// Bind to `node` and mark Running.
    pub fn run(&mut self, key: &ObjectKey, node: &str) {
        self.bind(key, node);
        self.set_phase(key, PodPhase::Running);
    }

    pub fn bind_claim(&mut self, key: &ObjectKey) {
        self.apply(ClusterEvent::claim_bound(key.clone()));
    }

    /// Apply actions the way the event executor would.
    pub fn apply_actions(&mut self, actions: &[ReconcileAction]) {
        for action in actions {
            self.apply(event_for(action).expect("valid action"));
        }
    }

    pub fn snapshot(&self) -> ActualState {
        ActualState::from_cluster(self.state.clone())
    }
}
