//! Core types for the reconciler.

use std::collections::BTreeMap;

use itertools::Itertools;
use kubeloop_events::{
    ClusterState, ObjectKey, ObjectRecord, PodPhase, Resource, ResourceKind,
};
use serde::{Deserialize, Serialize};

/// Desired state declaration.
///
/// The workloads the user asked for, keyed by identity. Everything else in
/// the cluster is derived from these by controllers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DesiredState {
    /// Workloads that should exist.
    pub workloads: BTreeMap<ObjectKey, Resource>,
}

impl DesiredState {
    /// Create a new empty desired state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a desired state from a list of workloads. Later entries win.
    pub fn from_resources(resources: impl IntoIterator<Item = Resource>) -> Self {
        let mut state = Self::new();
        for resource in resources {
            state.apply(resource);
        }
        state
    }

    /// Declare a workload, replacing any previous declaration of it.
    pub fn apply(&mut self, resource: Resource) -> Option<Resource> {
        self.workloads.insert(resource.key(), resource)
    }

    /// Stop declaring a workload.
    pub fn remove(&mut self, key: &ObjectKey) -> Option<Resource> {
        self.workloads.remove(key)
    }

    /// Get a workload.
    pub fn get(&self, key: &ObjectKey) -> Option<&Resource> {
        self.workloads.get(key)
    }

    /// Get a mutable workload.
    pub fn get_mut(&mut self, key: &ObjectKey) -> Option<&mut Resource> {
        self.workloads.get_mut(key)
    }

    /// Whether a workload is declared.
    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.workloads.contains_key(key)
    }

    /// Get the number of workloads.
    pub fn len(&self) -> usize {
        self.workloads.len()
    }

    /// Check if the desired state is empty.
    pub fn is_empty(&self) -> bool {
        self.workloads.is_empty()
    }

    /// Declared workloads in key order.
    pub fn workloads(&self) -> impl Iterator<Item = &Resource> {
        self.workloads.values()
    }
}

/// Actual state (computed from events).
///
/// A snapshot of the projected cluster plus a few counts used in logs and
/// reports.
#[derive(Debug, Clone, Default)]
pub struct ActualState {
    /// Projected state of every object.
    pub cluster: ClusterState,
    /// Pending or Running pods that are not being deleted.
    pub live_pods: usize,
    /// Number of running pods.
    pub running_pods: usize,
    /// Number of pending pods.
    pub pending_pods: usize,
    /// Number of bound claims.
    pub bound_claims: usize,
}

impl ActualState {
    /// Create a new empty actual state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot a projected cluster.
    pub fn from_cluster(cluster: ClusterState) -> Self {
        let pods = cluster.of_kind(ResourceKind::Pod);
        let live_pods = pods.iter().filter(|r| r.is_live_pod()).count();
        let running_pods = pods.iter().filter(|r| r.is_running_pod()).count();
        let pending_pods = pods
            .iter()
            .filter(|r| r.pod_phase == Some(PodPhase::Pending) && !r.deleting)
            .count();
        let bound_claims = cluster
            .of_kind(ResourceKind::PersistentVolumeClaim)
            .iter()
            .filter(|r| r.is_bound_claim())
            .count();

        Self {
            cluster,
            live_pods,
            running_pods,
            pending_pods,
            bound_claims,
        }
    }

    /// Get an object.
    pub fn get(&self, key: &ObjectKey) -> Option<&ObjectRecord> {
        self.cluster.get(key)
    }

    /// Whether an object exists.
    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.cluster.contains(key)
    }

    /// Number of objects.
    pub fn len(&self) -> usize {
        self.cluster.len()
    }

    /// Whether the cluster holds no objects.
    pub fn is_empty(&self) -> bool {
        self.cluster.is_empty()
    }

    /// Objects of one kind.
    pub fn of_kind(&self, kind: ResourceKind) -> Vec<&ObjectRecord> {
        self.cluster.of_kind(kind)
    }

    /// Pods owned by `owner`.
    pub fn pods_of(&self, owner: &ObjectKey) -> Vec<&ObjectRecord> {
        self.owned_of_kind(owner, ResourceKind::Pod)
    }

    /// Objects of `kind` owned by `owner`.
    pub fn owned_of_kind(&self, owner: &ObjectKey, kind: ResourceKind) -> Vec<&ObjectRecord> {
        self.cluster
            .owned_by(owner)
            .into_iter()
            .filter(|r| r.resource.kind() == kind)
            .collect_vec()
    }

    /// Workloads present in the cluster but not declared.
    pub fn undeclared_workloads<'a>(&'a self, desired: &DesiredState) -> Vec<&'a ObjectRecord> {
        self.cluster
            .objects
            .iter()
            .filter(|(key, _)| key.kind.is_workload() && !desired.contains(key))
            .map(|(_, record)| record)
            .collect_vec()
    }
}

/// Actions the reconciler can take.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReconcileAction {
    /// Create a new object.
    CreateObject { resource: Resource },
    /// Replace the spec of an existing object.
    UpdateSpec { resource: Resource },
    /// Change a replica count.
    Scale { key: ObjectKey, from: u32, to: u32 },
    /// Remove an object.
    DeleteObject { key: ObjectKey, reason: String },
    /// Assign a pod to a node.
    BindPod { key: ObjectKey, node: String },
    /// Move a pod to another phase.
    TransitionPod {
        key: ObjectKey,
        from: PodPhase,
        to: PodPhase,
        reason: String,
    },
    /// Bind a claim to a volume.
    BindClaim { key: ObjectKey },
}

impl ReconcileAction {
    /// Get the object this action targets.
    pub fn key(&self) -> ObjectKey {
        match self {
            Self::CreateObject { resource } | Self::UpdateSpec { resource } => resource.key(),
            Self::Scale { key, .. }
            | Self::DeleteObject { key, .. }
            | Self::BindPod { key, .. }
            | Self::TransitionPod { key, .. }
            | Self::BindClaim { key } => key.clone(),
        }
    }

    /// Short name of the action, used in logs and tables.
    pub fn verb(&self) -> &'static str {
        match self {
            Self::CreateObject { .. } => "create",
            Self::UpdateSpec { .. } => "update",
            Self::Scale { .. } => "scale",
            Self::DeleteObject { .. } => "delete",
            Self::BindPod { .. } => "bind",
            Self::TransitionPod { .. } => "transition",
            Self::BindClaim { .. } => "bind-claim",
        }
    }

    /// Get a description of the action.
    pub fn description(&self) -> String {
        match self {
            Self::CreateObject { resource } => {
                format!("create {}", resource.key())
            }
            Self::UpdateSpec { resource } => {
                format!("update spec of {}", resource.key())
            }
            Self::Scale { key, from, to } => {
                format!("scale {key} from {from} to {to}")
            }
            Self::DeleteObject { key, reason } => {
                format!("delete {key}: {reason}")
            }
            Self::BindPod { key, node } => {
                format!("bind {key} to {node}")
            }
            Self::TransitionPod {
                key,
                from,
                to,
                reason,
            } => {
                format!("move {key} from {from} to {to}: {reason}")
            }
            Self::BindClaim { key } => {
                format!("bind claim {key}")
            }
        }
    }
}

/// Result of reconciliation.
#[derive(Debug, Clone)]
pub struct ReconcileResult {
    /// Actions that were taken.
    pub actions_taken: Vec<ReconcileAction>,
    /// Actions that failed.
    pub actions_failed: Vec<(ReconcileAction, String)>,
    /// Number of declared workloads.
    pub desired_count: usize,
    /// Number of objects in the cluster.
    pub actual_count: usize,
    /// Whether the system is converged.
    pub converged: bool,
}

impl ReconcileResult {
    /// Create a new reconcile result.
    pub fn new(
        actions_taken: Vec<ReconcileAction>,
        actions_failed: Vec<(ReconcileAction, String)>,
        desired_count: usize,
        actual_count: usize,
    ) -> Self {
        let converged = actions_taken.is_empty() && actions_failed.is_empty();
        Self {
            actions_taken,
            actions_failed,
            desired_count,
            actual_count,
            converged,
        }
    }

    /// Check if all actions succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.actions_failed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubeloop_events::{
        ClusterEvent, ClusterProjection, DeploymentSpec, ObjectMeta, PodTemplate, Projection,
        UpdateStrategy,
    };

    fn deployment(name: &str, replicas: u32) -> Resource {
        Resource::deployment(
            ObjectMeta::new(name),
            DeploymentSpec {
                replicas,
                strategy: UpdateStrategy::default(),
                template: PodTemplate::new("nginx"),
            },
        )
    }

    #[test]
    fn test_desired_state_apply_replaces() {
        let mut desired = DesiredState::new();
        assert!(desired.apply(deployment("web", 1)).is_none());
        let previous = desired.apply(deployment("web", 3));

        assert_eq!(desired.len(), 1);
        assert_eq!(previous.and_then(|r| r.spec.replicas()), Some(1));
        assert_eq!(
            desired
                .get(&ObjectKey::default_ns(ResourceKind::Deployment, "web"))
                .and_then(|r| r.spec.replicas()),
            Some(3)
        );
    }

    #[test]
    fn test_desired_state_remove() {
        let mut desired = DesiredState::from_resources([deployment("web", 1), deployment("api", 1)]);
        desired.remove(&ObjectKey::default_ns(ResourceKind::Deployment, "web"));

        assert_eq!(desired.len(), 1);
        assert_eq!(desired.workloads().count(), 1);
    }

    #[test]
    fn test_actual_state_counts() {
        let projection = ClusterProjection::new();
        let mut cluster = projection.initial_state();
        projection.apply(&mut cluster, &ClusterEvent::created(deployment("web", 1)));

        let actual = ActualState::from_cluster(cluster);

        assert_eq!(actual.len(), 1);
        assert_eq!(actual.live_pods, 0);
        assert_eq!(actual.running_pods, 0);
    }

    #[test]
    fn test_undeclared_workloads() {
        let projection = ClusterProjection::new();
        let mut cluster = projection.initial_state();
        projection.apply(&mut cluster, &ClusterEvent::created(deployment("web", 1)));
        projection.apply(&mut cluster, &ClusterEvent::created(deployment("old", 1)));
        let actual = ActualState::from_cluster(cluster);

        let desired = DesiredState::from_resources([deployment("web", 1)]);
        let undeclared = actual.undeclared_workloads(&desired);

        assert_eq!(undeclared.len(), 1);
        assert_eq!(
            undeclared.first().map(|r| r.resource.meta.name.as_str()),
            Some("old")
        );
    }

    #[test]
    fn test_reconcile_action_description() {
        let action = ReconcileAction::Scale {
            key: ObjectKey::default_ns(ResourceKind::ReplicaSet, "web-123"),
            from: 1,
            to: 3,
        };
        assert!(action.description().contains("scale"));
        assert_eq!(action.verb(), "scale");
    }

    #[test]
    fn test_converged_iff_nothing_happened() {
        assert!(ReconcileResult::new(vec![], vec![], 0, 0).converged);

        let failed = ReconcileAction::BindClaim {
            key: ObjectKey::default_ns(ResourceKind::PersistentVolumeClaim, "data-db-0"),
        };
        let result = ReconcileResult::new(vec![], vec![(failed, "boom".to_string())], 0, 0);
        assert!(!result.converged);
        assert!(!result.all_succeeded());
    }
}
