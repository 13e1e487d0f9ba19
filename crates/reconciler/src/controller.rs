//! Controller trait and the context controllers run in.
//!
//! A controller owns one relationship in the cluster (a Deployment and its
//! ReplicaSets, a ReplicaSet and its pods, ...). Each cycle it reads the same
//! snapshot and proposes actions; it never mutates anything itself.

use std::sync::Arc;

use crate::controllers::{
    DeploymentController, GarbageCollector, NodeAgent, ReplicaSetController, Scheduler,
    StatefulSetController, VolumeProvisioner, WorkloadSync,
};
use crate::reconciler::ReconcilerConfig;
use crate::types::{ActualState, DesiredState, ReconcileAction};

/// Everything a controller may look at.
#[derive(Debug, Clone, Copy)]
pub struct ControllerContext<'a> {
    /// Declared workloads.
    pub desired: &'a DesiredState,
    /// Observed cluster.
    pub actual: &'a ActualState,
    /// Reconciler settings.
    pub config: &'a ReconcilerConfig,
}

impl<'a> ControllerContext<'a> {
    /// Create a new context.
    pub fn new(
        desired: &'a DesiredState,
        actual: &'a ActualState,
        config: &'a ReconcilerConfig,
    ) -> Self {
        Self {
            desired,
            actual,
            config,
        }
    }
}

/// A pluggable reconciler for one kind of relationship.
pub trait Controller: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Propose the actions that move the snapshot towards its desired shape.
    fn reconcile(&self, ctx: &ControllerContext<'_>) -> Vec<ReconcileAction>;
}

/// The built-in controllers, in the order they run.
pub fn builtin_controllers() -> Vec<Arc<dyn Controller>> {
    vec![
        Arc::new(WorkloadSync),
        Arc::new(DeploymentController),
        Arc::new(ReplicaSetController),
        Arc::new(StatefulSetController),
        Arc::new(Scheduler),
        Arc::new(NodeAgent),
        Arc::new(VolumeProvisioner),
        Arc::new(GarbageCollector),
    ]
}
