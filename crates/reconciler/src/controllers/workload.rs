//! Keeps the cluster's workload objects in line with the declarations.

use crate::controller::{Controller, ControllerContext};
use crate::types::ReconcileAction;

/// Creates declared workloads, pushes spec changes and deletes workloads that
/// are no longer declared.
#[derive(Debug, Default)]
pub struct WorkloadSync;

impl Controller for WorkloadSync {
    fn name(&self) -> &str {
        "workload-sync"
    }

    fn reconcile(&self, ctx: &ControllerContext<'_>) -> Vec<ReconcileAction> {
        let mut actions = Vec::new();

        for workload in ctx.desired.workloads() {
            match ctx.actual.get(&workload.key()) {
                None => actions.push(ReconcileAction::CreateObject {
                    resource: workload.clone(),
                }),
                Some(record)
                    if record.resource.spec != workload.spec
                        || record.resource.meta.labels != workload.meta.labels =>
                {
                    actions.push(ReconcileAction::UpdateSpec {
                        resource: workload.clone(),
                    });
                }
                Some(_) => {}
            }
        }

        for record in ctx.actual.undeclared_workloads(ctx.desired) {
            actions.push(ReconcileAction::DeleteObject {
                key: record.key(),
                reason: "no longer declared".to_string(),
            });
        }

        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::ReconcilerConfig;
    use crate::testing::{TestCluster, deployment};
    use crate::types::DesiredState;

    #[test]
    fn test_creates_missing_workload() {
        let desired = DesiredState::from_resources([deployment("web", 2, "nginx:1")]);
        let actual = TestCluster::new().snapshot();
        let config = ReconcilerConfig::default();

        let actions = WorkloadSync.reconcile(&ControllerContext::new(&desired, &actual, &config));

        assert_eq!(actions.len(), 1);
        assert!(matches!(actions.first(), Some(ReconcileAction::CreateObject { .. })));
    }

    #[test]
    fn test_pushes_changed_spec() {
        let mut cluster = TestCluster::new();
        cluster.create(deployment("web", 2, "nginx:1"));
        let desired = DesiredState::from_resources([deployment("web", 5, "nginx:1")]);
        let config = ReconcilerConfig::default();
        let actual = cluster.snapshot();

        let actions = WorkloadSync.reconcile(&ControllerContext::new(&desired, &actual, &config));

        assert!(matches!(
            actions.first(),
            Some(ReconcileAction::UpdateSpec { resource }) if resource.spec.replicas() == Some(5)
        ));
    }

    #[test]
    fn test_deletes_undeclared_and_ignores_matching() {
        let mut cluster = TestCluster::new();
        cluster.create(deployment("web", 2, "nginx:1"));
        cluster.create(deployment("old", 1, "nginx:1"));
        let desired = DesiredState::from_resources([deployment("web", 2, "nginx:1")]);
        let config = ReconcilerConfig::default();
        let actual = cluster.snapshot();

        let actions = WorkloadSync.reconcile(&ControllerContext::new(&desired, &actual, &config));

        assert_eq!(actions.len(), 1);
        assert!(matches!(
            actions.first(),
            Some(ReconcileAction::DeleteObject { key, .. }) if key.name == "old"
        ));
    }
}
