//! Removes objects whose owner is gone.

use super::delete_object;
use crate::controller::{Controller, ControllerContext};
use crate::types::ReconcileAction;

/// Cascades deletion down the ownership chain, one level per cycle.
///
/// Pods go through Terminating like any other pod deletion; everything else
/// is removed at once.
#[derive(Debug, Default)]
pub struct GarbageCollector;

impl Controller for GarbageCollector {
    fn name(&self) -> &str {
        "garbage-collector"
    }

    fn reconcile(&self, ctx: &ControllerContext<'_>) -> Vec<ReconcileAction> {
        ctx.actual
            .cluster
            .objects
            .values()
            .filter(|record| {
                record
                    .resource
                    .owner_key()
                    .is_some_and(|owner| !ctx.actual.contains(&owner))
            })
            .filter_map(|record| delete_object(record, "owner deleted"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::ReconcilerConfig;
    use crate::testing::{TestCluster, deployment, pod_of};
    use crate::types::DesiredState;
    use kubeloop_events::{ClaimSpec, ObjectKey, ObjectMeta, OwnerRef, PodPhase, Resource, ResourceKind, ResourceSpec};

    fn run(cluster: &TestCluster) -> Vec<ReconcileAction> {
        let desired = DesiredState::new();
        let actual = cluster.snapshot();
        let config = ReconcilerConfig::default();
        GarbageCollector.reconcile(&ControllerContext::new(&desired, &actual, &config))
    }

    #[test]
    fn test_orphans_are_collected() {
        let mut cluster = TestCluster::new();
        let gone = ObjectKey::default_ns(ResourceKind::StatefulSet, "db");
        let pod = cluster.create(pod_of(&gone, "db-0"));
        let claim = cluster.create(Resource::new(
            ObjectMeta::new("data-db-0").with_owner(OwnerRef::new(ResourceKind::StatefulSet, "db")),
            ResourceSpec::PersistentVolumeClaim(ClaimSpec {
                storage: "1Gi".to_string(),
            }),
        ));

        let actions = run(&cluster);

        assert_eq!(actions.len(), 2);
        assert!(actions.contains(&ReconcileAction::DeleteObject {
            key: claim,
            reason: "owner deleted".to_string(),
        }));
        assert!(actions.iter().any(|a| matches!(
            a,
            ReconcileAction::TransitionPod { key, to: PodPhase::Terminating, .. } if *key == pod
        )));
    }

    #[test]
    fn test_owned_objects_with_live_owner_stay() {
        let mut cluster = TestCluster::new();
        let dep = cluster.create(deployment("web", 1, "nginx"));
        cluster.create(pod_of(&dep, "web-abcde"));

        assert!(run(&cluster).is_empty());
    }
}
