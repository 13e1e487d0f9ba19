//! Binds pending claims.

use kubeloop_events::{ClaimPhase, ResourceKind};

use crate::controller::{Controller, ControllerContext};
use crate::types::ReconcileAction;

/// Provisions a volume for every Pending claim. Provisioning always succeeds.
#[derive(Debug, Default)]
pub struct VolumeProvisioner;

impl Controller for VolumeProvisioner {
    fn name(&self) -> &str {
        "volume-provisioner"
    }

    fn reconcile(&self, ctx: &ControllerContext<'_>) -> Vec<ReconcileAction> {
        ctx.actual
            .of_kind(ResourceKind::PersistentVolumeClaim)
            .into_iter()
            .filter(|c| c.claim_phase == Some(ClaimPhase::Pending))
            .map(|c| ReconcileAction::BindClaim { key: c.key() })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::ReconcilerConfig;
    use crate::testing::TestCluster;
    use crate::types::DesiredState;
    use kubeloop_events::{ClaimSpec, ObjectMeta, Resource, ResourceSpec};

    #[test]
    fn test_binds_pending_claims_once() {
        let mut cluster = TestCluster::new();
        let claim = cluster.create(Resource::new(
            ObjectMeta::new("data-db-0"),
            ResourceSpec::PersistentVolumeClaim(ClaimSpec {
                storage: "1Gi".to_string(),
            }),
        ));
        let desired = DesiredState::new();
        let config = ReconcilerConfig::default();

        let actual = cluster.snapshot();
        let actions =
            VolumeProvisioner.reconcile(&ControllerContext::new(&desired, &actual, &config));
        assert_eq!(actions, vec![ReconcileAction::BindClaim { key: claim.clone() }]);

        cluster.bind_claim(&claim);
        let actual = cluster.snapshot();
        assert!(
            VolumeProvisioner
                .reconcile(&ControllerContext::new(&desired, &actual, &config))
                .is_empty()
        );
    }
}
