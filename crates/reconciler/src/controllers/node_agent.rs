//! Stand-in for the per-node agent that runs pods.

use kubeloop_events::{PodPhase, ResourceKind};

use super::statefulset::claims_for_pod;
use crate::controller::{Controller, ControllerContext};
use crate::types::ReconcileAction;

/// Starts bound pods whose volumes are ready and removes terminated pods.
#[derive(Debug, Default)]
pub struct NodeAgent;

impl Controller for NodeAgent {
    fn name(&self) -> &str {
        "node-agent"
    }

    fn reconcile(&self, ctx: &ControllerContext<'_>) -> Vec<ReconcileAction> {
        let mut actions = Vec::new();

        for pod in ctx.actual.of_kind(ResourceKind::Pod) {
            match pod.pod_phase {
                Some(PodPhase::Terminating) => actions.push(ReconcileAction::DeleteObject {
                    key: pod.key(),
                    reason: "terminated".to_string(),
                }),
                Some(PodPhase::Pending) if pod.node.is_some() => {
                    let volumes_ready = claims_for_pod(ctx.actual, pod)
                        .iter()
                        .all(|claim| ctx.actual.get(claim).is_some_and(|c| c.is_bound_claim()));
                    if volumes_ready {
                        actions.push(ReconcileAction::TransitionPod {
                            key: pod.key(),
                            from: PodPhase::Pending,
                            to: PodPhase::Running,
                            reason: "started".to_string(),
                        });
                    }
                }
                _ => {}
            }
        }

        actions
    }
}
