//! Binds pending pods to nodes.

use std::collections::BTreeMap;

use kubeloop_events::{PodPhase, ResourceKind};
use tracing::debug;

use crate::controller::{Controller, ControllerContext};
use crate::types::ReconcileAction;

/// Places each unbound Pending pod on the least loaded node with room.
///
/// Ties go to the node listed first in the configuration. Pods that fit
/// nowhere stay Pending until room frees up.
#[derive(Debug, Default)]
pub struct Scheduler;

impl Controller for Scheduler {
    fn name(&self) -> &str {
        "scheduler"
    }

    fn reconcile(&self, ctx: &ControllerContext<'_>) -> Vec<ReconcileAction> {
        let nodes = &ctx.config.nodes;
        let capacity = ctx.config.max_pods_per_node;

        let mut load: BTreeMap<&str, usize> = nodes
            .iter()
            .map(|n| (n.as_str(), ctx.actual.cluster.pods_on_node(n).len()))
            .collect();

        let mut actions = Vec::new();
        let unbound = ctx
            .actual
            .of_kind(ResourceKind::Pod)
            .into_iter()
            .filter(|p| p.pod_phase == Some(PodPhase::Pending) && !p.deleting && p.node.is_none());

        for pod in unbound {
            let target = nodes
                .iter()
                .map(|n| (n.as_str(), load.get(n.as_str()).copied().unwrap_or(0)))
                .filter(|(_, used)| *used < capacity)
                .min_by_key(|(_, used)| *used)
                .map(|(node, _)| node);

            match target {
                Some(node) => {
                    if let Some(used) = load.get_mut(node) {
                        *used = used.saturating_add(1);
                    }
                    actions.push(ReconcileAction::BindPod {
                        key: pod.key(),
                        node: node.to_string(),
                    });
                }
                None => debug!(pod = %pod.key(), "No node has room, pod stays pending"),
            }
        }

        actions
    }
}
