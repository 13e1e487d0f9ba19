//! Built-in controllers.

mod deployment;
mod garbage_collector;
mod node_agent;
mod replicaset;
mod scheduler;
mod statefulset;
mod volume;
mod workload;

pub use deployment::{DeploymentController, replica_set_key, replica_set_name};
pub use garbage_collector::GarbageCollector;
pub use node_agent::NodeAgent;
pub use replicaset::ReplicaSetController;
pub use scheduler::Scheduler;
pub use statefulset::{REVISION_LABEL, StatefulSetController, claims_for_pod, pod_name};
pub use volume::VolumeProvisioner;
pub use workload::WorkloadSync;

use std::collections::BTreeSet;

use kubeloop_events::{ObjectRecord, PodPhase, Resource, ResourceKind, ResourceSpec};
use ulid::Ulid;

use crate::types::ReconcileAction;

/// Label carrying the template revision on ReplicaSets and their pods.
pub const TEMPLATE_HASH_LABEL: &str = "pod-template-hash";

const SUFFIX_LEN: usize = 5;

/// Start deleting a pod. Live and finished pods go Terminating first; the
/// node agent removes them once they are. `None` when already on the way out.
pub(crate) fn terminate_pod(record: &ObjectRecord, reason: &str) -> Option<ReconcileAction> {
    match record.pod_phase {
        Some(PodPhase::Terminating) | None => None,
        Some(from) => Some(ReconcileAction::TransitionPod {
            key: record.key(),
            from,
            to: PodPhase::Terminating,
            reason: reason.to_string(),
        }),
    }
}

/// Delete any object, using the two-step path for pods.
pub(crate) fn delete_object(record: &ObjectRecord, reason: &str) -> Option<ReconcileAction> {
    if record.resource.kind() == ResourceKind::Pod {
        terminate_pod(record, reason)
    } else {
        Some(ReconcileAction::DeleteObject {
            key: record.key(),
            reason: reason.to_string(),
        })
    }
}

/// A fresh `<prefix>-<suffix>` pod name not in `taken`. The name is added to
/// `taken`.
pub(crate) fn generate_name(prefix: &str, taken: &mut BTreeSet<String>) -> String {
    loop {
        let ulid = Ulid::new().to_string().to_lowercase();
        let suffix: String = ulid
            .chars()
            .rev()
            .take(SUFFIX_LEN)
            .collect();
        let name = format!("{prefix}-{suffix}");
        if taken.insert(name.clone()) {
            return name;
        }
    }
}

/// The longest names controllers derive from a workload at its current
/// replica count: the ReplicaSet and pod names of a Deployment, the last
/// ordinal's pod and claim names of a StatefulSet. Empty for other kinds.
pub fn derived_names(resource: &Resource) -> Vec<String> {
    let name = &resource.meta.name;
    match &resource.spec {
        ResourceSpec::Deployment(spec) => {
            let replica_set = replica_set_name(name, &spec.template.template_hash());
            let pod = format!("{replica_set}-{}", "x".repeat(SUFFIX_LEN));
            vec![replica_set, pod]
        }
        ResourceSpec::StatefulSet(spec) => {
            let last = spec.replicas.saturating_sub(1);
            std::iter::once(pod_name(name, last))
                .chain(
                    spec.volume_claim_templates
                        .iter()
                        .map(|claim| claim.claim_name(name, last)),
                )
                .collect()
        }
        _ => Vec::new(),
    }
}
