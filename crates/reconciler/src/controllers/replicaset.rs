//! ReplicaSet → Pod.

use std::cmp::Reverse;
use std::collections::BTreeSet;

use itertools::Itertools;
use kubeloop_events::{
    ObjectMeta, ObjectRecord, OwnerRef, PodPhase, PodSpec, ReplicaSetSpec, Resource, ResourceKind,
    ResourceSpec,
};

use super::{TEMPLATE_HASH_LABEL, generate_name, terminate_pod};
use crate::controller::{Controller, ControllerContext};
use crate::types::ReconcileAction;

/// Keeps the number of live pods of every ReplicaSet at its replica count.
#[derive(Debug, Default)]
pub struct ReplicaSetController;

impl Controller for ReplicaSetController {
    fn name(&self) -> &str {
        "replicaset"
    }

    fn reconcile(&self, ctx: &ControllerContext<'_>) -> Vec<ReconcileAction> {
        let mut taken: BTreeSet<String> = ctx
            .actual
            .of_kind(ResourceKind::Pod)
            .iter()
            .map(|r| r.resource.meta.name.clone())
            .collect();

        let mut actions = Vec::new();
        for record in ctx.actual.of_kind(ResourceKind::ReplicaSet) {
            if let Some(spec) = record.resource.as_replica_set() {
                let pods = ctx.actual.pods_of(&record.key());
                actions.extend(reconcile_replica_set(record, spec, &pods, &mut taken));
            }
        }
        actions
    }
}

fn reconcile_replica_set(
    record: &ObjectRecord,
    spec: &ReplicaSetSpec,
    pods: &[&ObjectRecord],
    taken: &mut BTreeSet<String>,
) -> Vec<ReconcileAction> {
    let mut actions: Vec<ReconcileAction> = pods
        .iter()
        .filter(|p| !p.deleting && p.pod_phase.is_some_and(|phase| phase.is_finished()))
        .filter_map(|p| terminate_pod(p, "pod finished, replacing"))
        .collect();

    let live = pods.iter().filter(|p| p.is_live_pod()).collect_vec();
    let desired = usize::try_from(spec.replicas).unwrap_or(usize::MAX);

    if live.len() < desired {
        let missing = desired.saturating_sub(live.len());
        actions.extend((0..missing).map(|_| ReconcileAction::CreateObject {
            resource: new_pod(record, spec, taken),
        }));
    } else if live.len() > desired {
        let surplus = live.len().saturating_sub(desired);
        actions.extend(
            live.into_iter()
                .sorted_by_key(|p| deletion_rank(p))
                .take(surplus)
                .filter_map(|p| terminate_pod(p, "scaled down")),
        );
    }

    actions
}

/// Order in which surplus pods go: Pending before Running, unbound before
/// bound, newest before oldest.
fn deletion_rank(
    pod: &ObjectRecord,
) -> (bool, bool, Reverse<chrono::DateTime<chrono::Utc>>, Reverse<String>) {
    (
        pod.pod_phase != Some(PodPhase::Pending),
        pod.node.is_some(),
        Reverse(pod.created_at),
        Reverse(pod.resource.meta.name.clone()),
    )
}

fn new_pod(record: &ObjectRecord, spec: &ReplicaSetSpec, taken: &mut BTreeSet<String>) -> Resource {
    let meta = &record.resource.meta;
    let mut labels = spec.template.labels.clone();
    labels.insert(TEMPLATE_HASH_LABEL.to_string(), spec.template_hash.clone());

    Resource::new(
        ObjectMeta::new(generate_name(&meta.name, taken))
            .with_namespace(&meta.namespace)
            .with_labels(labels)
            .with_owner(OwnerRef::new(ResourceKind::ReplicaSet, &meta.name)),
        ResourceSpec::Pod(PodSpec {
            template: spec.template.clone(),
            template_hash: spec.template_hash.clone(),
            node_name: None,
            ordinal: None,
        }),
    )
}
