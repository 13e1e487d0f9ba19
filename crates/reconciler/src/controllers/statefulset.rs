//! StatefulSet → Pod + PersistentVolumeClaim.
//!
//! Pods get stable names `<set>-<ordinal>` and keep their claims across
//! restarts, scale-down and template changes. Under `OrderedReady` the set
//! grows one ordinal at a time and shrinks from the top.

use std::collections::{BTreeMap, BTreeSet};

use kubeloop_events::{
    ClaimSpec, ObjectKey, ObjectMeta, ObjectRecord, OwnerRef, PodManagementPolicy, PodSpec,
    Resource, ResourceKind, ResourceSpec, StatefulSetSpec, VolumeClaimTemplate,
};
use tracing::trace;

use super::terminate_pod;
use crate::controller::{Controller, ControllerContext};
use crate::types::{ActualState, ReconcileAction};

/// Label carrying the template revision of a StatefulSet pod.
pub const REVISION_LABEL: &str = "controller-revision-hash";

/// Manages the pods and claims of every StatefulSet.
#[derive(Debug, Default)]
pub struct StatefulSetController;

impl Controller for StatefulSetController {
    fn name(&self) -> &str {
        "statefulset"
    }

    fn reconcile(&self, ctx: &ControllerContext<'_>) -> Vec<ReconcileAction> {
        ctx.actual
            .of_kind(ResourceKind::StatefulSet)
            .into_iter()
            .filter_map(|record| match &record.resource.spec {
                ResourceSpec::StatefulSet(spec) => Some((record, spec)),
                _ => None,
            })
            .flat_map(|(record, spec)| reconcile_stateful_set(ctx.actual, record, spec))
            .collect()
    }
}

fn reconcile_stateful_set(
    actual: &ActualState,
    record: &ObjectRecord,
    spec: &StatefulSetSpec,
) -> Vec<ReconcileAction> {
    let set_key = record.key();
    let set_name = record.resource.meta.name.as_str();
    let hash = spec.template.template_hash();
    let replicas = spec.replicas;
    let ordered = spec.pod_management_policy == PodManagementPolicy::OrderedReady;

    let pods: BTreeMap<u32, &ObjectRecord> = actual
        .pods_of(&set_key)
        .into_iter()
        .filter_map(|p| p.resource.as_pod()?.ordinal.map(|o| (o, p)))
        .collect();
    let claims: BTreeSet<String> = actual
        .owned_of_kind(&set_key, ResourceKind::PersistentVolumeClaim)
        .into_iter()
        .map(|c| c.resource.meta.name.clone())
        .collect();

    let mut actions = Vec::new();

    // Claims come first so that pods find them.
    for ordinal in 0..replicas {
        for template in &spec.volume_claim_templates {
            let name = template.claim_name(set_name, ordinal);
            if !claims.contains(&name) {
                actions.push(ReconcileAction::CreateObject {
                    resource: new_claim(record, template, name),
                });
            }
        }
    }

    for pod in pods.values() {
        if !pod.deleting && pod.pod_phase.is_some_and(|p| p.is_finished()) {
            actions.extend(terminate_pod(pod, "pod finished, recreating"));
        }
    }

    let all_running = pods.values().all(|p| p.is_running_pod());

    // Scale down, highest ordinal first.
    let condemned: Vec<&ObjectRecord> = pods
        .range(replicas..)
        .rev()
        .map(|(_, p)| *p)
        .filter(|p| !p.deleting)
        .collect();
    if ordered {
        if all_running {
            actions.extend(
                condemned
                    .first()
                    .and_then(|p| terminate_pod(p, "scaled down")),
            );
        }
    } else {
        actions.extend(
            condemned
                .iter()
                .filter_map(|p| terminate_pod(p, "scaled down")),
        );
    }

    // Scale up, lowest ordinal first.
    let claims_ready = |ordinal: u32| {
        spec.volume_claim_templates
            .iter()
            .all(|t| claims.contains(&t.claim_name(set_name, ordinal)))
    };
    let missing: Vec<u32> = (0..replicas).filter(|o| !pods.contains_key(o)).collect();
    if ordered {
        if let Some(&ordinal) = missing.first() {
            let predecessors_running =
                (0..ordinal).all(|i| pods.get(&i).is_some_and(|p| p.is_running_pod()));
            if predecessors_running && claims_ready(ordinal) {
                actions.push(ReconcileAction::CreateObject {
                    resource: new_pod(record, spec, &hash, ordinal),
                });
            }
        }
    } else {
        actions.extend(
            missing
                .iter()
                .filter(|o| claims_ready(**o))
                .map(|o| ReconcileAction::CreateObject {
                    resource: new_pod(record, spec, &hash, *o),
                }),
        );
    }

    // Template change: replace one outdated pod at a time, from the top.
    if missing.is_empty() && condemned.is_empty() && all_running {
        let outdated = pods
            .range(..replicas)
            .rev()
            .map(|(_, p)| *p)
            .find(|p| p.resource.as_pod().is_some_and(|s| s.template_hash != hash));
        if let Some(pod) = outdated {
            trace!(statefulset = %set_key, pod = %pod.key(), "Replacing outdated pod");
            actions.extend(terminate_pod(pod, "template changed"));
        }
    }

    actions
}

fn new_pod(record: &ObjectRecord, spec: &StatefulSetSpec, hash: &str, ordinal: u32) -> Resource {
    let meta = &record.resource.meta;
    let mut labels = spec.template.labels.clone();
    labels.insert(REVISION_LABEL.to_string(), hash.to_string());

    Resource::new(
        ObjectMeta::new(pod_name(&meta.name, ordinal))
            .with_namespace(&meta.namespace)
            .with_labels(labels)
            .with_owner(OwnerRef::new(ResourceKind::StatefulSet, &meta.name)),
        ResourceSpec::Pod(PodSpec {
            template: spec.template.clone(),
            template_hash: hash.to_string(),
            node_name: None,
            ordinal: Some(ordinal),
        }),
    )
}

fn new_claim(record: &ObjectRecord, template: &VolumeClaimTemplate, name: String) -> Resource {
    let meta = &record.resource.meta;
    Resource::new(
        ObjectMeta::new(name)
            .with_namespace(&meta.namespace)
            .with_labels(meta.labels.clone())
            .with_owner(OwnerRef::new(ResourceKind::StatefulSet, &meta.name)),
        ResourceSpec::PersistentVolumeClaim(ClaimSpec {
            storage: template.storage.clone(),
        }),
    )
}

/// Stable name of a StatefulSet pod.
pub fn pod_name(set: &str, ordinal: u32) -> String {
    format!("{set}-{ordinal}")
}

/// Claims a pod must have bound before it can start. Empty for pods that do
/// not belong to a StatefulSet, or whose set is gone.
pub fn claims_for_pod(actual: &ActualState, pod: &ObjectRecord) -> Vec<ObjectKey> {
    let Some(ordinal) = pod.resource.as_pod().and_then(|p| p.ordinal) else {
        return Vec::new();
    };
    let Some(owner) = pod.resource.owner_key() else {
        return Vec::new();
    };
    let Some(ResourceSpec::StatefulSet(spec)) = actual.get(&owner).map(|r| &r.resource.spec)
    else {
        return Vec::new();
    };

    spec.volume_claim_templates
        .iter()
        .map(|t| {
            ObjectKey::new(
                ResourceKind::PersistentVolumeClaim,
                &owner.namespace,
                t.claim_name(&owner.name, ordinal),
            )
        })
        .collect()
}
