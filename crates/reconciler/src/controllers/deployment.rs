//! Deployment → ReplicaSet.
//!
//! Each template revision of a Deployment gets its own ReplicaSet named
//! `<deployment>-<template hash>`. Rolling out a new template is a matter of
//! moving replicas from the old ReplicaSets to the new one, within the
//! surge and availability bounds of the strategy.

use itertools::Itertools;
use kubeloop_events::{
    DeploymentSpec, ObjectKey, ObjectMeta, ObjectRecord, OwnerRef, ReplicaSetSpec, Resource,
    ResourceKind, ResourceSpec, UpdateStrategy,
};
use tracing::trace;

use super::{TEMPLATE_HASH_LABEL, delete_object};
use crate::controller::{Controller, ControllerContext};
use crate::types::{ActualState, ReconcileAction};

/// Manages the ReplicaSets of every Deployment.
#[derive(Debug, Default)]
pub struct DeploymentController;

impl Controller for DeploymentController {
    fn name(&self) -> &str {
        "deployment"
    }

    fn reconcile(&self, ctx: &ControllerContext<'_>) -> Vec<ReconcileAction> {
        ctx.actual
            .of_kind(ResourceKind::Deployment)
            .into_iter()
            .filter_map(|record| match &record.resource.spec {
                ResourceSpec::Deployment(spec) => Some((record, spec)),
                _ => None,
            })
            .flat_map(|(record, spec)| reconcile_deployment(ctx, record, spec))
            .collect()
    }
}

/// A ReplicaSet together with what its pods are doing.
struct ReplicaSetView<'a> {
    record: &'a ObjectRecord,
    replicas: u32,
    template_hash: &'a str,
    live: u32,
    running: u32,
    has_pods: bool,
}

impl<'a> ReplicaSetView<'a> {
    fn new(actual: &'a ActualState, record: &'a ObjectRecord) -> Option<Self> {
        let spec = record.resource.as_replica_set()?;
        let pods = actual.pods_of(&record.key());
        Some(Self {
            record,
            replicas: spec.replicas,
            template_hash: &spec.template_hash,
            live: count(pods.iter().filter(|p| p.is_live_pod())),
            running: count(pods.iter().filter(|p| p.is_running_pod())),
            has_pods: !pods.is_empty(),
        })
    }

    /// Running pods that will survive: surplus pods are about to be removed.
    fn available(&self) -> u32 {
        self.running.min(self.replicas)
    }

    /// Pods this ReplicaSet holds or is about to hold.
    fn footprint(&self) -> u32 {
        self.replicas.max(self.live)
    }

    fn scale_to(&self, to: u32) -> ReconcileAction {
        ReconcileAction::Scale {
            key: self.record.key(),
            from: self.replicas,
            to,
        }
    }
}

fn count<T>(iter: impl Iterator<Item = T>) -> u32 {
    u32::try_from(iter.count()).unwrap_or(u32::MAX)
}

fn reconcile_deployment(
    ctx: &ControllerContext<'_>,
    record: &ObjectRecord,
    spec: &DeploymentSpec,
) -> Vec<ReconcileAction> {
    let key = record.key();
    let hash = spec.template.template_hash();

    let (new, old): (Vec<_>, Vec<_>) = ctx
        .actual
        .owned_of_kind(&key, ResourceKind::ReplicaSet)
        .into_iter()
        .sorted_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.resource.meta.name.cmp(&b.resource.meta.name))
        })
        .filter_map(|rs| ReplicaSetView::new(ctx.actual, rs))
        .partition(|rs| rs.template_hash == hash);
    let new = new.into_iter().next();

    trace!(
        deployment = %key,
        old = old.len(),
        has_new = new.is_some(),
        "Reconciling deployment"
    );

    let mut actions = match spec.strategy {
        UpdateStrategy::Recreate => recreate(record, spec, &hash, new.as_ref(), &old),
        UpdateStrategy::RollingUpdate {
            max_surge,
            max_unavailable,
        } => rolling_update(
            record,
            spec,
            &hash,
            new.as_ref(),
            &old,
            max_surge,
            max_unavailable,
        ),
    };

    actions.extend(prune_history(&old, ctx.config.revision_history_limit));
    actions
}

fn recreate(
    record: &ObjectRecord,
    spec: &DeploymentSpec,
    hash: &str,
    new: Option<&ReplicaSetView<'_>>,
    old: &[ReplicaSetView<'_>],
) -> Vec<ReconcileAction> {
    let mut actions: Vec<ReconcileAction> = old
        .iter()
        .filter(|rs| rs.replicas > 0)
        .map(|rs| rs.scale_to(0))
        .collect();

    // The new revision waits until every old pod is gone.
    let draining = old.iter().any(|rs| rs.replicas > 0 || rs.has_pods);
    if draining {
        return actions;
    }

    match new {
        None => actions.push(ReconcileAction::CreateObject {
            resource: new_replica_set(record, spec, hash, spec.replicas),
        }),
        Some(rs) if rs.replicas != spec.replicas => actions.push(rs.scale_to(spec.replicas)),
        Some(_) => {}
    }
    actions
}

fn rolling_update(
    record: &ObjectRecord,
    spec: &DeploymentSpec,
    hash: &str,
    new: Option<&ReplicaSetView<'_>>,
    old: &[ReplicaSetView<'_>],
    max_surge: u32,
    max_unavailable: u32,
) -> Vec<ReconcileAction> {
    // Both bounds at zero could never make progress.
    let (max_surge, max_unavailable) = if max_surge == 0 && max_unavailable == 0 {
        (1, 0)
    } else {
        (max_surge, max_unavailable)
    };

    let desired = spec.replicas;
    let max_total = desired.saturating_add(max_surge);
    let old_total: u32 = old.iter().map(ReplicaSetView::footprint).sum();
    let mut actions = Vec::new();

    match new {
        None => {
            let initial = if old.is_empty() {
                desired
            } else {
                desired.min(max_total.saturating_sub(old_total))
            };
            actions.push(ReconcileAction::CreateObject {
                resource: new_replica_set(record, spec, hash, initial),
            });
        }
        Some(rs) if rs.replicas > desired => actions.push(rs.scale_to(desired)),
        Some(rs) if rs.replicas < desired => {
            let target = desired.min(max_total.saturating_sub(old_total));
            if target > rs.replicas {
                actions.push(rs.scale_to(target));
            }
        }
        Some(_) => {}
    }

    let min_available = desired.saturating_sub(max_unavailable);
    let available: u32 = new
        .into_iter()
        .chain(old)
        .map(ReplicaSetView::available)
        .sum();
    let mut budget = available.saturating_sub(min_available);

    for rs in old.iter().filter(|rs| rs.replicas > 0) {
        let not_ready = rs.replicas.saturating_sub(rs.available());
        let reduce = rs.replicas.min(not_ready.saturating_add(budget));
        budget = budget.saturating_sub(reduce.saturating_sub(not_ready));
        if reduce > 0 {
            actions.push(rs.scale_to(rs.replicas.saturating_sub(reduce)));
        }
    }

    actions
}

/// Delete drained old revisions beyond the history limit, oldest first.
fn prune_history(old: &[ReplicaSetView<'_>], limit: usize) -> Vec<ReconcileAction> {
    let drained = old
        .iter()
        .filter(|rs| rs.replicas == 0 && !rs.has_pods)
        .collect_vec();
    let excess = drained.len().saturating_sub(limit);

    drained
        .into_iter()
        .take(excess)
        .filter_map(|rs| delete_object(rs.record, "revision history limit"))
        .collect()
}

fn new_replica_set(
    deployment: &ObjectRecord,
    spec: &DeploymentSpec,
    hash: &str,
    replicas: u32,
) -> Resource {
    let meta = &deployment.resource.meta;
    let mut labels = spec.template.labels.clone();
    labels.insert(TEMPLATE_HASH_LABEL.to_string(), hash.to_string());

    Resource::new(
        ObjectMeta::new(replica_set_name(&meta.name, hash))
            .with_namespace(&meta.namespace)
            .with_labels(labels)
            .with_owner(OwnerRef::new(ResourceKind::Deployment, &meta.name)),
        ResourceSpec::ReplicaSet(ReplicaSetSpec {
            replicas,
            template: spec.template.clone(),
            template_hash: hash.to_string(),
        }),
    )
}

/// Name of the ReplicaSet for one revision of a Deployment.
pub fn replica_set_name(deployment: &str, hash: &str) -> String {
    format!("{deployment}-{hash}")
}

/// Key of the ReplicaSet for one revision of a Deployment.
pub fn replica_set_key(deployment: &ObjectKey, hash: &str) -> ObjectKey {
    ObjectKey::new(
        ResourceKind::ReplicaSet,
        &deployment.namespace,
        replica_set_name(&deployment.name, hash),
    )
}
