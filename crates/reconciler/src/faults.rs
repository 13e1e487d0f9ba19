//! Fault injection.
//!
//! Out-of-band changes published on the bus like any other event, so the
//! loop sees them on its next observation and heals the cluster.

use kubeloop_events::{ClusterEvent, ClusterState, EventBus, EventId, ObjectKey, PodPhase, ResourceKind};
use tracing::info;

use crate::error::{Error, Result};

/// Mark the live pod called `name` as Failed.
///
/// # Errors
///
/// `Error::ObjectNotFound` if no live pod has that name, or the publish
/// error.
pub async fn fail_pod(bus: &EventBus, state: &ClusterState, name: &str) -> Result<EventId> {
    let (key, from) = state
        .of_kind(ResourceKind::Pod)
        .into_iter()
        .filter(|r| r.resource.meta.name == name && r.is_live_pod())
        .find_map(|r| r.pod_phase.map(|phase| (r.key(), phase)))
        .ok_or_else(|| {
            Error::object_not_found(&ObjectKey::default_ns(ResourceKind::Pod, name))
        })?;

    info!(pod = %key, from = %from, "Injecting pod failure");
    let event = ClusterEvent::pod_phase_changed_with_reason(
        key,
        from,
        PodPhase::Failed,
        "injected failure",
    );
    Ok(bus.publish(event).await?)
}

/// Remove an object without going through any controller.
///
/// # Errors
///
/// `Error::ObjectNotFound` if the object does not exist, or the publish
/// error.
pub async fn delete_object(bus: &EventBus, state: &ClusterState, key: &ObjectKey) -> Result<EventId> {
    if !state.contains(key) {
        return Err(Error::object_not_found(key));
    }

    info!(object = %key, "Injecting out-of-band deletion");
    Ok(bus
        .publish(ClusterEvent::deleted(key.clone(), "injected deletion"))
        .await?)
}
