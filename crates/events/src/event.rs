//! Cluster event types.
//!
//! Every change to the simulated cluster is one of these events. The event
//! log is the source of truth; cluster state is a projection over it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{EventId, ObjectKey, PodPhase, Resource, ResourceKind};

/// A change to the simulated cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClusterEvent {
    /// A new object was created.
    Created {
        event_id: EventId,
        resource: Resource,
        timestamp: DateTime<Utc>,
    },
    /// The spec of an existing object was replaced.
    SpecUpdated {
        event_id: EventId,
        resource: Resource,
        timestamp: DateTime<Utc>,
    },
    /// Replica count changed.
    Scaled {
        event_id: EventId,
        key: ObjectKey,
        from: u32,
        to: u32,
        timestamp: DateTime<Utc>,
    },
    /// A pod was assigned to a node.
    PodBound {
        event_id: EventId,
        key: ObjectKey,
        node: String,
        timestamp: DateTime<Utc>,
    },
    /// A pod changed phase.
    PodPhaseChanged {
        event_id: EventId,
        key: ObjectKey,
        from: PodPhase,
        to: PodPhase,
        reason: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// A claim was bound to a volume.
    ClaimBound {
        event_id: EventId,
        key: ObjectKey,
        timestamp: DateTime<Utc>,
    },
    /// An object was removed.
    Deleted {
        event_id: EventId,
        key: ObjectKey,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl ClusterEvent {
    /// Create a new Created event.
    pub fn created(resource: Resource) -> Self {
        Self::Created {
            event_id: EventId::new(),
            resource,
            timestamp: Utc::now(),
        }
    }

    /// Create a new SpecUpdated event.
    pub fn spec_updated(resource: Resource) -> Self {
        Self::SpecUpdated {
            event_id: EventId::new(),
            resource,
            timestamp: Utc::now(),
        }
    }

    /// Create a new Scaled event.
    pub fn scaled(key: ObjectKey, from: u32, to: u32) -> Self {
        Self::Scaled {
            event_id: EventId::new(),
            key,
            from,
            to,
            timestamp: Utc::now(),
        }
    }

    /// Create a new PodBound event.
    pub fn pod_bound(key: ObjectKey, node: impl Into<String>) -> Self {
        Self::PodBound {
            event_id: EventId::new(),
            key,
            node: node.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a new PodPhaseChanged event.
    pub fn pod_phase_changed(key: ObjectKey, from: PodPhase, to: PodPhase) -> Self {
        Self::PodPhaseChanged {
            event_id: EventId::new(),
            key,
            from,
            to,
            reason: None,
            timestamp: Utc::now(),
        }
    }

    /// Create a PodPhaseChanged event with a reason.
    pub fn pod_phase_changed_with_reason(
        key: ObjectKey,
        from: PodPhase,
        to: PodPhase,
        reason: impl Into<String>,
    ) -> Self {
        Self::PodPhaseChanged {
            event_id: EventId::new(),
            key,
            from,
            to,
            reason: Some(reason.into()),
            timestamp: Utc::now(),
        }
    }

    /// Create a new ClaimBound event.
    pub fn claim_bound(key: ObjectKey) -> Self {
        Self::ClaimBound {
            event_id: EventId::new(),
            key,
            timestamp: Utc::now(),
        }
    }

    /// Create a new Deleted event.
    pub fn deleted(key: ObjectKey, reason: impl Into<String>) -> Self {
        Self::Deleted {
            event_id: EventId::new(),
            key,
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }

    /// Get the event ID.
    pub fn event_id(&self) -> EventId {
        match self {
            Self::Created { event_id, .. }
            | Self::SpecUpdated { event_id, .. }
            | Self::Scaled { event_id, .. }
            | Self::PodBound { event_id, .. }
            | Self::PodPhaseChanged { event_id, .. }
            | Self::ClaimBound { event_id, .. }
            | Self::Deleted { event_id, .. } => *event_id,
        }
    }

    /// Get the key of the object this event is about.
    pub fn key(&self) -> ObjectKey {
        match self {
            Self::Created { resource, .. } | Self::SpecUpdated { resource, .. } => resource.key(),
            Self::Scaled { key, .. }
            | Self::PodBound { key, .. }
            | Self::PodPhaseChanged { key, .. }
            | Self::ClaimBound { key, .. }
            | Self::Deleted { key, .. } => key.clone(),
        }
    }

    /// Get the kind of the object this event is about.
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Created { resource, .. } | Self::SpecUpdated { resource, .. } => resource.kind(),
            Self::Scaled { key, .. }
            | Self::PodBound { key, .. }
            | Self::PodPhaseChanged { key, .. }
            | Self::ClaimBound { key, .. }
            | Self::Deleted { key, .. } => key.kind,
        }
    }

    /// Get the timestamp.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Created { timestamp, .. }
            | Self::SpecUpdated { timestamp, .. }
            | Self::Scaled { timestamp, .. }
            | Self::PodBound { timestamp, .. }
            | Self::PodPhaseChanged { timestamp, .. }
            | Self::ClaimBound { timestamp, .. }
            | Self::Deleted { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::SpecUpdated { .. } => "spec_updated",
            Self::Scaled { .. } => "scaled",
            Self::PodBound { .. } => "pod_bound",
            Self::PodPhaseChanged { .. } => "pod_phase_changed",
            Self::ClaimBound { .. } => "claim_bound",
            Self::Deleted { .. } => "deleted",
        }
    }
}
