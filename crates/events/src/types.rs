//! Cluster object model.
//!
//! A deliberately small, Kubernetes-shaped set of resources: the two kinds a
//! user declares (Deployment, StatefulSet) and the kinds controllers derive
//! from them (ReplicaSet, Pod, PersistentVolumeClaim).

use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use ulid::Ulid;

use crate::error::{Error, Result};

/// Namespace used when none is given.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Maximum length of an object name.
pub const MAX_NAME_LEN: usize = 63;

static NAME_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(Ulid);

impl EventId {
    /// Create a new random event ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Create from a ULID.
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// Get the inner ULID.
    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kinds of object the simulator knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    Deployment,
    ReplicaSet,
    StatefulSet,
    Pod,
    PersistentVolumeClaim,
}

impl ResourceKind {
    /// Kinds a user may declare directly.
    pub fn is_workload(&self) -> bool {
        matches!(self, Self::Deployment | Self::StatefulSet)
    }

    /// The kind name as it appears in manifests.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deployment => "Deployment",
            Self::ReplicaSet => "ReplicaSet",
            Self::StatefulSet => "StatefulSet",
            Self::Pod => "Pod",
            Self::PersistentVolumeClaim => "PersistentVolumeClaim",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of an object: kind, namespace and name.
///
/// Ordered so that iteration over cluster state is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    /// Create a new object key.
    pub fn new(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of an object in the default namespace.
    pub fn default_ns(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self::new(kind, DEFAULT_NAMESPACE, name)
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// Reference to the owning object, always in the same namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerRef {
    pub kind: ResourceKind,
    pub name: String,
}

impl OwnerRef {
    /// Create a new owner reference.
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

/// Object metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub owner: Option<OwnerRef>,
}

impl ObjectMeta {
    /// Metadata for an object in the default namespace.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            labels: BTreeMap::new(),
            owner: None,
        }
    }

    /// Set the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Add a label.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Replace all labels.
    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    /// Set the owner.
    pub fn with_owner(mut self, owner: OwnerRef) -> Self {
        self.owner = Some(owner);
        self
    }
}

/// Check that a name is a DNS-1123 label.
///
/// # Errors
///
/// Returns `Error::InvalidName` when the name is empty, too long, or contains
/// characters other than lowercase alphanumerics and `-`.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_name(name, "name must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::invalid_name(
            name,
            format!("name must be at most {MAX_NAME_LEN} characters"),
        ));
    }

    let pattern = NAME_PATTERN
        .get_or_init(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").ok())
        .as_ref()
        .ok_or_else(|| Error::Internal("name pattern failed to compile".to_string()))?;

    if pattern.is_match(name) {
        Ok(())
    } else {
        Err(Error::invalid_name(
            name,
            "must consist of lowercase alphanumerics or '-', and start and end with an alphanumeric",
        ))
    }
}

/// Template stamped onto every pod a controller creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodTemplate {
    pub labels: BTreeMap<String, String>,
    pub image: String,
}

impl PodTemplate {
    /// Create a template running the given image.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            labels: BTreeMap::new(),
            image: image.into(),
        }
    }

    /// Add a label.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Stable short hash identifying this template revision.
    ///
    /// First 10 hex characters of SHA-256 over the image and the sorted labels.
    pub fn template_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.image.as_bytes());
        for (key, value) in &self.labels {
            hasher.update(b"\n");
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
        }
        hasher
            .finalize()
            .iter()
            .take(5)
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

/// How a Deployment replaces pods when its template changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateStrategy {
    /// Surge new pods in while old ones drain.
    RollingUpdate {
        max_surge: u32,
        max_unavailable: u32,
    },
    /// Remove every old pod before creating new ones.
    Recreate,
}

impl Default for UpdateStrategy {
    fn default() -> Self {
        Self::RollingUpdate {
            max_surge: 1,
            max_unavailable: 0,
        }
    }
}

/// Ordering guarantees of a StatefulSet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PodManagementPolicy {
    /// One pod at a time, in ordinal order.
    #[default]
    OrderedReady,
    /// All pods at once.
    Parallel,
}

/// Template for the per-pod claims of a StatefulSet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeClaimTemplate {
    pub name: String,
    pub storage: String,
}

impl VolumeClaimTemplate {
    /// Create a new claim template.
    pub fn new(name: impl Into<String>, storage: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            storage: storage.into(),
        }
    }

    /// Name of the claim this template produces for a given pod.
    pub fn claim_name(&self, set_name: &str, ordinal: u32) -> String {
        format!("{}-{set_name}-{ordinal}", self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentSpec {
    pub replicas: u32,
    pub strategy: UpdateStrategy,
    pub template: PodTemplate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaSetSpec {
    pub replicas: u32,
    pub template: PodTemplate,
    pub template_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatefulSetSpec {
    pub replicas: u32,
    pub template: PodTemplate,
    pub pod_management_policy: PodManagementPolicy,
    pub volume_claim_templates: Vec<VolumeClaimTemplate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSpec {
    pub template: PodTemplate,
    pub template_hash: String,
    /// Node the pod was bound to at creation, normally `None`.
    pub node_name: Option<String>,
    /// Set for StatefulSet pods.
    pub ordinal: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimSpec {
    pub storage: String,
}

/// Kind-specific part of an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceSpec {
    Deployment(DeploymentSpec),
    ReplicaSet(ReplicaSetSpec),
    StatefulSet(StatefulSetSpec),
    Pod(PodSpec),
    PersistentVolumeClaim(ClaimSpec),
}

impl ResourceSpec {
    /// The kind this spec belongs to.
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Deployment(_) => ResourceKind::Deployment,
            Self::ReplicaSet(_) => ResourceKind::ReplicaSet,
            Self::StatefulSet(_) => ResourceKind::StatefulSet,
            Self::Pod(_) => ResourceKind::Pod,
            Self::PersistentVolumeClaim(_) => ResourceKind::PersistentVolumeClaim,
        }
    }

    /// Desired replica count, for kinds that have one.
    pub fn replicas(&self) -> Option<u32> {
        match self {
            Self::Deployment(s) => Some(s.replicas),
            Self::ReplicaSet(s) => Some(s.replicas),
            Self::StatefulSet(s) => Some(s.replicas),
            Self::Pod(_) | Self::PersistentVolumeClaim(_) => None,
        }
    }

    /// Set the replica count. Returns false for kinds without one.
    pub fn set_replicas(&mut self, replicas: u32) -> bool {
        match self {
            Self::Deployment(s) => s.replicas = replicas,
            Self::ReplicaSet(s) => s.replicas = replicas,
            Self::StatefulSet(s) => s.replicas = replicas,
            Self::Pod(_) | Self::PersistentVolumeClaim(_) => return false,
        }
        true
    }
}

/// A complete object: metadata plus spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub meta: ObjectMeta,
    pub spec: ResourceSpec,
}

impl Resource {
    /// Create a new resource.
    pub fn new(meta: ObjectMeta, spec: ResourceSpec) -> Self {
        Self { meta, spec }
    }

    /// Create a Deployment.
    pub fn deployment(meta: ObjectMeta, spec: DeploymentSpec) -> Self {
        Self::new(meta, ResourceSpec::Deployment(spec))
    }

    /// Create a StatefulSet.
    pub fn stateful_set(meta: ObjectMeta, spec: StatefulSetSpec) -> Self {
        Self::new(meta, ResourceSpec::StatefulSet(spec))
    }

    /// The object's kind.
    pub fn kind(&self) -> ResourceKind {
        self.spec.kind()
    }

    /// The object's identity.
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.kind(), &self.meta.namespace, &self.meta.name)
    }

    /// Key of the owning object, if any.
    pub fn owner_key(&self) -> Option<ObjectKey> {
        self.meta
            .owner
            .as_ref()
            .map(|o| ObjectKey::new(o.kind, &self.meta.namespace, &o.name))
    }

    /// Whether `owner` owns this object.
    pub fn is_owned_by(&self, owner: &ObjectKey) -> bool {
        self.owner_key().as_ref() == Some(owner)
    }

    /// The pod spec, when this is a pod.
    pub fn as_pod(&self) -> Option<&PodSpec> {
        match &self.spec {
            ResourceSpec::Pod(spec) => Some(spec),
            _ => None,
        }
    }

    /// The ReplicaSet spec, when this is a ReplicaSet.
    pub fn as_replica_set(&self) -> Option<&ReplicaSetSpec> {
        match &self.spec {
            ResourceSpec::ReplicaSet(spec) => Some(spec),
            _ => None,
        }
    }
}

/// Lifecycle of a pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PodPhase {
    /// Created, waiting for a node or for its volumes.
    Pending,
    /// Started on its node.
    Running,
    /// Terminal: exited cleanly.
    Succeeded,
    /// Terminal: crashed or was killed.
    Failed,
    /// Being removed.
    Terminating,
}

impl PodPhase {
    /// Pods that count towards a replica total.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    /// Pods that will never run again.
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Check if transition to target phase is valid.
    pub fn can_transition_to(&self, target: PodPhase) -> bool {
        use PodPhase::*;
        matches!(
            (self, target),
            (Pending, Running)
                | (Pending, Failed)
                | (Pending, Terminating)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Terminating)
                | (Succeeded, Terminating)
                | (Failed, Terminating)
        )
    }

    /// Get valid transitions from this phase.
    pub fn valid_transitions(&self) -> Vec<PodPhase> {
        use PodPhase::*;
        match self {
            Pending => vec![Running, Failed, Terminating],
            Running => vec![Succeeded, Failed, Terminating],
            Succeeded | Failed => vec![Terminating],
            Terminating => vec![],
        }
    }
}

impl std::fmt::Display for PodPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Terminating => "Terminating",
        };
        f.write_str(s)
    }
}

/// Binding state of a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClaimPhase {
    Pending,
    Bound,
}

impl std::fmt::Display for ClaimPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => f.write_str("Pending"),
            Self::Bound => f.write_str("Bound"),
        }
    }
}

/// Phase transition record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: PodPhase,
    pub to: PodPhase,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

impl PhaseTransition {
    /// Create a new phase transition.
    pub fn new(from: PodPhase, to: PodPhase, timestamp: DateTime<Utc>) -> Self {
        Self {
            from,
            to,
            timestamp,
            reason: None,
        }
    }

    /// Add a reason.
    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }
}
