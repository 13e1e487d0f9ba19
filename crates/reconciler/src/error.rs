//! Error types for the reconciler crate.

use std::fmt;

use kubeloop_events::{ObjectKey, PodPhase};

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
#[derive(Debug, Clone)]
pub enum Error {
    /// Reconciliation failed.
    ReconcileFailed { reason: String },
    /// Action execution failed.
    ActionFailed { action: String, reason: String },
    /// A pod phase change the lifecycle does not allow.
    InvalidTransition {
        pod: String,
        from: PodPhase,
        to: PodPhase,
    },
    /// Object not found.
    ObjectNotFound { key: String },
    /// Event bus error.
    EventError { reason: String },
    /// Invalid configuration.
    InvalidConfig { reason: String },
    /// Cycle budget exhausted before the cluster settled.
    NotConverged { cycles: usize },
    /// Manifest file could not be read.
    ManifestRead { path: String, reason: String },
    /// A manifest document is malformed.
    ManifestInvalid { document: usize, reason: String },
    /// The same object is declared twice.
    DuplicateObject { key: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReconcileFailed { reason } => {
                write!(f, "reconciliation failed: {reason}")
            }
            Self::ActionFailed { action, reason } => {
                write!(f, "action '{action}' failed: {reason}")
            }
            Self::InvalidTransition { pod, from, to } => {
                write!(f, "pod '{pod}' cannot move from {from} to {to}")
            }
            Self::ObjectNotFound { key } => {
                write!(f, "object '{key}' not found")
            }
            Self::EventError { reason } => {
                write!(f, "event error: {reason}")
            }
            Self::InvalidConfig { reason } => {
                write!(f, "invalid configuration: {reason}")
            }
            Self::NotConverged { cycles } => {
                write!(f, "cluster did not converge within {cycles} cycles")
            }
            Self::ManifestRead { path, reason } => {
                write!(f, "failed to read manifest '{path}': {reason}")
            }
            Self::ManifestInvalid { document, reason } => {
                write!(f, "manifest document {document}: {reason}")
            }
            Self::DuplicateObject { key } => {
                write!(f, "object '{key}' is declared more than once")
            }
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Create a reconcile failed error.
    pub fn reconcile_failed(reason: impl Into<String>) -> Self {
        Self::ReconcileFailed {
            reason: reason.into(),
        }
    }

    /// Create an action failed error.
    pub fn action_failed(action: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ActionFailed {
            action: action.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid transition error.
    pub fn invalid_transition(pod: &ObjectKey, from: PodPhase, to: PodPhase) -> Self {
        Self::InvalidTransition {
            pod: pod.name.clone(),
            from,
            to,
        }
    }

    /// Create an object not found error.
    pub fn object_not_found(key: &ObjectKey) -> Self {
        Self::ObjectNotFound {
            key: key.to_string(),
        }
    }

    /// Create an event error.
    pub fn event_error(reason: impl Into<String>) -> Self {
        Self::EventError {
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create a not converged error.
    pub fn not_converged(cycles: usize) -> Self {
        Self::NotConverged { cycles }
    }

    /// Create a manifest read error.
    pub fn manifest_read(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ManifestRead {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a manifest invalid error. Documents are numbered from 1.
    pub fn manifest_invalid(document: usize, reason: impl Into<String>) -> Self {
        Self::ManifestInvalid {
            document,
            reason: reason.into(),
        }
    }

    /// Create a duplicate object error.
    pub fn duplicate_object(key: &ObjectKey) -> Self {
        Self::DuplicateObject {
            key: key.to_string(),
        }
    }
}

impl From<kubeloop_events::Error> for Error {
    fn from(err: kubeloop_events::Error) -> Self {
        Self::event_error(err.to_string())
    }
}
