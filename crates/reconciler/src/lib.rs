//! K8s-style reconciliation loop for a simulated cluster.
//!
//! This crate implements the controller pattern:
//!
//! - **Desired State**: the workloads a manifest declares
//! - **Actual State**: computed from events/projections
//! - **Diff**: controllers compare desired vs actual
//! - **Actions**: generated and published as events to converge
//!
//! # Key Concepts
//!
//! ## Reconciliation
//!
//! Every cycle the loop:
//! 1. Gets the desired state (which workloads should exist)
//! 2. Catches the cluster projection up with the event store
//! 3. Lets each controller propose actions to close the gap
//! 4. Executes the actions by publishing events
//!
//! ## Controllers
//!
//! - `WorkloadSync` - declared workloads exist with the declared spec
//! - `DeploymentController` - Deployment → ReplicaSets, rollouts
//! - `ReplicaSetController` - ReplicaSet → Pods
//! - `StatefulSetController` - StatefulSet → ordinal Pods + claims
//! - `Scheduler` - binds Pending pods to nodes
//! - `NodeAgent` - starts bound pods, removes terminated ones
//! - `VolumeProvisioner` - binds claims
//! - `GarbageCollector` - deletes orphans
//!
//! # Example
//!
//! ```ignore
//! use kubeloop_reconciler::{
//!     Reconciler, ReconcilerConfig, ReconciliationLoop, LoopConfig,
//!     InMemoryDesiredStateProvider, parse_manifest, DesiredState,
//! };
//! use kubeloop_events::{EventBus, InMemoryEventStore, ClusterProjection, ManagedProjection};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(InMemoryEventStore::new());
//!     let bus = Arc::new(EventBus::new(store));
//!     let reconciler = Arc::new(Reconciler::with_event_executor(
//!         bus.clone(),
//!         ReconcilerConfig::default(),
//!     ));
//!
//!     let resources = parse_manifest(include_str!("app.yaml")).unwrap();
//!     let desired = Arc::new(InMemoryDesiredStateProvider::new(
//!         DesiredState::from_resources(resources),
//!     ));
//!     let projection = Arc::new(ManagedProjection::new(ClusterProjection::new()));
//!
//!     let loop_runner = ReconciliationLoop::new(
//!         reconciler,
//!         desired,
//!         projection,
//!         LoopConfig::default(),
//!     );
//!
//!     let report = loop_runner.run_until_converged().await.unwrap();
//!     println!("converged after {} cycles", report.cycles);
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod controller;
pub mod controllers;
pub mod error;
pub mod faults;
pub mod r#loop;
pub mod manifest;
pub mod reconciler;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export main types
pub use controller::{Controller, ControllerContext, builtin_controllers};
pub use error::{Error, Result};
pub use manifest::{load_desired_state, load_manifest, parse_manifest};
pub use r#loop::{
    ConvergenceReport, DesiredStateProvider, InMemoryDesiredStateProvider, LoopConfig,
    LoopStopper, ReconciliationLoop,
};
pub use reconciler::{
    ActionExecutor, EventActionExecutor, Reconciler, ReconcilerBuilder, ReconcilerConfig,
    event_for,
};
pub use types::{ActualState, DesiredState, ReconcileAction, ReconcileResult};
