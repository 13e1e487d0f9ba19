//! Core types, errors, and configuration for kubeloop.
//!
//! Everything here is shared by the event and reconciler crates and by the
//! `kubeloop` binary.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod config;
pub mod error;
pub mod result;

pub use config::{
    ClusterSection, Config, JournalSection, LoopSection, ReconcilerSection, DEFAULT_CONFIG_FILE,
};
pub use error::Error;
pub use result::{Result, ResultExt};
