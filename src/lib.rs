#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # kubeloop
//!
//! Command-line front end of the reconciliation-loop simulator: argument
//! parsing, the command handlers that wire the workspace crates together,
//! output rendering, and manifest watching.

pub mod cli;
pub mod commands;
pub mod output;
pub mod watch;

// Re-export the workspace crates for convenience
pub use kubeloop_core;
pub use kubeloop_events;
pub use kubeloop_reconciler;
