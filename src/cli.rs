//! CLI command definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// kubeloop - reconciliation loop simulator
#[derive(Parser, Debug)]
#[command(name = "kubeloop")]
#[command(version)]
#[command(about = "Watch declared workloads converge: observe, compare, act, repeat")]
#[command(
    long_about = "kubeloop reads Deployment and StatefulSet manifests and runs a simulated control loop until the cluster matches them. No containers run; every change is an event in a replayable journal."
)]
pub struct Cli {
    /// Config file (defaults to ./kubeloop.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `kubeloop_reconciler=trace` (overrides RUST_LOG)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reconcile a manifest until the cluster converges
    Apply {
        /// Manifest file
        #[arg(short = 'f', long = "file")]
        file: PathBuf,

        /// Give up after this many cycles
        #[arg(long)]
        max_cycles: Option<usize>,

        /// Append every event to this journal (replayed first if it exists)
        #[arg(long)]
        journal: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,

        /// Mark this pod Failed during the run
        #[arg(long, requires = "at_cycle")]
        fail_pod: Option<String>,

        /// Cycle before which the failure is injected
        #[arg(long, requires = "fail_pod")]
        at_cycle: Option<usize>,
    },

    /// Show the actions the first cycle would take
    Plan {
        /// Manifest file
        #[arg(short = 'f', long = "file")]
        file: PathBuf,

        /// Plan against the state recorded in this journal
        #[arg(long)]
        journal: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },

    /// Run the loop continuously until Ctrl+C
    Run {
        /// Manifest file
        #[arg(short = 'f', long = "file")]
        file: PathBuf,

        /// Reload the manifest whenever the file changes
        #[arg(short, long, default_value_t = false)]
        watch: bool,

        /// Milliseconds between cycles
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Append every event to this journal (replayed first if it exists)
        #[arg(long)]
        journal: Option<PathBuf>,
    },

    /// Rebuild cluster state from a journal
    Replay {
        /// Journal file
        #[arg(long)]
        journal: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
}

/// How results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Aligned columns for people
    Table,
    /// One JSON document for tools
    Json,
}
