//! CLI command handlers.
//!
//! Every command builds the same pipeline (store, bus, reconciler,
//! projection, loop) from the layered configuration, then drives it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use kubeloop_core::{Config, ResultExt};
use kubeloop_events::{
    ClusterEvent, ClusterProjection, EventBus, EventBusBuilder, EventPattern, EventStore,
    InMemoryEventStore, JournalEventStore, ManagedProjection, Projection, ResourceKind,
    TracingEventStore, read_journal,
};
use kubeloop_reconciler::{
    ConvergenceReport, DesiredState, InMemoryDesiredStateProvider, LoopConfig, ReconcilerBuilder,
    ReconcilerConfig, ReconciliationLoop, faults, load_desired_state,
};
use tokio::signal;
use tracing::{debug, error, info};

use crate::cli::{Cli, Commands, OutputFormat};
use crate::output::{render_apply, render_plan, render_state};
use crate::watch::{DEBOUNCE, ManifestWatcher};

/// A wired-up reconciliation pipeline.
pub struct Session {
    pub bus: Arc<EventBus>,
    pub provider: Arc<InMemoryDesiredStateProvider>,
    pub runner: ReconciliationLoop,
}

impl Session {
    /// Build the pipeline. With a journal configured, the journal is
    /// replayed first so the cluster picks up where the last run left off.
    ///
    /// # Errors
    ///
    /// Returns error if the journal cannot be opened or the configuration
    /// is rejected by the reconciler.
    pub async fn open(config: &Config, desired: DesiredState) -> Result<Self> {
        let store: Arc<dyn EventStore> = match config.journal.path() {
            Some(path) => {
                let journal = JournalEventStore::open(&path)
                    .await
                    .with_context(|| format!("Failed to open journal {}", path.display()))?;
                Arc::new(TracingEventStore::new(journal))
            }
            None => Arc::new(TracingEventStore::new(InMemoryEventStore::new())),
        };
        Self::with_store(config, desired, store)
    }

    /// Like [`Session::open`], but the journal is only read: its events are
    /// copied into memory and nothing is ever written back to the file.
    ///
    /// # Errors
    ///
    /// Returns error if the journal cannot be decoded or the configuration
    /// is rejected by the reconciler.
    pub async fn open_read_only(config: &Config, desired: DesiredState) -> Result<Self> {
        let memory = InMemoryEventStore::new();
        if let Some(path) = config.journal.path() {
            let events = read_journal(&path)
                .await
                .with_context(|| format!("Failed to read journal {}", path.display()))?;
            for event in events {
                memory.append(event).await?;
            }
        }
        Self::with_store(config, desired, Arc::new(TracingEventStore::new(memory)))
    }

    fn with_store(
        config: &Config,
        desired: DesiredState,
        store: Arc<dyn EventStore>,
    ) -> Result<Self> {
        let bus = Arc::new(EventBusBuilder::new().with_store(store).build()?);
        let reconciler = ReconcilerBuilder::new()
            .with_bus(bus.clone())
            .with_config(ReconcilerConfig::from_config(config))
            .build()?;
        let provider = Arc::new(InMemoryDesiredStateProvider::new(desired));
        let runner = ReconciliationLoop::new(
            Arc::new(reconciler),
            provider.clone(),
            Arc::new(ManagedProjection::new(ClusterProjection::new())),
            LoopConfig::from_config(config),
        );

        Ok(Self {
            bus,
            provider,
            runner,
        })
    }
}

/// Execute a CLI command.
///
/// This is the main command dispatcher that routes to the appropriate handler.
///
/// # Errors
///
/// Returns the first error of the command, with context.
pub async fn execute_command(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Apply {
            file,
            max_cycles,
            journal,
            output,
            fail_pod,
            at_cycle,
        } => {
            if let Some(max) = max_cycles {
                config.loop_.max_cycles = max;
            }
            override_journal(&mut config, journal.as_deref());
            config.validate()?;
            let fault = fail_pod.zip(at_cycle);
            cmd_apply(&config, &file, output, fault).await
        }

        Commands::Plan {
            file,
            journal,
            output,
        } => {
            override_journal(&mut config, journal.as_deref());
            config.validate()?;
            cmd_plan(&config, &file, output).await
        }

        Commands::Run {
            file,
            watch,
            interval_ms,
            journal,
        } => {
            if let Some(ms) = interval_ms {
                config.loop_.interval_ms = ms;
            }
            override_journal(&mut config, journal.as_deref());
            config.validate()?;
            cmd_run(&config, file, watch).await
        }

        Commands::Replay { journal, output } => cmd_replay(&journal, output).await,
    }
}

fn override_journal(config: &mut Config, journal: Option<&Path>) {
    if let Some(path) = journal {
        config.journal.path = path.display().to_string();
    }
}

async fn load_manifest(file: &Path) -> Result<DesiredState> {
    load_desired_state(file)
        .await
        .with_context(|| format!("Failed to load manifest {}", file.display()))
}

/// Reconcile until converged and print the result.
async fn cmd_apply(
    config: &Config,
    file: &Path,
    output: OutputFormat,
    fault: Option<(String, usize)>,
) -> Result<()> {
    let desired = load_manifest(file).await?;
    info!(workloads = desired.len(), manifest = %file.display(), "Applying manifest");

    let session = Session::open(config, desired).await?;
    let report = match fault {
        Some((pod, at_cycle)) => converge_with_fault(&session, &pod, at_cycle).await?,
        None => session.runner.run_until_converged().await?,
    };

    let state = session.runner.observe().await?.cluster;
    println!("{}", render_apply(&report, &state, output)?);
    Ok(())
}

/// Like `run_until_converged`, failing `pod` just before cycle `at_cycle`.
async fn converge_with_fault(
    session: &Session,
    pod: &str,
    at_cycle: usize,
) -> Result<ConvergenceReport> {
    let max_cycles = session.runner.config().max_cycles;
    let mut report = ConvergenceReport::default();
    let mut injected = false;

    while report.cycles < max_cycles {
        if !injected && report.cycles + 1 >= at_cycle {
            let state = session.runner.observe().await?.cluster;
            faults::fail_pod(&session.bus, &state, pod)
                .await
                .with_context(|| format!("Failed to inject failure into pod {pod}"))?;
            injected = true;
        }

        let result = session.runner.reconcile_once().await?;
        report.record(&result);

        if injected && result.converged {
            return Ok(report);
        }
    }

    Err(kubeloop_reconciler::Error::not_converged(report.cycles).into())
}

/// Print the actions the next cycle would take.
async fn cmd_plan(config: &Config, file: &Path, output: OutputFormat) -> Result<()> {
    let desired = load_manifest(file).await?;
    let session = Session::open_read_only(config, desired.clone()).await?;

    let actual = session.runner.observe().await?;
    let actions = session.runner.reconciler().plan(&desired, &actual);

    println!("{}", render_plan(&actions, output)?);
    Ok(())
}

/// Run the loop until Ctrl+C, optionally following manifest edits.
async fn cmd_run(config: &Config, file: PathBuf, watch: bool) -> Result<()> {
    let desired = load_manifest(&file).await?;
    let mut session = Session::open(config, desired).await?;

    let stopper = session.runner.stopper();
    tokio::spawn(async move {
        wait_for_shutdown().await;
        stopper.stop();
    });

    let (_, mut pod_events) = session
        .bus
        .subscribe_with_pattern(EventPattern::ByKind(ResourceKind::Pod))
        .await;
    let pod_log = tokio::spawn(async move {
        while let Ok(event) = pod_events.recv().await {
            log_pod_event(&event);
        }
    });

    let reload = if watch {
        let mut watcher = ManifestWatcher::new(&file, DEBOUNCE)?;
        let provider = session.provider.clone();
        info!(manifest = %file.display(), "Watching manifest for changes");
        Some(tokio::spawn(async move {
            while watcher.changed().await.is_some() {
                if let Some(desired) = load_manifest(&file).await.into_option_logged() {
                    info!(workloads = desired.len(), "Manifest reloaded");
                    provider.update(desired).await;
                }
            }
        }))
    } else {
        None
    };

    info!("kubeloop is running. Press Ctrl+C to stop.");
    let result = session.runner.run().await;

    pod_log.abort();
    if let Some(task) = reload {
        task.abort();
    }
    result?;
    info!("kubeloop stopped");
    Ok(())
}

fn log_pod_event(event: &ClusterEvent) {
    match event {
        ClusterEvent::PodPhaseChanged { key, to, .. } => {
            info!(pod = %key.name, phase = %to, "Pod phase changed");
        }
        ClusterEvent::PodBound { key, node, .. } => {
            info!(pod = %key.name, node = %node, "Pod scheduled");
        }
        other => debug!(pod = %other.key().name, event = other.event_type(), "Pod event"),
    }
}

/// Rebuild the cluster from a journal and print it.
async fn cmd_replay(journal: &Path, output: OutputFormat) -> Result<()> {
    anyhow::ensure!(journal.exists(), "Journal {} does not exist", journal.display());
    let events = read_journal(journal)
        .await
        .with_context(|| format!("Failed to read journal {}", journal.display()))?;

    let projection = ClusterProjection::new();
    let mut state = projection.initial_state();
    for event in &events {
        projection.apply(&mut state, event);
    }
    info!(events = events.len(), objects = state.len(), "Journal replayed");

    println!("{}", render_state(&state, output)?);
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C).
async fn wait_for_shutdown() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, stopping"),
        Err(err) => error!("Failed to listen for shutdown signal: {}", err),
    }
}
