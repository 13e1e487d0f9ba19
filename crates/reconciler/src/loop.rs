//! Continuous reconciliation loop.

use std::sync::Arc;
use std::time::Duration;

use kubeloop_core::Config;
use kubeloop_events::{ClusterProjection, ManagedProjection};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::reconciler::Reconciler;
use crate::types::{ActualState, DesiredState, ReconcileResult};

/// Configuration for the reconciliation loop.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Interval between reconciliation cycles.
    pub interval: Duration,
    /// Maximum consecutive errors before stopping.
    pub max_errors: usize,
    /// Whether to stop on first error.
    pub stop_on_error: bool,
    /// Cycles `run_until_converged` may spend.
    pub max_cycles: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl LoopConfig {
    /// Take the `[loop]` section of a loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: Duration::from_millis(config.loop_.interval_ms),
            max_errors: config.loop_.max_errors,
            stop_on_error: config.loop_.stop_on_error,
            max_cycles: config.loop_.max_cycles,
        }
    }
}

/// State provider trait for getting desired state.
#[async_trait::async_trait]
pub trait DesiredStateProvider: Send + Sync {
    /// Get the current desired state.
    async fn get_desired_state(&self) -> Result<DesiredState>;
}

/// Simple in-memory desired state provider.
pub struct InMemoryDesiredStateProvider {
    state: tokio::sync::RwLock<DesiredState>,
}

impl InMemoryDesiredStateProvider {
    /// Create a new provider with initial state.
    pub fn new(state: DesiredState) -> Self {
        Self {
            state: tokio::sync::RwLock::new(state),
        }
    }

    /// Replace the desired state.
    pub async fn update(&self, state: DesiredState) {
        *self.state.write().await = state;
    }

    /// Edit the desired state in place.
    pub async fn modify<F>(&self, f: F)
    where
        F: FnOnce(&mut DesiredState),
    {
        let mut state = self.state.write().await;
        f(&mut state);
    }
}

#[async_trait::async_trait]
impl DesiredStateProvider for InMemoryDesiredStateProvider {
    async fn get_desired_state(&self) -> Result<DesiredState> {
        Ok(self.state.read().await.clone())
    }
}

/// Totals of a `run_until_converged` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ConvergenceReport {
    /// Cycles run, including the final converged one.
    pub cycles: usize,
    /// Actions applied across all cycles.
    pub actions_taken: usize,
    /// Actions that failed across all cycles.
    pub actions_failed: usize,
}

impl ConvergenceReport {
    /// Add one cycle's result.
    pub fn record(&mut self, result: &ReconcileResult) {
        self.cycles += 1;
        self.actions_taken += result.actions_taken.len();
        self.actions_failed += result.actions_failed.len();
    }
}

/// Continuous reconciliation loop.
///
/// Periodically compares desired state vs actual state and
/// reconciles the difference.
pub struct ReconciliationLoop {
    /// The reconciler.
    reconciler: Arc<Reconciler>,
    /// Desired state provider.
    desired_provider: Arc<dyn DesiredStateProvider>,
    /// Projection for actual state.
    projection: Arc<ManagedProjection<ClusterProjection>>,
    /// Loop configuration.
    config: LoopConfig,
    /// Stop signal receiver.
    stop_rx: watch::Receiver<bool>,
    /// Stop signal sender (for external control).
    stop_tx: watch::Sender<bool>,
}

impl ReconciliationLoop {
    /// Create a new reconciliation loop.
    pub fn new(
        reconciler: Arc<Reconciler>,
        desired_provider: Arc<dyn DesiredStateProvider>,
        projection: Arc<ManagedProjection<ClusterProjection>>,
        config: LoopConfig,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            reconciler,
            desired_provider,
            projection,
            config,
            stop_rx,
            stop_tx,
        }
    }

    /// Run the reconciliation loop.
    ///
    /// This runs until stopped or max errors reached.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            interval_ms = self.config.interval.as_millis(),
            "Starting reconciliation loop"
        );

        let mut consecutive_errors = 0usize;
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.reconcile_once().await {
                        Ok(result) => {
                            consecutive_errors = 0;
                            if result.converged {
                                debug!("System converged");
                            }
                        }
                        Err(e) => {
                            consecutive_errors += 1;
                            error!(
                                error = %e,
                                consecutive = consecutive_errors,
                                "Reconciliation error"
                            );

                            if self.config.stop_on_error {
                                return Err(e);
                            }

                            if consecutive_errors >= self.config.max_errors {
                                error!("Max errors reached, stopping loop");
                                return Err(Error::reconcile_failed(format!(
                                    "Max errors ({}) reached",
                                    self.config.max_errors
                                )));
                            }
                        }
                    }
                }
                changed = self.stop_rx.changed() => {
                    if changed.is_err() || *self.stop_rx.borrow() {
                        info!("Reconciliation loop stopped");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Cycle back to back until a cycle changes nothing.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotConverged` once `max_cycles` cycles have run
    /// without converging, or the first cycle error.
    pub async fn run_until_converged(&self) -> Result<ConvergenceReport> {
        let mut report = ConvergenceReport::default();

        while report.cycles < self.config.max_cycles {
            let result = self.reconcile_once().await?;
            report.record(&result);

            if result.converged {
                info!(
                    cycles = report.cycles,
                    actions_taken = report.actions_taken,
                    actions_failed = report.actions_failed,
                    "Converged"
                );
                return Ok(report);
            }
        }

        Err(Error::not_converged(report.cycles))
    }

    /// Run a single reconciliation cycle.
    ///
    /// # Errors
    ///
    /// Fails when the desired state cannot be read or the store cannot be
    /// caught up with.
    pub async fn reconcile_once(&self) -> Result<ReconcileResult> {
        let desired = self.desired_provider.get_desired_state().await?;
        let actual = self.observe().await?;
        self.reconciler.reconcile(&desired, &actual).await
    }

    /// Bring the projection up to date and snapshot it.
    ///
    /// # Errors
    ///
    /// Fails when the store cannot be read.
    pub async fn observe(&self) -> Result<ActualState> {
        let applied = self
            .projection
            .catch_up(self.reconciler.bus().store().as_ref())
            .await?;
        if applied > 0 {
            debug!(events = applied, "Projection caught up");
        }
        Ok(ActualState::from_cluster(self.projection.state().await))
    }

    /// Get the reconciler.
    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Get the projection.
    pub fn projection(&self) -> &Arc<ManagedProjection<ClusterProjection>> {
        &self.projection
    }

    /// Get the loop configuration.
    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Stop the loop.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Get a stopper handle.
    pub fn stopper(&self) -> LoopStopper {
        LoopStopper {
            stop_tx: self.stop_tx.clone(),
        }
    }
}

/// Handle to stop a reconciliation loop.
#[derive(Clone)]
pub struct LoopStopper {
    stop_tx: watch::Sender<bool>,
}

impl LoopStopper {
    /// Stop the loop.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}
