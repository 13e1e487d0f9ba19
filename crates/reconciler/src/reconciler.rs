//! Reconciler implementation.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use kubeloop_core::Config;
use kubeloop_events::{ClusterEvent, EventBus, validate_name};
use tracing::{debug, info, warn};

use crate::controller::{Controller, ControllerContext, builtin_controllers};
use crate::error::{Error, Result};
use crate::types::{ActualState, DesiredState, ReconcileAction, ReconcileResult};

/// Configuration for the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Maximum actions applied per cycle, 0 for no limit.
    pub max_actions_per_cycle: usize,
    /// Drained ReplicaSets kept per Deployment.
    pub revision_history_limit: usize,
    /// Nodes pods can be scheduled onto, in tie-break order.
    pub nodes: Vec<String>,
    /// Pods a node accepts.
    pub max_pods_per_node: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl ReconcilerConfig {
    /// Take the reconciler and cluster settings from a loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_actions_per_cycle: config.reconciler.max_actions_per_cycle,
            revision_history_limit: config.reconciler.revision_history_limit,
            nodes: config.cluster.nodes.clone(),
            max_pods_per_node: config.cluster.max_pods_per_node,
        }
    }
}

/// Trait for executing reconcile actions.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Execute an action.
    async fn execute(&self, action: &ReconcileAction) -> Result<()>;
}

/// The event that records an action.
///
/// # Errors
///
/// Returns `Error::InvalidTransition` for a pod phase change the lifecycle
/// does not allow, and `Error::EventError` when a created object's name is
/// not a valid object name.
pub fn event_for(action: &ReconcileAction) -> Result<ClusterEvent> {
    let event = match action {
        ReconcileAction::CreateObject { resource } => {
            validate_name(&resource.meta.name)?;
            ClusterEvent::created(resource.clone())
        }
        ReconcileAction::UpdateSpec { resource } => ClusterEvent::spec_updated(resource.clone()),
        ReconcileAction::Scale { key, from, to } => ClusterEvent::scaled(key.clone(), *from, *to),
        ReconcileAction::DeleteObject { key, reason } => {
            ClusterEvent::deleted(key.clone(), reason.clone())
        }
        ReconcileAction::BindPod { key, node } => ClusterEvent::pod_bound(key.clone(), node),
        ReconcileAction::TransitionPod {
            key,
            from,
            to,
            reason,
        } => {
            if !from.can_transition_to(*to) {
                return Err(Error::invalid_transition(key, *from, *to));
            }
            ClusterEvent::pod_phase_changed_with_reason(key.clone(), *from, *to, reason.clone())
        }
        ReconcileAction::BindClaim { key } => ClusterEvent::claim_bound(key.clone()),
    };
    Ok(event)
}

/// Event-based action executor that publishes events.
pub struct EventActionExecutor {
    bus: Arc<EventBus>,
}

impl EventActionExecutor {
    /// Create a new event action executor.
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl ActionExecutor for EventActionExecutor {
    async fn execute(&self, action: &ReconcileAction) -> Result<()> {
        let event = event_for(action)?;
        self.bus
            .publish(event)
            .await
            .map_err(|e| Error::event_error(e.to_string()))?;
        Ok(())
    }
}

/// K8s-style reconciler for cluster objects.
pub struct Reconciler {
    /// Event bus for coordination.
    bus: Arc<EventBus>,
    /// Action executor.
    executor: Arc<dyn ActionExecutor>,
    /// Controllers, in the order they run.
    controllers: Vec<Arc<dyn Controller>>,
    /// Configuration.
    config: ReconcilerConfig,
}

impl Reconciler {
    /// Create a new reconciler running the built-in controllers.
    pub fn new(
        bus: Arc<EventBus>,
        executor: Arc<dyn ActionExecutor>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            bus,
            executor,
            controllers: builtin_controllers(),
            config,
        }
    }

    /// Create a reconciler with default event executor.
    pub fn with_event_executor(bus: Arc<EventBus>, config: ReconcilerConfig) -> Self {
        let executor = Arc::new(EventActionExecutor::new(bus.clone()));
        Self::new(bus, executor, config)
    }

    /// Core reconciliation: compare desired vs actual and apply the actions.
    ///
    /// # Errors
    ///
    /// Failed actions are reported in the result, not as an error.
    pub async fn reconcile(
        &self,
        desired: &DesiredState,
        actual: &ActualState,
    ) -> Result<ReconcileResult> {
        debug!(
            desired = desired.len(),
            actual = actual.len(),
            live_pods = actual.live_pods,
            running_pods = actual.running_pods,
            "Starting reconciliation"
        );

        let actions = self.plan(desired, actual);

        debug!(actions = actions.len(), "Generated actions");

        let (taken, failed) = self.apply_actions(actions).await;

        let result = ReconcileResult::new(taken, failed, desired.len(), actual.len());

        if result.converged {
            debug!("System converged");
        } else {
            info!(
                actions_taken = result.actions_taken.len(),
                actions_failed = result.actions_failed.len(),
                "Reconciliation complete"
            );
        }

        Ok(result)
    }

    /// The actions the next reconciliation would apply, without applying them.
    pub fn plan(&self, desired: &DesiredState, actual: &ActualState) -> Vec<ReconcileAction> {
        let ctx = ControllerContext::new(desired, actual, &self.config);

        let proposed = self.controllers.iter().flat_map(|controller| {
            let actions = controller.reconcile(&ctx);
            if !actions.is_empty() {
                debug!(
                    controller = controller.name(),
                    actions = actions.len(),
                    "Controller proposed actions"
                );
            }
            actions
        });

        // One action per object per cycle; earlier controllers win.
        let mut seen = HashSet::new();
        let mut actions: Vec<ReconcileAction> = proposed
            .filter(|action| seen.insert(action.key()))
            .collect();

        if self.config.max_actions_per_cycle > 0 {
            actions.truncate(self.config.max_actions_per_cycle);
        }
        actions
    }

    /// Apply a list of actions.
    async fn apply_actions(
        &self,
        actions: Vec<ReconcileAction>,
    ) -> (Vec<ReconcileAction>, Vec<(ReconcileAction, String)>) {
        let mut taken = Vec::new();
        let mut failed = Vec::new();

        for action in actions {
            debug!(action = %action.description(), "Applying action");

            match self.executor.execute(&action).await {
                Ok(()) => {
                    taken.push(action);
                }
                Err(e) => {
                    warn!(action = %action.description(), error = %e, "Action failed");
                    failed.push((action, e.to_string()));
                }
            }
        }

        (taken, failed)
    }

    /// Get the event bus.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Get the configuration.
    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Names of the registered controllers, in run order.
    pub fn controller_names(&self) -> Vec<&str> {
        self.controllers.iter().map(|c| c.name()).collect()
    }
}

/// Builder for Reconciler.
pub struct ReconcilerBuilder {
    bus: Option<Arc<EventBus>>,
    executor: Option<Arc<dyn ActionExecutor>>,
    extra_controllers: Vec<Arc<dyn Controller>>,
    config: ReconcilerConfig,
}

impl ReconcilerBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            bus: None,
            executor: None,
            extra_controllers: Vec::new(),
            config: ReconcilerConfig::default(),
        }
    }

    /// Set the event bus.
    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Set a custom action executor.
    pub fn with_executor(mut self, executor: Arc<dyn ActionExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Register a controller that runs after the built-in ones.
    pub fn with_controller(mut self, controller: Arc<dyn Controller>) -> Self {
        self.extra_controllers.push(controller);
        self
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the action budget per cycle.
    pub fn max_actions_per_cycle(mut self, max: usize) -> Self {
        self.config.max_actions_per_cycle = max;
        self
    }

    /// Set the schedulable nodes.
    pub fn nodes(mut self, nodes: Vec<String>) -> Self {
        self.config.nodes = nodes;
        self
    }

    /// Build the reconciler.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` without a bus, without nodes, or with
    /// zero pods per node.
    pub fn build(self) -> Result<Reconciler> {
        let bus = self
            .bus
            .ok_or_else(|| Error::invalid_config("Event bus is required"))?;

        if self.config.nodes.is_empty() {
            return Err(Error::invalid_config("At least one node is required"));
        }
        if self.config.max_pods_per_node == 0 {
            return Err(Error::invalid_config("max_pods_per_node must be positive"));
        }

        let executor = self
            .executor
            .unwrap_or_else(|| Arc::new(EventActionExecutor::new(bus.clone())));

        let mut reconciler = Reconciler::new(bus, executor, self.config);
        reconciler.controllers.extend(self.extra_controllers);
        Ok(reconciler)
    }
}

impl Default for ReconcilerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::testing::{TestCluster, deployment, pod_of};
    use kubeloop_events::{EventStore, InMemoryEventStore, ObjectKey, PodPhase, ResourceKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn setup_reconciler() -> (Reconciler, Arc<EventBus>) {
        let store = Arc::new(InMemoryEventStore::new());
        let bus = Arc::new(EventBus::new(store));
        let reconciler = Reconciler::with_event_executor(bus.clone(), ReconcilerConfig::default());
        (reconciler, bus)
    }

    /// Fails every other action.
    struct FlakyExecutor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ActionExecutor for FlakyExecutor {
        async fn execute(&self, action: &ReconcileAction) -> Result<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                Err(Error::action_failed(action.description(), "flaky"))
            } else {
                Ok(())
            }
        }
    }

    /// Proposes an action for an object another controller already claimed.
    struct Shadow;

    impl Controller for Shadow {
        fn name(&self) -> &str {
            "shadow"
        }

        fn reconcile(&self, ctx: &ControllerContext<'_>) -> Vec<ReconcileAction> {
            ctx.desired
                .workloads()
                .map(|w| ReconcileAction::DeleteObject {
                    key: w.key(),
                    reason: "shadow".to_string(),
                })
                .collect()
        }
    }

    #[tokio::test]
    async fn test_reconcile_empty() {
        let (reconciler, _) = setup_reconciler();
        let result = reconciler
            .reconcile(&DesiredState::new(), &ActualState::new())
            .await
            .unwrap();
        assert!(result.converged);
    }

    #[tokio::test]
    async fn test_reconcile_creates_declared_workload() {
        let (reconciler, bus) = setup_reconciler();
        let desired = DesiredState::from_resources([deployment("web", 2, "nginx:1")]);

        let result = reconciler
            .reconcile(&desired, &ActualState::new())
            .await
            .unwrap();

        assert!(
            result
                .actions_taken
                .iter()
                .any(|a| matches!(a, ReconcileAction::CreateObject { .. }))
        );
        assert_eq!(bus.store().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_stop_the_rest() {
        let store = Arc::new(InMemoryEventStore::new());
        let bus = Arc::new(EventBus::new(store));
        let reconciler = ReconcilerBuilder::new()
            .with_bus(bus)
            .with_executor(Arc::new(FlakyExecutor {
                calls: AtomicUsize::new(0),
            }))
            .build()
            .unwrap();
        let desired = DesiredState::from_resources([
            deployment("a", 1, "nginx"),
            deployment("b", 1, "nginx"),
            deployment("c", 1, "nginx"),
        ]);

        let result = reconciler
            .reconcile(&desired, &ActualState::new())
            .await
            .unwrap();

        assert_eq!(result.actions_failed.len(), 2);
        assert_eq!(result.actions_taken.len(), 1);
        assert!(!result.converged);
    }

    #[test]
    fn test_plan_deduplicates_per_object() {
        let store = Arc::new(InMemoryEventStore::new());
        let reconciler = ReconcilerBuilder::new()
            .with_bus(Arc::new(EventBus::new(store)))
            .with_controller(Arc::new(Shadow))
            .build()
            .unwrap();
        let desired = DesiredState::from_resources([deployment("web", 1, "nginx")]);

        let actions = reconciler.plan(&desired, &ActualState::new());

        assert_eq!(actions.len(), 1);
        assert!(matches!(actions.first(), Some(ReconcileAction::CreateObject { .. })));
        assert_eq!(reconciler.controller_names().last(), Some(&"shadow"));
    }

    #[test]
    fn test_plan_truncates_to_budget() {
        let store = Arc::new(InMemoryEventStore::new());
        let reconciler = ReconcilerBuilder::new()
            .with_bus(Arc::new(EventBus::new(store)))
            .max_actions_per_cycle(2)
            .build()
            .unwrap();
        let desired = DesiredState::from_resources([
            deployment("a", 1, "nginx"),
            deployment("b", 1, "nginx"),
            deployment("c", 1, "nginx"),
        ]);

        assert_eq!(reconciler.plan(&desired, &ActualState::new()).len(), 2);
    }

    #[tokio::test]
    async fn test_plan_does_not_publish() {
        let (reconciler, bus) = setup_reconciler();
        let desired = DesiredState::from_resources([deployment("web", 1, "nginx")]);

        let _ = reconciler.plan(&desired, &ActualState::new());

        assert_eq!(bus.store().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_executor_rejects_invalid_transition() {
        let (_, bus) = setup_reconciler();
        let executor = EventActionExecutor::new(bus.clone());
        let action = ReconcileAction::TransitionPod {
            key: ObjectKey::default_ns(ResourceKind::Pod, "web-0"),
            from: PodPhase::Terminating,
            to: PodPhase::Running,
            reason: "resurrect".to_string(),
        };

        let result = executor.execute(&action).await;

        assert!(matches!(result, Err(Error::InvalidTransition { .. })));
        assert_eq!(bus.store().count().await.unwrap(), 0);
    }

    #[test]
    fn test_event_for_matches_action() {
        let mut cluster = TestCluster::new();
        let rs = ObjectKey::default_ns(ResourceKind::ReplicaSet, "web-abc");
        let pod = cluster.create(pod_of(&rs, "web-abc-aaaaa"));

        let event = event_for(&ReconcileAction::BindPod {
            key: pod.clone(),
            node: "node-b".to_string(),
        })
        .unwrap();

        assert_eq!(event.key(), pod);
        assert_eq!(event.event_type(), "pod_bound");
    }

    #[tokio::test]
    async fn test_executor_rejects_overlong_name() {
        let (reconciler, bus) = setup_reconciler();
        let action = ReconcileAction::CreateObject {
            resource: pod_of(
                &ObjectKey::default_ns(ResourceKind::ReplicaSet, "web-abc"),
                &"a".repeat(64),
            ),
        };

        let (taken, failed) = reconciler.apply_actions(vec![action]).await;

        assert!(taken.is_empty());
        assert_eq!(failed.len(), 1);
        assert_eq!(bus.store().count().await.unwrap(), 0);
    }

    #[test]
    fn test_builder_requires_bus_and_nodes() {
        assert!(ReconcilerBuilder::new().build().is_err());

        let store = Arc::new(InMemoryEventStore::new());
        let result = ReconcilerBuilder::new()
            .with_bus(Arc::new(EventBus::new(store)))
            .nodes(vec![])
            .build();
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }
}
