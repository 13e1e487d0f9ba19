//! Property tests: any sequence of replica counts converges.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use kubeloop_events::{
    ClusterProjection, EventBus, InMemoryEventStore, ManagedProjection, ObjectKey,
    ObjectMeta, PodManagementPolicy, PodTemplate, Resource, ResourceKind, StatefulSetSpec,
    DeploymentSpec, UpdateStrategy, VolumeClaimTemplate,
};
use kubeloop_reconciler::{
    DesiredState, InMemoryDesiredStateProvider, LoopConfig, Reconciler, ReconcilerConfig,
    ReconciliationLoop,
};
use proptest::prelude::*;

fn workload(stateful: bool, parallel: bool, replicas: u32) -> Resource {
    let template = PodTemplate::new("app:1").with_label("app", "app");
    if stateful {
        Resource::stateful_set(
            ObjectMeta::new("app"),
            StatefulSetSpec {
                replicas,
                template,
                pod_management_policy: if parallel {
                    PodManagementPolicy::Parallel
                } else {
                    PodManagementPolicy::OrderedReady
                },
                volume_claim_templates: vec![VolumeClaimTemplate::new("data", "1Gi")],
            },
        )
    } else {
        Resource::deployment(
            ObjectMeta::new("app"),
            DeploymentSpec {
                replicas,
                strategy: UpdateStrategy::default(),
                template,
            },
        )
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Every target in the sequence is reached with exactly that many
    /// running pods, and a converged cluster plans nothing.
    #[test]
    fn scaling_always_converges(
        stateful in any::<bool>(),
        parallel in any::<bool>(),
        targets in prop::collection::vec(0u32..6, 1..4),
    ) {
        let rt = runtime();
        rt.block_on(async {
            let bus = Arc::new(EventBus::new(Arc::new(InMemoryEventStore::new())));
            let reconciler = Arc::new(Reconciler::with_event_executor(
                bus,
                ReconcilerConfig::default(),
            ));
            let provider = Arc::new(InMemoryDesiredStateProvider::new(DesiredState::new()));
            let runner = ReconciliationLoop::new(
                reconciler,
                provider.clone(),
                Arc::new(ManagedProjection::new(ClusterProjection::new())),
                LoopConfig { max_cycles: 300, ..LoopConfig::default() },
            );

            for replicas in targets {
                let resource = workload(stateful, parallel, replicas);
                let desired = DesiredState::from_resources([resource]);
                provider.update(desired.clone()).await;

                runner.run_until_converged().await.unwrap();

                let actual = runner.observe().await.unwrap();
                let expected = usize::try_from(replicas).unwrap();
                prop_assert_eq!(actual.running_pods, expected);
                prop_assert_eq!(actual.live_pods, expected);
                prop_assert!(runner.reconciler().plan(&desired, &actual).is_empty());

                if stateful {
                    let key = ObjectKey::default_ns(ResourceKind::StatefulSet, "app");
                    prop_assert!(actual.cluster.contains(&key));
                }
            }
            Ok(())
        })?;
    }
}
