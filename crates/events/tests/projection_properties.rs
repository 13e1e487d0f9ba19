//! Property-based tests for projection replay using proptest.
//!
//! Properties verified:
//! - Rebuilding from the store equals the incrementally maintained state
//! - Catching up in arbitrary chunks equals a single rebuild
//! - Pod phases only ever follow valid transitions in the history

#![allow(clippy::unwrap_used, clippy::expect_used)]

use kubeloop_events::{
    ClusterEvent, ClusterProjection, EventStore, InMemoryEventStore, ManagedProjection, ObjectKey,
    ObjectMeta, OwnerRef, PodPhase, PodSpec, PodTemplate, Projection, Resource, ResourceKind,
    ResourceSpec,
};
use proptest::prelude::*;

/// One step of a random cluster history.
#[derive(Debug, Clone)]
enum Step {
    Create(u8),
    Bind(u8, u8),
    Advance(u8),
    Fail(u8),
    Delete(u8),
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0u8..8).prop_map(Step::Create),
        (0u8..8, 0u8..3).prop_map(|(p, n)| Step::Bind(p, n)),
        (0u8..8).prop_map(Step::Advance),
        (0u8..8).prop_map(Step::Fail),
        (0u8..8).prop_map(Step::Delete),
    ]
}

fn pod_name(i: u8) -> String {
    format!("web-{i}")
}

fn pod_key(i: u8) -> ObjectKey {
    ObjectKey::default_ns(ResourceKind::Pod, pod_name(i))
}

fn pod(i: u8) -> Resource {
    Resource::new(
        ObjectMeta::new(pod_name(i)).with_owner(OwnerRef::new(ResourceKind::ReplicaSet, "web-1")),
        ResourceSpec::Pod(PodSpec {
            template: PodTemplate::new("nginx"),
            template_hash: "abc".to_string(),
            node_name: None,
            ordinal: None,
        }),
    )
}

/// Turn random steps into a plausible event sequence, tracking pod phases so
/// that every emitted transition is valid.
fn events_for(steps: &[Step]) -> Vec<ClusterEvent> {
    let mut phases: std::collections::BTreeMap<u8, PodPhase> = std::collections::BTreeMap::new();
    let mut events = Vec::new();

    for step in steps {
        match *step {
            Step::Create(i) if !phases.contains_key(&i) => {
                phases.insert(i, PodPhase::Pending);
                events.push(ClusterEvent::created(pod(i)));
            }
            Step::Bind(i, node) if phases.get(&i) == Some(&PodPhase::Pending) => {
                events.push(ClusterEvent::pod_bound(pod_key(i), format!("node-{node}")));
            }
            Step::Advance(i) => {
                if let Some(phase) = phases.get_mut(&i) {
                    let next = match phase {
                        PodPhase::Pending => Some(PodPhase::Running),
                        PodPhase::Running => Some(PodPhase::Succeeded),
                        PodPhase::Succeeded | PodPhase::Failed => Some(PodPhase::Terminating),
                        PodPhase::Terminating => None,
                    };
                    if let Some(next) = next {
                        events.push(ClusterEvent::pod_phase_changed(pod_key(i), *phase, next));
                        *phase = next;
                    }
                }
            }
            Step::Fail(i) => {
                if let Some(phase) = phases.get_mut(&i).filter(|p| p.is_live()) {
                    events.push(ClusterEvent::pod_phase_changed_with_reason(
                        pod_key(i),
                        *phase,
                        PodPhase::Failed,
                        "injected",
                    ));
                    *phase = PodPhase::Failed;
                }
            }
            Step::Delete(i) if phases.remove(&i).is_some() => {
                events.push(ClusterEvent::deleted(pod_key(i), "test"));
            }
            _ => {}
        }
    }
    events
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime creation should succeed")
}

proptest! {
    /// Property: rebuilding from the store produces exactly the state that was
    /// maintained event by event.
    #[test]
    fn prop_rebuild_equals_incremental(steps in prop::collection::vec(step_strategy(), 0..60)) {
        let events = events_for(&steps);
        let rt = runtime();

        let (incremental, rebuilt, late) = rt.block_on(async {
            let store = InMemoryEventStore::new();
            let managed = ManagedProjection::new(ClusterProjection::new());
            for event in &events {
                store.append(event.clone()).await.unwrap();
                managed.apply(event).await;
            }
            // Everything stored was already applied.
            let late = managed.catch_up(&store).await.unwrap();
            let rebuilt = ClusterProjection::new().rebuild(&store).await.unwrap();
            (managed.state().await, rebuilt, late)
        });

        prop_assert_eq!(late, 0);
        prop_assert_eq!(incremental, rebuilt);
    }

    /// Property: catching up after every few appends reaches the same state as
    /// one rebuild at the end.
    #[test]
    fn prop_chunked_catch_up_equals_rebuild(
        steps in prop::collection::vec(step_strategy(), 0..60),
        chunk in 1usize..10,
    ) {
        let events = events_for(&steps);
        let rt = runtime();

        let (caught_up, rebuilt, applied) = rt.block_on(async {
            let store = InMemoryEventStore::new();
            let managed = ManagedProjection::new(ClusterProjection::new());
            let mut applied = 0usize;
            for batch in events.chunks(chunk) {
                for event in batch {
                    store.append(event.clone()).await.unwrap();
                }
                applied += managed.catch_up(&store).await.unwrap();
            }
            let rebuilt = ClusterProjection::new().rebuild(&store).await.unwrap();
            (managed.state().await, rebuilt, applied)
        });

        prop_assert_eq!(applied, events.len());
        prop_assert_eq!(caught_up, rebuilt);
    }

    /// Property: every recorded phase transition is one the pod lifecycle allows.
    #[test]
    fn prop_history_only_holds_valid_transitions(steps in prop::collection::vec(step_strategy(), 0..60)) {
        let events = events_for(&steps);
        let projection = ClusterProjection::new();
        let mut state = projection.initial_state();
        for event in &events {
            projection.apply(&mut state, event);
        }

        for record in state.objects.values() {
            for transition in &record.history {
                prop_assert!(transition.from.can_transition_to(transition.to));
            }
        }
    }
}
