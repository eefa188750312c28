use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    lifecycle_channel, ActionKind, CooldownGate, ExecutionError, GlobalLimits, LifecycleEvent,
    LifecycleReceiver, MemoryStateSink, ScalingDecision, Urgency,
};
use execution_engine::{
    ActiveScalings, ExecutionCoordinator, HookPhase, HookSink, InMemoryBackend, NullHookSink,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

struct FailingHookSink;

#[async_trait]
impl HookSink for FailingHookSink {
    async fn invoke(&self, _: HookPhase, _: &str, _: DateTime<Utc>) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("webhook endpoint returned 500"))
    }
}

fn limits() -> GlobalLimits {
    GlobalLimits {
        min_instances: 1,
        max_instances: 20,
        scale_up_cooldown_s: 300,
        scale_down_cooldown_s: 300,
    }
}

fn coordinator(
    backend: InMemoryBackend,
    hooks: Arc<dyn HookSink>,
    gate: CooldownGate,
    redundancy_floor: u32,
) -> (ExecutionCoordinator, LifecycleReceiver) {
    let (events_tx, events_rx) = lifecycle_channel();
    let coordinator = ExecutionCoordinator::new(
        Arc::new(backend),
        hooks,
        gate,
        limits(),
        redundancy_floor,
        ActiveScalings::new(),
        events_tx,
        Arc::new(MemoryStateSink::new()),
    );
    (coordinator, events_rx)
}

fn decision(service_id: &str, current: u32, recommended: u32) -> ScalingDecision {
    ScalingDecision {
        timestamp: Utc::now(),
        service_id: service_id.to_string(),
        current_instances: current,
        recommended_instances: recommended,
        action: ActionKind::from_counts(current, recommended),
        urgency: Urgency::Medium,
        confidence: 0.8,
        reasoning: vec!["test decision".to_string()],
        triggered_rule_ids: vec!["r1".to_string()],
        metrics_used: HashMap::new(),
    }
}

#[tokio::test]
async fn successful_scale_emits_lifecycle_and_stamps_cooldown() {
    let backend = InMemoryBackend::new();
    backend.register_service("svc-a", 4).await;
    let gate = CooldownGate::new(limits());
    let (coordinator, mut events) =
        coordinator(backend, Arc::new(NullHookSink), gate.clone(), 1);

    let event = coordinator
        .execute(&decision("svc-a", 4, 6), None)
        .await
        .unwrap();

    assert!(event.success);
    assert_eq!(event.previous_instances, 4);
    assert_eq!(event.new_instances, 6);
    assert_eq!(event.action, ActionKind::Up);
    assert!(event.error.is_none());

    // started, then exactly one completion
    assert!(matches!(
        events.recv().await.unwrap(),
        LifecycleEvent::ScalingStarted { .. }
    ));
    assert!(matches!(
        events.recv().await.unwrap(),
        LifecycleEvent::ScalingCompleted(_)
    ));

    let state = gate.state("svc-a").await;
    assert!(state.last_scale_up.is_some());
    assert!(state.last_scale_down.is_none());
}

#[tokio::test]
async fn backend_failure_becomes_a_failed_event_without_cooldown() {
    let backend = InMemoryBackend::new();
    backend.register_service("svc-a", 4).await;
    backend
        .fail_with(
            "svc-a",
            common::BackendError::Rejected("quota exceeded".to_string()),
        )
        .await;
    let gate = CooldownGate::new(limits());
    let (coordinator, mut events) =
        coordinator(backend, Arc::new(NullHookSink), gate.clone(), 1);

    let event = coordinator
        .execute(&decision("svc-a", 4, 6), None)
        .await
        .unwrap();

    assert!(!event.success);
    assert!(event.error.as_deref().unwrap().contains("quota"));
    assert_eq!(event.previous_instances, 4);
    assert_eq!(event.new_instances, 4);

    assert!(matches!(
        events.recv().await.unwrap(),
        LifecycleEvent::ScalingStarted { .. }
    ));
    assert!(matches!(
        events.recv().await.unwrap(),
        LifecycleEvent::ScalingFailed(_)
    ));

    // a failed attempt earns no cooldown
    let state = gate.state("svc-a").await;
    assert!(state.last_scale_up.is_none());
}

#[tokio::test]
async fn concurrent_scaling_is_refused_not_queued() {
    let backend = InMemoryBackend::new().with_scale_delay(Duration::from_millis(300));
    backend.register_service("svc-a", 4).await;
    let gate = CooldownGate::new(limits());
    let (coordinator, _events) = coordinator(backend, Arc::new(NullHookSink), gate, 1);
    let coordinator = Arc::new(coordinator);

    let first = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.execute(&decision("svc-a", 4, 6), None).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = coordinator.execute(&decision("svc-a", 4, 8), None).await;
    assert!(matches!(
        second,
        Err(ExecutionError::ScalingInProgress(ref id)) if id == "svc-a"
    ));

    let first = first.await.unwrap().unwrap();
    assert!(first.success);
    assert_eq!(first.new_instances, 6);
}

#[tokio::test]
async fn rollback_restores_the_pre_scale_count() {
    let backend = InMemoryBackend::new();
    backend.register_service("svc-b", 3).await;
    let gate = CooldownGate::new(limits());
    let (coordinator, _events) = coordinator(backend, Arc::new(NullHookSink), gate, 1);

    let scaled = coordinator
        .execute(&decision("svc-b", 3, 7), None)
        .await
        .unwrap();
    assert!(scaled.success);

    let rolled = coordinator
        .rollback_last("svc-b")
        .await
        .unwrap()
        .expect("a successful event to roll back");
    assert!(rolled.success);
    assert_eq!(rolled.previous_instances, 7);
    assert_eq!(rolled.new_instances, 3);
    assert_eq!(rolled.action, ActionKind::Down);
    assert_eq!(coordinator.current_instances("svc-b").await.unwrap(), 3);
}

#[tokio::test]
async fn rollback_without_history_is_absent_not_an_error() {
    let backend = InMemoryBackend::new();
    backend.register_service("svc-b", 3).await;
    let gate = CooldownGate::new(limits());
    let (coordinator, _events) = coordinator(backend, Arc::new(NullHookSink), gate, 1);

    assert!(coordinator.rollback_last("svc-b").await.unwrap().is_none());
}

#[tokio::test]
async fn emergency_to_current_count_is_a_maintain_no_op() {
    let backend = InMemoryBackend::new();
    backend.register_service("svc-a", 5).await;
    let gate = CooldownGate::new(limits());
    let (coordinator, _events) =
        coordinator(backend, Arc::new(NullHookSink), gate.clone(), 2);

    let event = coordinator.emergency_scale_down("svc-a", 5).await.unwrap();
    assert!(event.success);
    assert_eq!(event.action, ActionKind::Maintain);
    assert_eq!(event.previous_instances, 5);
    assert_eq!(event.new_instances, 5);

    // a maintain no-op never stamps a cooldown
    let state = gate.state("svc-a").await;
    assert!(state.last_scale_down.is_none());
}

#[tokio::test]
async fn emergency_honors_floors_and_bypasses_cooldown() {
    let backend = InMemoryBackend::new();
    backend.register_service("svc-a", 10).await;
    let gate = CooldownGate::new(limits());
    let (coordinator, _events) =
        coordinator(backend, Arc::new(NullHookSink), gate.clone(), 3);

    // an open cooldown window does not stop an emergency
    gate.stamp("svc-a", ActionKind::Up, Utc::now()).await;

    let event = coordinator.emergency_scale_down("svc-a", 0).await.unwrap();
    assert!(event.success);
    // the redundancy floor wins over the requested zero
    assert_eq!(event.new_instances, 3);
    assert_eq!(event.action, ActionKind::Down);
    assert_eq!(coordinator.current_instances("svc-a").await.unwrap(), 3);
}

#[tokio::test]
async fn emergency_waits_out_an_in_flight_execution() {
    let backend = InMemoryBackend::new().with_scale_delay(Duration::from_millis(200));
    backend.register_service("svc-a", 10).await;
    let gate = CooldownGate::new(limits());
    let (coordinator, _events) = coordinator(backend, Arc::new(NullHookSink), gate, 2);
    let coordinator = Arc::new(coordinator);

    let in_flight = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.execute(&decision("svc-a", 10, 12), None).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // the emergency does not preempt; it runs after the in-flight scale
    let event = coordinator.emergency_scale_down("svc-a", 4).await.unwrap();
    assert!(event.success);
    assert_eq!(event.previous_instances, 12);
    assert_eq!(event.new_instances, 4);

    assert!(in_flight.await.unwrap().unwrap().success);
}

#[tokio::test]
async fn hook_failures_never_abort_a_scaling() {
    let backend = InMemoryBackend::new();
    backend.register_service("svc-a", 4).await;
    let gate = CooldownGate::new(limits());
    let (coordinator, mut events) =
        coordinator(backend, Arc::new(FailingHookSink), gate, 1);

    let event = coordinator
        .execute(&decision("svc-a", 4, 6), None)
        .await
        .unwrap();
    assert!(event.success);
    assert_eq!(event.new_instances, 6);

    let mut saw_hook_failure = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, LifecycleEvent::HookFailed { .. }) {
            saw_hook_failure = true;
        }
    }
    assert!(saw_hook_failure);
}

#[tokio::test]
async fn event_ring_is_newest_first_and_capped_by_limit() {
    let backend = InMemoryBackend::new();
    backend.register_service("svc-a", 1).await;
    let gate = CooldownGate::new(limits());
    let (coordinator, _events) = coordinator(backend, Arc::new(NullHookSink), gate, 1);

    for target in [2, 3, 4] {
        coordinator
            .execute(&decision("svc-a", target - 1, target), None)
            .await
            .unwrap();
    }

    let events = coordinator.events("svc-a", 2).await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].new_instances, 4);
    assert_eq!(events[1].new_instances, 3);
}
