//! Integration tests for the concrete scenarios a flow engine must get
//! right: linear advancement, conditional initial stage resolution, event
//! waits, duplicate-tick tolerance, action failure/retry, and cancellation
//! mid-wait.

use std::sync::Arc;

use flowkeep::prelude::*;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
enum Stage {
    A,
    B,
    C,
    D,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
enum Event {
    E1,
    E2,
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

struct TestFlow;
impl FlowSpec for TestFlow {
    type Stage = Stage;
    type Event = Event;
    type State = i64;
}

fn new_engine(backend: &InMemoryBackend) -> Engine {
    Engine::new(EngineConfig {
        event_store: Arc::clone(&backend.events) as Arc<dyn EventStore>,
        tick_scheduler: Arc::clone(&backend.ticks) as Arc<dyn TickScheduler>,
        history_store: Some(Arc::clone(&backend.history) as Arc<dyn HistoryStore>),
    })
}

/// Repeatedly claims and dispatches every ready tick until the queue is
/// dry. Stands in for a running `WorkerPool` in tests.
async fn drain_ticks(engine: &Engine, ticks: &InMemoryTickScheduler) {
    loop {
        let batch = ticks.claim_batch("test-worker", 100).await.unwrap();
        if batch.is_empty() {
            break;
        }
        for tick in batch {
            let _ = engine.dispatch_tick(&tick.flow_id, tick.flow_instance_id).await;
        }
    }
}

#[tokio::test]
async fn linear_flow_completes_with_expected_state_and_history() {
    let flow = FlowBuilder::<TestFlow>::new()
        .initial_stage(Stage::A)
        .stage(StageBuilder::new(Stage::A).action(|s| Ok(Some(s + 1))).next(Stage::B))
        .stage(StageBuilder::new(Stage::B).action(|s| Ok(Some(s + 10))).next(Stage::C))
        .stage(StageBuilder::new(Stage::C))
        .build()
        .unwrap();

    let backend = InMemoryBackend::new();
    let engine = new_engine(&backend);
    let persister = Arc::new(InMemoryStatePersister::<TestFlow>::new());
    let handle = engine.register_flow("linear", flow, Arc::clone(&persister));

    let instance_id = handle.start_instance(0).await.unwrap();
    drain_ticks(&engine, &backend.ticks).await;

    let row = persister.load(instance_id).await.unwrap();
    assert_eq!(row.state, 11);
    assert_eq!(row.stage, Stage::C);
    assert_eq!(row.status, StageStatus::Completed);

    let kinds: Vec<HistoryKind> = backend.history.entries().into_iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            HistoryKind::Started,
            HistoryKind::StatusChanged,
            HistoryKind::StageChanged,
            HistoryKind::StageChanged,
            HistoryKind::StatusChanged,
        ]
    );
}

#[tokio::test]
async fn conditional_initial_resolves_by_predicate() {
    let flow = FlowBuilder::<TestFlow>::new()
        .initial_condition(ConditionHandler::new(
            "x positive?",
            |s: &i64| *s > 0,
            ConditionBranch::Stage(Stage::A),
            ConditionBranch::Stage(Stage::B),
        ))
        .stage(StageBuilder::new(Stage::A))
        .stage(StageBuilder::new(Stage::B))
        .build()
        .unwrap();

    let backend = InMemoryBackend::new();
    let engine = new_engine(&backend);
    let persister = Arc::new(InMemoryStatePersister::<TestFlow>::new());
    let handle = engine.register_flow("conditional", flow, Arc::clone(&persister));

    let instance_id = handle.start_instance(-1).await.unwrap();
    drain_ticks(&engine, &backend.ticks).await;

    let row = persister.load(instance_id).await.unwrap();
    assert_eq!(row.stage, Stage::B);
    assert_eq!(row.status, StageStatus::Completed);
}

#[tokio::test]
async fn event_wait_delivers_matching_event_only() {
    let flow = FlowBuilder::<TestFlow>::new()
        .initial_stage(Stage::A)
        .stage(StageBuilder::new(Stage::A).next(Stage::B))
        .stage(
            StageBuilder::new(Stage::B)
                .on_event(Event::E1, EventHandler::Stage(Stage::C))
                .on_event(Event::E2, EventHandler::Stage(Stage::D)),
        )
        .stage(StageBuilder::new(Stage::C))
        .stage(StageBuilder::new(Stage::D))
        .build()
        .unwrap();

    let backend = InMemoryBackend::new();
    let engine = new_engine(&backend);
    let persister = Arc::new(InMemoryStatePersister::<TestFlow>::new());
    let handle = engine.register_flow("event-wait", flow, Arc::clone(&persister));

    let instance_id = handle.start_instance(0).await.unwrap();
    drain_ticks(&engine, &backend.ticks).await;

    let row = persister.load(instance_id).await.unwrap();
    assert_eq!(row.stage, Stage::B);
    assert_eq!(row.status, StageStatus::Pending);

    handle.send_event(instance_id, Event::E2).await.unwrap();
    drain_ticks(&engine, &backend.ticks).await;

    let row = persister.load(instance_id).await.unwrap();
    assert_eq!(row.stage, Stage::D);
    assert_eq!(row.status, StageStatus::Completed);

    let e1_kind = (std::any::type_name::<Event>().to_string(), "E1".to_string());
    assert!(backend
        .events
        .peek("event-wait", instance_id, &[e1_kind])
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn duplicate_ticks_cause_no_extra_status_transitions() {
    let flow = FlowBuilder::<TestFlow>::new()
        .initial_stage(Stage::A)
        .stage(StageBuilder::new(Stage::A).action(|s| Ok(Some(*s))).next(Stage::B))
        .stage(StageBuilder::new(Stage::B))
        .build()
        .unwrap();

    let backend = InMemoryBackend::new();
    let engine = new_engine(&backend);
    let persister = Arc::new(InMemoryStatePersister::<TestFlow>::new());
    let handle = engine.register_flow("dup-tick", flow, Arc::clone(&persister));

    let instance_id = handle.start_instance(0).await.unwrap();
    for _ in 0..5 {
        backend.ticks.schedule_tick("dup-tick", instance_id).await.unwrap();
    }
    drain_ticks(&engine, &backend.ticks).await;

    let row = persister.load(instance_id).await.unwrap();
    assert_eq!(row.status, StageStatus::Completed);

    let transitions = backend
        .history
        .entries()
        .into_iter()
        .filter(|e| e.kind == HistoryKind::StatusChanged && e.from_status == Some(StageStatus::Pending))
        .count();
    assert_eq!(transitions, 1);
}

#[tokio::test]
async fn action_failure_records_error_and_retry_recovers() {
    let attempt = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let attempt_for_action = Arc::clone(&attempt);

    let flow = FlowBuilder::<TestFlow>::new()
        .initial_stage(Stage::A)
        .stage(
            StageBuilder::new(Stage::A)
                .action(move |s| {
                    if attempt_for_action.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                        anyhow::bail!("transient failure")
                    } else {
                        Ok(Some(*s))
                    }
                })
                .next(Stage::B),
        )
        .stage(StageBuilder::new(Stage::B))
        .build()
        .unwrap();

    let backend = InMemoryBackend::new();
    let engine = new_engine(&backend);
    let persister = Arc::new(InMemoryStatePersister::<TestFlow>::new());
    let handle = engine.register_flow("retry", flow, Arc::clone(&persister));

    let instance_id = handle.start_instance(0).await.unwrap();
    drain_ticks(&engine, &backend.ticks).await;

    let row = persister.load(instance_id).await.unwrap();
    assert_eq!(row.status, StageStatus::Error);
    assert_eq!(row.stage, Stage::A);
    assert!(backend
        .history
        .entries()
        .into_iter()
        .any(|e| e.kind == HistoryKind::Error && e.error_message.as_deref() == Some("transient failure")));

    engine.retry("retry", instance_id).await.unwrap();
    drain_ticks(&engine, &backend.ticks).await;

    let row = persister.load(instance_id).await.unwrap();
    assert_eq!(row.status, StageStatus::Completed);
    assert_eq!(row.stage, Stage::B);
}

#[tokio::test]
async fn cancel_mid_wait_orphans_a_later_event() {
    let flow = FlowBuilder::<TestFlow>::new()
        .initial_stage(Stage::A)
        .stage(StageBuilder::new(Stage::A).next(Stage::B))
        .stage(StageBuilder::new(Stage::B).on_event(Event::E1, EventHandler::Stage(Stage::C)))
        .stage(StageBuilder::new(Stage::C))
        .build()
        .unwrap();

    let backend = InMemoryBackend::new();
    let engine = new_engine(&backend);
    let persister = Arc::new(InMemoryStatePersister::<TestFlow>::new());
    let handle = engine.register_flow("cancel", flow, Arc::clone(&persister));

    let instance_id = handle.start_instance(0).await.unwrap();
    drain_ticks(&engine, &backend.ticks).await;

    let row = persister.load(instance_id).await.unwrap();
    assert_eq!(row.stage, Stage::B);
    assert_eq!(row.status, StageStatus::Pending);

    engine.cancel("cancel", instance_id).await.unwrap();
    let row = persister.load(instance_id).await.unwrap();
    assert_eq!(row.status, StageStatus::Cancelled);

    handle.send_event(instance_id, Event::E1).await.unwrap();
    drain_ticks(&engine, &backend.ticks).await;

    // The event was appended but no handler ran: stage/status are unchanged
    // from the moment of cancellation, and `getStatus` confirms it from the
    // facade's point of view too.
    let row = persister.load(instance_id).await.unwrap();
    assert_eq!(row.status, StageStatus::Cancelled);
    assert_eq!(row.stage, Stage::B);
    let (stage, status) = engine.get_status("cancel", instance_id).await.unwrap();
    assert_eq!(stage, "B");
    assert_eq!(status, StageStatus::Cancelled);
}
