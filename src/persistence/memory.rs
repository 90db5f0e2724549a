//! In-memory reference implementations of the four persistence contracts.
//!
//! Suitable for embedding a host application's tests, and as the starting
//! point for a real backing store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::flow::FlowSpec;
use crate::history::HistoryEntry;
use crate::instance::{InstanceData, StageStatus};

use super::traits::{EventStore, HistoryStore, PendingTick, StatePersister, StoreError, StoredEvent, TickScheduler};

/// `StatePersister` backed by a `parking_lot::RwLock<HashMap<..>>`.
///
/// Requires `F::State: Clone` so `save` can hand back the row it just
/// stored without taking a second, aliased, owning reference into the map.
pub struct InMemoryStatePersister<F: FlowSpec>
where
    F::State: Clone,
{
    rows: RwLock<HashMap<Uuid, (F::State, F::Stage, StageStatus)>>,
}

impl<F: FlowSpec> Default for InMemoryStatePersister<F>
where
    F::State: Clone,
{
    fn default() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
        }
    }
}

impl<F: FlowSpec> InMemoryStatePersister<F>
where
    F::State: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl<F: FlowSpec> StatePersister<F> for InMemoryStatePersister<F>
where
    F::State: Clone,
{
    async fn save(&self, data: InstanceData<F>) -> Result<InstanceData<F>, StoreError> {
        let mut rows = self.rows.write();
        rows.insert(
            data.flow_instance_id,
            (data.state.clone(), data.stage.clone(), data.status),
        );
        Ok(data)
    }

    async fn load(&self, flow_instance_id: Uuid) -> Result<InstanceData<F>, StoreError> {
        let rows = self.rows.read();
        let (state, stage, status) = rows
            .get(&flow_instance_id)
            .cloned()
            .ok_or(StoreError::NotFound(flow_instance_id))?;
        Ok(InstanceData::new(flow_instance_id, state, stage, status))
    }

    async fn try_transition_stage_status(
        &self,
        flow_instance_id: Uuid,
        expected_stage: &F::Stage,
        expected_status: StageStatus,
        new_status: StageStatus,
    ) -> Result<bool, StoreError> {
        let mut rows = self.rows.write();
        let Some(row) = rows.get_mut(&flow_instance_id) else {
            return Err(StoreError::NotFound(flow_instance_id));
        };
        if row.1 == *expected_stage && row.2 == expected_status {
            row.2 = new_status;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// `EventStore` backed by an append-only `Vec` behind a lock. Fine for
/// embedded/test use; a real implementation would index by
/// `(flow_id, flow_instance_id)`.
#[derive(Default)]
pub struct InMemoryEventStore {
    events: RwLock<Vec<StoredEvent>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(
        &self,
        flow_id: &str,
        flow_instance_id: Uuid,
        event_type: &str,
        event_value: &str,
    ) -> Result<(), StoreError> {
        self.events.write().push(StoredEvent {
            id: Uuid::now_v7(),
            flow_id: flow_id.to_string(),
            flow_instance_id,
            event_type: event_type.to_string(),
            event_value: event_value.to_string(),
        });
        Ok(())
    }

    async fn peek(
        &self,
        flow_id: &str,
        flow_instance_id: Uuid,
        candidates: &[(String, String)],
    ) -> Result<Option<StoredEvent>, StoreError> {
        let events = self.events.read();
        let found = events.iter().find(|e| {
            e.flow_id == flow_id
                && e.flow_instance_id == flow_instance_id
                && candidates
                    .iter()
                    .any(|(t, v)| *t == e.event_type && *v == e.event_value)
        });
        Ok(found.cloned())
    }

    async fn delete(&self, event_id: Uuid) -> Result<bool, StoreError> {
        let mut events = self.events.write();
        let before = events.len();
        events.retain(|e| e.id != event_id);
        Ok(events.len() != before)
    }
}

/// `TickScheduler` backed by a FIFO `Vec`, consumed in insertion order.
#[derive(Default)]
pub struct InMemoryTickScheduler {
    ticks: RwLock<Vec<PendingTick>>,
    sequence: AtomicI64,
}

impl InMemoryTickScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ticks currently enqueued; mostly useful in tests.
    pub fn len(&self) -> usize {
        self.ticks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TickScheduler for InMemoryTickScheduler {
    async fn schedule_tick(&self, flow_id: &str, flow_instance_id: Uuid) -> Result<(), StoreError> {
        self.sequence.fetch_add(1, Ordering::SeqCst);
        self.ticks.write().push(PendingTick {
            id: Uuid::now_v7(),
            flow_id: flow_id.to_string(),
            flow_instance_id,
        });
        Ok(())
    }

    async fn claim_batch(&self, _worker_id: &str, max: usize) -> Result<Vec<PendingTick>, StoreError> {
        let mut ticks = self.ticks.write();
        let take = max.min(ticks.len());
        Ok(ticks.drain(0..take).collect())
    }
}

/// `HistoryStore` backed by an append-only `Vec`. Useful for asserting on
/// the recorded sequence in tests.
#[derive(Default)]
pub struct InMemoryHistoryStore {
    entries: RwLock<Vec<HistoryEntry>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.read().clone()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(&self, entry: HistoryEntry) -> Result<(), StoreError> {
        self.entries.write().push(entry);
        Ok(())
    }
}

/// Convenience bundle of the three shared (non-typed) in-memory stores, so
/// tests can construct an [`crate::engine::Engine`] with one call.
pub struct InMemoryBackend {
    pub events: Arc<InMemoryEventStore>,
    pub ticks: Arc<InMemoryTickScheduler>,
    pub history: Arc<InMemoryHistoryStore>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self {
            events: Arc::new(InMemoryEventStore::new()),
            ticks: Arc::new(InMemoryTickScheduler::new()),
            history: Arc::new(InMemoryHistoryStore::new()),
        }
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
    struct S;
    impl std::fmt::Display for S {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "S")
        }
    }
    struct TestFlow;
    impl FlowSpec for TestFlow {
        type Stage = S;
        type Event = S;
        type State = i64;
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let persister = InMemoryStatePersister::<TestFlow>::new();
        let id = Uuid::now_v7();
        persister
            .save(InstanceData::new(id, 7, S, StageStatus::Pending))
            .await
            .unwrap();
        let loaded = persister.load(id).await.unwrap();
        assert_eq!(loaded.state, 7);
        assert_eq!(loaded.status, StageStatus::Pending);
    }

    #[tokio::test]
    async fn cas_fails_on_mismatched_expectation() {
        let persister = InMemoryStatePersister::<TestFlow>::new();
        let id = Uuid::now_v7();
        persister
            .save(InstanceData::new(id, 0, S, StageStatus::Pending))
            .await
            .unwrap();

        let applied = persister
            .try_transition_stage_status(id, &S, StageStatus::Running, StageStatus::Completed)
            .await
            .unwrap();
        assert!(!applied);

        let applied = persister
            .try_transition_stage_status(id, &S, StageStatus::Pending, StageStatus::Running)
            .await
            .unwrap();
        assert!(applied);
    }

    #[tokio::test]
    async fn tick_scheduler_is_fifo() {
        let scheduler = InMemoryTickScheduler::new();
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        scheduler.schedule_tick("flow", a).await.unwrap();
        scheduler.schedule_tick("flow", b).await.unwrap();
        let batch = scheduler.claim_batch("worker-1", 10).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].flow_instance_id, a);
        assert_eq!(batch[1].flow_instance_id, b);
        assert!(scheduler.is_empty());
    }

    #[tokio::test]
    async fn event_peek_matches_candidates_only() {
        let store = InMemoryEventStore::new();
        let id = Uuid::now_v7();
        store.append("flow", id, "Event", "E1").await.unwrap();
        let none = store
            .peek("flow", id, &[("Event".to_string(), "E2".to_string())])
            .await
            .unwrap();
        assert!(none.is_none());
        let some = store
            .peek("flow", id, &[("Event".to_string(), "E1".to_string())])
            .await
            .unwrap();
        assert!(some.is_some());
    }
}
