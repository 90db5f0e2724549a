//! The four pluggable persistence contracts the runtime requires.

use async_trait::async_trait;
use uuid::Uuid;

use crate::flow::FlowSpec;
use crate::history::HistoryEntry;
use crate::instance::{InstanceData, StageStatus};

/// Failures raised by a persistence contract implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("instance not found: {0}")]
    NotFound(Uuid),

    #[error("backing store error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// A pending event row: a caller sent an event before, at, or after the
/// moment a waiting stage is reached.
#[derive(Debug, Clone)]
pub struct StoredEvent {
    pub id: Uuid,
    pub flow_id: String,
    pub flow_instance_id: Uuid,
    pub event_type: String,
    pub event_value: String,
}

/// A durable work item: "this instance may be able to advance."
#[derive(Debug, Clone)]
pub struct PendingTick {
    pub id: Uuid,
    pub flow_id: String,
    pub flow_instance_id: Uuid,
}

/// Per-flow-type state persistence. The compare-and-set primitive
/// (`try_transition_stage_status`) is the runtime's sole concurrency gate.
#[async_trait]
pub trait StatePersister<F: FlowSpec>: Send + Sync + 'static {
    /// Create or update the row. Implementations must preserve
    /// application-owned columns a concurrent external writer may have
    /// touched (merge strategy, retry on optimistic conflict).
    async fn save(&self, data: InstanceData<F>) -> Result<InstanceData<F>, StoreError>;

    /// Load by id. Fails if the row is absent.
    async fn load(&self, flow_instance_id: Uuid) -> Result<InstanceData<F>, StoreError>;

    /// Compare-and-set on `(stage, stageStatus)`. Returns whether the
    /// update was applied.
    async fn try_transition_stage_status(
        &self,
        flow_instance_id: Uuid,
        expected_stage: &F::Stage,
        expected_status: StageStatus,
        new_status: StageStatus,
    ) -> Result<bool, StoreError>;
}

/// Pending-event storage, shared across all registered flows (events are
/// keyed by `flowId` + instance, not by the flow's `Event` Rust type).
#[async_trait]
pub trait EventStore: Send + Sync + 'static {
    async fn append(
        &self,
        flow_id: &str,
        flow_instance_id: Uuid,
        event_type: &str,
        event_value: &str,
    ) -> Result<(), StoreError>;

    /// Oldest pending event matching any of `candidates` (`(eventType,
    /// eventValue)` pairs), if any.
    async fn peek(
        &self,
        flow_id: &str,
        flow_instance_id: Uuid,
        candidates: &[(String, String)],
    ) -> Result<Option<StoredEvent>, StoreError>;

    async fn delete(&self, event_id: Uuid) -> Result<bool, StoreError>;
}

/// The durable FIFO tick queue. `claim_batch` must support concurrent
/// pollers racing for the same rows (losing the race is not an error).
#[async_trait]
pub trait TickScheduler: Send + Sync + 'static {
    async fn schedule_tick(&self, flow_id: &str, flow_instance_id: Uuid) -> Result<(), StoreError>;

    async fn claim_batch(&self, worker_id: &str, max: usize) -> Result<Vec<PendingTick>, StoreError>;
}

/// Optional observability sink. The runtime only ever calls this through
/// [`crate::history::HistoryRecorder`], which swallows failures.
#[async_trait]
pub trait HistoryStore: Send + Sync + 'static {
    async fn append(&self, entry: HistoryEntry) -> Result<(), StoreError>;
}
