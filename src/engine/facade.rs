//! `Engine`: the embeddable facade a host application owns. Registers
//! flows, hands back typed handles for `startInstance`/`sendEvent`, and
//! exposes the untyped operator operations (`retry`, `cancel`,
//! `changeStage`, `getStatus`) that address any registered flow by its
//! string id alone.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::instrument;
use uuid::Uuid;

use crate::error::EngineError;
use crate::flow::{Flow, FlowSpec};
use crate::history::HistoryRecorder;
use crate::instance::StageStatus;
use crate::persistence::{EventStore, HistoryStore, StatePersister, TickScheduler};

use super::registry::{ErasedFlowEntry, FlowEntry, FlowHandle, FlowRegistry};

/// Stores shared across every flow registered with an [`Engine`]. A flow's
/// own state persistence is supplied separately, per flow, at
/// [`Engine::register_flow`].
pub struct EngineConfig {
    pub event_store: Arc<dyn EventStore>,
    pub tick_scheduler: Arc<dyn TickScheduler>,
    pub history_store: Option<Arc<dyn HistoryStore>>,
}

/// The embeddable workflow engine. Cheap to clone (an `Arc` around its
/// registry); a host typically constructs one and shares it between its
/// API surface and its [`crate::worker::WorkerPool`].
#[derive(Clone)]
pub struct Engine {
    registry: Arc<RwLock<FlowRegistry>>,
    event_store: Arc<dyn EventStore>,
    tick_scheduler: Arc<dyn TickScheduler>,
    history_store: Option<Arc<dyn HistoryStore>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            registry: Arc::new(RwLock::new(FlowRegistry::new())),
            event_store: config.event_store,
            tick_scheduler: config.tick_scheduler,
            history_store: config.history_store,
        }
    }

    /// Register a validated [`Flow`] under `flow_id`, paired with the
    /// persister that owns its `InstanceData` rows. Returns a typed handle
    /// for `startInstance`/`sendEvent`; other operations go through the
    /// engine itself by `flow_id`.
    pub fn register_flow<F, P>(
        &self,
        flow_id: impl Into<String>,
        flow: Flow<F>,
        persister: Arc<P>,
    ) -> FlowHandle<F, P>
    where
        F: FlowSpec,
        P: StatePersister<F>,
    {
        let flow_id = flow_id.into();
        let entry = Arc::new(FlowEntry {
            flow_id: flow_id.clone(),
            flow: Arc::new(flow),
            persister,
            event_store: Arc::clone(&self.event_store),
            tick_scheduler: Arc::clone(&self.tick_scheduler),
            history: HistoryRecorder::new(self.history_store.clone()),
        });
        self.registry
            .write()
            .insert(flow_id, Arc::clone(&entry) as Arc<dyn ErasedFlowEntry>);
        FlowHandle {
            entry,
            _marker: std::marker::PhantomData,
        }
    }

    fn lookup(&self, flow_id: &str) -> Result<Arc<dyn ErasedFlowEntry>, EngineError> {
        self.registry
            .read()
            .get(flow_id)
            .cloned()
            .ok_or_else(|| EngineError::NotRegistered(flow_id.to_string()))
    }

    /// Invoked by a [`crate::worker::WorkerPool`] for a claimed tick.
    #[instrument(skip(self))]
    pub async fn dispatch_tick(&self, flow_id: &str, instance_id: Uuid) -> Result<(), EngineError> {
        self.lookup(flow_id)?.dispatch_tick(instance_id).await
    }

    /// Append `(event_type, event_value)` for `instance_id` and enqueue a
    /// tick. Prefer [`FlowHandle::send_event`] when the flow's concrete
    /// `Event` type is in scope; this exists for operator surfaces that
    /// only have a `flow_id` and untyped event data.
    pub async fn send_event(
        &self,
        flow_id: &str,
        instance_id: Uuid,
        event_type: &str,
        event_value: &str,
    ) -> Result<(), EngineError> {
        self.lookup(flow_id)?
            .send_event(instance_id, event_type, event_value)
            .await
    }

    /// Re-kick an existing instance, e.g. after a host restart found it
    /// stuck without a pending tick. A no-op if it is already at rest.
    pub async fn start_instance(&self, flow_id: &str, instance_id: Uuid) -> Result<(), EngineError> {
        self.lookup(flow_id)?.start_instance_by_id(instance_id).await
    }

    /// Re-arm an instance in the `Error` status for another attempt.
    pub async fn retry(&self, flow_id: &str, instance_id: Uuid) -> Result<(), EngineError> {
        self.lookup(flow_id)?.retry(instance_id).await
    }

    /// Move an instance to `Cancelled`. A no-op if it is already at rest.
    pub async fn cancel(&self, flow_id: &str, instance_id: Uuid) -> Result<(), EngineError> {
        self.lookup(flow_id)?.cancel(instance_id).await
    }

    /// Operator escape hatch: force an instance to `target` (named by its
    /// `Display` rendering) and re-arm it to `Pending`.
    pub async fn change_stage(&self, flow_id: &str, instance_id: Uuid, target: &str) -> Result<(), EngineError> {
        self.lookup(flow_id)?.change_stage(instance_id, target).await
    }

    /// Current `(stage, status)` rendering for an instance.
    pub async fn get_status(&self, flow_id: &str, instance_id: Uuid) -> Result<(String, StageStatus), EngineError> {
        self.lookup(flow_id)?.get_status(instance_id).await
    }
}
