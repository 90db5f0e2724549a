//! Type-erased flow registration.
//!
//! A flow's domain state only needs to be concretely typed once, at
//! `startInstance`; every other facade operation addresses an instance by
//! `flowId` + `Uuid` alone. So unlike a closure-based factory table, a
//! single erased dispatch entry per flow is enough: no downcasting, no
//! `Any`.

use std::any::type_name;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::{DispatchError, EngineError};
use crate::flow::{Flow, FlowSpec};
use crate::history::HistoryRecorder;
use crate::instance::{InstanceData, StageStatus};
use crate::persistence::{EventStore, StatePersister, TickScheduler};

use super::executor;

/// `(eventType, eventValue)` in the stable string-encoded form the
/// persisted event row uses. `eventType` is the event's Rust type name;
/// `eventValue` is its `Display` rendering.
pub(crate) fn encode_event<E: std::fmt::Display>(event: &E) -> (String, String) {
    (type_name::<E>().to_string(), event.to_string())
}

/// Type-erased interface the dispatcher and the untyped facade operations
/// (`retry`, `cancel`, `changeStage`, `getStatus`, `sendEvent`) use, so they
/// never need to know a flow's concrete `FlowSpec`.
#[async_trait]
pub(crate) trait ErasedFlowEntry: Send + Sync {
    fn flow_id(&self) -> &str;

    async fn dispatch_tick(&self, instance_id: Uuid) -> Result<(), EngineError>;

    async fn start_instance_by_id(&self, instance_id: Uuid) -> Result<(), EngineError>;

    async fn send_event(
        &self,
        instance_id: Uuid,
        event_type: &str,
        event_value: &str,
    ) -> Result<(), EngineError>;

    async fn retry(&self, instance_id: Uuid) -> Result<(), EngineError>;

    async fn cancel(&self, instance_id: Uuid) -> Result<(), EngineError>;

    async fn change_stage(&self, instance_id: Uuid, target: &str) -> Result<(), EngineError>;

    async fn get_status(&self, instance_id: Uuid) -> Result<(String, StageStatus), EngineError>;
}

/// Owns one flow's graph, persister, and the shared stores it was
/// registered with.
pub struct FlowEntry<F: FlowSpec, P: StatePersister<F>> {
    pub(crate) flow_id: String,
    pub(crate) flow: Arc<Flow<F>>,
    pub(crate) persister: Arc<P>,
    pub(crate) event_store: Arc<dyn EventStore>,
    pub(crate) tick_scheduler: Arc<dyn TickScheduler>,
    pub(crate) history: HistoryRecorder,
}

impl<F: FlowSpec, P: StatePersister<F>> FlowEntry<F, P> {
    fn candidate_kinds(&self, stage: &F::Stage) -> Vec<(String, String)> {
        self.flow
            .stage(stage)
            .and_then(|def| def.event_handlers())
            .map(|handlers| handlers.keys().map(encode_event).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl<F: FlowSpec, P: StatePersister<F>> ErasedFlowEntry for FlowEntry<F, P> {
    fn flow_id(&self) -> &str {
        &self.flow_id
    }

    #[instrument(skip(self), fields(flow_id = %self.flow_id, instance_id = %instance_id))]
    async fn dispatch_tick(&self, instance_id: Uuid) -> Result<(), EngineError> {
        match executor::dispatch(self, instance_id).await {
            Ok(()) => Ok(()),
            Err(DispatchError::CasLost(_)) => {
                debug!("lost single-flight claim, ignoring duplicate tick");
                Ok(())
            }
            Err(other) => Err(EngineError::Dispatch(other)),
        }
    }

    async fn start_instance_by_id(&self, instance_id: Uuid) -> Result<(), EngineError> {
        let data = self.persister.load(instance_id).await?;
        if data.status.is_resting() {
            return Ok(());
        }
        self.tick_scheduler
            .schedule_tick(&self.flow_id, instance_id)
            .await?;
        Ok(())
    }

    async fn send_event(
        &self,
        instance_id: Uuid,
        event_type: &str,
        event_value: &str,
    ) -> Result<(), EngineError> {
        self.event_store
            .append(&self.flow_id, instance_id, event_type, event_value)
            .await?;
        self.history
            .record_event_appended(&self.flow_id, instance_id, event_value)
            .await;
        self.tick_scheduler
            .schedule_tick(&self.flow_id, instance_id)
            .await?;
        Ok(())
    }

    async fn retry(&self, instance_id: Uuid) -> Result<(), EngineError> {
        let mut data = self.persister.load(instance_id).await?;
        if data.status != StageStatus::Error {
            return Err(EngineError::IllegalOperationForStatus(
                "retry is only legal from Error",
            ));
        }
        data.status = StageStatus::Pending;
        self.persister.save(data).await?;
        self.history
            .record_status_changed(
                &self.flow_id,
                instance_id,
                StageStatus::Error,
                StageStatus::Pending,
            )
            .await;
        self.tick_scheduler
            .schedule_tick(&self.flow_id, instance_id)
            .await?;
        Ok(())
    }

    async fn cancel(&self, instance_id: Uuid) -> Result<(), EngineError> {
        let mut data = self.persister.load(instance_id).await?;
        if data.status.is_resting() {
            return Ok(());
        }
        data.status = StageStatus::Cancelled;
        self.persister.save(data).await?;
        self.history.record_cancelled(&self.flow_id, instance_id).await;
        Ok(())
    }

    async fn change_stage(&self, instance_id: Uuid, target: &str) -> Result<(), EngineError> {
        let target_stage = self
            .flow
            .stage_by_rendered_name(target)
            .ok_or_else(|| EngineError::UnknownStage(target.to_string()))?;

        let mut data = self.persister.load(instance_id).await?;
        let from_stage = data.stage.to_string();
        let from_status = data.status;

        if data.stage != target_stage {
            data.stage = target_stage.clone();
            data = self.persister.save(data).await?;
            self.history
                .record_stage_changed(&self.flow_id, instance_id, &from_stage, target, None)
                .await;
        }
        if data.status != StageStatus::Pending {
            data.status = StageStatus::Pending;
            self.persister.save(data).await?;
            self.history
                .record_status_changed(&self.flow_id, instance_id, from_status, StageStatus::Pending)
                .await;
        }
        self.tick_scheduler
            .schedule_tick(&self.flow_id, instance_id)
            .await?;
        Ok(())
    }

    async fn get_status(&self, instance_id: Uuid) -> Result<(String, StageStatus), EngineError> {
        let data = self.persister.load(instance_id).await?;
        Ok((data.stage.to_string(), data.status))
    }
}

/// Typed handle returned from [`super::Engine::register_flow`]. Carries the
/// concrete `FlowSpec`/`StatePersister` pairing so `start_instance` and
/// `send_event` can be called without re-supplying a type parameter the
/// compiler already knows.
pub struct FlowHandle<F: FlowSpec, P: StatePersister<F>> {
    pub(crate) entry: Arc<FlowEntry<F, P>>,
    pub(crate) _marker: PhantomData<F>,
}

impl<F: FlowSpec, P: StatePersister<F>> Clone for FlowHandle<F, P> {
    fn clone(&self) -> Self {
        Self {
            entry: Arc::clone(&self.entry),
            _marker: PhantomData,
        }
    }
}

impl<F: FlowSpec, P: StatePersister<F>> FlowHandle<F, P> {
    pub fn flow_id(&self) -> &str {
        &self.entry.flow_id
    }

    /// Resolve the initial stage, save a `Pending` row, record `Started`,
    /// enqueue a tick, and return the new instance id.
    #[instrument(skip(self, initial_state), fields(flow_id = %self.entry.flow_id))]
    pub async fn start_instance(&self, initial_state: F::State) -> Result<Uuid, EngineError> {
        let instance_id = Uuid::now_v7();
        let stage = self.entry.flow.initial().resolve(&initial_state);
        let data = InstanceData::new(instance_id, initial_state, stage.clone(), StageStatus::Pending);
        self.entry.persister.save(data).await?;
        self.entry
            .history
            .record_started(&self.entry.flow_id, instance_id, &stage.to_string())
            .await;
        self.entry
            .tick_scheduler
            .schedule_tick(&self.entry.flow_id, instance_id)
            .await?;
        Ok(instance_id)
    }

    /// Append `event` to the event store and enqueue a tick. Does not check
    /// whether the current stage actually waits for this event kind.
    pub async fn send_event(&self, instance_id: Uuid, event: F::Event) -> Result<(), EngineError> {
        let (event_type, event_value) = encode_event(&event);
        self.entry
            .send_event(instance_id, &event_type, &event_value)
            .await
    }
}

pub(crate) type FlowRegistry = HashMap<String, Arc<dyn ErasedFlowEntry>>;

pub(crate) fn candidate_kinds_for<F: FlowSpec, P: StatePersister<F>>(
    entry: &FlowEntry<F, P>,
    stage: &F::Stage,
) -> Vec<(String, String)> {
    entry.candidate_kinds(stage)
}
