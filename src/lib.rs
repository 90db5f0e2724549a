//! # flowkeep
//!
//! An embeddable engine for typed finite-state flows: durable instances
//! that advance through developer-defined stages via actions, conditional
//! branches, and event waits, driven by a pull-based tick queue.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                           Engine                              │
//! │   (flow registry, typed FlowHandle, untyped facade ops)      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │         StatePersister / EventStore / TickScheduler           │
//! │     (host-supplied; an in-memory set ships for embedding)     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        WorkerPool                             │
//! │        (claims ticks, dispatches through the Engine)          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use flowkeep::prelude::*;
//!
//! struct OrderFlow;
//! impl FlowSpec for OrderFlow {
//!     type Stage = OrderStage;
//!     type Event = OrderEvent;
//!     type State = OrderState;
//! }
//!
//! let flow = FlowBuilder::<OrderFlow>::new()
//!     .initial_stage(OrderStage::Placed)
//!     .stage(StageBuilder::new(OrderStage::Placed).next(OrderStage::Shipped))
//!     .stage(StageBuilder::new(OrderStage::Shipped))
//!     .build()?;
//!
//! let engine = Engine::new(EngineConfig {
//!     event_store: Arc::new(InMemoryEventStore::new()),
//!     tick_scheduler: Arc::new(InMemoryTickScheduler::new()),
//!     history_store: None,
//! });
//! let handle = engine.register_flow("order", flow, Arc::new(InMemoryStatePersister::new()));
//! let instance_id = handle.start_instance(OrderState::default()).await?;
//! ```

pub mod engine;
pub mod error;
pub mod flow;
pub mod history;
pub mod instance;
pub mod persistence;
pub mod worker;

/// Common imports for embedding the engine.
pub mod prelude {
    pub use crate::engine::{Engine, EngineConfig, FlowHandle};
    pub use crate::error::{DispatchError, EngineError, FlowDefinitionError};
    pub use crate::flow::{
        Action, ConditionBranch, ConditionHandler, EventHandler, Flow, FlowBuilder, FlowSpec,
        InitialTarget, StageBuilder, StageDefinition, Transition,
    };
    pub use crate::history::{HistoryEntry, HistoryKind};
    pub use crate::instance::{InstanceData, StageStatus};
    pub use crate::persistence::{
        EventStore, HistoryStore, InMemoryBackend, InMemoryEventStore, InMemoryHistoryStore,
        InMemoryStatePersister, InMemoryTickScheduler, PendingTick, StatePersister, StoreError,
        StoredEvent, TickScheduler,
    };
    pub use crate::worker::{PollerConfig, WorkerPool, WorkerPoolConfig, WorkerPoolError};
}

pub use engine::{Engine, EngineConfig, FlowHandle};
pub use error::{DispatchError, EngineError, FlowDefinitionError};
pub use flow::{Flow, FlowBuilder, FlowSpec, StageBuilder};
pub use instance::{InstanceData, StageStatus};
