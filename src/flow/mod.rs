//! The flow graph: stages, transitions, condition trees, and the builder
//! that validates a graph before it can be registered with the engine.

mod builder;
mod model;

pub use builder::{FlowBuilder, StageBuilder};
pub use model::{
    Action, ConditionBranch, ConditionHandler, EventHandler, Flow, FlowSpec, InitialTarget,
    StageDefinition, Transition,
};
