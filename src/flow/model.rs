//! Flow data model: stages, transitions, condition trees.
//!
//! `Flow<F>` is immutable once built by [`super::builder::FlowBuilder`].

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

/// Binds the three identity/value types a flow is generic over, the way
/// [`crate::prelude`] users would otherwise have to repeat a `Stage, Event,
/// State` triple at every call site. A host application implements this
/// for a zero-sized marker type per flow.
///
/// # Example
///
/// ```ignore
/// struct OrderFlow;
///
/// impl FlowSpec for OrderFlow {
///     type Stage = OrderStage;
///     type Event = OrderEvent;
///     type State = OrderState;
/// }
/// ```
pub trait FlowSpec: Send + Sync + 'static {
    /// Stage identity. Equality is value equality; `Display` is used for
    /// history rendering and the `changeStage` operator escape hatch.
    type Stage: Clone + Eq + Hash + fmt::Display + Send + Sync + 'static;

    /// Event identity (a kind, not an instance of one).
    type Event: Clone + Eq + Hash + fmt::Display + Send + Sync + 'static;

    /// Application-owned domain state. Opaque to the engine.
    type State: Send + Sync + 'static;
}

/// A function from domain state to optional new state. `Ok(None)` means
/// "keep the existing state unchanged"; `Err` fails the instance into the
/// `Error` status.
pub type Action<F> = Box<
    dyn Fn(&<F as FlowSpec>::State) -> anyhow::Result<Option<<F as FlowSpec>::State>> + Send + Sync,
>;

/// One node of a condition decision tree.
pub struct ConditionHandler<F: FlowSpec> {
    /// Human-readable description, surfaced in validation error messages.
    pub description: String,
    predicate: Box<dyn Fn(&F::State) -> bool + Send + Sync>,
    when_true: Box<ConditionBranch<F>>,
    when_false: Box<ConditionBranch<F>>,
}

impl<F: FlowSpec> ConditionHandler<F> {
    pub fn new(
        description: impl Into<String>,
        predicate: impl Fn(&F::State) -> bool + Send + Sync + 'static,
        when_true: ConditionBranch<F>,
        when_false: ConditionBranch<F>,
    ) -> Self {
        Self {
            description: description.into(),
            predicate: Box::new(predicate),
            when_true: Box::new(when_true),
            when_false: Box::new(when_false),
        }
    }

    /// Evaluate the predicate and recurse into the chosen branch until a
    /// leaf stage is reached.
    pub fn resolve(&self, state: &F::State) -> F::Stage {
        let branch = if (self.predicate)(state) {
            &self.when_true
        } else {
            &self.when_false
        };
        match branch.as_ref() {
            ConditionBranch::Stage(stage) => stage.clone(),
            ConditionBranch::Condition(handler) => handler.resolve(state),
        }
    }

    /// Every stage identity reachable from this tree, used by the builder's
    /// validator.
    pub fn leaf_stages(&self) -> Vec<F::Stage> {
        let mut out = Vec::new();
        self.when_true.collect_leaf_stages(&mut out);
        self.when_false.collect_leaf_stages(&mut out);
        out
    }
}

/// A branch of a [`ConditionHandler`]: either a terminal stage or a nested
/// condition.
pub enum ConditionBranch<F: FlowSpec> {
    Stage(F::Stage),
    Condition(ConditionHandler<F>),
}

impl<F: FlowSpec> ConditionBranch<F> {
    fn collect_leaf_stages(&self, out: &mut Vec<F::Stage>) {
        match self {
            Self::Stage(stage) => out.push(stage.clone()),
            Self::Condition(handler) => {
                handler.when_true.collect_leaf_stages(out);
                handler.when_false.collect_leaf_stages(out);
            }
        }
    }
}

/// What a stage does when an awaited event arrives.
pub enum EventHandler<F: FlowSpec> {
    Stage(F::Stage),
    Condition(ConditionHandler<F>),
}

impl<F: FlowSpec> EventHandler<F> {
    pub(crate) fn resolve(&self, state: &F::State) -> F::Stage {
        match self {
            Self::Stage(stage) => stage.clone(),
            Self::Condition(handler) => handler.resolve(state),
        }
    }

    fn leaf_stages(&self) -> Vec<F::Stage> {
        match self {
            Self::Stage(stage) => vec![stage.clone()],
            Self::Condition(handler) => handler.leaf_stages(),
        }
    }
}

/// A stage's single outgoing transition. A stage has exactly one of these,
/// or none (terminal).
pub enum Transition<F: FlowSpec> {
    /// Unconditional successor.
    Next(F::Stage),
    /// Branch on domain state.
    Condition(ConditionHandler<F>),
    /// Wait for one of several event kinds.
    Events(HashMap<F::Event, EventHandler<F>>),
}

impl<F: FlowSpec> Transition<F> {
    pub(crate) fn leaf_stages(&self) -> Vec<F::Stage> {
        match self {
            Self::Next(stage) => vec![stage.clone()],
            Self::Condition(handler) => handler.leaf_stages(),
            Self::Events(handlers) => handlers.values().flat_map(|h| h.leaf_stages()).collect(),
        }
    }
}

/// A single node in the flow graph.
pub struct StageDefinition<F: FlowSpec> {
    pub stage: F::Stage,
    pub action: Option<Action<F>>,
    pub transition: Option<Transition<F>>,
}

impl<F: FlowSpec> StageDefinition<F> {
    /// A stage is terminal iff it has neither an outgoing transition nor
    /// event handlers.
    pub fn is_terminal(&self) -> bool {
        self.transition.is_none()
    }

    pub fn event_handlers(&self) -> Option<&HashMap<F::Event, EventHandler<F>>> {
        match &self.transition {
            Some(Transition::Events(handlers)) => Some(handlers),
            _ => None,
        }
    }
}

/// How a new instance resolves its first stage.
pub enum InitialTarget<F: FlowSpec> {
    Stage(F::Stage),
    Condition(ConditionHandler<F>),
}

impl<F: FlowSpec> InitialTarget<F> {
    pub fn resolve(&self, state: &F::State) -> F::Stage {
        match self {
            Self::Stage(stage) => stage.clone(),
            Self::Condition(handler) => handler.resolve(state),
        }
    }
}

/// An immutable, validated flow graph.
pub struct Flow<F: FlowSpec> {
    pub(crate) initial: InitialTarget<F>,
    pub(crate) stages: HashMap<F::Stage, StageDefinition<F>>,
}

impl<F: FlowSpec> Flow<F> {
    pub fn stage(&self, stage: &F::Stage) -> Option<&StageDefinition<F>> {
        self.stages.get(stage)
    }

    pub fn initial(&self) -> &InitialTarget<F> {
        &self.initial
    }

    /// Resolve a stage by its stable `Display` rendering. Used by the
    /// operator `changeStage` escape hatch, which names a target stage as
    /// a string rather than a typed value.
    pub fn stage_by_rendered_name(&self, rendered: &str) -> Option<F::Stage> {
        self.stages
            .keys()
            .find(|stage| stage.to_string() == rendered)
            .cloned()
    }
}
