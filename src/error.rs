//! Error taxonomy, one enum per subsystem rather than a single flat type.

use uuid::Uuid;

use crate::persistence::StoreError;

/// Raised while building a [`crate::flow::Flow`]; never reached at runtime.
#[derive(Debug, thiserror::Error)]
pub enum FlowDefinitionError {
    /// Neither or both of `initialStage`/`initialCondition` were set.
    #[error("flow must declare exactly one initial target")]
    MissingInitialTarget,

    /// A transition, initial target, or event handler names a stage that
    /// was never defined.
    #[error("stage {0} is referenced but not defined")]
    UndefinedStage(String),

    /// The same stage identity was registered twice.
    #[error("stage {0} is defined more than once")]
    DuplicateStage(String),

    /// A stage declared more than one transition kind, or an action
    /// alongside event handlers.
    #[error("stage {0} declares conflicting transitions: {1}")]
    ConflictingTransition(String, &'static str),

    /// The same event kind is waited on by more than one stage of the flow.
    #[error("event {0} is awaited by more than one stage ({1} and {2})")]
    DuplicateEventHandler(String, String, String),

    /// A condition tree branch does not resolve to a stage.
    #[error("condition handler on stage {0} has an unresolved branch")]
    UnresolvedCondition(String),
}

/// Facade-level programmer errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Operation referenced a `flowId` that was never registered.
    #[error("flow not registered: {0}")]
    NotRegistered(String),

    /// `retry` invoked on an instance that is not in the `Error` status.
    #[error("illegal operation for current status: {0}")]
    IllegalOperationForStatus(&'static str),

    /// `changeStage` named a stage whose rendered string matches nothing
    /// in the flow.
    #[error("no stage renders as {0}")]
    UnknownStage(String),

    /// A lower persistence layer failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The execution loop failed in a way that isn't the benign,
    /// swallowed `CasLost` race.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Errors surfaced by the execution loop. Most are recovered locally (the
/// instance is saved as `Error` and a history entry recorded) before being
/// re-raised so the worker pool can log them; `CasLost` is not an error at
/// all from the caller's perspective, just a signal the dispatcher should
/// return quietly.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The compare-and-set claim from Pending to Running did not apply,
    /// meaning another worker won the race, or this tick is a stale
    /// duplicate.
    #[error("lost the single-flight claim for instance {0}")]
    CasLost(Uuid),

    /// A stage action or condition predicate panicked or returned an
    /// application error.
    #[error("action failed on stage {stage}: {source}")]
    ActionFailure {
        stage: String,
        #[source]
        source: anyhow::Error,
    },

    /// A non-terminal stage had no resolvable outgoing transition. This can
    /// only happen if a flow bypassed the builder's validation.
    #[error("stage {0} is non-terminal but has no transition")]
    NoTransition(String),

    /// A condition handler failed to resolve either branch to a stage.
    #[error("condition handler on stage {0} did not resolve to a stage")]
    UnresolvedCondition(String),

    /// A lower persistence layer failed outside of the action-failure path.
    #[error(transparent)]
    Store(#[from] StoreError),
}
