//! The persisted per-instance row.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::flow::FlowSpec;

/// Lifecycle status of a flow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Durably persisted, not currently owned by any worker.
    Pending,
    /// Claimed by a worker; the execution loop is advancing it.
    Running,
    /// Reached a terminal stage. Never transitions away.
    Completed,
    /// Cancelled by an operator. Never transitions away.
    Cancelled,
    /// An action or persister write failed; awaits an explicit `retry`.
    Error,
}

impl StageStatus {
    pub fn is_resting(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One live flow instance: identity, domain state, current position in the
/// graph, and status.
pub struct InstanceData<F: FlowSpec> {
    pub flow_instance_id: Uuid,
    pub state: F::State,
    pub stage: F::Stage,
    pub status: StageStatus,
}

impl<F: FlowSpec> InstanceData<F> {
    pub fn new(flow_instance_id: Uuid, state: F::State, stage: F::Stage, status: StageStatus) -> Self {
        Self {
            flow_instance_id,
            state,
            stage,
            status,
        }
    }
}
