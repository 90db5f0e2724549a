//! Append-only, best-effort history recording.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::instance::StageStatus;
use crate::persistence::HistoryStore;

/// What kind of thing happened.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    Started,
    EventAppended,
    StatusChanged,
    StageChanged,
    Cancelled,
    Error,
}

/// One append-only history row. Optional fields are populated according to
/// `kind` (e.g. `StageChanged` sets `from_stage`/`to_stage`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub flow_id: String,
    pub flow_instance_id: Uuid,
    pub kind: HistoryKind,
    pub stage: Option<String>,
    pub from_stage: Option<String>,
    pub to_stage: Option<String>,
    pub from_status: Option<StageStatus>,
    pub to_status: Option<StageStatus>,
    pub event: Option<String>,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
    pub error_stack_trace: Option<String>,
}

impl HistoryEntry {
    fn bare(flow_id: &str, flow_instance_id: Uuid, kind: HistoryKind) -> Self {
        Self {
            id: Uuid::now_v7(),
            occurred_at: Utc::now(),
            flow_id: flow_id.to_string(),
            flow_instance_id,
            kind,
            stage: None,
            from_stage: None,
            to_stage: None,
            from_status: None,
            to_status: None,
            event: None,
            error_type: None,
            error_message: None,
            error_stack_trace: None,
        }
    }
}

/// Thin wrapper around an optional [`HistoryStore`]: the sole call site
/// permitted to invoke `append`, so no other component can bypass the
/// swallow-and-log contract.
#[derive(Clone)]
pub struct HistoryRecorder {
    store: Option<Arc<dyn HistoryStore>>,
}

impl HistoryRecorder {
    pub fn new(store: Option<Arc<dyn HistoryStore>>) -> Self {
        Self { store }
    }

    async fn append(&self, entry: HistoryEntry) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(err) = store.append(entry).await {
            warn!(%err, "history append failed, continuing");
        }
    }

    pub async fn record_started(&self, flow_id: &str, instance_id: Uuid, stage: &str) {
        let mut entry = HistoryEntry::bare(flow_id, instance_id, HistoryKind::Started);
        entry.stage = Some(stage.to_string());
        self.append(entry).await;
    }

    pub async fn record_status_changed(
        &self,
        flow_id: &str,
        instance_id: Uuid,
        from: StageStatus,
        to: StageStatus,
    ) {
        let mut entry = HistoryEntry::bare(flow_id, instance_id, HistoryKind::StatusChanged);
        entry.from_status = Some(from);
        entry.to_status = Some(to);
        self.append(entry).await;
    }

    pub async fn record_stage_changed(
        &self,
        flow_id: &str,
        instance_id: Uuid,
        from: &str,
        to: &str,
        event: Option<&str>,
    ) {
        let mut entry = HistoryEntry::bare(flow_id, instance_id, HistoryKind::StageChanged);
        entry.from_stage = Some(from.to_string());
        entry.to_stage = Some(to.to_string());
        entry.event = event.map(|e| e.to_string());
        self.append(entry).await;
    }

    pub async fn record_cancelled(&self, flow_id: &str, instance_id: Uuid) {
        let entry = HistoryEntry::bare(flow_id, instance_id, HistoryKind::Cancelled);
        self.append(entry).await;
    }

    pub async fn record_error(
        &self,
        flow_id: &str,
        instance_id: Uuid,
        error_type: &str,
        message: &str,
        stack_trace: Option<&str>,
    ) {
        let mut entry = HistoryEntry::bare(flow_id, instance_id, HistoryKind::Error);
        entry.error_type = Some(error_type.to_string());
        entry.error_message = Some(message.to_string());
        entry.error_stack_trace = stack_trace.map(|s| s.to_string());
        self.append(entry).await;
    }

    pub async fn record_event_appended(&self, flow_id: &str, instance_id: Uuid, event: &str) {
        let mut entry = HistoryEntry::bare(flow_id, instance_id, HistoryKind::EventAppended);
        entry.event = Some(event.to_string());
        self.append(entry).await;
    }
}
