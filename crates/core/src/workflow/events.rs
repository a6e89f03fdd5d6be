//! # Workflow Events
//!
//! Typed progress events for a campaign run, streamed over an optional
//! channel and retained in a bounded event history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::stages::StageId;

/// Kind of workflow event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowEventKind {
    /// Run started (or resumed)
    RunStarted,
    /// Stage started working
    StageStarted,
    /// Stage appended its message
    StageCompleted,
    /// Stage raised a fatal error
    StageFailed,
    /// Text delta from the generator
    StreamedToken,
    /// A stage invoked a tool
    ToolCallStarted,
    /// A tool returned (possibly with an `error` field)
    ToolCallCompleted,
    /// Deep-research phase transition (plan, research, synthesis)
    ResearchPhase,
    /// Conversation snapshot persisted
    CheckpointSaved,
    /// Packaging produced the aggregate
    PackageReady,
    /// Run aborted
    RunFailed,
    /// Pipeline finished, nothing left to do
    RunIdle,
}

/// An event in a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: WorkflowEventKind,
    /// Stage that produced this event, if any
    #[serde(default)]
    pub stage: Option<StageId>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl WorkflowEvent {
    pub fn new(kind: WorkflowEventKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind,
            stage: None,
            data: None,
        }
    }

    /// Event attributed to a stage
    pub fn for_stage(kind: WorkflowEventKind, stage: StageId) -> Self {
        Self {
            stage: Some(stage),
            ..Self::new(kind)
        }
    }

    /// Add data to the event
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Author label for display
    pub fn source(&self) -> &'static str {
        self.stage.map(|s| s.author_name()).unwrap_or("orchestrator")
    }
}

/// Events kept in history before the oldest are dropped
pub const DEFAULT_HISTORY_LIMIT: usize = 2048;

/// Cloneable handle stages use to publish events
#[derive(Clone)]
pub struct EventSink {
    tx: Option<mpsc::Sender<WorkflowEvent>>,
    history: Arc<Mutex<VecDeque<WorkflowEvent>>>,
    limit: usize,
}

impl Default for EventSink {
    fn default() -> Self {
        Self {
            tx: None,
            history: Arc::default(),
            limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl EventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(tx: mpsc::Sender<WorkflowEvent>) -> Self {
        Self {
            tx: Some(tx),
            ..Self::default()
        }
    }

    /// Keep at most `limit` events in history (streamed tokens included)
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Record and forward an event; a closed channel is not an error
    pub async fn emit(&self, event: WorkflowEvent) {
        if let Ok(mut history) = self.history.lock() {
            if self.limit > 0 {
                while history.len() >= self.limit {
                    history.pop_front();
                }
                history.push_back(event.clone());
            }
        }
        if let Some(tx) = &self.tx {
            let _ = tx.send(event).await;
        }
    }

    /// Everything emitted so far
    pub fn history(&self) -> Vec<WorkflowEvent> {
        self.history
            .lock()
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<WorkflowEventKind> {
        self.history().iter().map(|e| e.kind).collect()
    }
}
