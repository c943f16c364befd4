//! Outbound seams of the engine: the topic bus and the notification sink.
//!
//! The engine never talks to workers or clients directly. Job payloads go
//! out through a [`Publisher`]; progress notifications go out through an
//! [`EventSink`] keyed by the submission owner.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fire-and-forget publisher for a topic-addressed message bus.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Update,
    Heartbeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    AnalysisRequested,
    /// A fragment of an analysis changed.
    AnalysisDone,
    ReportDone,
}

/// Notification delivered to a submission owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub kind: EventKind,
    pub action: Option<EventAction>,
    /// Submission id for `AnalysisRequested`, analysis id otherwise.
    pub subject_id: Option<Uuid>,
}

impl PipelineEvent {
    pub fn update(action: EventAction, subject_id: Uuid) -> Self {
        Self {
            kind: EventKind::Update,
            action: Some(action),
            subject_id: Some(subject_id),
        }
    }

    pub fn heartbeat() -> Self {
        Self {
            kind: EventKind::Heartbeat,
            action: None,
            subject_id: None,
        }
    }
}

/// Receiver of owner-scoped pipeline events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn send(&self, owner_id: Uuid, event: PipelineEvent) -> Result<()>;
}

/// Sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

#[async_trait]
impl EventSink for NoopSink {
    async fn send(&self, _owner_id: Uuid, _event: PipelineEvent) -> Result<()> {
        Ok(())
    }
}
