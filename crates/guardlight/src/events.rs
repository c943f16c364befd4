//! Owner-scoped pipeline notifications.
//!
//! [`EventBus`] fans `(owner_id, event)` pairs out to every subscriber over
//! a single broadcast channel; subscribers filter by owner. Heartbeats are
//! addressed to every owner.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use guardlight_core::bus::{EventKind, EventSink, PipelineEvent};

/// A delivered notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedEvent {
    /// `None` for heartbeats.
    pub owner_id: Option<Uuid>,
    pub event: PipelineEvent,
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<OwnedEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OwnedEvent> {
        self.tx.subscribe()
    }

    /// Events visible to `owner_id`: their own updates plus heartbeats.
    pub fn subscribe_owner(&self, owner_id: Uuid) -> OwnerEvents {
        OwnerEvents {
            owner_id,
            rx: self.tx.subscribe(),
        }
    }

    pub fn heartbeat(&self) {
        let _ = self.tx.send(OwnedEvent {
            owner_id: None,
            event: PipelineEvent::heartbeat(),
        });
    }

    pub fn client_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl EventSink for EventBus {
    async fn send(&self, owner_id: Uuid, event: PipelineEvent) -> Result<()> {
        // No listener is not an error.
        if self
            .tx
            .send(OwnedEvent {
                owner_id: Some(owner_id),
                event,
            })
            .is_err()
        {
            debug!(%owner_id, "no event subscribers");
        }
        Ok(())
    }
}

pub struct OwnerEvents {
    owner_id: Uuid,
    rx: broadcast::Receiver<OwnedEvent>,
}

impl OwnerEvents {
    /// Next event for this owner, skipping other owners' updates. `None`
    /// once the bus is dropped.
    pub async fn recv(&mut self) -> Option<PipelineEvent> {
        loop {
            match self.rx.recv().await {
                Ok(OwnedEvent { owner_id, event }) => {
                    let visible = event.kind == EventKind::Heartbeat
                        || owner_id == Some(self.owner_id);
                    if visible {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
