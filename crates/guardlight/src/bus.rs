//! In-process topic bus.
//!
//! Each topic gets its own `tokio::sync::broadcast` channel, created on
//! first use. Publishing is fire-and-forget: a message sent to a topic with
//! no live subscriber is dropped, exactly as a remote broker would drop it,
//! and the stale sweep later recovers the job.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use guardlight_core::bus::Publisher;

pub struct InProcessBus {
    capacity: usize,
    topics: RwLock<HashMap<String, broadcast::Sender<Value>>>,
}

impl InProcessBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            topics: RwLock::new(HashMap::new()),
        }
    }

    /// Start receiving every message published on `topic` from now on.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        let rx = topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        Subscription {
            topic: topic.to_string(),
            rx,
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map_or(0, |tx| tx.receiver_count())
    }
}

#[async_trait]
impl Publisher for InProcessBus {
    async fn publish(&self, topic: &str, payload: Value) -> Result<()> {
        let tx = self
            .topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .cloned();
        match tx.map(|tx| tx.send(payload)) {
            Some(Ok(receivers)) => debug!(topic, receivers, "published"),
            _ => debug!(topic, "no subscribers, message dropped"),
        }
        Ok(())
    }
}

/// A receiver bound to one topic.
pub struct Subscription {
    topic: String,
    rx: broadcast::Receiver<Value>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next message, or `None` once `shutdown` fires or the bus is gone.
    /// Messages lost to a lagging receiver are logged and skipped.
    pub async fn next(&mut self, shutdown: &CancellationToken) -> Option<Value> {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return None,
                msg = self.rx.recv() => match msg {
                    Ok(value) => return Some(value),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(topic = %self.topic, skipped, "subscriber lagged, messages dropped");
                    }
                    Err(RecvError::Closed) => return None,
                },
            }
        }
    }
}
