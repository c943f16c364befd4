//! Result-topic subscriptions feeding the pipeline allocator.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use guardlight_core::allocator::Allocator;
use guardlight_core::contracts::{ANALYZER_RESULT_TOPIC, PARSER_RESULT_TOPIC, REPORTER_RESULT_TOPIC};

use crate::bus::{InProcessBus, Subscription};

pub const RESULT_TOPICS: [&str; 3] = [PARSER_RESULT_TOPIC, ANALYZER_RESULT_TOPIC, REPORTER_RESULT_TOPIC];

/// Hands every worker reply to the allocator, one task per message.
pub struct ResultListener {
    allocator: Arc<Allocator>,
    subscriptions: Vec<Subscription>,
    in_flight: Arc<AtomicUsize>,
}

impl ResultListener {
    /// Subscribes immediately, so replies published after this returns are
    /// never missed. `in_flight` counts results received but not yet
    /// handled.
    pub fn new(allocator: Arc<Allocator>, bus: &InProcessBus, in_flight: Arc<AtomicUsize>) -> Self {
        Self {
            allocator,
            subscriptions: RESULT_TOPICS.iter().map(|t| bus.subscribe(t)).collect(),
            in_flight,
        }
    }

    pub fn spawn(self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        self.subscriptions
            .into_iter()
            .map(|sub| {
                tokio::spawn(listen(
                    self.allocator.clone(),
                    sub,
                    self.in_flight.clone(),
                    shutdown.clone(),
                ))
            })
            .collect()
    }
}

async fn listen(
    allocator: Arc<Allocator>,
    mut sub: Subscription,
    in_flight: Arc<AtomicUsize>,
    shutdown: CancellationToken,
) {
    while let Some(payload) = sub.next(&shutdown).await {
        in_flight.fetch_add(1, Ordering::SeqCst);
        let allocator = allocator.clone();
        let in_flight = in_flight.clone();
        let topic = sub.topic().to_string();
        tokio::spawn(async move {
            match allocator.handle_message(&topic, payload).await {
                Ok(outcome) => debug!(topic = %topic, ?outcome, "result handled"),
                Err(e) => warn!(topic = %topic, error = %e, "failed to handle result"),
            }
            in_flight.fetch_sub(1, Ordering::SeqCst);
        });
    }
}
