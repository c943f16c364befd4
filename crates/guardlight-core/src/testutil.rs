//! Shared fixtures for unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::adapters::AdapterRegistry;
use crate::allocator::Allocator;
use crate::bus::{EventSink, PipelineEvent, Publisher};
use crate::dispatcher::Dispatcher;
use crate::ledger::{JobFailureHook, JobLedger, LedgerConfig};
use crate::requester::Requester;
use crate::store::memory::InMemoryStore;

#[derive(Default)]
pub struct RecordingPublisher {
    pub sent: Mutex<Vec<(String, serde_json::Value)>>,
    pub fail: AtomicBool,
}

impl RecordingPublisher {
    pub fn topics(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(t, _)| t.clone()).collect()
    }

    pub fn take(&self) -> Vec<(String, serde_json::Value)> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("bus unavailable");
        }
        self.sent.lock().unwrap().push((topic.to_string(), payload));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<(Uuid, PipelineEvent)>>,
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn send(&self, owner_id: Uuid, event: PipelineEvent) -> Result<()> {
        self.events.lock().unwrap().push((owner_id, event));
        Ok(())
    }
}

/// Every engine component wired over one in-memory store.
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub publisher: Arc<RecordingPublisher>,
    pub sink: Arc<RecordingSink>,
    pub ledger: Arc<JobLedger>,
    pub dispatcher: Dispatcher,
    pub allocator: Arc<Allocator>,
    pub requester: Requester,
}

impl Harness {
    pub fn new(adapters: AdapterRegistry) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let publisher = Arc::new(RecordingPublisher::default());
        let sink = Arc::new(RecordingSink::default());
        let adapters = Arc::new(adapters);
        let ledger = Arc::new(JobLedger::new(store.clone(), LedgerConfig::default()));
        let allocator = Arc::new(Allocator::new(
            ledger.clone(),
            store.clone(),
            adapters.clone(),
            sink.clone(),
        ));
        let hook: Arc<dyn JobFailureHook> = allocator.clone();
        ledger.set_failure_hook(Arc::downgrade(&hook));
        Self {
            dispatcher: Dispatcher::new(ledger.clone(), publisher.clone(), adapters.clone()),
            allocator,
            requester: Requester::new(ledger.clone(), store.clone(), adapters, sink.clone()),
            store,
            publisher,
            sink,
            ledger,
        }
    }
}
