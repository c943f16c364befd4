//! Wiring of the engine components over the SQLite store.
//!
//! [`Engine::open`] builds every component; [`Engine::start`] spawns the
//! built-in adapters, the result listener and the scheduler, all stopped by
//! one [`CancellationToken`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use guardlight_core::adapters::AdapterRegistry;
use guardlight_core::allocator::Allocator;
use guardlight_core::dispatcher::Dispatcher;
use guardlight_core::ledger::{JobFailureHook, JobLedger};
use guardlight_core::models::JobStatus;
use guardlight_core::requester::Requester;

use crate::builtin;
use crate::bus::InProcessBus;
use crate::config::Config;
use crate::db;
use crate::events::EventBus;
use crate::listener::ResultListener;
use crate::scheduler::Scheduler;
use crate::sqlite_store::SqliteStore;

pub struct Engine {
    pub config: Config,
    pub store: Arc<SqliteStore>,
    pub bus: Arc<InProcessBus>,
    pub events: EventBus,
    pub adapters: Arc<AdapterRegistry>,
    pub ledger: Arc<JobLedger>,
    pub dispatcher: Arc<Dispatcher>,
    pub allocator: Arc<Allocator>,
    pub requester: Arc<Requester>,
    in_flight: Arc<AtomicUsize>,
}

impl Engine {
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        Ok(Self::new(config, pool))
    }

    pub fn new(config: &Config, pool: SqlitePool) -> Self {
        let store = Arc::new(SqliteStore::new(pool));
        let bus = Arc::new(InProcessBus::new(config.bus.capacity));
        let events = EventBus::new(config.events.capacity);
        let sink = Arc::new(events.clone());
        let adapters = Arc::new(config.adapter_registry());
        let ledger = Arc::new(JobLedger::new(store.clone(), config.ledger_config()));
        let allocator = Arc::new(Allocator::new(
            ledger.clone(),
            store.clone(),
            adapters.clone(),
            sink.clone(),
        ));
        // Jobs failed by the sweep or the dispatcher fail their analysis too.
        let hook: Arc<dyn JobFailureHook> = allocator.clone();
        ledger.set_failure_hook(Arc::downgrade(&hook));

        Self {
            config: config.clone(),
            dispatcher: Arc::new(Dispatcher::new(ledger.clone(), bus.clone(), adapters.clone())),
            allocator,
            requester: Arc::new(Requester::new(ledger.clone(), store.clone(), adapters.clone(), sink)),
            store,
            bus,
            events,
            adapters,
            ledger,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Spawn every background task. Subscriptions are registered before
    /// this returns, so the first dispatch cannot outrun a worker.
    pub fn start(&self, shutdown: &CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles =
            builtin::spawn_builtin_workers(&self.adapters, self.bus.clone(), shutdown.clone());
        handles.extend(
            ResultListener::new(self.allocator.clone(), &self.bus, self.in_flight.clone())
                .spawn(shutdown.clone()),
        );
        handles.extend(
            Scheduler::new(
                &self.config,
                self.dispatcher.clone(),
                self.ledger.clone(),
                self.events.clone(),
            )
            .spawn(shutdown.clone()),
        );
        handles
    }

    /// True when no result is being handled and no job is queued or in
    /// progress. Jobs that ended in `Error` do not count.
    pub async fn is_idle(&self) -> Result<bool> {
        if self.in_flight.load(Ordering::SeqCst) > 0 {
            return Ok(false);
        }
        let active = self
            .ledger
            .get_all_non_finished_jobs()
            .await?
            .iter()
            .any(|j| matches!(j.status, JobStatus::Queued | JobStatus::Inprogress));
        Ok(!active && self.in_flight.load(Ordering::SeqCst) == 0)
    }

    pub async fn close(self) {
        self.store.pool().close().await;
    }
}
