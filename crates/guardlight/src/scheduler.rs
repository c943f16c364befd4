//! Periodic drivers for the engine.
//!
//! Three loops run until the shutdown token fires: the dispatcher tick, the
//! stale-job sweep and the event heartbeat. Each loop awaits its work
//! before waiting for the next tick, and missed ticks are skipped, so a
//! slow pass never overlaps the next one.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use guardlight_core::dispatcher::Dispatcher;
use guardlight_core::ledger::JobLedger;

use crate::config::Config;
use crate::events::EventBus;

pub struct Scheduler {
    dispatcher: Arc<Dispatcher>,
    ledger: Arc<JobLedger>,
    events: EventBus,
    tick_interval: Duration,
    sweep_interval: Duration,
    heartbeat_interval: Duration,
}

impl Scheduler {
    pub fn new(
        config: &Config,
        dispatcher: Arc<Dispatcher>,
        ledger: Arc<JobLedger>,
        events: EventBus,
    ) -> Self {
        Self {
            dispatcher,
            ledger,
            events,
            tick_interval: config.tick_interval(),
            sweep_interval: config.sweep_interval(),
            heartbeat_interval: config.heartbeat_interval(),
        }
    }

    pub fn spawn(self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let Scheduler {
            dispatcher,
            ledger,
            events,
            tick_interval,
            sweep_interval,
            heartbeat_interval,
        } = self;

        let dispatch = tokio::spawn(run_every(
            "dispatch",
            tick_interval,
            shutdown.clone(),
            move || {
                let dispatcher = dispatcher.clone();
                async move {
                    if let Err(e) = dispatcher.tick().await {
                        error!(error = %e, "dispatch tick failed");
                    }
                }
            },
        ));

        let sweep = tokio::spawn(run_every(
            "stale-sweep",
            sweep_interval,
            shutdown.clone(),
            move || {
                let ledger = ledger.clone();
                async move {
                    if let Err(e) = ledger.sweep_stale_jobs(Utc::now()).await {
                        error!(error = %e, "stale sweep failed");
                    }
                }
            },
        ));

        let heartbeat = tokio::spawn(run_every(
            "heartbeat",
            heartbeat_interval,
            shutdown,
            move || {
                let events = events.clone();
                async move { events.heartbeat() }
            },
        ));

        vec![dispatch, sweep, heartbeat]
    }
}

async fn run_every<F, Fut>(name: &'static str, period: Duration, shutdown: CancellationToken, mut work: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    debug!(task = name, period_ms = period.as_millis() as u64, "scheduler loop started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        work().await;
    }
    debug!(task = name, "scheduler loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InProcessBus;
    use guardlight_core::adapters::AdapterRegistry;
    use guardlight_core::contracts::ParserRequest;
    use guardlight_core::ledger::LedgerConfig;
    use guardlight_core::models::JobStatus;
    use guardlight_core::payload::{JobData, ParseJobData};
    use guardlight_core::store::memory::InMemoryStore;
    use guardlight_core::store::JobStore;
    use uuid::Uuid;

    fn config() -> Config {
        toml::from_str(
            r#"
            [db]
            path = "unused.db"
            [orchestrator]
            tick_interval_ms = 10
            [events]
            heartbeat_secs = 3600
            "#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_loop_publishes_and_stops() {
        let store = Arc::new(InMemoryStore::new());
        let bus = Arc::new(InProcessBus::new(16));
        let adapters = Arc::new(AdapterRegistry::builtin());
        let ledger = Arc::new(JobLedger::new(store.clone(), LedgerConfig::default()));
        let dispatcher = Arc::new(Dispatcher::new(ledger.clone(), bus.clone(), adapters));

        let parser = AdapterRegistry::builtin().parsers()[0].clone();
        let job_id = ledger.create_id();
        let data = JobData::Parse(ParseJobData {
            adapter_key: parser.key.clone(),
            image: parser.image.clone(),
            topic: parser.topic(),
            request: ParserRequest {
                job_id,
                analysis_id: Uuid::new_v4(),
                content: String::new(),
            },
        });
        ledger
            .enqueue_job(job_id, &data, &parser.group_key())
            .await
            .unwrap();

        let mut sub = bus.subscribe(&parser.topic());
        let shutdown = CancellationToken::new();
        let handles = Scheduler::new(&config(), dispatcher, ledger, EventBus::new(4))
            .spawn(shutdown.clone());

        let msg = tokio::time::timeout(Duration::from_secs(5), sub.next(&shutdown))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg["jobId"], job_id.to_string());
        assert_eq!(
            store.get_job(job_id).await.unwrap().unwrap().status,
            JobStatus::Inprogress
        );

        shutdown.cancel();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .unwrap()
                .unwrap();
        }
    }
}
