//! `gl run`: drive the pipeline.
//!
//! Starts the built-in adapters, the result listener and the scheduler,
//! then runs until Ctrl-C, or with `--until-idle` until no job is left to
//! work on.

use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use guardlight_core::bus::EventKind;

use crate::config::Config;
use crate::engine::Engine;

const IDLE_POLL: Duration = Duration::from_millis(250);
// Consecutive idle polls required before stopping.
const IDLE_POLLS: u32 = 2;

pub async fn run_engine(config: &Config, until_idle: bool, timeout: Option<Duration>) -> Result<()> {
    let engine = Engine::open(config).await?;
    let shutdown = CancellationToken::new();
    let mut handles = engine.start(&shutdown);
    handles.push(tokio::spawn(log_events(engine.events.subscribe(), shutdown.clone())));
    info!(
        tick_ms = config.orchestrator.tick_interval_ms,
        sweep_secs = config.jobs.sweep_interval_secs,
        "engine running"
    );

    let deadline = async {
        match timeout {
            Some(t) => tokio::time::sleep(t).await,
            None => std::future::pending().await,
        }
    };

    let outcome = tokio::select! {
        r = tokio::signal::ctrl_c() => r.map_err(anyhow::Error::from).map(|_| info!("interrupted")),
        r = wait_idle(&engine), if until_idle => r.map(|_| info!("all jobs settled")),
        _ = deadline => {
            warn!("timeout reached with work outstanding");
            Err(anyhow::anyhow!("timed out before the pipeline went idle"))
        }
    };

    shutdown.cancel();
    for handle in handles {
        let _ = handle.await;
    }
    engine.close().await;
    outcome
}

async fn wait_idle(engine: &Engine) -> Result<()> {
    let mut idle_polls = 0;
    loop {
        tokio::time::sleep(IDLE_POLL).await;
        if engine.is_idle().await? {
            idle_polls += 1;
            if idle_polls >= IDLE_POLLS {
                return Ok(());
            }
        } else {
            idle_polls = 0;
        }
    }
}

async fn log_events(
    mut rx: tokio::sync::broadcast::Receiver<crate::events::OwnedEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            _ = shutdown.cancelled() => return,
            r = rx.recv() => r,
        };
        match received {
            Ok(e) if e.event.kind == EventKind::Heartbeat => debug!("heartbeat"),
            Ok(e) => info!(
                owner_id = ?e.owner_id,
                action = ?e.event.action,
                subject_id = ?e.event.subject_id,
                "pipeline event"
            ),
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                debug!(skipped = n, "event log lagged")
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
        }
    }
}
