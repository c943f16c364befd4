//! Built-in adapters served in-process over the bus.
//!
//! | Kind | Key | Topic |
//! |------|-----|-------|
//! | parser | `freetext` | `parser.freetext` |
//! | analyzer | `word_search` | `analyzer.word_search` |
//! | reporter | `word_count` | `reporter.word_count` |
//!
//! Only adapters configured with image `builtin` are served; any other
//! image is expected to be a remote worker listening on the same topic.

pub mod freetext;
pub mod word_count;
pub mod word_search;

use std::collections::HashSet;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use guardlight_core::adapters::{AdapterRegistry, BUILTIN_IMAGE};
use guardlight_core::bus::Publisher;
use guardlight_core::contracts::{ANALYZER_RESULT_TOPIC, PARSER_RESULT_TOPIC, REPORTER_RESULT_TOPIC};

use crate::bus::{InProcessBus, Subscription};

/// Subscribe a worker for every built-in adapter in `adapters`.
pub fn spawn_builtin_workers(
    adapters: &AdapterRegistry,
    bus: Arc<InProcessBus>,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();
    let mut served = HashSet::new();

    for parser in adapters.parsers().iter().filter(|p| p.image == BUILTIN_IMAGE) {
        let topic = parser.topic();
        if !served.insert(topic.clone()) {
            continue;
        }
        match parser.parser_type.as_str() {
            freetext::PARSER_TYPE => handles.push(serve(
                bus.subscribe(&topic),
                bus.clone(),
                PARSER_RESULT_TOPIC,
                freetext::parse,
                shutdown.clone(),
            )),
            other => warn!(parser = %parser.key, parser_type = other, "no built-in parser for type"),
        }
    }

    for analyzer in adapters.analyzers().iter().filter(|a| a.image == BUILTIN_IMAGE) {
        match analyzer.key.as_str() {
            word_search::KEY => handles.push(serve(
                bus.subscribe(&analyzer.topic()),
                bus.clone(),
                ANALYZER_RESULT_TOPIC,
                word_search::analyze,
                shutdown.clone(),
            )),
            other => warn!(analyzer = other, "no built-in analyzer with this key"),
        }
    }

    for reporter in adapters.reporters().iter().filter(|r| r.image == BUILTIN_IMAGE) {
        match reporter.key.as_str() {
            word_count::KEY => handles.push(serve(
                bus.subscribe(&reporter.topic()),
                bus.clone(),
                REPORTER_RESULT_TOPIC,
                word_count::report,
                shutdown.clone(),
            )),
            other => warn!(reporter = other, "no built-in reporter with this key"),
        }
    }

    info!(workers = handles.len(), "built-in adapters started");
    handles
}

/// Decode each request on `sub`, run `handler` and publish its reply on
/// `result_topic`. Requests that do not decode are dropped; the stale sweep
/// retries their jobs.
fn serve<Req, Resp, H>(
    mut sub: Subscription,
    bus: Arc<InProcessBus>,
    result_topic: &'static str,
    handler: H,
    shutdown: CancellationToken,
) -> JoinHandle<()>
where
    H: Fn(Req) -> Resp + Send + 'static,
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(payload) = sub.next(&shutdown).await {
            let request: Req = match serde_json::from_value(payload) {
                Ok(request) => request,
                Err(e) => {
                    warn!(topic = sub.topic(), error = %e, "undecodable adapter request");
                    continue;
                }
            };
            let reply = match serde_json::to_value(handler(request)) {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(topic = sub.topic(), error = %e, "failed to encode adapter reply");
                    continue;
                }
            };
            if let Err(e) = bus.publish(result_topic, reply).await {
                warn!(topic = result_topic, error = %e, "failed to publish adapter reply");
            }
        }
        debug!(topic = sub.topic(), "built-in adapter stopped");
    })
}
