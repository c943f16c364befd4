//! `gl submit`: queue a submission from a JSON request file.
//!
//! The file holds either a full request with inline themes:
//!
//! ```json
//! {
//!   "title": "Lion",
//!   "contentType": "book",
//!   "file": { "content": "<base64>", "mimetype": "freetext" },
//!   "themes": [{
//!     "id": "…",
//!     "reporter": "word_count",
//!     "analyzers": [{ "key": "word_search",
//!                     "inputs": [{ "key": "strict_words", "value": "magic" },
//!                                { "key": "threshold", "value": "0" }] }]
//!   }]
//! }
//! ```
//!
//! or the same without `themes` and with `"themeIds": [...]`, naming themes
//! stored with `gl theme add`.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use uuid::Uuid;

use guardlight_core::requester::{AnalysisSubmission, RequestError, ThemedSubmission};

use crate::config::Config;
use crate::engine::Engine;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SubmitRequest {
    Direct(AnalysisSubmission),
    Themed(ThemedSubmission),
}

pub fn read_request(path: &Path) -> Result<SubmitRequest> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read request file: {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| {
        format!(
            "Invalid request in {}: expected `themes` or `themeIds`",
            path.display()
        )
    })
}

pub async fn submit(
    engine: &Engine,
    request: &SubmitRequest,
    owner_id: Uuid,
) -> Result<Uuid, RequestError> {
    match request {
        SubmitRequest::Direct(sub) => engine.requester.request_analysis(sub, owner_id).await,
        SubmitRequest::Themed(sub) => {
            engine
                .requester
                .request_analysis_for_themes(sub, owner_id, engine.store.as_ref())
                .await
        }
    }
}

/// CLI entry point for `gl submit <file> --owner <uuid>`.
pub async fn run_submit(config: &Config, path: &Path, owner_id: Uuid) -> Result<()> {
    let request = read_request(path)?;
    let engine = Engine::open(config).await?;
    let result = submit(&engine, &request, owner_id).await;
    engine.close().await;

    match result {
        Ok(id) => {
            println!("Submission queued: {id}");
            Ok(())
        }
        Err(e) => Err(anyhow::Error::new(e).context("Submission rejected")),
    }
}
