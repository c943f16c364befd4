//! Pipeline requester: the producer-facing entry point.
//!
//! Validates a submission against the adapter registry, deduplicates it by
//! content digest, stores it with one waiting [`Analysis`] per requested
//! (theme, analyzer) pair and enqueues the parse job that starts the
//! pipeline. Validation failures are returned synchronously; nothing after
//! the parse job is enqueued reports back to the caller.

use std::sync::Arc;

use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::adapters::AdapterRegistry;
use crate::bus::{EventAction, EventSink, PipelineEvent};
use crate::contracts::ParserRequest;
use crate::ledger::JobLedger;
use crate::models::{Analysis, AnalysisInput, RawData, RequestOrigin, Submission};
use crate::payload::{JobData, ParseJobData};
use crate::store::{SubmissionInsert, SubmissionStore, ThemeSource};

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("no parser configured for mimetype '{0}'")]
    InvalidParser(String),
    #[error("invalid analyzer: {0}")]
    InvalidAnalyzer(String),
    #[error("no reporter configured with key '{0}'")]
    InvalidReporter(String),
    #[error("content is not valid base64: {0}")]
    InvalidContent(#[source] base64::DecodeError),
    #[error("content was already submitted as {0}")]
    DuplicateContent(Uuid),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl RequestError {
    /// The existing submission behind a duplicate.
    pub fn duplicate_of(&self) -> Option<Uuid> {
        match self {
            RequestError::DuplicateContent(id) => Some(*id),
            _ => None,
        }
    }
}

/// Raw content as submitted: base64 bytes plus the mimetype that selects
/// the parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedFile {
    pub content: String,
    pub mimetype: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedAnalyzer {
    pub key: String,
    #[serde(default)]
    pub inputs: Vec<AnalysisInput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedTheme {
    pub id: Uuid,
    #[serde(default)]
    pub reporter: Option<String>,
    pub analyzers: Vec<SubmittedAnalyzer>,
}

/// A user submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSubmission {
    pub title: String,
    pub content_type: String,
    #[serde(default)]
    pub category: String,
    pub file: SubmittedFile,
    pub themes: Vec<SubmittedTheme>,
}

/// A submission that names stored themes instead of spelling out analyzers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemedSubmission {
    pub title: String,
    pub content_type: String,
    #[serde(default)]
    pub category: String,
    pub file: SubmittedFile,
    pub theme_ids: Vec<Uuid>,
}

/// SHA-256 hex digest used for content deduplication.
pub fn content_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub struct Requester {
    ledger: Arc<JobLedger>,
    store: Arc<dyn SubmissionStore>,
    adapters: Arc<AdapterRegistry>,
    events: Arc<dyn EventSink>,
}

impl Requester {
    pub fn new(
        ledger: Arc<JobLedger>,
        store: Arc<dyn SubmissionStore>,
        adapters: Arc<AdapterRegistry>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            ledger,
            store,
            adapters,
            events,
        }
    }

    /// Accept a user submission and start its pipeline.
    pub async fn request_analysis(
        &self,
        submission: &AnalysisSubmission,
        owner_id: Uuid,
    ) -> Result<Uuid, RequestError> {
        self.submit(submission, owner_id, RequestOrigin::User).await
    }

    /// Accept a submission that references the owner's stored themes.
    ///
    /// Unknown theme ids are skipped, as are analyzers and inputs the theme
    /// no longer treats as active.
    pub async fn request_analysis_for_themes(
        &self,
        request: &ThemedSubmission,
        owner_id: Uuid,
        themes: &dyn ThemeSource,
    ) -> Result<Uuid, RequestError> {
        let selected = themes
            .themes_for_owner(owner_id)
            .await?
            .into_iter()
            .filter(|t| request.theme_ids.contains(&t.id))
            .map(|t| SubmittedTheme {
                id: t.id,
                reporter: t.reporter_key,
                analyzers: t
                    .analyzers
                    .into_iter()
                    .filter(|a| a.change.is_active())
                    .map(|a| SubmittedAnalyzer {
                        key: a.key,
                        inputs: a
                            .inputs
                            .into_iter()
                            .filter(|i| i.change.is_active())
                            .map(|i| AnalysisInput {
                                key: i.key,
                                value: i.value,
                            })
                            .collect(),
                    })
                    .collect(),
            })
            .collect();

        let submission = AnalysisSubmission {
            title: request.title.clone(),
            content_type: request.content_type.clone(),
            category: request.category.clone(),
            file: request.file.clone(),
            themes: selected,
        };
        self.submit(&submission, owner_id, RequestOrigin::Dataloom)
            .await
    }

    pub async fn submit(
        &self,
        submission: &AnalysisSubmission,
        owner_id: Uuid,
        origin: RequestOrigin,
    ) -> Result<Uuid, RequestError> {
        let parser = self
            .adapters
            .parser_for_mimetype(&submission.file.mimetype)
            .ok_or_else(|| RequestError::InvalidParser(submission.file.mimetype.clone()))?;
        self.validate_themes(&submission.themes)?;

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&submission.file.content)
            .map_err(RequestError::InvalidContent)?;
        let hash = content_digest(&bytes);
        if let Some(existing) = self.store.find_submission_by_hash(&hash).await? {
            info!(submission_id = %existing, "duplicate content submitted");
            return Err(RequestError::DuplicateContent(existing));
        }

        let id = Uuid::new_v4();
        let analyses = submission
            .themes
            .iter()
            .flat_map(|theme| {
                theme.analyzers.iter().map(move |a| {
                    Analysis::new(id, theme.id, a.key.clone(), theme.reporter.clone(), a.inputs.clone())
                })
            })
            .collect();
        let record = Submission {
            id,
            owner_id,
            title: submission.title.clone(),
            category: submission.category.clone(),
            content_type: submission.content_type.clone(),
            origin,
            raw: RawData {
                hash,
                content: bytes,
                mimetype: submission.file.mimetype.clone(),
                processed_text: None,
            },
            analyses,
            created_at: Utc::now(),
        };
        if let SubmissionInsert::Duplicate(existing) = self.store.create_submission(&record).await? {
            info!(submission_id = %existing, "duplicate content submitted concurrently");
            return Err(RequestError::DuplicateContent(existing));
        }

        let job_id = self.ledger.create_id();
        let data = JobData::Parse(ParseJobData {
            adapter_key: parser.key.clone(),
            image: parser.image.clone(),
            topic: parser.topic(),
            request: ParserRequest {
                job_id,
                analysis_id: id,
                content: submission.file.content.clone(),
            },
        });
        if let Err(e) = self.ledger.enqueue_job(job_id, &data, &parser.group_key()).await {
            // Without its parse job the submission would block the same
            // content forever, so take it back out.
            warn!(submission_id = %id, error = %e, "parse job not enqueued, removing submission");
            if let Err(cleanup) = self.store.delete_submission(id).await {
                error!(submission_id = %id, error = %cleanup, "failed to remove submission without parse job");
            }
            return Err(RequestError::Internal(e.into()));
        }

        info!(
            submission_id = %id,
            %owner_id,
            %origin,
            analyses = record.analyses.len(),
            "analysis requested"
        );
        if let Err(e) = self
            .events
            .send(owner_id, PipelineEvent::update(EventAction::AnalysisRequested, id))
            .await
        {
            warn!(submission_id = %id, error = %e, "failed to emit pipeline event");
        }
        Ok(id)
    }

    fn validate_themes(&self, themes: &[SubmittedTheme]) -> Result<(), RequestError> {
        for theme in themes {
            if let Some(key) = &theme.reporter {
                if self.adapters.reporter(key).is_none() {
                    return Err(RequestError::InvalidReporter(key.clone()));
                }
            }
            for requested in &theme.analyzers {
                let analyzer = self
                    .adapters
                    .analyzer(&requested.key)
                    .ok_or_else(|| RequestError::InvalidAnalyzer(format!("unknown analyzer '{}'", requested.key)))?;
                for wanted in &analyzer.inputs {
                    if !requested.inputs.iter().any(|i| i.key == wanted.key) {
                        return Err(RequestError::InvalidAnalyzer(format!(
                            "analyzer '{}' is missing input '{}'",
                            analyzer.key, wanted.key
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}
