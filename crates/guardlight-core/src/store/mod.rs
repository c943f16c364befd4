//! Storage abstraction for the Guardlight engine.
//!
//! Two narrow traits split persistence by concern:
//!
//! - [`JobStore`] holds dispatchable [`Job`] records. It is read by the
//!   dispatcher and the stale sweep, and written through the job ledger.
//! - [`SubmissionStore`] holds submissions and their analyses. The pipeline
//!   requester and allocator are its only writers.
//!
//! Implementations must be `Send + Sync` to work with async runtimes, and
//! must make the two conditional writes ([`JobStore::update_job_status`] and
//! [`SubmissionStore::compare_and_swap_analysis`]) atomic for a single row.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{Analysis, Job, JobStatus, Submission, Theme};

/// Result of [`SubmissionStore::create_submission`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionInsert {
    Created,
    /// A submission with the same content hash already exists.
    Duplicate(Uuid),
}

/// Durable record of every unit of work.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | `save_job` | Insert a new job |
/// | `get_job` | Fetch one job by id |
/// | `get_non_finished_jobs` | Every job not `Finished`, oldest first |
/// | `update_job_status` | Conditional status write |
/// | `delete_job` | Drop a job record |
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn save_job(&self, job: &Job) -> Result<()>;

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>>;

    /// Jobs in store iteration order (creation order).
    async fn get_non_finished_jobs(&self) -> Result<Vec<Job>>;

    /// Set status, description and retry count, and touch `updated_at`,
    /// but only while the job is still in `expected`. Returns `false` when
    /// the job is missing or its status has moved on.
    async fn update_job_status(
        &self,
        id: Uuid,
        expected: JobStatus,
        status: JobStatus,
        description: &str,
        retry_count: u32,
    ) -> Result<bool>;

    async fn delete_job(&self, id: Uuid) -> Result<()>;
}

/// Durable record of submissions and their analyses.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Insert a submission with all of its analyses. Fails over to
    /// [`SubmissionInsert::Duplicate`] when the content hash is taken.
    async fn create_submission(&self, submission: &Submission) -> Result<SubmissionInsert>;

    /// Remove a submission with its analyses. Returns `false` when absent.
    async fn delete_submission(&self, id: Uuid) -> Result<bool>;

    async fn get_submission(&self, id: Uuid) -> Result<Option<Submission>>;

    async fn find_submission_by_hash(&self, hash: &str) -> Result<Option<Uuid>>;

    /// Store the parser output and drop the raw bytes.
    async fn update_processed_text(&self, submission_id: Uuid, text: &str) -> Result<bool>;

    async fn get_analyses_for_submission(&self, submission_id: Uuid) -> Result<Vec<Analysis>>;

    async fn get_analysis(&self, id: Uuid) -> Result<Option<Analysis>>;

    /// The analysis whose fragment list contains `job_id`.
    async fn find_analysis_by_fragment(&self, job_id: Uuid) -> Result<Option<Analysis>>;

    /// Write the mutable parts of `analysis` (status, score, content,
    /// fragments, report) if its stored version still equals
    /// `expected_version`, bumping the version. Returns `false` on conflict.
    async fn compare_and_swap_analysis(
        &self,
        analysis: &Analysis,
        expected_version: i64,
    ) -> Result<bool>;

    async fn get_owner_for_analysis(&self, analysis_id: Uuid) -> Result<Option<Uuid>>;

    /// Newest first.
    async fn list_submissions_for_owner(&self, owner_id: Uuid) -> Result<Vec<Submission>>;
}

/// Resolves theme ids for automated submissions.
#[async_trait]
pub trait ThemeSource: Send + Sync {
    async fn themes_for_owner(&self, owner_id: Uuid) -> Result<Vec<Theme>>;
}
