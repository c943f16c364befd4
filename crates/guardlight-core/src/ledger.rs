//! Job ledger: the single write path for job records.
//!
//! Producers mint ids and enqueue typed payloads here; the dispatcher, the
//! allocator and the stale sweep move jobs through their status machine
//! here. Every status write is checked against
//! [`JobStatus::can_transition_to`] and applied conditionally on the status
//! that was read, so two writers racing on the same job cannot both win.
//!
//! # Stale sweep
//!
//! A job `Inprogress` whose `updated_at` is older than
//! [`LedgerConfig::stale_after`] is assumed lost. If it has already been
//! retried `max_retries` times it becomes `Error` ("Timed out"); otherwise
//! it goes back to `Queued` with its retry count bumped.
//!
//! # Failure hook
//!
//! Whatever moves a job to `Error` (sweep, dispatcher rejection, worker
//! failure), the registered [`JobFailureHook`] hears about it after the
//! write, so the records that track the job can be failed with it.

use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{Job, JobStatus};
use crate::payload::{JobData, PayloadError};
use crate::store::JobStore;

pub const TIMED_OUT: &str = "Timed out";
pub const LONG_RUNNING: &str = "long running task";

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("job {0} not found")]
    NotFound(Uuid),
    #[error("job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },
    #[error("job {0} changed status concurrently")]
    Conflict(Uuid),
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error("job store failure: {0:#}")]
    Persistence(#[source] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// How long a job may sit `Inprogress` without an update.
    pub stale_after: chrono::Duration,
    /// Retries allowed before a failing job turns `Error`.
    pub max_retries: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            stale_after: chrono::Duration::seconds(60),
            max_retries: 3,
        }
    }
}

/// Counts from one stale sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub requeued: usize,
    pub timed_out: usize,
}

/// Called once for every job the ledger moves to `Error`, with the job as
/// written.
#[async_trait]
pub trait JobFailureHook: Send + Sync {
    async fn job_failed(&self, job: &Job);
}

pub struct JobLedger {
    store: Arc<dyn JobStore>,
    config: LedgerConfig,
    failure_hook: OnceLock<Weak<dyn JobFailureHook>>,
}

impl JobLedger {
    pub fn new(store: Arc<dyn JobStore>, config: LedgerConfig) -> Self {
        Self {
            store,
            config,
            failure_hook: OnceLock::new(),
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Register the hook told about failed jobs. Held weakly, since the
    /// hook usually owns this ledger. Only the first registration counts.
    pub fn set_failure_hook(&self, hook: Weak<dyn JobFailureHook>) {
        if self.failure_hook.set(hook).is_err() {
            warn!("job failure hook already registered, keeping the first");
        }
    }

    /// A fresh job id. Never touches the store.
    pub fn create_id(&self) -> Uuid {
        Uuid::new_v4()
    }

    /// Persist a new `Queued` job carrying `data`.
    pub async fn enqueue_job(&self, id: Uuid, data: &JobData, group_key: &str) -> Result<Job, LedgerError> {
        let now = Utc::now();
        let job = Job {
            id,
            status: JobStatus::Queued,
            job_type: data.job_type(),
            group_key: group_key.to_string(),
            status_description: String::new(),
            retry_count: 0,
            data: data.encode()?,
            created_at: now,
            updated_at: now,
        };
        self.store
            .save_job(&job)
            .await
            .map_err(LedgerError::Persistence)?;
        debug!(job_id = %id, job_type = %job.job_type, group_key, "job enqueued");
        Ok(job)
    }

    pub async fn get_job(&self, id: Uuid) -> Result<Option<Job>, LedgerError> {
        self.store.get_job(id).await.map_err(LedgerError::Persistence)
    }

    /// Move a job to `status`. A job reaching `Finished` is deleted.
    pub async fn update_job_status(
        &self,
        id: Uuid,
        status: JobStatus,
        description: &str,
        retry_count: u32,
    ) -> Result<(), LedgerError> {
        let job = self.get_job(id).await?.ok_or(LedgerError::NotFound(id))?;
        if !job.status.can_transition_to(status) {
            return Err(LedgerError::InvalidTransition {
                id,
                from: job.status,
                to: status,
            });
        }

        let applied = self
            .store
            .update_job_status(id, job.status, status, description, retry_count)
            .await
            .map_err(LedgerError::Persistence)?;
        if !applied {
            return Err(LedgerError::Conflict(id));
        }
        debug!(job_id = %id, from = %job.status, to = %status, retry_count, "job status updated");

        if status == JobStatus::Error {
            if let Some(hook) = self.failure_hook.get().and_then(Weak::upgrade) {
                let failed = Job {
                    status,
                    status_description: description.to_string(),
                    retry_count,
                    ..job
                };
                hook.job_failed(&failed).await;
            }
        }
        if status == JobStatus::Finished {
            self.store
                .delete_job(id)
                .await
                .map_err(LedgerError::Persistence)?;
        }
        Ok(())
    }

    /// Requeue a failed job, or fail it for good once its retries are spent.
    /// Returns the status the job was moved to.
    pub async fn requeue_or_fail(
        &self,
        id: Uuid,
        retry_count: u32,
        retry_reason: &str,
        exhausted_reason: &str,
    ) -> Result<JobStatus, LedgerError> {
        if retry_count >= self.config.max_retries {
            self.update_job_status(id, JobStatus::Error, exhausted_reason, retry_count)
                .await?;
            warn!(job_id = %id, retry_count, reason = exhausted_reason, "job retries exhausted");
            Ok(JobStatus::Error)
        } else {
            self.update_job_status(id, JobStatus::Queued, retry_reason, retry_count + 1)
                .await?;
            info!(job_id = %id, retry_count = retry_count + 1, reason = retry_reason, "job requeued");
            Ok(JobStatus::Queued)
        }
    }

    pub async fn get_all_non_finished_jobs(&self) -> Result<Vec<Job>, LedgerError> {
        self.store
            .get_non_finished_jobs()
            .await
            .map_err(LedgerError::Persistence)
    }

    /// Reclaim jobs stuck `Inprogress` as of `now`.
    ///
    /// A job that changed under the sweep (its result arrived, or another
    /// sweep got there first) is skipped.
    pub async fn sweep_stale_jobs(&self, now: DateTime<Utc>) -> Result<SweepReport, LedgerError> {
        let mut report = SweepReport::default();
        for job in self.get_all_non_finished_jobs().await? {
            if !job.is_stale(now, self.config.stale_after) {
                continue;
            }
            match self
                .requeue_or_fail(job.id, job.retry_count, LONG_RUNNING, TIMED_OUT)
                .await
            {
                Ok(JobStatus::Error) => report.timed_out += 1,
                Ok(_) => report.requeued += 1,
                Err(LedgerError::NotFound(_) | LedgerError::Conflict(_) | LedgerError::InvalidTransition { .. }) => {
                    debug!(job_id = %job.id, "stale job changed during sweep, skipping");
                }
                Err(e) => return Err(e),
            }
        }
        if report != SweepReport::default() {
            info!(requeued = report.requeued, timed_out = report.timed_out, "stale sweep reclaimed jobs");
        }
        Ok(report)
    }
}
