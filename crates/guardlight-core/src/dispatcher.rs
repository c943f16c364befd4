//! Dispatcher: admission control for queued jobs.
//!
//! Each [`Dispatcher::tick`] rebuilds the per-group in-flight counts from
//! the store and publishes every queued job whose group has room. Nothing
//! is remembered between ticks, so a restarted process picks up exactly
//! where the store says it is.
//!
//! # Algorithm
//!
//! 1. Load all non-finished jobs; count `Inprogress` jobs per `group_key`.
//! 2. For each `Queued` job, in store order:
//!    - decode its payload and look up the adapter's concurrency limit;
//!      an undecodable payload or an unknown adapter fails the job;
//!    - if `count + 1 > limit`, leave it queued for a later tick;
//!    - otherwise claim it (`Queued → Inprogress`), bump the count and
//!      publish its request to the adapter topic.
//! 3. A failed publish hands the job back (`Inprogress → Queued`, retry
//!    count bumped) or fails it once retries are spent.
//!
//! Claiming before publishing means a fast worker can never report back on
//! a job that still looks queued.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::adapters::AdapterRegistry;
use crate::bus::Publisher;
use crate::ledger::{JobLedger, LedgerError};
use crate::models::{Job, JobStatus};

pub const MALFORMED_JOB_DATA: &str = "Malformed job data";

/// In-flight job counts per group, valid for a single tick.
#[derive(Debug, Default, Clone)]
pub struct GroupCounts(HashMap<String, usize>);

impl GroupCounts {
    pub fn from_jobs(jobs: &[Job]) -> Self {
        let mut counts = HashMap::new();
        for job in jobs.iter().filter(|j| j.status == JobStatus::Inprogress) {
            *counts.entry(job.group_key.clone()).or_insert(0) += 1;
        }
        Self(counts)
    }

    pub fn get(&self, group_key: &str) -> usize {
        self.0.get(group_key).copied().unwrap_or(0)
    }

    /// Whether one more job fits under `limit`.
    pub fn admits(&self, group_key: &str, limit: usize) -> bool {
        self.get(group_key) + 1 <= limit
    }

    fn claim(&mut self, group_key: &str) {
        *self.0.entry(group_key.to_string()).or_insert(0) += 1;
    }

    fn release(&mut self, group_key: &str) {
        if let Some(n) = self.0.get_mut(group_key) {
            *n = n.saturating_sub(1);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Dispatched,
    Deferred,
    Rejected,
    Requeued,
    Skipped,
}

/// Counts from one tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub dispatched: usize,
    /// Left queued because the group was full.
    pub deferred: usize,
    /// Failed outright: unknown adapter or undecodable payload.
    pub rejected: usize,
    /// Handed back after a failed publish.
    pub requeued: usize,
}

pub struct Dispatcher {
    ledger: Arc<JobLedger>,
    publisher: Arc<dyn Publisher>,
    adapters: Arc<AdapterRegistry>,
}

impl Dispatcher {
    pub fn new(
        ledger: Arc<JobLedger>,
        publisher: Arc<dyn Publisher>,
        adapters: Arc<AdapterRegistry>,
    ) -> Self {
        Self {
            ledger,
            publisher,
            adapters,
        }
    }

    /// Run one dispatch pass over the store.
    pub async fn tick(&self) -> Result<TickReport, LedgerError> {
        let jobs = self.ledger.get_all_non_finished_jobs().await?;
        let mut counts = GroupCounts::from_jobs(&jobs);
        let mut report = TickReport::default();

        for job in jobs.iter().filter(|j| j.status == JobStatus::Queued) {
            match self.admit(job, &mut counts).await {
                Ok(Admission::Dispatched) => report.dispatched += 1,
                Ok(Admission::Deferred) => report.deferred += 1,
                Ok(Admission::Rejected) => report.rejected += 1,
                Ok(Admission::Requeued) => report.requeued += 1,
                Ok(Admission::Skipped) => {}
                Err(e) => error!(job_id = %job.id, error = %e, "failed to dispatch job"),
            }
        }

        if report.dispatched > 0 || report.rejected > 0 || report.requeued > 0 {
            info!(
                dispatched = report.dispatched,
                deferred = report.deferred,
                rejected = report.rejected,
                requeued = report.requeued,
                "dispatch tick"
            );
        }
        Ok(report)
    }

    async fn admit(&self, job: &Job, counts: &mut GroupCounts) -> Result<Admission, LedgerError> {
        let data = match job.decode() {
            Ok(data) => data,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "undecodable job payload");
                return self.reject(job, MALFORMED_JOB_DATA).await;
            }
        };

        let Some(limit) = self.adapters.concurrency_for(&data) else {
            let reason = format!(
                "{} adapter '{}' is not configured",
                job.job_type,
                data.adapter_key()
            );
            warn!(job_id = %job.id, adapter = data.adapter_key(), "unknown adapter");
            return self.reject(job, &reason).await;
        };

        if !counts.admits(&job.group_key, limit) {
            debug!(
                job_id = %job.id,
                group_key = %job.group_key,
                in_flight = counts.get(&job.group_key),
                limit,
                "group at capacity, job stays queued"
            );
            return Ok(Admission::Deferred);
        }

        let body = match data.request_body() {
            Ok(body) => body,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "cannot build request body");
                return self.reject(job, MALFORMED_JOB_DATA).await;
            }
        };

        match self
            .ledger
            .update_job_status(job.id, JobStatus::Inprogress, &job.status_description, job.retry_count)
            .await
        {
            Ok(()) => {}
            Err(LedgerError::Conflict(_) | LedgerError::NotFound(_) | LedgerError::InvalidTransition { .. }) => {
                debug!(job_id = %job.id, "job changed before dispatch, skipping");
                return Ok(Admission::Skipped);
            }
            Err(e) => return Err(e),
        }
        counts.claim(&job.group_key);

        if let Err(e) = self.publisher.publish(data.topic(), body).await {
            counts.release(&job.group_key);
            warn!(job_id = %job.id, topic = data.topic(), error = %e, "publish failed");
            let reason = format!("publish failed: {e}");
            let status = self
                .ledger
                .requeue_or_fail(job.id, job.retry_count, &reason, &reason)
                .await?;
            return Ok(if status == JobStatus::Error {
                Admission::Rejected
            } else {
                Admission::Requeued
            });
        }

        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            group_key = %job.group_key,
            topic = data.topic(),
            image = data.image(),
            "job dispatched"
        );
        Ok(Admission::Dispatched)
    }

    async fn reject(&self, job: &Job, reason: &str) -> Result<Admission, LedgerError> {
        self.ledger
            .update_job_status(job.id, JobStatus::Error, reason, job.retry_count)
            .await?;
        Ok(Admission::Rejected)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use uuid::Uuid;

    use super::*;
    use crate::contracts::AnalyzerRequest;
    use crate::models::{AnalysisInput, JobType};
    use crate::payload::{AnalyzeJobData, JobData};
    use crate::store::JobStore;
    use crate::testutil::Harness;

    fn word_search(concurrency: usize) -> AdapterRegistry {
        let mut analyzer = AdapterRegistry::builtin().analyzer("word_search").unwrap().clone();
        analyzer.concurrency = concurrency;
        AdapterRegistry::new(vec![], vec![analyzer], vec![])
    }

    fn analyze_data(id: Uuid, key: &str) -> JobData {
        JobData::Analyze(AnalyzeJobData {
            adapter_key: key.into(),
            image: "builtin".into(),
            topic: format!("analyzer.{key}"),
            request: AnalyzerRequest {
                job_id: id,
                analysis_id: Uuid::new_v4(),
                content: "Running and walking".into(),
                inputs: vec![AnalysisInput {
                    key: "strict_words".into(),
                    value: "Running, Walking".into(),
                }],
            },
        })
    }

    async fn enqueue(h: &Harness, key: &str) -> Uuid {
        let id = h.ledger.create_id();
        h.ledger
            .enqueue_job(id, &analyze_data(id, key), &format!("analyzer.{key}"))
            .await
            .unwrap();
        id
    }

    async fn status(h: &Harness, id: Uuid) -> Option<JobStatus> {
        h.ledger.get_job(id).await.unwrap().map(|j| j.status)
    }

    #[test]
    fn test_group_counts_only_inprogress() {
        let now = chrono::Utc::now();
        let mk = |status, group: &str| Job {
            id: Uuid::new_v4(),
            status,
            job_type: JobType::Analyze,
            group_key: group.into(),
            status_description: String::new(),
            retry_count: 0,
            data: String::new(),
            created_at: now,
            updated_at: now,
        };
        let jobs = vec![
            mk(JobStatus::Inprogress, "analyzer.a"),
            mk(JobStatus::Inprogress, "analyzer.a"),
            mk(JobStatus::Queued, "analyzer.a"),
            mk(JobStatus::Error, "analyzer.b"),
        ];
        let counts = GroupCounts::from_jobs(&jobs);
        assert_eq!(counts.get("analyzer.a"), 2);
        assert_eq!(counts.get("analyzer.b"), 0);
        assert!(counts.admits("analyzer.a", 3));
        assert!(!counts.admits("analyzer.a", 2));
    }

    #[tokio::test]
    async fn test_concurrency_one_dispatches_one_per_tick() {
        let h = Harness::new(word_search(1));
        let first = enqueue(&h, "word_search").await;
        let second = enqueue(&h, "word_search").await;

        let report = h.dispatcher.tick().await.unwrap();
        assert_eq!(report.dispatched, 1);
        assert_eq!(report.deferred, 1);
        assert_eq!(status(&h, first).await, Some(JobStatus::Inprogress));
        assert_eq!(status(&h, second).await, Some(JobStatus::Queued));
        assert_eq!(h.publisher.topics(), vec!["analyzer.word_search"]);

        let report = h.dispatcher.tick().await.unwrap();
        assert_eq!(report.dispatched, 0);
        assert_eq!(status(&h, second).await, Some(JobStatus::Queued));

        h.ledger
            .update_job_status(first, JobStatus::Finished, "", 0)
            .await
            .unwrap();
        let report = h.dispatcher.tick().await.unwrap();
        assert_eq!(report.dispatched, 1);
        assert_eq!(status(&h, second).await, Some(JobStatus::Inprogress));
    }

    #[tokio::test]
    async fn test_in_flight_never_exceeds_limit() {
        let h = Harness::new(word_search(3));
        for _ in 0..10 {
            enqueue(&h, "word_search").await;
        }
        for _ in 0..3 {
            h.dispatcher.tick().await.unwrap();
            let jobs = h.ledger.get_all_non_finished_jobs().await.unwrap();
            let in_flight = jobs
                .iter()
                .filter(|j| j.status == JobStatus::Inprogress)
                .count();
            assert_eq!(in_flight, 3);
        }
    }

    #[tokio::test]
    async fn test_unknown_adapter_fails_job() {
        let h = Harness::new(AdapterRegistry::builtin());
        let id = enqueue(&h, "llm_moderation").await;
        let report = h.dispatcher.tick().await.unwrap();
        assert_eq!(report.rejected, 1);
        let job = h.ledger.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert!(job.status_description.contains("llm_moderation"));
        assert!(h.publisher.topics().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_payload_fails_job() {
        let h = Harness::new(AdapterRegistry::builtin());
        let now = chrono::Utc::now();
        let id = Uuid::new_v4();
        h.store
            .save_job(&Job {
                id,
                status: JobStatus::Queued,
                job_type: JobType::Report,
                group_key: "reporter.word_count".into(),
                status_description: String::new(),
                retry_count: 0,
                data: "{\"garbage\":true}".into(),
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        h.dispatcher.tick().await.unwrap();
        let job = h.ledger.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.status_description, MALFORMED_JOB_DATA);
    }

    #[tokio::test]
    async fn test_publish_failure_requeues_then_fails() {
        let h = Harness::new(AdapterRegistry::builtin());
        h.publisher.fail.store(true, Ordering::SeqCst);
        let id = enqueue(&h, "word_search").await;

        for expected_retry in 1..=3 {
            let report = h.dispatcher.tick().await.unwrap();
            assert_eq!(report.requeued, 1);
            let job = h.ledger.get_job(id).await.unwrap().unwrap();
            assert_eq!(job.status, JobStatus::Queued);
            assert_eq!(job.retry_count, expected_retry);
        }

        let report = h.dispatcher.tick().await.unwrap();
        assert_eq!(report.rejected, 1);
        let job = h.ledger.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert!(job.status_description.contains("bus unavailable"));
    }
}
