//! Pipeline allocator: consumes worker results and schedules the next stage.
//!
//! | Result topic | Effect |
//! |--------------|--------|
//! | `parser.result` | store normalized text, fan out one analyze job per analyzer chunk |
//! | `analyzer.result` | fold the fragment into its analysis, enqueue a report job on completion |
//! | `reporter.result` | store the reporter score on the analysis |
//!
//! # Fan-in isolation
//!
//! Results for the same analysis may arrive concurrently, out of order and
//! more than once. Every change to an [`Analysis`] goes through
//! [`Allocator::update_analysis`]: read the row, apply the change in memory,
//! then write it back with [`SubmissionStore::compare_and_swap_analysis`]
//! against the version that was read. A lost race re-reads and re-applies.
//! Because fragment updates on terminal fragments are no-ops, a duplicate
//! delivery never reaches the write, and the edge to `Finished` is observed
//! by exactly one successful swap, so exactly one report job is enqueued.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::adapters::AdapterRegistry;
use crate::bus::{EventAction, EventSink, PipelineEvent};
use crate::chunk::chunk_text;
use crate::contracts::{
    AnalyzerRequest, AnalyzerResponse, ParserResponse, ReporterRequest, ReporterResponse,
    ResultStatus, ANALYZER_RESULT_TOPIC, PARSER_RESULT_TOPIC, REPORTER_RESULT_TOPIC,
};
use crate::ledger::{JobFailureHook, JobLedger, LedgerError};
use crate::models::{Analysis, FragmentRecord, FragmentUpdate, Job, JobStatus, JobType};
use crate::payload::{AnalyzeJobData, JobData, ReportJobData};
use crate::store::SubmissionStore;

/// Attempts at a compare-and-swap before giving up on an analysis update.
pub const MAX_CAS_ATTEMPTS: usize = 16;

/// What handling one result message amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Parse result accepted; `jobs` analyze jobs were enqueued.
    FannedOut { jobs: usize },
    /// The result changed an analysis.
    Applied,
    /// The worker reported a failure; the job and its analysis were failed.
    Failed,
    /// Re-delivery of a result that was already applied.
    Duplicate,
    /// Nothing in the store matches the result any more.
    Discarded,
}

pub struct Allocator {
    ledger: Arc<JobLedger>,
    store: Arc<dyn SubmissionStore>,
    adapters: Arc<AdapterRegistry>,
    events: Arc<dyn EventSink>,
}

impl Allocator {
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

    /// Route a raw result message by its topic.
    pub async fn handle_message(&self, topic: &str, payload: serde_json::Value) -> Result<Outcome> {
        match topic {
            PARSER_RESULT_TOPIC => self.on_parse_result(serde_json::from_value(payload)?).await,
            ANALYZER_RESULT_TOPIC => self.on_analyze_result(serde_json::from_value(payload)?).await,
            REPORTER_RESULT_TOPIC => self.on_report_result(serde_json::from_value(payload)?).await,
            other => bail!("no result handler for topic '{other}'"),
        }
    }

    /// Handle a parser reply. `analysis_id` on parse messages is the
    /// submission id.
    pub async fn on_parse_result(&self, resp: ParserResponse) -> Result<Outcome> {
        let submission_id = resp.analysis_id;
        let Some(job) = self.ledger.get_job(resp.job_id).await? else {
            warn!(job_id = %resp.job_id, %submission_id, "parse result for unknown job, discarding");
            return Ok(Outcome::Discarded);
        };

        if resp.status == ResultStatus::Error {
            self.settle_job(job.id, JobStatus::Error, &resp.text).await;
            let failed = self.fail_submission(submission_id).await?;
            warn!(job_id = %job.id, %submission_id, analyses = failed, reason = %resp.text, "parser reported failure");
            return Ok(Outcome::Failed);
        }

        if !self
            .store
            .update_processed_text(submission_id, &resp.text)
            .await?
        {
            warn!(job_id = %job.id, %submission_id, "parse result for missing submission");
            self.settle_job(job.id, JobStatus::Error, "Submission not found")
                .await;
            return Ok(Outcome::Discarded);
        }
        // A reply that outlived its job (timed out by the sweep) still
        // carries good text, so fan-out goes ahead either way.
        self.settle_job(job.id, JobStatus::Finished, "").await;

        let jobs = self.fan_out(submission_id, &resp.text).await?;
        info!(%submission_id, jobs, "submission parsed and fanned out");
        Ok(Outcome::FannedOut { jobs })
    }

    /// Split `text` per analyzer and enqueue one analyze job per chunk.
    ///
    /// The fragment list is stored on the analysis before any job exists, so
    /// no result can arrive for a fragment the analysis does not know about.
    /// An analysis that already has fragments is left alone.
    async fn fan_out(&self, submission_id: Uuid, text: &str) -> Result<usize> {
        let mut total = 0;
        for analysis in self.store.get_analyses_for_submission(submission_id).await? {
            if !analysis.jobs.is_empty() {
                debug!(analysis_id = %analysis.id, "analysis already fanned out");
                continue;
            }
            let Some(analyzer) = self.adapters.analyzer(&analysis.analyzer_key) else {
                error!(analysis_id = %analysis.id, analyzer = %analysis.analyzer_key, "analyzer not configured");
                self.update_analysis(analysis.id, mark_failed).await?;
                continue;
            };

            let payloads: Vec<(Uuid, JobData)> = chunk_text(text, analyzer.context_window)
                .into_iter()
                .map(|chunk| {
                    let job_id = self.ledger.create_id();
                    let data = JobData::Analyze(AnalyzeJobData {
                        adapter_key: analyzer.key.clone(),
                        image: analyzer.image.clone(),
                        topic: analyzer.topic(),
                        request: AnalyzerRequest {
                            job_id,
                            analysis_id: analysis.id,
                            content: chunk.text,
                            inputs: analysis.inputs.clone(),
                        },
                    });
                    (job_id, data)
                })
                .collect();
            let fragments: Vec<FragmentRecord> = payloads
                .iter()
                .map(|(id, _)| FragmentRecord::waiting(*id))
                .collect();

            let attached = self
                .update_analysis(analysis.id, |a| {
                    if a.attach_fragments(fragments.clone()) {
                        FragmentUpdate::Applied { completed: false }
                    } else {
                        FragmentUpdate::AlreadyApplied
                    }
                })
                .await?;
            if !matches!(attached, Some((_, update)) if update.is_applied()) {
                continue;
            }

            let group_key = analyzer.group_key();
            for (job_id, data) in payloads {
                if let Err(e) = self.ledger.enqueue_job(job_id, &data, &group_key).await {
                    error!(%job_id, analysis_id = %analysis.id, error = %e, "failed to enqueue analyze job");
                    self.update_analysis(analysis.id, |a| a.fail_fragment(job_id))
                        .await?;
                    continue;
                }
                total += 1;
            }
            info!(
                analysis_id = %analysis.id,
                analyzer = %analyzer.key,
                fragments = fragments.len(),
                "analysis fanned out"
            );
        }
        Ok(total)
    }

    /// Handle an analyzer reply for one fragment.
    pub async fn on_analyze_result(&self, resp: AnalyzerResponse) -> Result<Outcome> {
        let Some(found) = self.store.find_analysis_by_fragment(resp.job_id).await? else {
            warn!(job_id = %resp.job_id, "no analysis tracks this fragment, discarding result");
            self.settle_job(resp.job_id, JobStatus::Finished, "").await;
            return Ok(Outcome::Discarded);
        };

        let success = resp.status == ResultStatus::Success;
        let report_job_id = self.ledger.create_id();
        let updated = self
            .update_analysis(found.id, |a| {
                let update = if success {
                    a.finish_fragment(resp.job_id, &resp.results, resp.score)
                } else {
                    a.fail_fragment(resp.job_id)
                };
                if update == (FragmentUpdate::Applied { completed: true }) {
                    let reporter = a.reporter_key.as_deref().and_then(|k| self.adapters.reporter(k));
                    if reporter.is_some() {
                        a.report = Some(FragmentRecord::waiting(report_job_id));
                    }
                }
                update
            })
            .await?;
        let Some((analysis, update)) = updated else {
            warn!(job_id = %resp.job_id, analysis_id = %found.id, "analysis vanished, discarding result");
            return Ok(Outcome::Discarded);
        };

        if success {
            self.settle_job(resp.job_id, JobStatus::Finished, "").await;
        } else {
            self.settle_job(resp.job_id, JobStatus::Error, &resp.results.join("; "))
                .await;
        }

        match update {
            FragmentUpdate::AlreadyApplied => {
                debug!(job_id = %resp.job_id, analysis_id = %analysis.id, "duplicate analyze result ignored");
                Ok(Outcome::Duplicate)
            }
            FragmentUpdate::UnknownFragment => Ok(Outcome::Discarded),
            FragmentUpdate::Applied { completed } => {
                debug!(
                    job_id = %resp.job_id,
                    analysis_id = %analysis.id,
                    status = %analysis.status,
                    score = analysis.score,
                    "fragment updated"
                );
                self.notify(analysis.id, EventAction::AnalysisDone).await;

                if completed {
                    info!(analysis_id = %analysis.id, score = analysis.score, "analysis finished");
                    match analysis.report {
                        Some(report) if report.job_id == report_job_id => {
                            self.enqueue_report(&analysis, report_job_id).await?;
                        }
                        _ => {
                            if let Some(key) = &analysis.reporter_key {
                                warn!(analysis_id = %analysis.id, reporter = %key, "reporter not configured, skipping report");
                            }
                        }
                    }
                }
                Ok(if success { Outcome::Applied } else { Outcome::Failed })
            }
        }
    }

    async fn enqueue_report(&self, analysis: &Analysis, job_id: Uuid) -> Result<()> {
        let Some(reporter) = analysis
            .reporter_key
            .as_deref()
            .and_then(|k| self.adapters.reporter(k))
        else {
            return Ok(());
        };
        let data = JobData::Report(ReportJobData {
            adapter_key: reporter.key.clone(),
            image: reporter.image.clone(),
            topic: reporter.topic(),
            request: ReporterRequest {
                job_id,
                analysis_id: analysis.id,
                contents: analysis.content.clone(),
            },
        });
        if let Err(e) = self
            .ledger
            .enqueue_job(job_id, &data, &reporter.group_key())
            .await
        {
            error!(%job_id, analysis_id = %analysis.id, error = %e, "failed to enqueue report job");
            self.update_analysis(analysis.id, |a| a.fail_report(job_id))
                .await?;
            return Ok(());
        }
        info!(%job_id, analysis_id = %analysis.id, reporter = %reporter.key, "report job enqueued");
        Ok(())
    }

    /// Handle a reporter reply.
    pub async fn on_report_result(&self, resp: ReporterResponse) -> Result<Outcome> {
        let success = resp.status == ResultStatus::Success;
        let updated = self
            .update_analysis(resp.analysis_id, |a| {
                if success {
                    a.finish_report(resp.job_id, resp.score)
                } else {
                    a.fail_report(resp.job_id)
                }
            })
            .await?;

        if success {
            self.settle_job(resp.job_id, JobStatus::Finished, "").await;
        } else {
            self.settle_job(resp.job_id, JobStatus::Error, &resp.comments)
                .await;
        }

        match updated {
            None | Some((_, FragmentUpdate::UnknownFragment)) => {
                warn!(job_id = %resp.job_id, analysis_id = %resp.analysis_id, "report result for unknown analysis, discarding");
                Ok(Outcome::Discarded)
            }
            Some((_, FragmentUpdate::AlreadyApplied)) => Ok(Outcome::Duplicate),
            Some((analysis, FragmentUpdate::Applied { .. })) => {
                info!(analysis_id = %analysis.id, score = analysis.score, success, "report done");
                self.notify(analysis.id, EventAction::ReportDone).await;
                Ok(if success { Outcome::Applied } else { Outcome::Failed })
            }
        }
    }

    /// Read-modify-write of one analysis under optimistic concurrency.
    ///
    /// `mutate` may run several times; it must derive its change from the
    /// analysis it is given. Nothing is written unless it reports
    /// [`FragmentUpdate::Applied`]. Returns `None` when the analysis does not
    /// exist.
    pub async fn update_analysis<F>(
        &self,
        analysis_id: Uuid,
        mut mutate: F,
    ) -> Result<Option<(Analysis, FragmentUpdate)>>
    where
        F: FnMut(&mut Analysis) -> FragmentUpdate,
    {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let Some(mut analysis) = self.store.get_analysis(analysis_id).await? else {
                return Ok(None);
            };
            let expected = analysis.version;
            let update = mutate(&mut analysis);
            if !update.is_applied() {
                return Ok(Some((analysis, update)));
            }
            if self
                .store
                .compare_and_swap_analysis(&analysis, expected)
                .await?
            {
                analysis.version = expected + 1;
                return Ok(Some((analysis, update)));
            }
            debug!(%analysis_id, attempt, "analysis changed concurrently, retrying");
        }
        bail!("analysis {analysis_id} still contended after {MAX_CAS_ATTEMPTS} attempts")
    }

    async fn fail_submission(&self, submission_id: Uuid) -> Result<usize> {
        let mut failed = 0;
        for analysis in self.store.get_analyses_for_submission(submission_id).await? {
            let updated = self.update_analysis(analysis.id, mark_failed).await?;
            if matches!(updated, Some((_, update)) if update.is_applied()) {
                failed += 1;
                self.notify(analysis.id, EventAction::AnalysisDone).await;
            }
        }
        Ok(failed)
    }

    /// Drive the job behind a result to its terminal status, if it is still
    /// waiting on one. A job that was requeued meanwhile is left to run again;
    /// its second result will be a duplicate.
    async fn settle_job(&self, job_id: Uuid, status: JobStatus, description: &str) {
        let job = match self.ledger.get_job(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => return,
            Err(e) => {
                warn!(%job_id, error = %e, "cannot load job to settle");
                return;
            }
        };
        match self
            .ledger
            .update_job_status(job_id, status, description, job.retry_count)
            .await
        {
            Ok(()) => {}
            Err(LedgerError::InvalidTransition { from, .. }) => {
                debug!(%job_id, %from, to = %status, "job not in flight, leaving as is");
            }
            Err(e) => warn!(%job_id, error = %e, "failed to settle job"),
        }
    }

    async fn notify(&self, analysis_id: Uuid, action: EventAction) {
        let owner = match self.store.get_owner_for_analysis(analysis_id).await {
            Ok(Some(owner)) => owner,
            Ok(None) => return,
            Err(e) => {
                warn!(%analysis_id, error = %e, "cannot resolve owner for event");
                return;
            }
        };
        if let Err(e) = self
            .events
            .send(owner, PipelineEvent::update(action, analysis_id))
            .await
        {
            warn!(%analysis_id, error = %e, "failed to emit pipeline event");
        }
    }
}

/// Fails the fragment or report behind an analyze or report job that the
/// ledger moved to `Error` without a worker reply, such as a job timed out
/// by the sweep or rejected by the dispatcher. Parse jobs are left alone: a
/// late parser reply still fans the submission out.
#[async_trait]
impl JobFailureHook for Allocator {
    async fn job_failed(&self, job: &Job) {
        let job_id = job.id;
        let (analysis_id, action) = match job.job_type {
            JobType::Parse => return,
            JobType::Analyze => match self.store.find_analysis_by_fragment(job_id).await {
                Ok(Some(analysis)) => (analysis.id, EventAction::AnalysisDone),
                Ok(None) => return,
                Err(e) => {
                    error!(%job_id, error = %e, "cannot look up analysis of failed job");
                    return;
                }
            },
            JobType::Report => match job.decode() {
                Ok(JobData::Report(data)) => (data.request.analysis_id, EventAction::ReportDone),
                Ok(_) | Err(_) => {
                    warn!(%job_id, "failed report job has no readable analysis id");
                    return;
                }
            },
        };

        let updated = self
            .update_analysis(analysis_id, |a| match job.job_type {
                JobType::Report => a.fail_report(job_id),
                _ => a.fail_fragment(job_id),
            })
            .await;
        match updated {
            Ok(Some((analysis, update))) if update.is_applied() => {
                warn!(
                    %job_id,
                    %analysis_id,
                    status = %analysis.status,
                    reason = %job.status_description,
                    "job failed without a result, analysis updated"
                );
                self.notify(analysis_id, action).await;
            }
            Ok(_) => debug!(%job_id, %analysis_id, "failed job already settled on its analysis"),
            Err(e) => error!(%job_id, %analysis_id, error = %e, "failed to record job failure on analysis"),
        }
    }
}

fn mark_failed(analysis: &mut Analysis) -> FragmentUpdate {
    if analysis.mark_failed() {
        FragmentUpdate::Applied { completed: false }
    } else {
        FragmentUpdate::AlreadyApplied
    }
}
