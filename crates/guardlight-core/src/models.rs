//! Core data models for the Guardlight engine.
//!
//! These types are shared by the job ledger, the dispatcher, the pipeline
//! allocator and every storage backend. They carry no runtime or database
//! dependencies.
//!
//! | Type | Role |
//! |------|------|
//! | [`Job`] | One dispatchable unit of work with its status and payload |
//! | [`Submission`] | A user submission: raw content plus its analyses |
//! | [`Analysis`] | One analyzer's aggregate over its fragments |
//! | [`FragmentRecord`] | Per-chunk job id and status inside an analysis |
//! | [`Theme`] | A named set of analyzers owned by a user |
//!
//! # Status machines
//!
//! Job status edges:
//!
//! ```text
//! Queued ──▶ Inprogress ──▶ Finished
//!   │            │  └─────▶ Error
//!   │            └──▶ Queued (retry)
//!   └──▶ Error (admission rejected)
//! ```
//!
//! Fragment statuses only move forward (`Waiting → Finished | Error`); the
//! status of an [`Analysis`] is always derived from its fragments.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::payload::{JobData, PayloadError};

/// Returned when a persisted status string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value:?}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

/// Lifecycle state of a [`Job`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Inprogress,
    Finished,
    Error,
}

string_enum!(JobStatus, "job status", {
    Queued => "queued",
    Inprogress => "inprogress",
    Finished => "finished",
    Error => "error",
});

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Error)
    }

    /// Whether a job in `self` may be moved to `next`.
    ///
    /// `Queued → Error` is only taken by the dispatcher when it rejects a
    /// job outright (unknown adapter, undecodable payload, retries spent).
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Inprogress)
                | (Queued, Error)
                | (Inprogress, Finished)
                | (Inprogress, Error)
                | (Inprogress, Queued)
        )
    }
}

/// Pipeline stage a [`Job`] belongs to. Selects the schema of `Job::data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Parse,
    Analyze,
    Report,
}

string_enum!(JobType, "job type", {
    Parse => "parse",
    Analyze => "analyze",
    Report => "report",
});

/// A persisted unit of dispatchable work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    pub job_type: JobType,
    /// Concurrency bucket, conventionally `"<stage>.<adapter>"`.
    pub group_key: String,
    pub status_description: String,
    pub retry_count: u32,
    /// Serialized [`JobData`] matching `job_type`.
    pub data: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Decode the typed payload according to `job_type`.
    pub fn decode(&self) -> Result<JobData, PayloadError> {
        JobData::decode(self.job_type, &self.data)
    }

    /// True when the job has been `Inprogress` without an update for longer
    /// than `stale_after`.
    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: chrono::Duration) -> bool {
        self.status == JobStatus::Inprogress && now - self.updated_at > stale_after
    }
}

/// Status of an [`Analysis`] and of each of its fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Waiting,
    Inprogress,
    Finished,
    Error,
}

string_enum!(AnalysisStatus, "analysis status", {
    Waiting => "waiting",
    Inprogress => "inprogress",
    Finished => "finished",
    Error => "error",
});

impl AnalysisStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, AnalysisStatus::Finished | AnalysisStatus::Error)
    }
}

/// Where a submission came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestOrigin {
    User,
    System,
    Dataloom,
    External,
}

string_enum!(RequestOrigin, "request origin", {
    User => "user",
    System => "system",
    Dataloom => "dataloom",
    External => "external",
});

/// One chunk-level job tracked inside an [`Analysis`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FragmentRecord {
    pub job_id: Uuid,
    pub status: AnalysisStatus,
}

impl FragmentRecord {
    pub fn waiting(job_id: Uuid) -> Self {
        Self {
            job_id,
            status: AnalysisStatus::Waiting,
        }
    }
}

/// A key/value parameter handed to an analyzer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisInput {
    pub key: String,
    pub value: String,
}

/// Outcome of applying a result to an [`Analysis`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentUpdate {
    /// The fragment moved to a terminal status. `completed` is set when this
    /// update moved the analysis itself to `Finished`.
    Applied { completed: bool },
    /// The fragment was already terminal; nothing changed.
    AlreadyApplied,
    /// No fragment with that job id belongs to the analysis.
    UnknownFragment,
}

impl FragmentUpdate {
    pub fn is_applied(self) -> bool {
        matches!(self, FragmentUpdate::Applied { .. })
    }
}

/// One analyzer's work within a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub id: Uuid,
    pub submission_id: Uuid,
    pub analyzer_key: String,
    pub theme_id: Uuid,
    pub reporter_key: Option<String>,
    pub status: AnalysisStatus,
    pub score: f64,
    pub content: Vec<String>,
    pub inputs: Vec<AnalysisInput>,
    pub jobs: Vec<FragmentRecord>,
    pub report: Option<FragmentRecord>,
    /// Optimistic concurrency token, bumped on every stored write.
    pub version: i64,
}

impl Analysis {
    pub fn new(
        submission_id: Uuid,
        theme_id: Uuid,
        analyzer_key: impl Into<String>,
        reporter_key: Option<String>,
        inputs: Vec<AnalysisInput>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            submission_id,
            analyzer_key: analyzer_key.into(),
            theme_id,
            reporter_key,
            status: AnalysisStatus::Waiting,
            score: 0.0,
            content: Vec::new(),
            inputs,
            jobs: Vec::new(),
            report: None,
            version: 0,
        }
    }

    /// Aggregate status of a fragment list.
    ///
    /// Any `Error` fragment makes the whole analysis `Error`. Otherwise it is
    /// `Finished` when every fragment is, `Inprogress` when some are, and
    /// `Waiting` when none are (or there are no fragments yet).
    pub fn derive_status(fragments: &[FragmentRecord]) -> AnalysisStatus {
        if fragments.iter().any(|f| f.status == AnalysisStatus::Error) {
            return AnalysisStatus::Error;
        }
        let finished = fragments
            .iter()
            .filter(|f| f.status == AnalysisStatus::Finished)
            .count();
        match finished {
            0 => AnalysisStatus::Waiting,
            n if n == fragments.len() => AnalysisStatus::Finished,
            _ => AnalysisStatus::Inprogress,
        }
    }

    pub fn completed_count(&self) -> usize {
        self.jobs
            .iter()
            .filter(|f| f.status == AnalysisStatus::Finished)
            .count()
    }

    pub fn has_fragment(&self, job_id: Uuid) -> bool {
        self.jobs.iter().any(|f| f.job_id == job_id)
    }

    /// Attach the fan-out fragment list. Refused once fragments exist.
    pub fn attach_fragments(&mut self, fragments: Vec<FragmentRecord>) -> bool {
        if !self.jobs.is_empty() {
            return false;
        }
        self.jobs = fragments;
        self.status = Self::derive_status(&self.jobs);
        true
    }

    /// Record a successful analyzer result for one fragment.
    ///
    /// The score is folded in as a running mean over finished fragments:
    /// `(score * (completed - 1) + new) / completed`. A fragment that is
    /// already terminal is left untouched, so re-delivery cannot append
    /// content twice or skew the mean.
    pub fn finish_fragment(&mut self, job_id: Uuid, results: &[String], score: f64) -> FragmentUpdate {
        let Some(fragment) = self.jobs.iter_mut().find(|f| f.job_id == job_id) else {
            return FragmentUpdate::UnknownFragment;
        };
        if fragment.status.is_terminal() {
            return FragmentUpdate::AlreadyApplied;
        }
        fragment.status = AnalysisStatus::Finished;

        self.content.extend(results.iter().cloned());
        let completed = self.completed_count() as f64;
        self.score = (self.score * (completed - 1.0) + score) / completed;

        self.status = Self::derive_status(&self.jobs);
        FragmentUpdate::Applied {
            completed: self.status == AnalysisStatus::Finished,
        }
    }

    /// Record a worker-reported failure for one fragment.
    pub fn fail_fragment(&mut self, job_id: Uuid) -> FragmentUpdate {
        let Some(fragment) = self.jobs.iter_mut().find(|f| f.job_id == job_id) else {
            return FragmentUpdate::UnknownFragment;
        };
        if fragment.status.is_terminal() {
            return FragmentUpdate::AlreadyApplied;
        }
        fragment.status = AnalysisStatus::Error;
        self.status = Self::derive_status(&self.jobs);
        FragmentUpdate::Applied { completed: false }
    }

    /// Record the reporter's verdict. The reporter score replaces the
    /// aggregated analyzer score.
    pub fn finish_report(&mut self, job_id: Uuid, score: f64) -> FragmentUpdate {
        match self.report.as_mut() {
            Some(report) if report.job_id == job_id => {
                if report.status.is_terminal() {
                    return FragmentUpdate::AlreadyApplied;
                }
                report.status = AnalysisStatus::Finished;
                self.score = score;
                FragmentUpdate::Applied { completed: true }
            }
            _ => FragmentUpdate::UnknownFragment,
        }
    }

    pub fn fail_report(&mut self, job_id: Uuid) -> FragmentUpdate {
        match self.report.as_mut() {
            Some(report) if report.job_id == job_id => {
                if report.status.is_terminal() {
                    return FragmentUpdate::AlreadyApplied;
                }
                report.status = AnalysisStatus::Error;
                FragmentUpdate::Applied { completed: false }
            }
            _ => FragmentUpdate::UnknownFragment,
        }
    }

    /// Force the analysis into `Error`, e.g. when its submission failed to
    /// parse. Returns `false` if it was already terminal.
    pub fn mark_failed(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = AnalysisStatus::Error;
        true
    }
}

/// Raw submitted content. `content` is emptied once the parser has produced
/// `processed_text`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawData {
    /// SHA-256 hex digest of the decoded bytes.
    pub hash: String,
    #[serde(skip)]
    pub content: Vec<u8>,
    pub mimetype: String,
    pub processed_text: Option<String>,
}

/// A submitted piece of media with one [`Analysis`] per requested
/// (theme, analyzer) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub category: String,
    pub content_type: String,
    pub origin: RequestOrigin,
    pub raw: RawData,
    pub analyses: Vec<Analysis>,
    pub created_at: DateTime<Utc>,
}

/// Whether a theme entry is still part of the theme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Same,
    Changed,
    Added,
    Removed,
}

impl ChangeStatus {
    /// Entries that are settled in the theme. Freshly added entries are
    /// only picked up once the theme is saved again.
    pub fn is_active(self) -> bool {
        matches!(self, ChangeStatus::Same | ChangeStatus::Changed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeInput {
    pub key: String,
    pub value: String,
    pub change: ChangeStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeAnalyzer {
    pub key: String,
    pub change: ChangeStatus,
    pub inputs: Vec<ThemeInput>,
}

/// A user-owned group of analyzers with an optional reporter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Theme {
    pub id: Uuid,
    pub title: String,
    pub reporter_key: Option<String>,
    pub analyzers: Vec<ThemeAnalyzer>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis_with_fragments(n: usize) -> (Analysis, Vec<Uuid>) {
        let mut a = Analysis::new(Uuid::new_v4(), Uuid::new_v4(), "word_search", None, vec![]);
        let ids: Vec<Uuid> = (0..n).map(|_| Uuid::new_v4()).collect();
        assert!(a.attach_fragments(ids.iter().copied().map(FragmentRecord::waiting).collect()));
        (a, ids)
    }

    #[test]
    fn test_job_transitions() {
        use JobStatus::*;
        assert!(Queued.can_transition_to(Inprogress));
        assert!(Inprogress.can_transition_to(Finished));
        assert!(Inprogress.can_transition_to(Error));
        assert!(Inprogress.can_transition_to(Queued));
        assert!(Queued.can_transition_to(Error));

        assert!(!Queued.can_transition_to(Finished));
        assert!(!Finished.can_transition_to(Queued));
        assert!(!Error.can_transition_to(Queued));
        assert!(!Error.can_transition_to(Inprogress));
        assert!(!Inprogress.can_transition_to(Inprogress));
    }

    #[test]
    fn test_status_strings() {
        assert_eq!("inprogress".parse::<JobStatus>().unwrap(), JobStatus::Inprogress);
        assert_eq!(JobType::Analyze.to_string(), "analyze");
        let err = "done".parse::<AnalysisStatus>().unwrap_err();
        assert_eq!(err.kind, "analysis status");
    }

    #[test]
    fn test_derive_status() {
        let f = |s| FragmentRecord {
            job_id: Uuid::new_v4(),
            status: s,
        };
        use AnalysisStatus::*;
        assert_eq!(Analysis::derive_status(&[]), Waiting);
        assert_eq!(Analysis::derive_status(&[f(Waiting), f(Waiting)]), Waiting);
        assert_eq!(Analysis::derive_status(&[f(Finished), f(Waiting)]), Inprogress);
        assert_eq!(Analysis::derive_status(&[f(Finished), f(Finished)]), Finished);
        assert_eq!(Analysis::derive_status(&[f(Finished), f(Error)]), Error);
    }

    #[test]
    fn test_single_fragment_completes() {
        let (mut a, ids) = analysis_with_fragments(1);
        let update = a.finish_fragment(ids[0], &["Running and walking".into()], 0.25);
        assert_eq!(update, FragmentUpdate::Applied { completed: true });
        assert_eq!(a.status, AnalysisStatus::Finished);
        assert_eq!(a.score, 0.25);
        assert_eq!(a.content, vec!["Running and walking".to_string()]);
    }

    #[test]
    fn test_running_mean_over_fragments() {
        let (mut a, ids) = analysis_with_fragments(3);
        a.finish_fragment(ids[2], &[], 1.0);
        assert_eq!(a.status, AnalysisStatus::Inprogress);
        a.finish_fragment(ids[0], &[], 0.0);
        assert!((a.score - 0.5).abs() < 1e-9);
        let update = a.finish_fragment(ids[1], &[], -1.0);
        assert_eq!(update, FragmentUpdate::Applied { completed: true });
        assert!(a.score.abs() < 1e-9);
    }

    #[test]
    fn test_status_invariant_after_every_update() {
        let (mut a, ids) = analysis_with_fragments(4);
        for id in ids {
            a.finish_fragment(id, &["x".into()], 0.5);
            let all_finished = a.jobs.iter().all(|f| f.status == AnalysisStatus::Finished);
            assert_eq!(a.status == AnalysisStatus::Finished, all_finished);
        }
    }

    #[test]
    fn test_redelivery_is_noop() {
        let (mut a, ids) = analysis_with_fragments(2);
        a.finish_fragment(ids[0], &["hit".into()], 0.8);
        let before = a.clone();
        assert_eq!(
            a.finish_fragment(ids[0], &["hit".into()], 0.8),
            FragmentUpdate::AlreadyApplied
        );
        assert_eq!(a, before);
    }

    #[test]
    fn test_unknown_fragment() {
        let (mut a, _) = analysis_with_fragments(1);
        assert_eq!(
            a.finish_fragment(Uuid::new_v4(), &[], 1.0),
            FragmentUpdate::UnknownFragment
        );
    }

    #[test]
    fn test_failed_fragment_blocks_completion() {
        let (mut a, ids) = analysis_with_fragments(2);
        assert!(a.fail_fragment(ids[0]).is_applied());
        let update = a.finish_fragment(ids[1], &[], 1.0);
        assert_eq!(update, FragmentUpdate::Applied { completed: false });
        assert_eq!(a.status, AnalysisStatus::Error);
        assert_eq!(a.fail_fragment(ids[0]), FragmentUpdate::AlreadyApplied);
    }

    #[test]
    fn test_attach_fragments_once() {
        let (mut a, _) = analysis_with_fragments(2);
        assert!(!a.attach_fragments(vec![FragmentRecord::waiting(Uuid::new_v4())]));
        assert_eq!(a.jobs.len(), 2);
    }

    #[test]
    fn test_report_applies_once() {
        let (mut a, ids) = analysis_with_fragments(1);
        a.finish_fragment(ids[0], &[], 0.25);
        let report_id = Uuid::new_v4();
        a.report = Some(FragmentRecord::waiting(report_id));

        assert!(a.finish_report(report_id, 1.0).is_applied());
        assert_eq!(a.score, 1.0);
        assert_eq!(a.finish_report(report_id, -1.0), FragmentUpdate::AlreadyApplied);
        assert_eq!(a.score, 1.0);
        assert_eq!(
            a.finish_report(Uuid::new_v4(), 0.0),
            FragmentUpdate::UnknownFragment
        );
    }

    #[test]
    fn test_stale_detection() {
        let now = Utc::now();
        let mut job = Job {
            id: Uuid::new_v4(),
            status: JobStatus::Inprogress,
            job_type: JobType::Parse,
            group_key: "parser.freetext".into(),
            status_description: String::new(),
            retry_count: 0,
            data: "{}".into(),
            created_at: now,
            updated_at: now - chrono::Duration::seconds(90),
        };
        assert!(job.is_stale(now, chrono::Duration::seconds(60)));
        job.status = JobStatus::Queued;
        assert!(!job.is_stale(now, chrono::Duration::seconds(60)));
    }
}
