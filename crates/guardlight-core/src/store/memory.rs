//! In-memory store for tests and embedded use.
//!
//! Uses `Vec` and `HashMap` behind `std::sync::RwLock`. Every conditional
//! write takes the write lock for its whole read-compare-write, which gives
//! the single-row atomicity the engine relies on.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::models::{Analysis, Job, JobStatus, Submission, Theme};

use super::{JobStore, SubmissionInsert, SubmissionStore, ThemeSource};

/// In-memory implementation of every store trait.
pub struct InMemoryStore {
    jobs: RwLock<Vec<Job>>,
    submissions: RwLock<Vec<Submission>>,
    themes: RwLock<HashMap<Uuid, Vec<Theme>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(Vec::new()),
            submissions: RwLock::new(Vec::new()),
            themes: RwLock::new(HashMap::new()),
        }
    }

    /// Register a theme for `owner_id`, served through [`ThemeSource`].
    pub fn put_theme(&self, owner_id: Uuid, theme: Theme) {
        self.themes
            .write()
            .unwrap()
            .entry(owner_id)
            .or_default()
            .push(theme);
    }

    /// Every stored job, including finished ones that were not deleted.
    pub fn all_jobs(&self) -> Vec<Job> {
        self.jobs.read().unwrap().clone()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn save_job(&self, job: &Job) -> Result<()> {
        let mut jobs = self.jobs.write().unwrap();
        if jobs.iter().any(|j| j.id == job.id) {
            anyhow::bail!("job {} already exists", job.id);
        }
        jobs.push(job.clone());
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        let jobs = self.jobs.read().unwrap();
        Ok(jobs.iter().find(|j| j.id == id).cloned())
    }

    async fn get_non_finished_jobs(&self) -> Result<Vec<Job>> {
        let jobs = self.jobs.read().unwrap();
        Ok(jobs
            .iter()
            .filter(|j| j.status != JobStatus::Finished)
            .cloned()
            .collect())
    }

    async fn update_job_status(
        &self,
        id: Uuid,
        expected: JobStatus,
        status: JobStatus,
        description: &str,
        retry_count: u32,
    ) -> Result<bool> {
        let mut jobs = self.jobs.write().unwrap();
        match jobs.iter_mut().find(|j| j.id == id) {
            Some(job) if job.status == expected => {
                job.status = status;
                job.status_description = description.to_string();
                job.retry_count = retry_count;
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_job(&self, id: Uuid) -> Result<()> {
        self.jobs.write().unwrap().retain(|j| j.id != id);
        Ok(())
    }
}

#[async_trait]
impl SubmissionStore for InMemoryStore {
    async fn create_submission(&self, submission: &Submission) -> Result<SubmissionInsert> {
        let mut subs = self.submissions.write().unwrap();
        if let Some(existing) = subs.iter().find(|s| s.raw.hash == submission.raw.hash) {
            return Ok(SubmissionInsert::Duplicate(existing.id));
        }
        subs.push(submission.clone());
        Ok(SubmissionInsert::Created)
    }

    async fn delete_submission(&self, id: Uuid) -> Result<bool> {
        let mut subs = self.submissions.write().unwrap();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        Ok(subs.len() < before)
    }

    async fn get_submission(&self, id: Uuid) -> Result<Option<Submission>> {
        let subs = self.submissions.read().unwrap();
        Ok(subs.iter().find(|s| s.id == id).cloned())
    }

    async fn find_submission_by_hash(&self, hash: &str) -> Result<Option<Uuid>> {
        let subs = self.submissions.read().unwrap();
        Ok(subs.iter().find(|s| s.raw.hash == hash).map(|s| s.id))
    }

    async fn update_processed_text(&self, submission_id: Uuid, text: &str) -> Result<bool> {
        let mut subs = self.submissions.write().unwrap();
        match subs.iter_mut().find(|s| s.id == submission_id) {
            Some(sub) => {
                sub.raw.processed_text = Some(text.to_string());
                sub.raw.content.clear();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_analyses_for_submission(&self, submission_id: Uuid) -> Result<Vec<Analysis>> {
        let subs = self.submissions.read().unwrap();
        Ok(subs
            .iter()
            .find(|s| s.id == submission_id)
            .map(|s| s.analyses.clone())
            .unwrap_or_default())
    }

    async fn get_analysis(&self, id: Uuid) -> Result<Option<Analysis>> {
        let subs = self.submissions.read().unwrap();
        Ok(subs
            .iter()
            .flat_map(|s| s.analyses.iter())
            .find(|a| a.id == id)
            .cloned())
    }

    async fn find_analysis_by_fragment(&self, job_id: Uuid) -> Result<Option<Analysis>> {
        let subs = self.submissions.read().unwrap();
        Ok(subs
            .iter()
            .flat_map(|s| s.analyses.iter())
            .find(|a| a.has_fragment(job_id))
            .cloned())
    }

    async fn compare_and_swap_analysis(
        &self,
        analysis: &Analysis,
        expected_version: i64,
    ) -> Result<bool> {
        let mut subs = self.submissions.write().unwrap();
        let stored = subs
            .iter_mut()
            .flat_map(|s| s.analyses.iter_mut())
            .find(|a| a.id == analysis.id);
        match stored {
            Some(stored) if stored.version == expected_version => {
                stored.status = analysis.status;
                stored.score = analysis.score;
                stored.content = analysis.content.clone();
                stored.jobs = analysis.jobs.clone();
                stored.report = analysis.report;
                stored.version = expected_version + 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_owner_for_analysis(&self, analysis_id: Uuid) -> Result<Option<Uuid>> {
        let subs = self.submissions.read().unwrap();
        Ok(subs
            .iter()
            .find(|s| s.analyses.iter().any(|a| a.id == analysis_id))
            .map(|s| s.owner_id))
    }

    async fn list_submissions_for_owner(&self, owner_id: Uuid) -> Result<Vec<Submission>> {
        let subs = self.submissions.read().unwrap();
        let mut owned: Vec<Submission> = subs
            .iter()
            .filter(|s| s.owner_id == owner_id)
            .cloned()
            .collect();
        owned.reverse();
        Ok(owned)
    }
}

#[async_trait]
impl ThemeSource for InMemoryStore {
    async fn themes_for_owner(&self, owner_id: Uuid) -> Result<Vec<Theme>> {
        let themes = self.themes.read().unwrap();
        Ok(themes.get(&owner_id).cloned().unwrap_or_default())
    }
}
