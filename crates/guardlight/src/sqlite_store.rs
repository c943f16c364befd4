//! SQLite-backed implementation of the engine's store traits.
//!
//! Jobs, submissions, analyses and themes each live in their own table (see
//! [`crate::migrate`]). Fragment lists, analysis content and inputs are
//! stored as JSON text columns. The two conditional writes are single
//! `UPDATE ... WHERE` statements, so SQLite's row-level atomicity is all
//! the engine needs.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use guardlight_core::models::{
    Analysis, Job, JobStatus, RawData, Submission, Theme, ThemeAnalyzer,
};
use guardlight_core::store::{JobStore, SubmissionInsert, SubmissionStore, ThemeSource};

/// SQLite implementation of [`JobStore`], [`SubmissionStore`] and
/// [`ThemeSource`].
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert or replace a theme owned by `owner_id`.
    pub async fn put_theme(&self, owner_id: Uuid, theme: &Theme) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO themes (id, owner_id, title, reporter_key, analyzers_json, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                owner_id = excluded.owner_id,
                title = excluded.title,
                reporter_key = excluded.reporter_key,
                analyzers_json = excluded.analyzers_json
            "#,
        )
        .bind(theme.id.to_string())
        .bind(owner_id.to_string())
        .bind(&theme.title)
        .bind(&theme.reporter_key)
        .bind(serde_json::to_string(&theme.analyzers)?)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn analyses_where(&self, clause: &str, bind: String) -> Result<Vec<Analysis>> {
        let sql = format!(
            "SELECT id, submission_id, analyzer_key, theme_id, reporter_key, status, score, \
             content_json, inputs_json, jobs_json, report_json, version \
             FROM analyses a WHERE {clause} ORDER BY position"
        );
        let rows = sqlx::query(&sql).bind(bind).fetch_all(&self.pool).await?;
        rows.iter().map(analysis_from_row).collect()
    }

    async fn load_submission(&self, row: &SqliteRow) -> Result<Submission> {
        let id: String = row.try_get("id")?;
        let analyses = self
            .analyses_where("a.submission_id = ?", id.clone())
            .await?;
        Ok(Submission {
            id: parse_uuid(&id)?,
            owner_id: parse_uuid(&row.try_get::<String, _>("owner_id")?)?,
            title: row.try_get("title")?,
            category: row.try_get("category")?,
            content_type: row.try_get("content_type")?,
            origin: row.try_get::<String, _>("origin")?.parse()?,
            raw: RawData {
                hash: row.try_get("hash")?,
                content: row.try_get("content")?,
                mimetype: row.try_get("mimetype")?,
                processed_text: row.try_get("processed_text")?,
            },
            analyses,
            created_at: from_millis(row.try_get("created_at")?)?,
        })
    }
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).with_context(|| format!("invalid uuid in database: {s}"))
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .with_context(|| format!("invalid timestamp in database: {ms}"))
}

fn job_from_row(row: &SqliteRow) -> Result<Job> {
    Ok(Job {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        status: row.try_get::<String, _>("status")?.parse()?,
        job_type: row.try_get::<String, _>("job_type")?.parse()?,
        group_key: row.try_get("group_key")?,
        status_description: row.try_get("status_description")?,
        retry_count: u32::try_from(row.try_get::<i64, _>("retry_count")?)?,
        data: row.try_get("data")?,
        created_at: from_millis(row.try_get("created_at")?)?,
        updated_at: from_millis(row.try_get("updated_at")?)?,
    })
}

fn analysis_from_row(row: &SqliteRow) -> Result<Analysis> {
    let report: Option<String> = row.try_get("report_json")?;
    Ok(Analysis {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        submission_id: parse_uuid(&row.try_get::<String, _>("submission_id")?)?,
        analyzer_key: row.try_get("analyzer_key")?,
        theme_id: parse_uuid(&row.try_get::<String, _>("theme_id")?)?,
        reporter_key: row.try_get("reporter_key")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        score: row.try_get("score")?,
        content: serde_json::from_str(&row.try_get::<String, _>("content_json")?)?,
        inputs: serde_json::from_str(&row.try_get::<String, _>("inputs_json")?)?,
        jobs: serde_json::from_str(&row.try_get::<String, _>("jobs_json")?)?,
        report: report.as_deref().map(serde_json::from_str).transpose()?,
        version: row.try_get("version")?,
    })
}

const JOB_COLUMNS: &str = "id, status, job_type, group_key, status_description, retry_count, \
                           data, created_at, updated_at";

const SUBMISSION_COLUMNS: &str = "id, owner_id, title, category, content_type, origin, hash, \
                                  content, mimetype, processed_text, created_at";

#[async_trait]
impl JobStore for SqliteStore {
    async fn save_job(&self, job: &Job) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (id, status, job_type, group_key, status_description,
                              retry_count, data, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.id.to_string())
        .bind(job.status.as_str())
        .bind(job.job_type.as_str())
        .bind(&job.group_key)
        .bind(&job.status_description)
        .bind(i64::from(job.retry_count))
        .bind(&job.data)
        .bind(job.created_at.timestamp_millis())
        .bind(job.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn get_non_finished_jobs(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status != ? ORDER BY created_at, rowid"
        ))
        .bind(JobStatus::Finished.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn update_job_status(
        &self,
        id: Uuid,
        expected: JobStatus,
        status: JobStatus,
        description: &str,
        retry_count: u32,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?, status_description = ?, retry_count = ?, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(status.as_str())
        .bind(description)
        .bind(i64::from(retry_count))
        .bind(Utc::now().timestamp_millis())
        .bind(id.to_string())
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_job(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SubmissionStore for SqliteStore {
    async fn create_submission(&self, submission: &Submission) -> Result<SubmissionInsert> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO submissions (id, owner_id, title, category, content_type, origin,
                                     hash, content, mimetype, processed_text, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(hash) DO NOTHING
            "#,
        )
        .bind(submission.id.to_string())
        .bind(submission.owner_id.to_string())
        .bind(&submission.title)
        .bind(&submission.category)
        .bind(&submission.content_type)
        .bind(submission.origin.as_str())
        .bind(&submission.raw.hash)
        .bind(&submission.raw.content)
        .bind(&submission.raw.mimetype)
        .bind(&submission.raw.processed_text)
        .bind(submission.created_at.timestamp_millis())
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            let existing: String = sqlx::query_scalar("SELECT id FROM submissions WHERE hash = ?")
                .bind(&submission.raw.hash)
                .fetch_one(&mut *tx)
                .await?;
            tx.rollback().await?;
            return Ok(SubmissionInsert::Duplicate(parse_uuid(&existing)?));
        }

        for (position, analysis) in submission.analyses.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO analyses (id, submission_id, position, analyzer_key, theme_id,
                                      reporter_key, status, score, content_json, inputs_json,
                                      jobs_json, report_json, version)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(analysis.id.to_string())
            .bind(submission.id.to_string())
            .bind(position as i64)
            .bind(&analysis.analyzer_key)
            .bind(analysis.theme_id.to_string())
            .bind(&analysis.reporter_key)
            .bind(analysis.status.as_str())
            .bind(analysis.score)
            .bind(serde_json::to_string(&analysis.content)?)
            .bind(serde_json::to_string(&analysis.inputs)?)
            .bind(serde_json::to_string(&analysis.jobs)?)
            .bind(analysis.report.map(|r| serde_json::to_string(&r)).transpose()?)
            .bind(analysis.version)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(SubmissionInsert::Created)
    }

    async fn delete_submission(&self, id: Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM analyses WHERE submission_id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM submissions WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(deleted.rows_affected() == 1)
    }

    async fn get_submission(&self, id: Uuid) -> Result<Option<Submission>> {
        let row = sqlx::query(&format!(
            "SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(self.load_submission(&row).await?)),
            None => Ok(None),
        }
    }

    async fn find_submission_by_hash(&self, hash: &str) -> Result<Option<Uuid>> {
        let id: Option<String> = sqlx::query_scalar("SELECT id FROM submissions WHERE hash = ?")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        id.as_deref().map(parse_uuid).transpose()
    }

    async fn update_processed_text(&self, submission_id: Uuid, text: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE submissions SET processed_text = ?, content = x'' WHERE id = ?",
        )
        .bind(text)
        .bind(submission_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_analyses_for_submission(&self, submission_id: Uuid) -> Result<Vec<Analysis>> {
        self.analyses_where("a.submission_id = ?", submission_id.to_string())
            .await
    }

    async fn get_analysis(&self, id: Uuid) -> Result<Option<Analysis>> {
        Ok(self
            .analyses_where("a.id = ?", id.to_string())
            .await?
            .into_iter()
            .next())
    }

    async fn find_analysis_by_fragment(&self, job_id: Uuid) -> Result<Option<Analysis>> {
        Ok(self
            .analyses_where(
                "EXISTS (SELECT 1 FROM json_each(a.jobs_json) f \
                 WHERE json_extract(f.value, '$.jobId') = ?)",
                job_id.to_string(),
            )
            .await?
            .into_iter()
            .next())
    }

    async fn compare_and_swap_analysis(
        &self,
        analysis: &Analysis,
        expected_version: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE analyses
            SET status = ?, score = ?, content_json = ?, jobs_json = ?, report_json = ?,
                version = version + 1
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(analysis.status.as_str())
        .bind(analysis.score)
        .bind(serde_json::to_string(&analysis.content)?)
        .bind(serde_json::to_string(&analysis.jobs)?)
        .bind(analysis.report.map(|r| serde_json::to_string(&r)).transpose()?)
        .bind(analysis.id.to_string())
        .bind(expected_version)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_owner_for_analysis(&self, analysis_id: Uuid) -> Result<Option<Uuid>> {
        let owner: Option<String> = sqlx::query_scalar(
            r#"
            SELECT s.owner_id FROM submissions s
            JOIN analyses a ON a.submission_id = s.id
            WHERE a.id = ?
            "#,
        )
        .bind(analysis_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        owner.as_deref().map(parse_uuid).transpose()
    }

    async fn list_submissions_for_owner(&self, owner_id: Uuid) -> Result<Vec<Submission>> {
        let rows = sqlx::query(&format!(
            "SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE owner_id = ? \
             ORDER BY created_at DESC, rowid DESC"
        ))
        .bind(owner_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        let mut submissions = Vec::with_capacity(rows.len());
        for row in &rows {
            submissions.push(self.load_submission(row).await?);
        }
        Ok(submissions)
    }
}

#[async_trait]
impl ThemeSource for SqliteStore {
    async fn themes_for_owner(&self, owner_id: Uuid) -> Result<Vec<Theme>> {
        let rows = sqlx::query(
            "SELECT id, title, reporter_key, analyzers_json FROM themes \
             WHERE owner_id = ? ORDER BY created_at, rowid",
        )
        .bind(owner_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                let analyzers: Vec<ThemeAnalyzer> =
                    serde_json::from_str(&row.try_get::<String, _>("analyzers_json")?)?;
                Ok(Theme {
                    id: parse_uuid(&row.try_get::<String, _>("id")?)?,
                    title: row.try_get("title")?,
                    reporter_key: row.try_get("reporter_key")?,
                    analyzers,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guardlight_core::models::{
        AnalysisInput, AnalysisStatus, FragmentRecord, JobType, RequestOrigin,
    };
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> SqliteStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::migrate::apply_schema(&pool).await.unwrap();
        SqliteStore::new(pool)
    }

    fn job(status: JobStatus) -> Job {
        let now = Utc::now();
        Job {
            id: Uuid::new_v4(),
            status,
            job_type: JobType::Analyze,
            group_key: "analyzer.word_search".into(),
            status_description: String::new(),
            retry_count: 0,
            data: "{}".into(),
            created_at: now,
            updated_at: now,
        }
    }

    fn submission(owner: Uuid, hash: &str) -> Submission {
        let id = Uuid::new_v4();
        Submission {
            id,
            owner_id: owner,
            title: format!("title-{hash}"),
            category: "fiction".into(),
            content_type: "book".into(),
            origin: RequestOrigin::User,
            raw: RawData {
                hash: hash.into(),
                content: b"Running and walking.".to_vec(),
                mimetype: "freetext".into(),
                processed_text: None,
            },
            analyses: vec![
                Analysis::new(
                    id,
                    Uuid::new_v4(),
                    "word_search",
                    Some("word_count".into()),
                    vec![AnalysisInput {
                        key: "strict_words".into(),
                        value: "walking".into(),
                    }],
                ),
                Analysis::new(id, Uuid::new_v4(), "word_search", None, vec![]),
            ],
            // Stored at millisecond precision.
            created_at: from_millis(Utc::now().timestamp_millis()).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_job_conditional_update() {
        let store = store().await;
        let j = job(JobStatus::Queued);
        store.save_job(&j).await.unwrap();

        assert!(store
            .update_job_status(j.id, JobStatus::Queued, JobStatus::Inprogress, "", 0)
            .await
            .unwrap());
        assert!(!store
            .update_job_status(j.id, JobStatus::Queued, JobStatus::Inprogress, "", 0)
            .await
            .unwrap());

        let loaded = store.get_job(j.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Inprogress);
        assert_eq!(loaded.group_key, "analyzer.word_search");

        store.delete_job(j.id).await.unwrap();
        assert!(store.get_job(j.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_non_finished_excludes_finished() {
        let store = store().await;
        let (a, b) = (job(JobStatus::Queued), job(JobStatus::Finished));
        store.save_job(&a).await.unwrap();
        store.save_job(&b).await.unwrap();
        let ids: Vec<Uuid> = store
            .get_non_finished_jobs()
            .await
            .unwrap()
            .iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(ids, vec![a.id]);
    }

    #[tokio::test]
    async fn test_submission_round_trip_and_duplicate() {
        let store = store().await;
        let owner = Uuid::new_v4();
        let sub = submission(owner, "abc");
        assert_eq!(
            store.create_submission(&sub).await.unwrap(),
            SubmissionInsert::Created
        );

        let loaded = store.get_submission(sub.id).await.unwrap().unwrap();
        assert_eq!(loaded, sub);

        let again = submission(owner, "abc");
        assert_eq!(
            store.create_submission(&again).await.unwrap(),
            SubmissionInsert::Duplicate(sub.id)
        );
        assert!(store.get_submission(again.id).await.unwrap().is_none());
        assert!(store
            .get_analysis(again.analyses[0].id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_delete_submission_frees_hash() {
        let store = store().await;
        let sub = submission(Uuid::new_v4(), "gone");
        store.create_submission(&sub).await.unwrap();

        assert!(store.delete_submission(sub.id).await.unwrap());
        assert!(!store.delete_submission(sub.id).await.unwrap());
        assert_eq!(store.get_submission(sub.id).await.unwrap(), None);
        assert_eq!(store.get_analysis(sub.analyses[0].id).await.unwrap(), None);
        assert_eq!(store.find_submission_by_hash("gone").await.unwrap(), None);
        assert_eq!(
            store.create_submission(&sub).await.unwrap(),
            SubmissionInsert::Created
        );
    }

    #[tokio::test]
    async fn test_cas_and_fragment_lookup() {
        let store = store().await;
        let sub = submission(Uuid::new_v4(), "cas");
        store.create_submission(&sub).await.unwrap();

        let mut analysis = store.get_analysis(sub.analyses[0].id).await.unwrap().unwrap();
        let fragment = Uuid::new_v4();
        analysis.attach_fragments(vec![FragmentRecord::waiting(fragment)]);
        assert!(store.compare_and_swap_analysis(&analysis, 0).await.unwrap());
        assert!(!store.compare_and_swap_analysis(&analysis, 0).await.unwrap());

        let found = store.find_analysis_by_fragment(fragment).await.unwrap().unwrap();
        assert_eq!(found.id, analysis.id);
        assert_eq!(found.version, 1);
        assert_eq!(found.jobs[0].status, AnalysisStatus::Waiting);
        assert!(store
            .find_analysis_by_fragment(Uuid::new_v4())
            .await
            .unwrap()
            .is_none());

        assert_eq!(
            store.get_owner_for_analysis(analysis.id).await.unwrap(),
            Some(sub.owner_id)
        );
    }

    #[tokio::test]
    async fn test_processed_text_clears_content() {
        let store = store().await;
        let sub = submission(Uuid::new_v4(), "text");
        store.create_submission(&sub).await.unwrap();
        assert!(store
            .update_processed_text(sub.id, "Running and walking.")
            .await
            .unwrap());
        let loaded = store.get_submission(sub.id).await.unwrap().unwrap();
        assert!(loaded.raw.content.is_empty());
        assert_eq!(loaded.raw.processed_text.as_deref(), Some("Running and walking."));
    }

    #[tokio::test]
    async fn test_themes_for_owner() {
        let store = store().await;
        let owner = Uuid::new_v4();
        let theme = Theme {
            id: Uuid::new_v4(),
            title: "Violence".into(),
            reporter_key: Some("word_count".into()),
            analyzers: vec![],
        };
        store.put_theme(owner, &theme).await.unwrap();
        assert_eq!(store.themes_for_owner(owner).await.unwrap(), vec![theme]);
        assert!(store.themes_for_owner(Uuid::new_v4()).await.unwrap().is_empty());
    }
}
