use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Idempotent.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // Timestamps are unix milliseconds.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            job_type TEXT NOT NULL,
            group_key TEXT NOT NULL,
            status_description TEXT NOT NULL DEFAULT '',
            retry_count INTEGER NOT NULL DEFAULT 0,
            data TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status, created_at)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS submissions (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            title TEXT NOT NULL,
            category TEXT NOT NULL DEFAULT '',
            content_type TEXT NOT NULL,
            origin TEXT NOT NULL,
            hash TEXT NOT NULL UNIQUE,
            content BLOB NOT NULL,
            mimetype TEXT NOT NULL,
            processed_text TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_submissions_owner ON submissions(owner_id, created_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analyses (
            id TEXT PRIMARY KEY,
            submission_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            analyzer_key TEXT NOT NULL,
            theme_id TEXT NOT NULL,
            reporter_key TEXT,
            status TEXT NOT NULL,
            score REAL NOT NULL DEFAULT 0,
            content_json TEXT NOT NULL DEFAULT '[]',
            inputs_json TEXT NOT NULL DEFAULT '[]',
            jobs_json TEXT NOT NULL DEFAULT '[]',
            report_json TEXT,
            version INTEGER NOT NULL DEFAULT 0,
            UNIQUE(submission_id, position),
            FOREIGN KEY (submission_id) REFERENCES submissions(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS themes (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            title TEXT NOT NULL,
            reporter_key TEXT,
            analyzers_json TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_themes_owner ON themes(owner_id)")
        .execute(pool)
        .await?;

    Ok(())
}
