//! End-to-end runs of the engine over a SQLite file.

use std::fs;
use std::time::Duration;

use base64::Engine as _;
use chrono::Utc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use guardlight::config::{load_config, Config};
use guardlight::engine::Engine;
use guardlight::migrate;
use guardlight_core::allocator::Outcome;
use guardlight_core::contracts::{ParserRequest, ParserResponse, ResultStatus, PARSER_RESULT_TOPIC};
use guardlight_core::models::{AnalysisInput, AnalysisStatus, JobStatus, JobType};
use guardlight_core::payload::JobData;
use guardlight_core::requester::{
    AnalysisSubmission, RequestError, SubmittedAnalyzer, SubmittedFile, SubmittedTheme,
};
use guardlight_core::store::SubmissionStore;

const ANALYZER: &str = r#"
[[analyzers]]
key = "word_search"
name = "Word Search"
image = "{image}"
context_window = {window}
concurrency = {concurrency}

[[analyzers.inputs]]
key = "strict_words"
name = "Strict Words"
type = "textarea"
"#;

fn analyzer_section(image: &str, window: usize, concurrency: usize) -> String {
    ANALYZER
        .replace("{image}", image)
        .replace("{window}", &window.to_string())
        .replace("{concurrency}", &concurrency.to_string())
}

async fn open(tmp: &TempDir, extra: &str) -> (Config, Engine) {
    let path = tmp.path().join("guardlight.toml");
    let content = format!(
        r#"[db]
path = "{}/guardlight.db"

[orchestrator]
tick_interval_ms = 20

[jobs]
sweep_interval_secs = 1
stale_after_secs = 60
max_retries = 3
{}"#,
        tmp.path().display(),
        extra
    );
    fs::write(&path, content).unwrap();
    let config = load_config(&path).unwrap();
    migrate::run_migrations(&config).await.unwrap();
    let engine = Engine::open(&config).await.unwrap();
    (config, engine)
}

fn submission(text: &str, words: &str) -> AnalysisSubmission {
    AnalysisSubmission {
        title: "Lion".into(),
        content_type: "book".into(),
        category: String::new(),
        file: SubmittedFile {
            content: base64::engine::general_purpose::STANDARD.encode(text),
            mimetype: "freetext".into(),
        },
        themes: vec![SubmittedTheme {
            id: Uuid::new_v4(),
            reporter: Some("word_count".into()),
            analyzers: vec![SubmittedAnalyzer {
                key: "word_search".into(),
                inputs: vec![
                    AnalysisInput {
                        key: "threshold".into(),
                        value: "0".into(),
                    },
                    AnalysisInput {
                        key: "strict_words".into(),
                        value: words.into(),
                    },
                ],
            }],
        }],
    }
}

async fn wait_idle(engine: &Engine) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    let mut idle_polls = 0;
    while idle_polls < 2 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "pipeline did not go idle"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        if engine.is_idle().await.unwrap() {
            idle_polls += 1;
        } else {
            idle_polls = 0;
        }
    }
}

#[tokio::test]
async fn test_pipeline_runs_to_report() {
    let tmp = TempDir::new().unwrap();
    let (_config, engine) = open(&tmp, &analyzer_section("builtin", 40, 2)).await;

    let text = "Running and walking.\n\nThen   resting. Walking again now. Sitting down quietly.";
    let id = engine
        .requester
        .request_analysis(&submission(text, "walking"), Uuid::new_v4())
        .await
        .unwrap();

    let shutdown = CancellationToken::new();
    let handles = engine.start(&shutdown);
    wait_idle(&engine).await;
    shutdown.cancel();
    for handle in handles {
        handle.await.unwrap();
    }

    let sub = engine.store.get_submission(id).await.unwrap().unwrap();
    assert_eq!(
        sub.raw.processed_text.as_deref(),
        Some("Running and walking. Then resting. Walking again now. Sitting down quietly.")
    );
    assert!(sub.raw.content.is_empty());

    let analysis = &sub.analyses[0];
    assert!(analysis.jobs.len() > 1, "expected several fragments");
    assert!(analysis.jobs.iter().all(|f| f.status == AnalysisStatus::Finished));
    assert_eq!(analysis.status, AnalysisStatus::Finished);
    assert!(analysis.content.contains(&"Running and walking.".to_string()));
    assert_eq!(
        analysis.report.map(|r| r.status),
        Some(AnalysisStatus::Finished)
    );
    // Flagged content fails the word_count reporter.
    assert_eq!(analysis.score, -1.0);

    assert!(engine.ledger.get_all_non_finished_jobs().await.unwrap().is_empty());
    engine.close().await;
}

#[tokio::test]
async fn test_clean_content_passes_report() {
    let tmp = TempDir::new().unwrap();
    let (_config, engine) = open(&tmp, "").await;

    let id = engine
        .requester
        .request_analysis(&submission("A quiet day. Nothing else.", "sword"), Uuid::new_v4())
        .await
        .unwrap();

    let shutdown = CancellationToken::new();
    let handles = engine.start(&shutdown);
    wait_idle(&engine).await;
    shutdown.cancel();
    for handle in handles {
        handle.await.unwrap();
    }

    let analyses = engine.store.get_analyses_for_submission(id).await.unwrap();
    assert_eq!(analyses.len(), 1);
    assert!(analyses[0].content.is_empty());
    assert_eq!(analyses[0].score, 1.0);
    engine.close().await;
}

#[tokio::test]
async fn test_duplicate_content_rejected() {
    let tmp = TempDir::new().unwrap();
    let (_config, engine) = open(&tmp, "").await;
    let owner = Uuid::new_v4();

    let first = engine
        .requester
        .request_analysis(&submission("Same text.", "text"), owner)
        .await
        .unwrap();
    let mut again = submission("Same text.", "other");
    again.title = "Another title".into();
    let err = engine
        .requester
        .request_analysis(&again, owner)
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::DuplicateContent(id) if id == first));

    let jobs = engine.ledger.get_all_non_finished_jobs().await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(engine.store.list_submissions_for_owner(owner).await.unwrap().len(), 1);
    engine.close().await;
}

#[tokio::test]
async fn test_unanswered_job_times_out_after_retries() {
    let tmp = TempDir::new().unwrap();
    let parser = r#"
[[parsers]]
key = "freetext"
name = "Freetext"
type = "freetext"
image = "remote"
concurrency = 1
"#;
    let (_config, engine) = open(&tmp, parser).await;

    engine
        .requester
        .request_analysis(&submission("Nobody parses this.", "x"), Uuid::new_v4())
        .await
        .unwrap();
    let job_id = engine.ledger.get_all_non_finished_jobs().await.unwrap()[0].id;

    for attempt in 1..=3 {
        assert_eq!(engine.dispatcher.tick().await.unwrap().dispatched, 1);
        let later = Utc::now() + chrono::Duration::minutes(2);
        let report = engine.ledger.sweep_stale_jobs(later).await.unwrap();
        assert_eq!(report.requeued, 1);

        let job = engine.ledger.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.retry_count, attempt);
        assert_eq!(job.status_description, "long running task");
    }

    engine.dispatcher.tick().await.unwrap();
    let later = Utc::now() + chrono::Duration::minutes(2);
    assert_eq!(engine.ledger.sweep_stale_jobs(later).await.unwrap().timed_out, 1);

    let job = engine.ledger.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert_eq!(job.status_description, "Timed out");
    assert_eq!(job.retry_count, 3);

    // Failed jobs stay in the ledger but no longer hold the pipeline up.
    assert!(engine.is_idle().await.unwrap());
    assert_eq!(engine.dispatcher.tick().await.unwrap().dispatched, 0);
    engine.close().await;
}

#[tokio::test]
async fn test_group_limit_holds_back_analyze_jobs() {
    let tmp = TempDir::new().unwrap();
    let (_config, engine) = open(&tmp, &analyzer_section("remote", 20, 1)).await;

    let text = "One short line here. Another short line. A third short line.";
    let id = engine
        .requester
        .request_analysis(&submission(text, "line"), Uuid::new_v4())
        .await
        .unwrap();

    // Answer the parse job the way a parser worker would.
    engine.dispatcher.tick().await.unwrap();
    let parse = engine.ledger.get_all_non_finished_jobs().await.unwrap().remove(0);
    let JobData::Parse(data) = parse.decode().unwrap() else {
        panic!("expected a parse job");
    };
    let request: ParserRequest = data.request;
    let response = ParserResponse {
        job_id: request.job_id,
        analysis_id: id,
        text: text.into(),
        status: ResultStatus::Success,
    };
    let outcome = engine
        .allocator
        .handle_message(PARSER_RESULT_TOPIC, serde_json::to_value(&response).unwrap())
        .await
        .unwrap();
    let Outcome::FannedOut { jobs } = outcome else {
        panic!("expected fan-out, got {outcome:?}");
    };
    assert!(jobs > 1);

    let report = engine.dispatcher.tick().await.unwrap();
    assert_eq!(report.dispatched, 1);
    assert_eq!(report.deferred, jobs - 1);

    let analyze: Vec<_> = engine
        .ledger
        .get_all_non_finished_jobs()
        .await
        .unwrap()
        .into_iter()
        .filter(|j| j.job_type == JobType::Analyze)
        .collect();
    assert_eq!(analyze.len(), jobs);
    assert_eq!(
        analyze.iter().filter(|j| j.status == JobStatus::Inprogress).count(),
        1
    );
    engine.close().await;
}

#[tokio::test]
async fn test_unanswered_analyze_job_fails_analysis() {
    let tmp = TempDir::new().unwrap();
    let (_config, engine) = open(&tmp, &analyzer_section("remote", 400, 1)).await;

    let text = "Nobody analyzes this.";
    let id = engine
        .requester
        .request_analysis(&submission(text, "this"), Uuid::new_v4())
        .await
        .unwrap();

    engine.dispatcher.tick().await.unwrap();
    let parse = engine.ledger.get_all_non_finished_jobs().await.unwrap().remove(0);
    let JobData::Parse(data) = parse.decode().unwrap() else {
        panic!("expected a parse job");
    };
    let response = ParserResponse {
        job_id: data.request.job_id,
        analysis_id: id,
        text: text.into(),
        status: ResultStatus::Success,
    };
    engine
        .allocator
        .handle_message(PARSER_RESULT_TOPIC, serde_json::to_value(&response).unwrap())
        .await
        .unwrap();

    for _ in 0..=3 {
        engine.dispatcher.tick().await.unwrap();
        let later = Utc::now() + chrono::Duration::minutes(2);
        engine.ledger.sweep_stale_jobs(later).await.unwrap();
    }

    let analysis = engine.store.get_analyses_for_submission(id).await.unwrap().remove(0);
    assert_eq!(analysis.jobs.len(), 1);
    assert_eq!(analysis.jobs[0].status, AnalysisStatus::Error);
    assert_eq!(analysis.status, AnalysisStatus::Error);
    assert!(analysis.report.is_none());
    assert!(engine.is_idle().await.unwrap());
    engine.close().await;
}
