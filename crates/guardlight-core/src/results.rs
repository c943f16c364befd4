//! Read-side views of submissions for display.
//!
//! Analyses are grouped by theme in the order they were requested, and
//! decorated with the analyzer's display name and input labels from the
//! adapter registry.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::adapters::AdapterRegistry;
use crate::models::{Analysis, AnalysisStatus, Submission};
use crate::store::SubmissionStore;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionView {
    pub id: Uuid,
    pub title: String,
    pub category: String,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
    pub themes: Vec<ThemeView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeView {
    pub theme_id: Uuid,
    pub analyzers: Vec<AnalyzerView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzerView {
    pub analysis_id: Uuid,
    pub key: String,
    pub name: String,
    pub status: AnalysisStatus,
    pub score: f64,
    pub content: Vec<String>,
    pub inputs: Vec<InputView>,
    pub fragments_done: usize,
    pub fragments_total: usize,
    pub report: Option<AnalysisStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InputView {
    pub key: String,
    pub name: String,
    pub value: String,
}

pub fn view_submission(submission: &Submission, adapters: &AdapterRegistry) -> SubmissionView {
    let mut themes: Vec<ThemeView> = Vec::new();
    for analysis in &submission.analyses {
        let view = view_analysis(analysis, adapters);
        match themes.iter_mut().find(|t| t.theme_id == analysis.theme_id) {
            Some(theme) => theme.analyzers.push(view),
            None => themes.push(ThemeView {
                theme_id: analysis.theme_id,
                analyzers: vec![view],
            }),
        }
    }
    SubmissionView {
        id: submission.id,
        title: submission.title.clone(),
        category: submission.category.clone(),
        content_type: submission.content_type.clone(),
        created_at: submission.created_at,
        themes,
    }
}

fn view_analysis(analysis: &Analysis, adapters: &AdapterRegistry) -> AnalyzerView {
    let config = adapters.analyzer(&analysis.analyzer_key);
    let inputs = analysis
        .inputs
        .iter()
        .map(|input| InputView {
            key: input.key.clone(),
            name: config
                .and_then(|c| c.inputs.iter().find(|s| s.key == input.key))
                .map(|s| s.name.clone())
                .unwrap_or_else(|| input.key.clone()),
            value: input.value.clone(),
        })
        .collect();
    AnalyzerView {
        analysis_id: analysis.id,
        key: analysis.analyzer_key.clone(),
        name: config
            .map(|c| c.name.clone())
            .unwrap_or_else(|| analysis.analyzer_key.clone()),
        status: analysis.status,
        score: analysis.score,
        content: analysis.content.clone(),
        inputs,
        fragments_done: analysis.completed_count(),
        fragments_total: analysis.jobs.len(),
        report: analysis.report.map(|r| r.status),
    }
}

/// Every submission of `owner_id`, newest first.
pub async fn results_for_owner(
    store: &dyn SubmissionStore,
    adapters: &AdapterRegistry,
    owner_id: Uuid,
) -> Result<Vec<SubmissionView>> {
    Ok(store
        .list_submissions_for_owner(owner_id)
        .await?
        .iter()
        .map(|s| view_submission(s, adapters))
        .collect())
}
