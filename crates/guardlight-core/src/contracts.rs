//! Wire messages exchanged with remote workers over the bus.
//!
//! Requests are published on `parser.<type>`, `analyzer.<key>` and
//! `reporter.<key>`; replies come back on the three fixed result topics.
//! All messages are JSON with camelCase field names. `analysisId` carries the
//! submission id for parse messages and the analysis id otherwise.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::AnalysisInput;

pub const PARSER_RESULT_TOPIC: &str = "parser.result";
pub const ANALYZER_RESULT_TOPIC: &str = "analyzer.result";
pub const REPORTER_RESULT_TOPIC: &str = "reporter.result";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParserRequest {
    pub job_id: Uuid,
    pub analysis_id: Uuid,
    /// Base64-encoded raw bytes.
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParserResponse {
    pub job_id: Uuid,
    pub analysis_id: Uuid,
    /// Normalized text on success, error description otherwise.
    pub text: String,
    pub status: ResultStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzerRequest {
    pub job_id: Uuid,
    pub analysis_id: Uuid,
    pub content: String,
    pub inputs: Vec<AnalysisInput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzerResponse {
    pub job_id: Uuid,
    pub analysis_id: Uuid,
    #[serde(default)]
    pub results: Vec<String>,
    #[serde(default)]
    pub score: f64,
    pub status: ResultStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReporterRequest {
    pub job_id: Uuid,
    pub analysis_id: Uuid,
    pub contents: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReporterResponse {
    pub job_id: Uuid,
    pub analysis_id: Uuid,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub comments: String,
    pub status: ResultStatus,
}
