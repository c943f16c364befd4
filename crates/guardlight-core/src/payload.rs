//! Typed job payloads.
//!
//! `Job::data` holds one of three JSON shapes, picked by `Job::job_type`.
//! Each shape carries routing metadata (adapter key, image, target topic)
//! next to the request body that is published to the worker.

use serde::{Deserialize, Serialize};

use crate::contracts::{AnalyzerRequest, ParserRequest, ReporterRequest};
use crate::models::JobType;

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("malformed {0} job data: {1}")]
    Malformed(JobType, #[source] serde_json::Error),
    #[error("failed to encode job data: {0}")]
    Encode(#[source] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseJobData {
    pub adapter_key: String,
    pub image: String,
    pub topic: String,
    pub request: ParserRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeJobData {
    pub adapter_key: String,
    pub image: String,
    pub topic: String,
    pub request: AnalyzerRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportJobData {
    pub adapter_key: String,
    pub image: String,
    pub topic: String,
    pub request: ReporterRequest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobData {
    Parse(ParseJobData),
    Analyze(AnalyzeJobData),
    Report(ReportJobData),
}

impl JobData {
    pub fn job_type(&self) -> JobType {
        match self {
            JobData::Parse(_) => JobType::Parse,
            JobData::Analyze(_) => JobType::Analyze,
            JobData::Report(_) => JobType::Report,
        }
    }

    pub fn adapter_key(&self) -> &str {
        match self {
            JobData::Parse(d) => &d.adapter_key,
            JobData::Analyze(d) => &d.adapter_key,
            JobData::Report(d) => &d.adapter_key,
        }
    }

    pub fn topic(&self) -> &str {
        match self {
            JobData::Parse(d) => &d.topic,
            JobData::Analyze(d) => &d.topic,
            JobData::Report(d) => &d.topic,
        }
    }

    pub fn image(&self) -> &str {
        match self {
            JobData::Parse(d) => &d.image,
            JobData::Analyze(d) => &d.image,
            JobData::Report(d) => &d.image,
        }
    }

    /// Serialize the payload for storage in `Job::data`.
    pub fn encode(&self) -> Result<String, PayloadError> {
        match self {
            JobData::Parse(d) => serde_json::to_string(d),
            JobData::Analyze(d) => serde_json::to_string(d),
            JobData::Report(d) => serde_json::to_string(d),
        }
        .map_err(PayloadError::Encode)
    }

    pub fn decode(job_type: JobType, data: &str) -> Result<Self, PayloadError> {
        let malformed = |e| PayloadError::Malformed(job_type, e);
        Ok(match job_type {
            JobType::Parse => JobData::Parse(serde_json::from_str(data).map_err(malformed)?),
            JobType::Analyze => JobData::Analyze(serde_json::from_str(data).map_err(malformed)?),
            JobType::Report => JobData::Report(serde_json::from_str(data).map_err(malformed)?),
        })
    }

    /// The message body published to the worker topic.
    pub fn request_body(&self) -> Result<serde_json::Value, PayloadError> {
        match self {
            JobData::Parse(d) => serde_json::to_value(&d.request),
            JobData::Analyze(d) => serde_json::to_value(&d.request),
            JobData::Report(d) => serde_json::to_value(&d.request),
        }
        .map_err(PayloadError::Encode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn report_data() -> JobData {
        JobData::Report(ReportJobData {
            adapter_key: "word_count".into(),
            image: "builtin".into(),
            topic: "reporter.word_count".into(),
            request: ReporterRequest {
                job_id: Uuid::new_v4(),
                analysis_id: Uuid::new_v4(),
                contents: vec!["flagged".into()],
            },
        })
    }

    #[test]
    fn test_decode_selects_variant_by_type() {
        let data = report_data();
        let encoded = data.encode().unwrap();
        let decoded = JobData::decode(JobType::Report, &encoded).unwrap();
        assert_eq!(decoded, data);
        assert_eq!(decoded.adapter_key(), "word_count");
        assert_eq!(decoded.topic(), "reporter.word_count");
    }

    #[test]
    fn test_decode_with_wrong_type_is_malformed() {
        let encoded = report_data().encode().unwrap();
        let err = JobData::decode(JobType::Analyze, &encoded).unwrap_err();
        assert!(matches!(err, PayloadError::Malformed(JobType::Analyze, _)));
        assert!(JobData::decode(JobType::Parse, "not json").is_err());
    }

    #[test]
    fn test_request_body_is_worker_message_only() {
        let body = report_data().request_body().unwrap();
        assert!(body.get("contents").is_some());
        assert!(body.get("adapterKey").is_none());
    }
}
