//! Reporter that passes content only when no sentence was flagged.

use guardlight_core::contracts::{ReporterRequest, ReporterResponse, ResultStatus};

pub const KEY: &str = "word_count";

pub fn report(req: ReporterRequest) -> ReporterResponse {
    let score = if req.contents.is_empty() { 1.0 } else { -1.0 };
    ReporterResponse {
        job_id: req.job_id,
        analysis_id: req.analysis_id,
        score,
        comments: String::new(),
        status: ResultStatus::Success,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_score_by_flagged_content() {
        let mut req = ReporterRequest {
            job_id: Uuid::new_v4(),
            analysis_id: Uuid::new_v4(),
            contents: vec![],
        };
        assert_eq!(report(req.clone()).score, 1.0);
        req.contents.push("Running and walking.".into());
        let resp = report(req);
        assert_eq!(resp.score, -1.0);
        assert_eq!(resp.status, ResultStatus::Success);
    }
}
