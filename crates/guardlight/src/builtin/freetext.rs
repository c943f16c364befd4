//! Plain-text parser: base64 bytes to a single line of UTF-8 text.

use base64::Engine;

use guardlight_core::contracts::{ParserRequest, ParserResponse, ResultStatus};

pub const PARSER_TYPE: &str = "freetext";

/// Decode the content and collapse every run of whitespace, line breaks
/// included, into one space.
pub fn parse(req: ParserRequest) -> ParserResponse {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(&req.content)
        .map_err(|e| e.to_string())
        .and_then(|bytes| String::from_utf8(bytes).map_err(|e| e.to_string()));

    let (text, status) = match decoded {
        Ok(raw) => (
            raw.split_whitespace().collect::<Vec<_>>().join(" "),
            ResultStatus::Success,
        ),
        Err(e) => (e, ResultStatus::Error),
    };
    ParserResponse {
        job_id: req.job_id,
        analysis_id: req.analysis_id,
        text,
        status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn request(content: String) -> ParserRequest {
        ParserRequest {
            job_id: Uuid::new_v4(),
            analysis_id: Uuid::new_v4(),
            content,
        }
    }

    #[test]
    fn test_collapses_whitespace() {
        let content = base64::engine::general_purpose::STANDARD
            .encode("Running and\r\nwalking.\n\n  Then   resting.");
        let req = request(content);
        let resp = parse(req.clone());
        assert_eq!(resp.status, ResultStatus::Success);
        assert_eq!(resp.text, "Running and walking. Then resting.");
        assert_eq!(resp.job_id, req.job_id);
        assert_eq!(resp.analysis_id, req.analysis_id);
    }

    #[test]
    fn test_invalid_base64_is_error() {
        let resp = parse(request("not base64!!".into()));
        assert_eq!(resp.status, ResultStatus::Error);
        assert!(!resp.text.is_empty());
    }

    #[test]
    fn test_invalid_utf8_is_error() {
        let content = base64::engine::general_purpose::STANDARD.encode([0xff, 0xfe, 0x00]);
        let resp = parse(request(content));
        assert_eq!(resp.status, ResultStatus::Error);
    }
}
