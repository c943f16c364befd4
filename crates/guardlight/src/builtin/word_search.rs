//! Word-list analyzer.
//!
//! Splits the content into sentences and flags every sentence containing
//! one of the comma-separated `strict_words` as a whole word, ignoring
//! case. The score is `2 * flagged / sentences - 1`, or `-1` when nothing
//! was flagged.

use std::sync::LazyLock;

use regex::Regex;

use guardlight_core::contracts::{AnalyzerRequest, AnalyzerResponse, ResultStatus};
use guardlight_core::models::AnalysisInput;

pub const KEY: &str = "word_search";
pub const STRICT_WORDS: &str = "strict_words";

// Sentence end: terminal punctuation, an optional closing quote or paren,
// then whitespace or end of text.
static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"([.!?]["')]?)(\s+|$)"#).unwrap());

pub fn analyze(req: AnalyzerRequest) -> AnalyzerResponse {
    let (results, score, status) = match search(&req.content, &req.inputs) {
        Ok((flagged, score)) => (flagged, score, ResultStatus::Success),
        Err(message) => (vec![message], 0.0, ResultStatus::Error),
    };
    AnalyzerResponse {
        job_id: req.job_id,
        analysis_id: req.analysis_id,
        results,
        score,
        status,
    }
}

fn search(text: &str, inputs: &[AnalysisInput]) -> Result<(Vec<String>, f64), String> {
    let words = inputs
        .iter()
        .find(|i| i.key == STRICT_WORDS)
        .ok_or_else(|| format!("{STRICT_WORDS} key not found in data"))?;

    let alternatives: Vec<String> = words
        .value
        .split(',')
        .map(str::trim)
        .filter(|w| !w.is_empty())
        .map(regex::escape)
        .collect();
    if alternatives.is_empty() {
        return Ok((Vec::new(), -1.0));
    }
    let pattern = Regex::new(&format!(r"(?i)\b(?:{})\b", alternatives.join("|")))
        .map_err(|e| e.to_string())?;

    let sentences = split_sentences(text);
    let flagged: Vec<String> = sentences
        .iter()
        .filter(|s| pattern.is_match(s))
        .map(|s| s.to_string())
        .collect();

    let score = if flagged.is_empty() {
        -1.0
    } else {
        2.0 * flagged.len() as f64 / sentences.len() as f64 - 1.0
    };
    Ok((flagged, score))
}

/// Sentences in order, trimmed. Trailing text without terminal
/// punctuation counts as a final sentence.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for m in SENTENCE_END.find_iter(text) {
        let sentence = text[start..m.end()].trim();
        if !sentence.is_empty() {
            sentences.push(sentence);
        }
        start = m.end();
    }
    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}
