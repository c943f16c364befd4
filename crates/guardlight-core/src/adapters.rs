//! Adapter configuration and lookup.
//!
//! An adapter is a worker type reachable on the bus: a parser (selected by
//! mimetype), an analyzer or a reporter (selected by key). Each carries a
//! dispatch concurrency limit; analyzers also declare a context window and
//! the inputs a submission must supply.
//!
//! The config structs deserialize straight from the `[[parsers]]`,
//! `[[analyzers]]` and `[[reporters]]` tables of the application config.

use serde::{Deserialize, Serialize};

use crate::payload::JobData;

pub const BUILTIN_IMAGE: &str = "builtin";
pub const TEXT_MODEL: &str = "text";

fn default_image() -> String {
    BUILTIN_IMAGE.to_string()
}

fn default_concurrency() -> usize {
    4
}

fn default_context_window() -> usize {
    32000
}

fn default_model() -> String {
    TEXT_MODEL.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParserConfig {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Mimetype handled by this parser, e.g. `freetext`.
    #[serde(rename = "type")]
    pub parser_type: String,
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl ParserConfig {
    pub fn topic(&self) -> String {
        format!("parser.{}", self.parser_type)
    }

    pub fn group_key(&self) -> String {
        self.topic()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzerInputSpec {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub input_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_image")]
    pub image: String,
    /// Maximum characters per analyze job.
    #[serde(default = "default_context_window")]
    pub context_window: usize,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub inputs: Vec<AnalyzerInputSpec>,
}

impl AnalyzerConfig {
    pub fn topic(&self) -> String {
        format!("analyzer.{}", self.key)
    }

    pub fn group_key(&self) -> String {
        self.topic()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReporterConfig {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl ReporterConfig {
    pub fn topic(&self) -> String {
        format!("reporter.{}", self.key)
    }

    pub fn group_key(&self) -> String {
        self.topic()
    }
}

/// Read-only view of every configured adapter.
#[derive(Debug, Clone, Default)]
pub struct AdapterRegistry {
    parsers: Vec<ParserConfig>,
    analyzers: Vec<AnalyzerConfig>,
    reporters: Vec<ReporterConfig>,
}

impl AdapterRegistry {
    /// Build a registry. A kind with no configured adapters falls back to
    /// its built-in adapter.
    pub fn new(
        parsers: Vec<ParserConfig>,
        analyzers: Vec<AnalyzerConfig>,
        reporters: Vec<ReporterConfig>,
    ) -> Self {
        let builtin = Self::builtin();
        Self {
            parsers: if parsers.is_empty() { builtin.parsers } else { parsers },
            analyzers: if analyzers.is_empty() { builtin.analyzers } else { analyzers },
            reporters: if reporters.is_empty() { builtin.reporters } else { reporters },
        }
    }

    /// The `freetext` parser, `word_search` analyzer and `word_count`
    /// reporter.
    pub fn builtin() -> Self {
        Self {
            parsers: vec![ParserConfig {
                key: "freetext".into(),
                name: "Freetext".into(),
                description: "Parses a text to an utf-8 formatted text.".into(),
                parser_type: "freetext".into(),
                image: default_image(),
                concurrency: default_concurrency(),
            }],
            analyzers: vec![AnalyzerConfig {
                key: "word_search".into(),
                name: "Word Search".into(),
                description: "Uses a basic word list to scan content.".into(),
                image: default_image(),
                context_window: default_context_window(),
                model: default_model(),
                concurrency: default_concurrency(),
                inputs: vec![
                    AnalyzerInputSpec {
                        key: "threshold".into(),
                        name: "Threshold".into(),
                        description: "Point at which the analyzer flags the content.".into(),
                        input_type: "threshold".into(),
                    },
                    AnalyzerInputSpec {
                        key: "strict_words".into(),
                        name: "Strict Words".into(),
                        description: "Words in this list are used to flag content.".into(),
                        input_type: "textarea".into(),
                    },
                ],
            }],
            reporters: vec![ReporterConfig {
                key: "word_count".into(),
                name: "Word Count".into(),
                description: "Matches the threshold to the amount of flagged lines.".into(),
                image: default_image(),
                concurrency: default_concurrency(),
            }],
        }
    }

    pub fn parsers(&self) -> &[ParserConfig] {
        &self.parsers
    }

    pub fn analyzers(&self) -> &[AnalyzerConfig] {
        &self.analyzers
    }

    pub fn reporters(&self) -> &[ReporterConfig] {
        &self.reporters
    }

    pub fn parser(&self, key: &str) -> Option<&ParserConfig> {
        self.parsers.iter().find(|p| p.key == key)
    }

    pub fn parser_for_mimetype(&self, mimetype: &str) -> Option<&ParserConfig> {
        self.parsers.iter().find(|p| p.parser_type == mimetype)
    }

    pub fn analyzer(&self, key: &str) -> Option<&AnalyzerConfig> {
        self.analyzers.iter().find(|a| a.key == key)
    }

    pub fn reporter(&self, key: &str) -> Option<&ReporterConfig> {
        self.reporters.iter().find(|r| r.key == key)
    }

    /// Concurrency limit of the adapter a payload targets, or `None` when
    /// the adapter is not configured.
    pub fn concurrency_for(&self, data: &JobData) -> Option<usize> {
        let key = data.adapter_key();
        match data {
            JobData::Parse(_) => self.parser(key).map(|p| p.concurrency),
            JobData::Analyze(_) => self.analyzer(key).map(|a| a.concurrency),
            JobData::Report(_) => self.reporter(key).map(|r| r.concurrency),
        }
    }
}
