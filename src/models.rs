//! Core data models that flow through the diagnosis pipeline.
//!
//! [`LogRecord`] and [`ContextWindow`] live for a single request.
//! [`CodeSnippet`] is the unit stored alongside each vector in the index.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One normalized log line. Sequences of records are sorted ascending by
/// timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: String,
    pub message: String,
}

impl LogRecord {
    pub fn new(timestamp: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            message: message.into(),
        }
    }
}

/// Renders as `<timestamp> - <message>`.
impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.timestamp, self.message)
    }
}

/// The records surrounding one error occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextWindow {
    /// Index of the matching record in the full sequence.
    pub occurrence_index: usize,
    /// Index of `records[0]` in the full sequence.
    pub start: usize,
    pub records: Vec<LogRecord>,
}

/// A retrievable unit of source text. Position in the snippet mapping is its
/// identity; `source` is informational only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSnippet {
    #[serde(rename = "code")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl CodeSnippet {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: None,
        }
    }

    pub fn with_source(text: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: Some(source.into()),
        }
    }
}

/// A snippet returned from a nearest-neighbor query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnippetHit {
    /// Position of the snippet in the index.
    pub position: usize,
    /// L2 distance between the query vector and the stored vector.
    pub distance: f32,
    pub snippet: CodeSnippet,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_record_display() {
        let r = LogRecord::new("2025-02-10T16:46:09Z", "ERROR boom");
        assert_eq!(r.to_string(), "2025-02-10T16:46:09Z - ERROR boom");
    }

    #[test]
    fn test_snippet_json_shape() {
        let s = CodeSnippet::new("class A {}");
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json, serde_json::json!({ "code": "class A {}" }));

        let parsed: CodeSnippet =
            serde_json::from_str(r#"{"code":"x","source":"src/A.java"}"#).unwrap();
        assert_eq!(parsed.source.as_deref(), Some("src/A.java"));
    }
}
