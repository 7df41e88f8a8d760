//! JSON-lines log backend.
//!
//! Reads a file with one container log envelope per line, e.g. an exported
//! Insights result or `docker logs` output:
//!
//! ```text
//! {"time":"2025-02-10T16:46:09.236Z","stream":"qa_aro-service","log":"..."}
//! ```
//!
//! `log_group` is ignored. `stream_filter` must be a substring of `stream`;
//! lines without a `stream` field match any filter. `time` must be RFC 3339
//! and fall inside `[start, end]`. Results are stably sorted by time.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::logstore::{LogFetch, LogQuery, LogStore};
use crate::models::LogRecord;

pub struct FileLogStore {
    path: PathBuf,
}

impl FileLogStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[derive(Deserialize)]
struct Line {
    time: String,
    log: String,
    #[serde(default)]
    stream: Option<String>,
}

fn parse_line(raw: &str) -> Option<(DateTime<FixedOffset>, Line)> {
    let line: Line = serde_json::from_str(raw).ok()?;
    let at = DateTime::parse_from_rfc3339(&line.time).ok()?;
    Some((at, line))
}

#[async_trait]
impl LogStore for FileLogStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn fetch(&self, query: &LogQuery) -> Result<LogFetch> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            Error::external("log file", format!("{}: {}", self.path.display(), e))
        })?;

        let mut kept = Vec::new();
        let mut skipped_malformed = 0;
        for raw in content.lines().filter(|l| !l.trim().is_empty()) {
            let Some((at, line)) = parse_line(raw) else {
                skipped_malformed += 1;
                continue;
            };
            let in_stream = line
                .stream
                .as_deref()
                .map_or(true, |s| s.contains(&query.stream_filter));
            let secs = at.timestamp();
            if in_stream && secs >= query.start && secs <= query.end {
                kept.push((at, LogRecord::new(line.time, line.log)));
            }
        }
        kept.sort_by_key(|(at, _)| *at);

        if skipped_malformed > 0 {
            tracing::warn!(
                path = %self.path.display(),
                skipped = skipped_malformed,
                "skipped malformed log lines"
            );
        }

        Ok(LogFetch {
            records: kept.into_iter().map(|(_, r)| r).collect(),
            skipped_malformed,
        })
    }
}
