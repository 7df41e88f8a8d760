//! Log store abstraction.
//!
//! A [`LogStore`] runs one time-ranged, stream-filtered query and returns the
//! matching records sorted ascending by timestamp. Backends:
//!
//! | Config `backend` | Implementation |
//! |------------------|----------------|
//! | `"cloudwatch"` | [`CloudWatchStore`](crate::logstore_cloudwatch::CloudWatchStore) |
//! | `"file"` | [`FileLogStore`](crate::logstore_file::FileLogStore) |
//!
//! Raw messages arrive in a container log envelope:
//!
//! ```json
//! {"time": "2025-02-10T16:46:09.236Z", "stream": "stdout", "log": "..."}
//! ```
//!
//! Anything that does not parse into `time` and `log` strings is malformed.
//! Malformed rows are dropped and counted in [`LogFetch::skipped_malformed`].

use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use serde::Deserialize;

use crate::config::LogsConfig;
use crate::error::Result;
use crate::models::LogRecord;

/// Query parameters. Times are unix seconds, both ends inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    pub log_group: String,
    /// Substring the stream name must contain.
    pub stream_filter: String,
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogFetch {
    pub records: Vec<LogRecord>,
    pub skipped_malformed: usize,
}

#[async_trait]
pub trait LogStore: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch(&self, query: &LogQuery) -> Result<LogFetch>;
}

#[derive(Deserialize)]
struct Envelope {
    time: String,
    log: String,
}

/// Normalize one raw message. `None` means malformed.
pub fn parse_envelope(raw: &str) -> Option<LogRecord> {
    let envelope: Envelope = serde_json::from_str(raw).ok()?;
    Some(LogRecord::new(envelope.time, envelope.log))
}

pub fn create_log_store(config: &LogsConfig) -> anyhow::Result<Arc<dyn LogStore>> {
    match config.backend.as_str() {
        "cloudwatch" => Ok(Arc::new(
            crate::logstore_cloudwatch::CloudWatchStore::from_config(config)?,
        )),
        "file" => match &config.file {
            Some(path) => Ok(Arc::new(crate::logstore_file::FileLogStore::new(path))),
            None => bail!("logs.backend = \"file\" requires logs.file"),
        },
        other => bail!("Unknown logs backend: {}", other),
    }
}
