//! Service operations shared by the HTTP API and the CLI.
//!
//! [`Services`] is the explicitly constructed bundle of collaborators
//! (log store, loaded index, embedder, reasoner) that every operation runs
//! against. Nothing here is global; tests build a `Services` from fakes.
//!
//! ```text
//! fetch_logs:      LogStore ──► extract ──► context_lines
//! fetch_code:      lines ──► "\n".join ──► CodeIndex::query
//! retrieve_for:    windows ──► records only ──► CodeIndex::query
//! fetch_diagnosis: logs + code ──► build_prompt ──► Reasoner
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime};
use serde::Serialize;

use crate::config::Config;
use crate::diagnose::{build_prompt, create_reasoner, request_diagnosis, Reasoner};
use crate::embedding::create_embedder;
use crate::error::{Error, Result};
use crate::extract::{extract, ExtractOptions};
use crate::index::CodeIndex;
use crate::logstore::{create_log_store, LogQuery, LogStore};
use crate::models::{ContextWindow, SnippetHit};
use crate::retrieve::Retriever;

/// Log fetch parameters. Times are unix seconds.
#[derive(Debug, Clone)]
pub struct LogsRequest {
    pub log_group: String,
    pub log_stream: String,
    pub start: i64,
    pub end: i64,
    /// Case-sensitive substring marking an error line. Empty matches every
    /// line.
    pub error_message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogsReport {
    /// Header and record lines for every retained window.
    pub lines: Vec<String>,
    #[serde(skip)]
    pub windows: Vec<ContextWindow>,
    /// Matches found, including those beyond the occurrence cap.
    pub occurrences: usize,
    /// Matches beyond the occurrence cap, found but not returned.
    pub truncated: usize,
    pub skipped_malformed: usize,
    pub records_scanned: usize,
}

/// Where the loaded index comes from, or why there is none.
#[derive(Clone)]
pub enum IndexState {
    Ready(Retriever),
    /// Artifacts were absent at startup.
    Missing(PathBuf),
}

#[derive(Clone)]
pub struct Services {
    pub log_store: Arc<dyn LogStore>,
    pub index: IndexState,
    pub reasoner: Arc<dyn Reasoner>,
    pub extract: ExtractOptions,
    pub top_k: usize,
    pub language: String,
}

impl Services {
    /// Wire up every collaborator from config.
    ///
    /// Missing index artifacts are not fatal here: the index is reported
    /// unavailable on use. Any other open failure is.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let log_store = create_log_store(&config.logs)?;
        let reasoner = create_reasoner(&config.reasoning)?;

        let index = match CodeIndex::open(&config.index.paths()) {
            Ok(index) => {
                let embedder = create_embedder(&config.embedding)?;
                if let Err(e) = index.check_model(embedder.as_ref()) {
                    tracing::warn!(error = %e, "code queries will fail until the index is rebuilt");
                }
                tracing::info!(
                    snippets = index.len(),
                    model = index.model_name(),
                    "index loaded"
                );
                IndexState::Ready(Retriever::new(
                    Arc::new(index),
                    embedder,
                    config.embedding.backoff(),
                ))
            }
            Err(Error::ArtifactMissing(path)) => {
                tracing::warn!(path = %path.display(), "index artifact missing; code retrieval unavailable until `rca index build`");
                IndexState::Missing(path)
            }
            Err(e) => return Err(anyhow::Error::new(e).context("Failed to open index")),
        };

        Ok(Self {
            log_store,
            index,
            reasoner,
            extract: config.extract.options(),
            top_k: config.index.top_k,
            language: config.reasoning.language.clone(),
        })
    }

    pub fn retriever(&self) -> Result<&Retriever> {
        match &self.index {
            IndexState::Ready(r) => Ok(r),
            IndexState::Missing(path) => Err(Error::ArtifactMissing(path.clone())),
        }
    }

    /// Query the log store and extract context around each error line.
    pub async fn fetch_logs(&self, request: &LogsRequest) -> Result<LogsReport> {
        if request.start > request.end {
            return Err(Error::InvalidRequest(format!(
                "start_time ({}) is after end_time ({})",
                request.start, request.end
            )));
        }

        let fetch = self
            .log_store
            .fetch(&LogQuery {
                log_group: request.log_group.clone(),
                stream_filter: request.log_stream.clone(),
                start: request.start,
                end: request.end,
            })
            .await?;

        let extraction = extract(&fetch.records, &request.error_message, &self.extract);
        tracing::info!(
            store = self.log_store.name(),
            records = fetch.records.len(),
            skipped = fetch.skipped_malformed,
            occurrences = extraction.total_occurrences,
            "logs fetched"
        );

        Ok(LogsReport {
            lines: context_lines(&extraction.windows),
            occurrences: extraction.total_occurrences,
            truncated: extraction.truncated(),
            skipped_malformed: fetch.skipped_malformed,
            records_scanned: fetch.records.len(),
            windows: extraction.windows,
        })
    }

    /// Nearest snippets to the given log lines, joined by newlines.
    pub async fn fetch_code(&self, lines: &[String]) -> Result<Vec<SnippetHit>> {
        if lines.is_empty() {
            return Err(Error::InvalidRequest("no log lines given".into()));
        }
        self.retriever()?
            .query(&lines.join("\n"), self.top_k)
            .await
    }

    /// Nearest snippets to the records of the given windows. Header lines
    /// are not embedded.
    pub async fn retrieve_for(&self, windows: &[ContextWindow]) -> Result<Vec<SnippetHit>> {
        if windows.is_empty() {
            return Err(Error::InvalidRequest("no context windows given".into()));
        }
        self.retriever()?.retrieve(windows, self.top_k).await
    }

    pub fn diagnosis_prompt(&self, logs: &serde_json::Value, code: &[String]) -> String {
        build_prompt(logs, code, &self.language)
    }

    pub async fn fetch_diagnosis(&self, logs: &serde_json::Value, code: &[String]) -> Result<String> {
        let prompt = self.diagnosis_prompt(logs, code);
        request_diagnosis(self.reasoner.as_ref(), &prompt).await
    }
}

/// A header line per window followed by its formatted records.
pub fn context_lines(windows: &[ContextWindow]) -> Vec<String> {
    let mut lines = Vec::new();
    for (n, window) in windows.iter().enumerate() {
        lines.push(format!("Context around error occurrence {}:", n + 1));
        lines.extend(window.records.iter().map(|r| r.to_string()));
    }
    lines
}

/// Accepts `YYYY-MM-DDTHH:MM` (UTC), RFC 3339, or unix seconds.
pub fn parse_time(value: &str) -> Result<i64> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<i64>() {
        return Ok(secs);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M") {
        return Ok(naive.and_utc().timestamp());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.timestamp());
    }
    Err(Error::InvalidRequest(format!(
        "invalid time '{}': expected YYYY-MM-DDTHH:MM, RFC 3339, or unix seconds",
        value
    )))
}
