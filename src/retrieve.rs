//! Turns extracted log context into a code query.

use std::sync::Arc;

use crate::embedding::Embedder;
use crate::error::Result;
use crate::index::CodeIndex;
use crate::models::{ContextWindow, SnippetHit};
use crate::retry::Backoff;

/// Every record of every window, in order, one `<timestamp> - <message>`
/// per line.
pub fn flatten_windows(windows: &[ContextWindow]) -> String {
    windows
        .iter()
        .flat_map(|w| w.records.iter())
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Read-only handle combining a loaded index with the embedder it was built
/// with. Cheap to clone; share one per process.
#[derive(Clone)]
pub struct Retriever {
    index: Arc<CodeIndex>,
    embedder: Arc<dyn Embedder>,
    backoff: Backoff,
}

impl Retriever {
    pub fn new(index: Arc<CodeIndex>, embedder: Arc<dyn Embedder>, backoff: Backoff) -> Self {
        Self {
            index,
            embedder,
            backoff,
        }
    }

    pub fn index(&self) -> &CodeIndex {
        &self.index
    }

    /// Nearest `k` snippets to arbitrary text.
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<SnippetHit>> {
        self.index
            .query(self.embedder.as_ref(), &self.backoff, text, k)
            .await
    }

    /// Nearest `k` snippets to the flattened context windows. An empty
    /// `windows` slice still queries, with the empty string.
    pub async fn retrieve(&self, windows: &[ContextWindow], k: usize) -> Result<Vec<SnippetHit>> {
        let text = flatten_windows(windows);
        tracing::debug!(windows = windows.len(), bytes = text.len(), k, "retrieving code");
        self.query(&text, k).await
    }
}
