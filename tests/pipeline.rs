//! End-to-end library tests: log store → extraction → index → prompt, with
//! in-process test doubles for every external service.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use rootcause::chunk::Chunker;
use rootcause::diagnose::Reasoner;
use rootcause::embedding::{EmbedError, Embedder};
use rootcause::error::{Error, Result};
use rootcause::extract::ExtractOptions;
use rootcause::index::{build_index, CodeIndex, IndexPaths};
use rootcause::logstore::{LogFetch, LogQuery, LogStore};
use rootcause::models::{CodeSnippet, LogRecord};
use rootcause::pipeline::{IndexState, LogsRequest, Services};
use rootcause::retrieve::Retriever;
use rootcause::retry::Backoff;

// ─── Test doubles ───────────────────────────────────────────────────

const KEYWORDS: [&str; 3] = ["NullPointer", "Timeout", "SQL"];

/// One dimension per keyword, valued by occurrence count.
struct KeywordEmbedder {
    model: &'static str,
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        self.model
    }
    fn dims(&self) -> usize {
        KEYWORDS.len()
    }
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbedError> {
        Ok(KEYWORDS
            .iter()
            .map(|k| text.matches(k).count() as f32)
            .collect())
    }
}

/// Keyword embedder that remembers every text it was asked to embed.
struct RecordingEmbedder {
    inner: KeywordEmbedder,
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl Embedder for RecordingEmbedder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
    fn dims(&self) -> usize {
        self.inner.dims()
    }
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbedError> {
        self.seen.lock().unwrap().push(text.to_string());
        self.inner.embed(text).await
    }
}

struct VecLogStore {
    records: Vec<LogRecord>,
    skipped: usize,
    queries: Mutex<Vec<LogQuery>>,
}

impl VecLogStore {
    fn new(messages: &[&str]) -> Self {
        Self {
            records: messages
                .iter()
                .enumerate()
                .map(|(i, m)| LogRecord::new(format!("2025-02-10T16:46:{:02}Z", i), *m))
                .collect(),
            skipped: 1,
            queries: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl LogStore for VecLogStore {
    fn name(&self) -> &str {
        "vec"
    }
    async fn fetch(&self, query: &LogQuery) -> Result<LogFetch> {
        self.queries.lock().unwrap().push(query.clone());
        Ok(LogFetch {
            records: self.records.clone(),
            skipped_malformed: self.skipped,
        })
    }
}

struct CannedReasoner {
    prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl Reasoner for CannedReasoner {
    fn model_name(&self) -> &str {
        "canned"
    }
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok("Root cause: plan is null in PlanService.load".to_string())
    }
}

// ─── Fixtures ───────────────────────────────────────────────────────

fn code_snippets() -> Vec<CodeSnippet> {
    vec![
        CodeSnippet::with_source(
            "class PlanService { Plan load() { return plan.get(); } } // NullPointer guard missing",
            "PlanService.java",
        ),
        CodeSnippet::with_source(
            "class HttpClient { void call() { throw new Timeout(); } }",
            "HttpClient.java",
        ),
        CodeSnippet::with_source("class PlanDao { String q = \"SQL\"; }", "PlanDao.java"),
    ]
}

async fn built_index(tmp: &TempDir) -> (CodeIndex, IndexPaths) {
    let embedder = KeywordEmbedder { model: "keyword-v1" };
    let (index, report) = build_index(
        &code_snippets(),
        &embedder,
        &Chunker::new(7000, 8192),
        &Backoff::default(),
    )
    .await
    .unwrap();
    assert!(report.failed.is_empty());

    let paths = IndexPaths {
        vectors: tmp.path().join("data/code.index"),
        snippets: tmp.path().join("data/code.json"),
    };
    index.save(&paths).unwrap();
    (CodeIndex::open(&paths).unwrap(), paths)
}

fn services(store: Arc<VecLogStore>, index: IndexState, reasoner: Arc<CannedReasoner>) -> Services {
    Services {
        log_store: store,
        index,
        reasoner,
        extract: ExtractOptions::default(),
        top_k: 1,
        language: "java".to_string(),
    }
}

fn request(needle: &str) -> LogsRequest {
    LogsRequest {
        log_group: "/aws/containerinsights/app".into(),
        log_stream: "qa_aro-service".into(),
        start: 0,
        end: 2_000_000_000,
        error_message: needle.into(),
    }
}

fn reasoner() -> Arc<CannedReasoner> {
    Arc::new(CannedReasoner {
        prompts: Mutex::new(Vec::new()),
    })
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_logs_to_diagnosis() {
    let tmp = TempDir::new().unwrap();
    let (index, _) = built_index(&tmp).await;
    let retriever = Retriever::new(
        Arc::new(index),
        Arc::new(KeywordEmbedder { model: "keyword-v1" }),
        Backoff::default(),
    );

    let store = Arc::new(VecLogStore::new(&[
        "starting",
        "loading plan 42",
        "ERROR java.lang.NullPointerException at PlanService.load",
        "request done",
    ]));
    let reasoner = reasoner();
    let svc = services(store.clone(), IndexState::Ready(retriever), reasoner.clone());

    let report = svc.fetch_logs(&request("NullPointerException")).await.unwrap();
    assert_eq!(report.occurrences, 1);
    assert_eq!(report.truncated, 0);
    assert_eq!(report.skipped_malformed, 1);
    assert_eq!(report.records_scanned, 4);
    assert_eq!(report.lines.len(), 5);
    assert_eq!(report.lines[0], "Context around error occurrence 1:");
    assert_eq!(report.lines[1], "2025-02-10T16:46:00Z - starting");

    let q = store.queries.lock().unwrap()[0].clone();
    assert_eq!(q.stream_filter, "qa_aro-service");
    assert_eq!(q.log_group, "/aws/containerinsights/app");

    let hits = svc.retrieve_for(&report.windows).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].snippet.source.as_deref(), Some("PlanService.java"));

    let code: Vec<String> = hits.into_iter().map(|h| h.snippet.text).collect();
    let logs = serde_json::to_value(&report.lines).unwrap();
    let diagnosis = svc.fetch_diagnosis(&logs, &code).await.unwrap();
    assert_eq!(diagnosis, "Root cause: plan is null in PlanService.load");

    let prompts = reasoner.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("NullPointerException at PlanService.load"));
    assert!(prompts[0].contains("```java\nclass PlanService"));
}

#[tokio::test]
async fn test_retrieval_embeds_records_without_headers() {
    let tmp = TempDir::new().unwrap();
    let (index, _) = built_index(&tmp).await;
    let embedder = Arc::new(RecordingEmbedder {
        inner: KeywordEmbedder { model: "keyword-v1" },
        seen: Mutex::new(Vec::new()),
    });
    let retriever = Retriever::new(Arc::new(index), embedder.clone(), Backoff::default());
    let svc = services(
        Arc::new(VecLogStore::new(&["ok", "ERROR X"])),
        IndexState::Ready(retriever),
        reasoner(),
    );

    let report = svc.fetch_logs(&request("ERROR")).await.unwrap();
    assert_eq!(report.lines[0], "Context around error occurrence 1:");
    svc.retrieve_for(&report.windows).await.unwrap();

    let seen = embedder.seen.lock().unwrap();
    assert_eq!(
        *seen,
        vec!["2025-02-10T16:46:00Z - ok\n2025-02-10T16:46:01Z - ERROR X".to_string()]
    );
}

#[tokio::test]
async fn test_retrieval_without_windows_rejected() {
    let svc = services(
        Arc::new(VecLogStore::new(&[])),
        IndexState::Missing("code.index".into()),
        reasoner(),
    );
    let err = svc.retrieve_for(&[]).await.unwrap_err();
    assert_eq!(err.code(), "bad_request");
}

#[tokio::test]
async fn test_no_occurrence_is_empty_not_error() {
    let store = Arc::new(VecLogStore::new(&["ok", "ok"]));
    let svc = services(store, IndexState::Missing("code.index".into()), reasoner());

    let report = svc.fetch_logs(&request("OutOfMemoryError")).await.unwrap();
    assert!(report.lines.is_empty());
    assert!(report.windows.is_empty());
    assert_eq!(report.occurrences, 0);
}

#[tokio::test]
async fn test_occurrences_beyond_cap_are_counted() {
    let messages: Vec<String> = (0..20)
        .map(|i| {
            if i % 4 == 0 {
                format!("ERROR Timeout #{}", i)
            } else {
                "ok".into()
            }
        })
        .collect();
    let refs: Vec<&str> = messages.iter().map(String::as_str).collect();
    let svc = services(
        Arc::new(VecLogStore::new(&refs)),
        IndexState::Missing("code.index".into()),
        reasoner(),
    );

    let report = svc.fetch_logs(&request("ERROR")).await.unwrap();
    assert_eq!(report.occurrences, 5);
    assert_eq!(report.windows.len(), 3);
    assert_eq!(report.truncated, 2);
    let occurrence_order: Vec<usize> = report.windows.iter().map(|w| w.occurrence_index).collect();
    assert_eq!(occurrence_order, vec![0, 4, 8]);
}

#[tokio::test]
async fn test_inverted_time_range_rejected() {
    let svc = services(
        Arc::new(VecLogStore::new(&[])),
        IndexState::Missing("code.index".into()),
        reasoner(),
    );
    let mut req = request("ERROR");
    req.start = 100;
    req.end = 50;
    let err = svc.fetch_logs(&req).await.unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));
}

#[tokio::test]
async fn test_missing_index_is_unavailable() {
    let svc = services(
        Arc::new(VecLogStore::new(&[])),
        IndexState::Missing("data/code.index".into()),
        reasoner(),
    );
    let err = svc.fetch_code(&["x".to_string()]).await.unwrap_err();
    assert_eq!(err.code(), "index_unavailable");
    assert!(err.to_string().contains("rca index build"));
}

#[tokio::test]
async fn test_empty_code_request_rejected() {
    let svc = services(
        Arc::new(VecLogStore::new(&[])),
        IndexState::Missing("code.index".into()),
        reasoner(),
    );
    let err = svc.fetch_code(&[]).await.unwrap_err();
    assert_eq!(err.code(), "bad_request");
}

#[tokio::test]
async fn test_embedder_model_change_is_consistency_violation() {
    let tmp = TempDir::new().unwrap();
    let (index, _) = built_index(&tmp).await;
    let retriever = Retriever::new(
        Arc::new(index),
        Arc::new(KeywordEmbedder { model: "keyword-v2" }),
        Backoff::default(),
    );
    let svc = services(
        Arc::new(VecLogStore::new(&[])),
        IndexState::Ready(retriever),
        reasoner(),
    );
    let err = svc
        .fetch_code(&["ERROR NullPointerException".to_string()])
        .await
        .unwrap_err();
    assert_eq!(err.code(), "consistency_violation");
}

#[tokio::test]
async fn test_reopened_index_returns_stored_snippet_at_rank_zero() {
    let tmp = TempDir::new().unwrap();
    let (_, paths) = built_index(&tmp).await;
    let reopened = CodeIndex::open(&paths).unwrap();

    let embedder = KeywordEmbedder { model: "keyword-v1" };
    for snippet in code_snippets() {
        let vector = embedder.embed(&snippet.text).await.unwrap();
        let hits = reopened.search_vector(&vector, 1).unwrap();
        assert_eq!(hits[0].snippet, snippet);
        assert!(hits[0].distance.abs() < 1e-6);
    }
}
