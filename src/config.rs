use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chunk::{DEFAULT_BUDGET_TOKENS, DEFAULT_CEILING_TOKENS};
use crate::extract::{ExtractOptions, DEFAULT_MAX_OCCURRENCES, DEFAULT_WINDOW_RADIUS};
use crate::index::IndexPaths;
use crate::retry::Backoff;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub logs: LogsConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub reasoning: ReasoningConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogsConfig {
    #[serde(default = "default_logs_backend")]
    pub backend: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Overrides `https://logs.<region>.amazonaws.com` (e.g. LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// JSON-lines file read by the `file` backend.
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
    #[serde(default = "default_max_rows")]
    pub max_rows: u32,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            backend: default_logs_backend(),
            region: default_region(),
            endpoint_url: None,
            file: None,
            poll_interval_secs: default_poll_interval_secs(),
            query_timeout_secs: default_query_timeout_secs(),
            max_rows: default_max_rows(),
        }
    }
}

fn default_logs_backend() -> String {
    "cloudwatch".to_string()
}
fn default_region() -> String {
    std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string())
}
fn default_poll_interval_secs() -> u64 {
    2
}
fn default_query_timeout_secs() -> u64 {
    120
}
fn default_max_rows() -> u32 {
    10_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractConfig {
    #[serde(default = "default_window_radius")]
    pub window_radius: usize,
    #[serde(default = "default_max_occurrences")]
    pub max_occurrences: usize,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            window_radius: DEFAULT_WINDOW_RADIUS,
            max_occurrences: DEFAULT_MAX_OCCURRENCES,
        }
    }
}

impl ExtractConfig {
    pub fn options(&self) -> ExtractOptions {
        ExtractOptions {
            window_radius: self.window_radius,
            max_occurrences: self.max_occurrences,
        }
    }
}

fn default_window_radius() -> usize {
    DEFAULT_WINDOW_RADIUS
}
fn default_max_occurrences() -> usize {
    DEFAULT_MAX_OCCURRENCES
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourcesConfig {
    #[serde(default = "default_sources_root")]
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            root: default_sources_root(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_sources_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.java".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_budget_tokens")]
    pub budget_tokens: usize,
    #[serde(default = "default_ceiling_tokens")]
    pub ceiling_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            budget_tokens: DEFAULT_BUDGET_TOKENS,
            ceiling_tokens: DEFAULT_CEILING_TOKENS,
        }
    }
}

fn default_budget_tokens() -> usize {
    DEFAULT_BUDGET_TOKENS
}
fn default_ceiling_tokens() -> usize {
    DEFAULT_CEILING_TOKENS
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override for the provider API.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max_delay_secs")]
    pub backoff_max_delay_secs: u64,
    #[serde(default = "default_backoff_max_elapsed_secs")]
    pub backoff_max_elapsed_secs: u64,
    #[serde(default = "default_true")]
    pub backoff_jitter: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            timeout_secs: 30,
            backoff_initial_ms: 500,
            backoff_max_delay_secs: 8,
            backoff_max_elapsed_secs: 30,
            backoff_jitter: true,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            initial_delay: Duration::from_millis(self.backoff_initial_ms),
            max_delay: Duration::from_secs(self.backoff_max_delay_secs),
            max_elapsed: Duration::from_secs(self.backoff_max_elapsed_secs),
            jitter: self.backoff_jitter,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_backoff_initial_ms() -> u64 {
    500
}
fn default_backoff_max_delay_secs() -> u64 {
    8
}
fn default_backoff_max_elapsed_secs() -> u64 {
    30
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_vectors_path")]
    pub vectors_path: PathBuf,
    #[serde(default = "default_snippets_path")]
    pub snippets_path: PathBuf,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            vectors_path: default_vectors_path(),
            snippets_path: default_snippets_path(),
            top_k: default_top_k(),
        }
    }
}

impl IndexConfig {
    pub fn paths(&self) -> IndexPaths {
        IndexPaths {
            vectors: self.vectors_path.clone(),
            snippets: self.snippets_path.clone(),
        }
    }
}

fn default_vectors_path() -> PathBuf {
    PathBuf::from("./data/code.index")
}
fn default_snippets_path() -> PathBuf {
    PathBuf::from("./data/code.json")
}
fn default_top_k() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReasoningConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_reasoning_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_reasoning_timeout_secs")]
    pub timeout_secs: u64,
    /// Language of the indexed code; used in the prompt role and fence tag.
    #[serde(default = "default_language")]
    pub language: String,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_reasoning_model(),
            url: None,
            timeout_secs: default_reasoning_timeout_secs(),
            language: default_language(),
        }
    }
}

fn default_reasoning_model() -> String {
    "gpt-4-turbo".to_string()
}
fn default_reasoning_timeout_secs() -> u64 {
    120
}
fn default_language() -> String {
    "java".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.budget_tokens == 0 {
        anyhow::bail!("chunking.budget_tokens must be > 0");
    }
    if config.chunking.budget_tokens >= config.chunking.ceiling_tokens {
        anyhow::bail!(
            "chunking.budget_tokens ({}) must be below chunking.ceiling_tokens ({})",
            config.chunking.budget_tokens,
            config.chunking.ceiling_tokens
        );
    }

    // Validate retrieval
    if config.index.top_k == 0 {
        anyhow::bail!("index.top_k must be >= 1");
    }

    // Validate logs
    match config.logs.backend.as_str() {
        "cloudwatch" => {}
        "file" => {
            if config.logs.file.is_none() {
                anyhow::bail!("logs.file must be set when logs.backend = \"file\"");
            }
        }
        other => anyhow::bail!(
            "Unknown logs backend: '{}'. Must be cloudwatch or file.",
            other
        ),
    }
    if config.logs.poll_interval_secs == 0 {
        anyhow::bail!("logs.poll_interval_secs must be > 0");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "local" => {}
        "ollama" => {
            if config.embedding.model.is_none() || config.embedding.dims.unwrap_or(0) == 0 {
                anyhow::bail!("embedding.model and embedding.dims must be set for ollama");
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if config.embedding.dims == Some(0) {
        anyhow::bail!("embedding.dims must be > 0");
    }

    match config.reasoning.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown reasoning provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    Ok(())
}
