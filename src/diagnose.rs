//! Diagnosis prompt assembly and reasoning-service clients.
//!
//! [`build_prompt`] renders logs and code into a fixed four-part template:
//!
//! 1. role/task preamble
//! 2. logs as indented JSON (falling back to their debug text)
//! 3. code snippets, blank-line separated, in one fenced block
//! 4. instructions: find the root cause, propose a fix
//!
//! [`request_diagnosis`] sends it to a [`Reasoner`] once and returns the
//! answer untouched. There is no retry at this layer.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use serde::Serialize;

use crate::config::ReasoningConfig;
use crate::error::{Error, Result};

const OPENAI_URL: &str = "https://api.openai.com/v1";
const OLLAMA_URL: &str = "http://localhost:11434";
const SERVICE: &str = "reasoning service";

/// Indented JSON, or the debug rendering if `logs` cannot be serialized.
pub fn format_logs<T: Serialize + Debug + ?Sized>(logs: &T) -> String {
    match serde_json::to_string_pretty(logs) {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!(error = %e, "logs are not JSON-serializable, using debug text");
            format!("{:?}", logs)
        }
    }
}

/// All snippets in one fenced block tagged with `language`.
pub fn format_code<S: AsRef<str>>(snippets: &[S], language: &str) -> String {
    let body = snippets
        .iter()
        .map(|s| s.as_ref())
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("```{}\n{}\n```", language, body)
}

fn display_language(language: &str) -> String {
    let mut chars = language.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => "source".to_string(),
    }
}

pub fn build_prompt<T, S>(logs: &T, snippets: &[S], language: &str) -> String
where
    T: Serialize + Debug + ?Sized,
    S: AsRef<str>,
{
    let lang = display_language(language);
    format!(
        "You are an expert {lang} developer and troubleshooting engineer. \
Below are error logs and relevant {lang} code.\n\
\n\
Error logs (structured JSON):\n\
```json\n\
{logs}\n\
```\n\
\n\
Relevant {lang} code:\n\
{code}\n\
\n\
Debugging task:\n\
- Analyze the logs and the code.\n\
- Identify the most likely root cause of the issue.\n\
- Suggest fixes with specific {lang} code changes.\n\
\n\
Respond with a detailed explanation and a proposed solution.\n",
        lang = lang,
        logs = format_logs(logs),
        code = format_code(snippets, language),
    )
}

/// A prompt → free-text capability.
#[async_trait]
pub trait Reasoner: Send + Sync {
    fn model_name(&self) -> &str;
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// One call to the reasoning service. The response is returned verbatim.
pub async fn request_diagnosis(reasoner: &dyn Reasoner, prompt: &str) -> Result<String> {
    tracing::info!(
        model = reasoner.model_name(),
        prompt_bytes = prompt.len(),
        "requesting diagnosis"
    );
    reasoner.complete(prompt).await
}

/// Always fails; used when no reasoning provider is configured.
pub struct DisabledReasoner;

#[async_trait]
impl Reasoner for DisabledReasoner {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn complete(&self, _prompt: &str) -> Result<String> {
        Err(Error::external(
            SERVICE,
            "reasoning provider is disabled; set [reasoning] provider in config",
        ))
    }
}

/// `POST {url}/chat/completions` with a single user message. Requires
/// `OPENAI_API_KEY`.
pub struct OpenAIReasoner {
    client: reqwest::Client,
    api_key: String,
    url: String,
    model: String,
    timeout_secs: u64,
}

impl OpenAIReasoner {
    pub fn new(config: &ReasoningConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            api_key,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_URL.to_string()),
            model: config.model.clone(),
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl Reasoner for OpenAIReasoner {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
        });
        let response = self
            .client
            .post(format!("{}/chat/completions", self.url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error(e, self.timeout_secs))?;
        let json = read_json(response, "OpenAI").await?;
        parse_openai_chat(&json)
    }
}

/// `POST {url}/api/chat` with `stream: false`.
pub struct OllamaReasoner {
    client: reqwest::Client,
    url: String,
    model: String,
    timeout_secs: u64,
}

impl OllamaReasoner {
    pub fn new(config: &ReasoningConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OLLAMA_URL.to_string()),
            model: config.model.clone(),
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl Reasoner for OllamaReasoner {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "stream": false,
            "messages": [{"role": "user", "content": prompt}],
        });
        let response = self
            .client
            .post(format!("{}/api/chat", self.url.trim_end_matches('/')))
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error(e, self.timeout_secs))?;
        let json = read_json(response, "Ollama").await?;
        json.get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::external(SERVICE, "invalid Ollama response: missing message"))
    }
}

fn http_client(timeout_secs: u64) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

fn request_error(e: reqwest::Error, timeout_secs: u64) -> Error {
    if e.is_timeout() {
        Error::Timeout {
            service: SERVICE,
            secs: timeout_secs,
        }
    } else {
        Error::external(SERVICE, format!("request error: {}", e))
    }
}

async fn read_json(response: reqwest::Response, provider: &str) -> Result<serde_json::Value> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(Error::external(
            SERVICE,
            format!("{} API error {}: {}", provider, status, text),
        ));
    }
    response
        .json()
        .await
        .map_err(|e| Error::external(SERVICE, format!("{} response decode error: {}", provider, e)))
}

fn parse_openai_chat(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| Error::external(SERVICE, "invalid OpenAI response: missing choices"))
}

/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledReasoner`] |
/// | `"openai"` | [`OpenAIReasoner`] |
/// | `"ollama"` | [`OllamaReasoner`] |
pub fn create_reasoner(config: &ReasoningConfig) -> anyhow::Result<Arc<dyn Reasoner>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledReasoner)),
        "openai" => Ok(Arc::new(OpenAIReasoner::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaReasoner::new(config)?)),
        other => bail!("Unknown reasoning provider: {}", other),
    }
}
