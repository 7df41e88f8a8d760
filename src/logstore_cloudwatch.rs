//! CloudWatch Logs Insights backend.
//!
//! Runs one Insights query per fetch:
//!
//! ```text
//! fields @timestamp, @message
//! | filter @logStream like "<stream_filter>"
//! | sort @timestamp asc
//! ```
//!
//! `StartQuery` returns a query id; `GetQueryResults` is then polled every
//! `poll_interval_secs` until the query completes. The whole exchange is
//! bounded by `query_timeout_secs`. Requests are SigV4-signed with
//! environment credentials. Set `endpoint_url` to target LocalStack or a
//! test server.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use crate::aws_sigv4::{sign_json_request, AwsCredentials, JsonRequest};
use crate::config::LogsConfig;
use crate::error::{Error, Result};
use crate::logstore::{parse_envelope, LogFetch, LogQuery, LogStore};

const SERVICE: &str = "CloudWatch Logs";
const TARGET_PREFIX: &str = "Logs_20140328";

pub struct CloudWatchStore {
    client: reqwest::Client,
    base_url: String,
    host: String,
    region: String,
    poll_interval: Duration,
    query_timeout: Duration,
    max_rows: u32,
    credentials: Option<AwsCredentials>,
}

impl CloudWatchStore {
    pub fn from_config(config: &LogsConfig) -> anyhow::Result<Self> {
        let endpoint = match &config.endpoint_url {
            Some(url) => url.clone(),
            None => format!("https://logs.{}.amazonaws.com", config.region),
        };
        let (base_url, host) = endpoint_origin(&endpoint)?;

        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.query_timeout_secs.max(1)))
                .build()?,
            base_url,
            host,
            region: config.region.clone(),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            query_timeout: Duration::from_secs(config.query_timeout_secs),
            max_rows: config.max_rows,
            credentials: None,
        })
    }

    /// Use fixed credentials instead of reading the environment per fetch.
    pub fn with_credentials(mut self, credentials: AwsCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Override the poll interval (sub-second intervals are useful in tests).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn call(
        &self,
        creds: &AwsCredentials,
        action: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let target = format!("{}.{}", TARGET_PREFIX, action);
        let payload = serde_json::to_vec(&body)?;
        let headers = sign_json_request(
            creds,
            &JsonRequest {
                host: &self.host,
                region: &self.region,
                service: "logs",
                target: &target,
                body: &payload,
            },
            Utc::now(),
        );

        let mut request = self.client.post(format!("{}/", self.base_url)).body(payload);
        for (name, value) in &headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::external(SERVICE, format!("{} request failed: {}", action, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::external(
                SERVICE,
                format!(
                    "{} failed (HTTP {}): {}",
                    action,
                    status,
                    text.chars().take(500).collect::<String>()
                ),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| Error::external(SERVICE, format!("{} returned invalid JSON: {}", action, e)))
    }

    async fn run_query(&self, creds: &AwsCredentials, query: &LogQuery) -> Result<LogFetch> {
        let start = self
            .call(
                creds,
                "StartQuery",
                serde_json::json!({
                    "logGroupName": query.log_group,
                    "startTime": query.start,
                    "endTime": query.end,
                    "queryString": insights_query(&query.stream_filter),
                    "limit": self.max_rows,
                }),
            )
            .await?;
        let query_id = start
            .get("queryId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::external(SERVICE, "StartQuery response has no queryId"))?
            .to_string();
        tracing::debug!(query_id = %query_id, log_group = %query.log_group, "insights query started");

        loop {
            let value = self
                .call(
                    creds,
                    "GetQueryResults",
                    serde_json::json!({ "queryId": query_id }),
                )
                .await?;
            let page: QueryResults = serde_json::from_value(value)?;

            match page.status.as_str() {
                "Complete" => return Ok(collect_rows(&page.results)),
                "Failed" | "Cancelled" | "Timeout" => {
                    return Err(Error::external(
                        SERVICE,
                        format!("insights query {} ended with status {}", query_id, page.status),
                    ))
                }
                _ => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }
}

#[async_trait]
impl LogStore for CloudWatchStore {
    fn name(&self) -> &str {
        "cloudwatch"
    }

    async fn fetch(&self, query: &LogQuery) -> Result<LogFetch> {
        let creds = match &self.credentials {
            Some(c) => c.clone(),
            None => AwsCredentials::from_env().map_err(|e| Error::external(SERVICE, e.to_string()))?,
        };

        match tokio::time::timeout(self.query_timeout, self.run_query(&creds, query)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                service: SERVICE,
                secs: self.query_timeout.as_secs(),
            }),
        }
    }
}

#[derive(Deserialize)]
struct QueryResults {
    status: String,
    #[serde(default)]
    results: Vec<Vec<ResultField>>,
}

#[derive(Deserialize)]
struct ResultField {
    field: String,
    #[serde(default)]
    value: String,
}

/// Split an endpoint URL into the origin requests go to and the `host`
/// header value that gets signed. Requests always target `/`.
fn endpoint_origin(endpoint: &str) -> anyhow::Result<(String, String)> {
    let url = reqwest::Url::parse(endpoint)
        .with_context(|| format!("Invalid logs endpoint URL: {}", endpoint))?;
    let host = match (url.host_str(), url.port()) {
        (Some(h), Some(port)) => format!("{}:{}", h, port),
        (Some(h), None) => h.to_string(),
        (None, _) => anyhow::bail!("logs endpoint URL has no host: {}", endpoint),
    };
    if url.path() != "/" {
        tracing::warn!(endpoint, "ignoring path in logs endpoint URL; requests go to /");
    }
    Ok((format!("{}://{}", url.scheme(), host), host))
}

pub fn insights_query(stream_filter: &str) -> String {
    let escaped = stream_filter.replace('\\', "\\\\").replace('"', "\\\"");
    format!(
        "fields @timestamp, @message | filter @logStream like \"{}\" | sort @timestamp asc",
        escaped
    )
}

fn collect_rows(rows: &[Vec<ResultField>]) -> LogFetch {
    let mut fetch = LogFetch::default();
    for row in rows {
        let record = row
            .iter()
            .find(|f| f.field == "@message")
            .and_then(|f| parse_envelope(&f.value));
        match record {
            Some(r) => fetch.records.push(r),
            None => fetch.skipped_malformed += 1,
        }
    }
    if fetch.skipped_malformed > 0 {
        tracing::warn!(
            skipped = fetch.skipped_malformed,
            kept = fetch.records.len(),
            "skipped malformed log rows"
        );
    }
    fetch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LogRecord;
    use axum::body::Bytes;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_insights_query_escapes_filter() {
        assert_eq!(
            insights_query("qa_aro-service"),
            "fields @timestamp, @message | filter @logStream like \"qa_aro-service\" | sort @timestamp asc"
        );
        assert!(insights_query(r#"a"b\c"#).contains(r#"like "a\"b\\c""#));
    }

    #[test]
    fn test_endpoint_host_excludes_path() {
        let (base_url, host) = endpoint_origin("http://localstack:4566/x").unwrap();
        assert_eq!(host, "localstack:4566");
        assert_eq!(base_url, "http://localstack:4566");

        let (base_url, host) = endpoint_origin("https://logs.eu-west-1.amazonaws.com/").unwrap();
        assert_eq!(host, "logs.eu-west-1.amazonaws.com");
        assert_eq!(base_url, "https://logs.eu-west-1.amazonaws.com");

        // Default ports are not part of the signed host.
        let (_, host) = endpoint_origin("https://example.com:443").unwrap();
        assert_eq!(host, "example.com");

        assert!(endpoint_origin("localstack:4566").is_err());
        assert!(endpoint_origin("not a url").is_err());
    }

    #[test]
    fn test_collect_rows_counts_malformed() {
        let rows: Vec<Vec<ResultField>> = serde_json::from_value(serde_json::json!([
            [{"field": "@timestamp", "value": "x"}, {"field": "@message", "value": "{\"time\":\"t1\",\"log\":\"a\"}"}],
            [{"field": "@timestamp", "value": "x"}, {"field": "@message", "value": "not json"}],
            [{"field": "@timestamp", "value": "x"}],
            [{"field": "@message", "value": "{\"time\":\"t2\",\"log\":\"ERROR b\"}"}, {"field": "@ptr", "value": "p"}]
        ]))
        .unwrap();
        let fetch = collect_rows(&rows);
        assert_eq!(
            fetch.records,
            vec![LogRecord::new("t1", "a"), LogRecord::new("t2", "ERROR b")]
        );
        assert_eq!(fetch.skipped_malformed, 2);
    }

    /// Serves StartQuery and reports `Running` for the first `running_polls`
    /// GetQueryResults calls, then `final_status`.
    async fn mock_logs_api(running_polls: usize, final_status: &'static str) -> String {
        let polls = Arc::new(AtomicUsize::new(0));
        let app = Router::new().route(
            "/",
            post(move |headers: HeaderMap, body: Bytes| {
                let polls = polls.clone();
                async move {
                    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
                    assert!(headers.contains_key("authorization"));
                    let target = headers
                        .get("x-amz-target")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    if target.ends_with("StartQuery") {
                        assert!(body["queryString"]
                            .as_str()
                            .unwrap()
                            .contains("like \"svc\""));
                        return Json(serde_json::json!({"queryId": "q-1"}));
                    }
                    assert_eq!(body["queryId"], "q-1");
                    if polls.fetch_add(1, Ordering::SeqCst) < running_polls {
                        return Json(serde_json::json!({"status": "Running", "results": []}));
                    }
                    Json(serde_json::json!({
                        "status": final_status,
                        "results": [
                            [{"field": "@message", "value": "{\"time\":\"t1\",\"log\":\"ok\"}"}],
                            [{"field": "@message", "value": "{\"time\":\"t2\",\"log\":\"ERROR X\"}"}],
                            [{"field": "@message", "value": "garbage"}]
                        ]
                    }))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn store(endpoint: String, timeout_secs: u64) -> CloudWatchStore {
        let config = LogsConfig {
            endpoint_url: Some(endpoint),
            query_timeout_secs: timeout_secs,
            ..LogsConfig::default()
        };
        CloudWatchStore::from_config(&config)
            .unwrap()
            .with_credentials(AwsCredentials {
                access_key_id: "AKID".into(),
                secret_access_key: "secret".into(),
                session_token: None,
            })
            .with_poll_interval(Duration::from_millis(10))
    }

    fn query() -> LogQuery {
        LogQuery {
            log_group: "/app".into(),
            stream_filter: "svc".into(),
            start: 0,
            end: 60,
        }
    }

    #[tokio::test]
    async fn test_fetch_polls_until_complete() {
        let endpoint = mock_logs_api(2, "Complete").await;
        let fetch = store(endpoint, 10).fetch(&query()).await.unwrap();
        assert_eq!(
            fetch.records,
            vec![LogRecord::new("t1", "ok"), LogRecord::new("t2", "ERROR X")]
        );
        assert_eq!(fetch.skipped_malformed, 1);
    }

    #[tokio::test]
    async fn test_failed_query_is_external_error() {
        let endpoint = mock_logs_api(0, "Failed").await;
        let err = store(endpoint, 10).fetch(&query()).await.unwrap_err();
        assert_eq!(err.code(), "external_service");
    }

    #[tokio::test]
    async fn test_deadline_is_timeout() {
        let endpoint = mock_logs_api(usize::MAX, "Complete").await;
        let err = store(endpoint, 1).fetch(&query()).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { secs: 1, .. }));
    }
}
