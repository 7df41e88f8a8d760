//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/logs` | Context lines around an error in a log stream |
//! | `POST` | `/code` | Code snippets nearest to a list of log lines |
//! | `POST` | `/debug` | Diagnosis for logs + code from the reasoning model |
//! | `GET`  | `/health` | Health check (version, index state) |
//!
//! `GET /logs` takes `log_group`, `log_stream`, `start_time`, `end_time`,
//! and an optional `error_message`. Times are `YYYY-MM-DDTHH:MM` (UTC),
//! RFC 3339, or unix seconds.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "index_unavailable", "message": "index artifact missing: ..." } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `bad_request` | 400 |
//! | `not_found` | 404 |
//! | `timeout` | 408 |
//! | `chunk_too_large` | 422 |
//! | `consistency_violation`, `internal` | 500 |
//! | `external_service` | 502 |
//! | `index_unavailable` | 503 |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser front end
//! can call the API directly.

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::error::Error;
use crate::pipeline::{parse_time, IndexState, LogsRequest, Services};

/// Starts the server with collaborators built from `config`.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let services = Services::from_config(config)?;
    run_server_with(services, &config.server.bind).await
}

/// Starts the server with caller-supplied collaborators.
pub async fn run_server_with(services: Services, bind_addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "server listening");
    println!("rca server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(services)).await?;
    Ok(())
}

pub fn router(services: Services) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/logs", get(handle_logs))
        .route("/code", post(handle_code))
        .route("/debug", post(handle_debug))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(services)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let code = err.code();
        let status = match code {
            "bad_request" => StatusCode::BAD_REQUEST,
            "not_found" => StatusCode::NOT_FOUND,
            "timeout" => StatusCode::REQUEST_TIMEOUT,
            "chunk_too_large" => StatusCode::UNPROCESSABLE_ENTITY,
            "external_service" => StatusCode::BAD_GATEWAY,
            "index_unavailable" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(code, error = %err, "request failed");
        }
        AppError {
            status,
            code: code.to_string(),
            message: err.to_string(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    index: String,
}

async fn handle_health(State(services): State<Services>) -> Json<HealthResponse> {
    let index = match &services.index {
        IndexState::Ready(_) => "ready",
        IndexState::Missing(_) => "missing",
    };
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        index: index.to_string(),
    })
}

// ============ GET /logs ============

#[derive(Deserialize)]
struct LogsParams {
    log_group: String,
    log_stream: String,
    start_time: String,
    end_time: String,
    #[serde(default)]
    error_message: String,
}

#[derive(Serialize)]
struct LogsResponse {
    logs: Vec<String>,
    occurrences: usize,
    truncated: usize,
    skipped_malformed: usize,
    records_scanned: usize,
}

async fn handle_logs(
    State(services): State<Services>,
    params: Result<Query<LogsParams>, QueryRejection>,
) -> Result<Json<LogsResponse>, AppError> {
    let Query(params) = params.map_err(|e| bad_request(e.body_text()))?;
    let request = LogsRequest {
        log_group: params.log_group,
        log_stream: params.log_stream,
        start: parse_time(&params.start_time)?,
        end: parse_time(&params.end_time)?,
        error_message: params.error_message,
    };

    let report = services.fetch_logs(&request).await?;
    Ok(Json(LogsResponse {
        logs: report.lines,
        occurrences: report.occurrences,
        truncated: report.truncated,
        skipped_malformed: report.skipped_malformed,
        records_scanned: report.records_scanned,
    }))
}

// ============ POST /code ============

#[derive(Serialize)]
struct CodeMatch {
    position: usize,
    distance: f32,
    source: Option<String>,
}

#[derive(Serialize)]
struct CodeResponse {
    /// Snippet texts, nearest first.
    code: Vec<String>,
    matches: Vec<CodeMatch>,
}

async fn handle_code(
    State(services): State<Services>,
    body: Result<Json<Vec<String>>, JsonRejection>,
) -> Result<Json<CodeResponse>, AppError> {
    let Json(lines) = body.map_err(|e| bad_request(e.body_text()))?;
    let hits = services.fetch_code(&lines).await?;

    let matches = hits
        .iter()
        .map(|h| CodeMatch {
            position: h.position,
            distance: h.distance,
            source: h.snippet.source.clone(),
        })
        .collect();
    Ok(Json(CodeResponse {
        code: hits.into_iter().map(|h| h.snippet.text).collect(),
        matches,
    }))
}

// ============ POST /debug ============

#[derive(Deserialize)]
struct DebugRequest {
    logs: serde_json::Value,
    #[serde(default)]
    code: Vec<String>,
}

#[derive(Serialize)]
struct DebugResponse {
    debug_info: String,
}

async fn handle_debug(
    State(services): State<Services>,
    body: Result<Json<DebugRequest>, JsonRejection>,
) -> Result<Json<DebugResponse>, AppError> {
    let Json(request) = body.map_err(|e| bad_request(e.body_text()))?;
    let debug_info = services
        .fetch_diagnosis(&request.logs, &request.code)
        .await?;
    Ok(Json(DebugResponse { debug_info }))
}
