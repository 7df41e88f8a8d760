//! # rootcause
//!
//! Retrieval-augmented root-cause diagnosis for service errors.
//!
//! Given an error string, rootcause pulls the log lines around each
//! occurrence, retrieves the source snippets whose embeddings sit nearest to
//! that context, and hands both to a reasoning model for a diagnosis.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌───────────┐   ┌────────────┐   ┌────────────┐
//! │  LogStore  │──▶│  extract  │──▶│  retrieve  │──▶│  diagnose  │
//! │ CW / file  │   │  windows  │   │ CodeIndex  │   │  Reasoner  │
//! └────────────┘   └───────────┘   └─────┬──────┘   └────────────┘
//!                                        │
//!                        rca index build ┘ (sources → chunk → embed)
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rca index build        # embed [sources] into [index] paths
//! rca logs --log-group /app --log-stream my-service \
//!     --start 2025-02-10T16:45 --end 2025-02-10T16:55 --error NullPointerException
//! rca triage --log-group /app --log-stream my-service \
//!     --start 2025-02-10T16:45 --end 2025-02-10T16:55 --error NullPointerException
//! rca serve              # HTTP API on [server].bind
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy and machine codes |
//! | [`models`] | Core data types |
//! | [`logstore`] | Log store trait and envelope parsing |
//! | [`logstore_cloudwatch`] | CloudWatch Logs Insights backend |
//! | [`logstore_file`] | JSON-lines file backend |
//! | [`aws_sigv4`] | AWS request signing |
//! | [`extract`] | Error context windows |
//! | [`chunk`] | Token-budget chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`retry`] | Backoff policy |
//! | [`index`] | Persisted nearest-neighbor code index |
//! | [`retrieve`] | Log context → code query |
//! | [`diagnose`] | Prompt assembly and reasoning providers |
//! | [`sources`] | Source tree crawl |
//! | [`pipeline`] | Service operations |
//! | [`server`] | HTTP API |

pub mod aws_sigv4;
pub mod chunk;
pub mod config;
pub mod diagnose;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod index_cmd;
pub mod logstore;
pub mod logstore_cloudwatch;
pub mod logstore_file;
pub mod models;
pub mod pipeline;
pub mod retrieve;
pub mod retry;
pub mod server;
pub mod sources;
pub mod triage_cmd;
