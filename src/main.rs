//! # rootcause CLI (`rca`)
//!
//! ## Usage
//!
//! ```bash
//! rca --config ./config/rca.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rca logs` | Print the log context around an error |
//! | `rca code` | Print the code snippets nearest to some log lines |
//! | `rca triage` | Logs → code → diagnosis, end to end |
//! | `rca index build` | Crawl sources, embed, and write the index |
//! | `rca index info` | Summarize the persisted index |
//! | `rca serve` | Start the HTTP API |
//!
//! Diagnostics go to stderr through `tracing`; set `RCA_LOG` (e.g.
//! `RCA_LOG=rootcause=debug`) to change the filter. Results go to stdout.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use rootcause::{config, index_cmd, server, triage_cmd};

/// rootcause: find the code behind a log error.
#[derive(Parser)]
#[command(
    name = "rca",
    about = "rootcause: retrieval-augmented root-cause diagnosis for service errors",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rca.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct LogsCliArgs {
    /// Log group to query.
    #[arg(long)]
    log_group: String,

    /// Substring of the log stream name.
    #[arg(long)]
    log_stream: String,

    /// Range start: `YYYY-MM-DDTHH:MM` (UTC), RFC 3339, or unix seconds.
    #[arg(long)]
    start: String,

    /// Range end, same formats as `--start`.
    #[arg(long)]
    end: String,

    /// Case-sensitive substring marking an error line.
    #[arg(long = "error", default_value = "")]
    error_message: String,
}

impl From<LogsCliArgs> for triage_cmd::LogsArgs {
    fn from(a: LogsCliArgs) -> Self {
        Self {
            log_group: a.log_group,
            log_stream: a.log_stream,
            start: a.start,
            end: a.end,
            error_message: a.error_message,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the log context around each occurrence of an error.
    Logs {
        #[command(flatten)]
        args: LogsCliArgs,
    },

    /// Print the code snippets nearest to the given log lines.
    ///
    /// Lines are read from stdin when none are given.
    Code {
        lines: Vec<String>,
    },

    /// Fetch logs, retrieve code, and ask the reasoning model for a diagnosis.
    Triage {
        #[command(flatten)]
        args: LogsCliArgs,

        /// Print the prompt instead of calling the reasoning service.
        #[arg(long)]
        dry_run: bool,
    },

    /// Build or inspect the code index.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum IndexAction {
    /// Crawl `[sources]`, embed every chunk, and replace the index files.
    Build {
        /// Show file and chunk counts without embedding anything.
        #[arg(long)]
        dry_run: bool,
    },
    /// Print model, dimensions, and size of the persisted index.
    Info,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RCA_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Logs { args } => {
            triage_cmd::run_logs(&cfg, &args.into()).await?;
        }
        Commands::Code { lines } => {
            triage_cmd::run_code(&cfg, &lines).await?;
        }
        Commands::Triage { args, dry_run } => {
            triage_cmd::run_triage(&cfg, &args.into(), dry_run).await?;
        }
        Commands::Index { action } => match action {
            IndexAction::Build { dry_run } => {
                index_cmd::run_index_build(&cfg, dry_run).await?;
            }
            IndexAction::Info => {
                index_cmd::run_index_info(&cfg)?;
            }
        },
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
