//! `rca logs`, `rca code`, and `rca triage`.

use std::io::Read;

use anyhow::{bail, Result};

use crate::config::Config;
use crate::pipeline::{parse_time, LogsRequest, Services};

/// Arguments shared by `logs` and `triage`.
#[derive(Debug, Clone)]
pub struct LogsArgs {
    pub log_group: String,
    pub log_stream: String,
    pub start: String,
    pub end: String,
    pub error_message: String,
}

impl LogsArgs {
    fn request(&self) -> Result<LogsRequest> {
        Ok(LogsRequest {
            log_group: self.log_group.clone(),
            log_stream: self.log_stream.clone(),
            start: parse_time(&self.start)?,
            end: parse_time(&self.end)?,
            error_message: self.error_message.clone(),
        })
    }
}

pub async fn run_logs(config: &Config, args: &LogsArgs) -> Result<()> {
    let services = Services::from_config(config)?;
    let report = services.fetch_logs(&args.request()?).await?;

    if report.lines.is_empty() {
        println!("No log lines match '{}'.", args.error_message);
    }
    for line in &report.lines {
        println!("{}", line);
    }

    eprintln!(
        "{} records scanned, {} occurrences{}, {} malformed rows skipped",
        report.records_scanned,
        report.occurrences,
        if report.truncated > 0 {
            format!(" (showing first {})", services.extract.max_occurrences)
        } else {
            String::new()
        },
        report.skipped_malformed
    );
    Ok(())
}

/// Query the index with `lines`, or with stdin when `lines` is empty.
pub async fn run_code(config: &Config, lines: &[String]) -> Result<()> {
    let lines = if lines.is_empty() {
        let mut input = String::new();
        std::io::stdin().read_to_string(&mut input)?;
        input.lines().map(str::to_string).collect::<Vec<_>>()
    } else {
        lines.to_vec()
    };
    if lines.iter().all(|l| l.trim().is_empty()) {
        bail!("No log lines given. Pass them as arguments or on stdin.");
    }

    let services = Services::from_config(config)?;
    let hits = services.fetch_code(&lines).await?;

    for (rank, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{:.4}] {} (#{})",
            rank + 1,
            hit.distance,
            hit.snippet.source.as_deref().unwrap_or("-"),
            hit.position
        );
        println!("{}", hit.snippet.text.trim_end());
        println!();
    }
    Ok(())
}

/// Logs → code → diagnosis in one go. With `dry_run`, prints the prompt
/// instead of calling the reasoning service.
pub async fn run_triage(config: &Config, args: &LogsArgs, dry_run: bool) -> Result<()> {
    let services = Services::from_config(config)?;

    let report = services.fetch_logs(&args.request()?).await?;
    if report.lines.is_empty() {
        println!("No log lines match '{}'; nothing to diagnose.", args.error_message);
        return Ok(());
    }
    eprintln!(
        "Found {} occurrence(s) in {} records.",
        report.occurrences, report.records_scanned
    );

    let hits = services.retrieve_for(&report.windows).await?;
    let code: Vec<String> = hits.into_iter().map(|h| h.snippet.text).collect();
    let logs = serde_json::to_value(&report.lines)?;

    if dry_run {
        println!("{}", services.diagnosis_prompt(&logs, &code));
        return Ok(());
    }

    let diagnosis = services.fetch_diagnosis(&logs, &code).await?;
    println!("{}", diagnosis);
    Ok(())
}
