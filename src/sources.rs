//! Source tree crawl for index builds.
//!
//! Walks `sources.root`, keeps files matching `include_globs` and not
//! matching `exclude_globs` (plus the built-in excludes below), and reads
//! each as one [`CodeSnippet`] tagged with its relative path. Output is
//! sorted by path so builds are reproducible.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::config::SourcesConfig;
use crate::models::CodeSnippet;

const DEFAULT_EXCLUDES: &[&str] = &[
    "**/.git/**",
    "**/target/**",
    "**/node_modules/**",
    "**/build/**",
];

pub fn crawl_sources(config: &SourcesConfig) -> Result<Vec<CodeSnippet>> {
    let root = &config.root;
    if !root.exists() {
        bail!("Sources root does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;
    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(config.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut snippets = Vec::new();
    let walker = WalkDir::new(root).follow_links(config.follow_symlinks);
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        match std::fs::read_to_string(path) {
            Ok(text) => snippets.push(CodeSnippet::with_source(text, rel_str)),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable file"),
        }
    }

    snippets.sort_by(|a, b| a.source.cmp(&b.source));
    Ok(snippets)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
