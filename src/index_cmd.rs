//! `rca index build` and `rca index info`.

use anyhow::{bail, Context, Result};

use crate::chunk::Chunker;
use crate::config::Config;
use crate::embedding;
use crate::index::{build_index, BuildReport, CodeIndex, IndexPaths};
use crate::sources::crawl_sources;

/// Crawl the configured sources, embed them, and replace both index
/// artifacts. With `dry_run`, only reports what would be embedded.
pub async fn run_index_build(config: &Config, dry_run: bool) -> Result<()> {
    let snippets = crawl_sources(&config.sources)?;
    let chunker = Chunker::new(
        config.chunking.budget_tokens,
        config.chunking.ceiling_tokens,
    );

    if dry_run {
        let chunks: usize = snippets.iter().map(|s| chunker.split(&s.text).len()).sum();
        println!("index build (dry-run)");
        println!("  root: {}", config.sources.root.display());
        println!("  files: {}", snippets.len());
        println!("  chunks: {}", chunks);
        return Ok(());
    }

    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }
    let embedder = embedding::create_embedder(&config.embedding)?;

    eprintln!(
        "Embedding {} files from {} with {}...",
        snippets.len(),
        config.sources.root.display(),
        embedder.model_name()
    );
    let (index, report) = build_index(
        &snippets,
        embedder.as_ref(),
        &chunker,
        &config.embedding.backoff(),
    )
    .await?;

    let paths = config.index.paths();
    save_build(&index, &report, &paths)?;

    println!("index build");
    println!("  model: {} ({} dims)", index.model_name(), index.dims());
    println!("  files: {}", report.snippets);
    println!("  chunks: {}", report.chunks);
    println!("  embedded: {}", report.embedded);
    println!("  failed: {}", report.failed.len());
    print_failures(&report);
    println!("  vectors: {}", paths.vectors.display());
    println!("  snippets: {}", paths.snippets.display());
    Ok(())
}

/// Write the built index over `paths`, unless nothing was embedded. An
/// empty build leaves the existing artifacts untouched.
fn save_build(index: &CodeIndex, report: &BuildReport, paths: &IndexPaths) -> Result<()> {
    if report.embedded == 0 {
        eprintln!(
            "No chunks embedded ({} chunks, {} failed):",
            report.chunks,
            report.failed.len()
        );
        print_failures(report);
        bail!(
            "Index build embedded nothing; keeping existing index at {}",
            paths.vectors.display()
        );
    }
    index
        .save(paths)
        .with_context(|| format!("Failed to write index to {}", paths.vectors.display()))
}

fn print_failures(report: &BuildReport) {
    for failed in &report.failed {
        println!(
            "    {} chunk {}: {}",
            failed.source.as_deref().unwrap_or("-"),
            failed.chunk,
            failed.reason
        );
    }
}

/// Print a summary of the persisted index.
pub fn run_index_info(config: &Config) -> Result<()> {
    let paths = config.index.paths();
    let index = CodeIndex::open(&paths)?;

    let mut files: Vec<&str> = index
        .snippets()
        .iter()
        .filter_map(|s| s.source.as_deref())
        .collect();
    files.dedup();

    println!("rootcause index");
    println!("===============");
    println!();
    println!("  Model:       {}", index.model_name());
    println!("  Dimensions:  {}", index.dims());
    println!("  Snippets:    {}", index.len());
    println!("  Files:       {}", files.len());
    println!();
    for path in [&paths.vectors, &paths.snippets] {
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        println!("  {:<40} {}", path.display(), format_bytes(size));
    }
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::index::FailedChunk;
    use crate::models::CodeSnippet;
    use tempfile::TempDir;

    fn paths(tmp: &TempDir) -> IndexPaths {
        IndexPaths {
            vectors: tmp.path().join("code.index"),
            snippets: tmp.path().join("code.json"),
        }
    }

    #[test]
    fn test_empty_build_keeps_existing_index() {
        let tmp = TempDir::new().unwrap();
        let paths = paths(&tmp);
        let mut good = CodeIndex::new("m", 2);
        good.push(&[1.0, 0.0], CodeSnippet::new("class A {}")).unwrap();
        good.save(&paths).unwrap();

        let report = BuildReport {
            snippets: 1,
            chunks: 1,
            embedded: 0,
            failed: vec![FailedChunk {
                snippet: 0,
                chunk: 0,
                source: Some("A.java".into()),
                reason: "embedding provider failed: OpenAI API error 401".into(),
            }],
        };
        let err = save_build(&CodeIndex::new("m", 2), &report, &paths).unwrap_err();
        assert!(err.to_string().contains("embedded nothing"));

        let reopened = CodeIndex::open(&paths).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.snippets()[0].text, "class A {}");
    }

    #[test]
    fn test_partial_build_is_saved() {
        let tmp = TempDir::new().unwrap();
        let paths = paths(&tmp);
        let mut index = CodeIndex::new("m", 2);
        index.push(&[0.0, 1.0], CodeSnippet::new("class B {}")).unwrap();
        let report = BuildReport {
            snippets: 2,
            chunks: 2,
            embedded: 1,
            failed: Vec::new(),
        };
        save_build(&index, &report, &paths).unwrap();
        assert_eq!(CodeIndex::open(&paths).unwrap().len(), 1);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
