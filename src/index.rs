//! Persisted nearest-neighbor index over code snippet embeddings.
//!
//! A [`CodeIndex`] pairs a flat L2 vector store with a snippet mapping:
//! vector `i` belongs to snippet `i`. The two halves are persisted as two
//! files that are always written and read together.
//!
//! # Artifacts
//!
//! ```text
//! vectors file (binary, little-endian)
//! ┌──────────┬──────────┬───────────┬──────────────┬─────────┬───────┬──────────────────┐
//! │ RCAVEC02 │ dims u32 │ count u64 │ sha256 [32]  │ len u16 │ model │ count × dims f32 │
//! └──────────┴──────────┴───────────┴──────────────┴─────────┴───────┴──────────────────┘
//!
//! `sha256` is the digest of the snippets file bytes written alongside.
//!
//! snippets file (JSON)
//! [ { "code": "...", "source": "src/Foo.java" }, ... ]
//! ```
//!
//! # Invariants
//!
//! - `snippets.len() == vectors.len()`; checked on open and before every
//!   search, reported as [`Error::ConsistencyViolation`].
//! - The snippets file on disk is the one written with the vectors file;
//!   checked on open against the recorded digest.
//! - Query vectors must match the index dimensionality.
//! - Queries must go through the same embedding model the index was built
//!   with.
//!
//! The index is append-only and immutable once opened; share it as
//! `Arc<CodeIndex>`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::chunk::Chunker;
use crate::embedding::{blob_to_vec, embed_checked, l2_distance, vec_to_blob, Embedder};
use crate::error::{Error, Result};
use crate::models::{CodeSnippet, SnippetHit};
use crate::retry::Backoff;

const MAGIC: &[u8; 8] = b"RCAVEC02";
/// Magic, dims, count, snippets digest, model name length.
const HEADER_LEN: usize = 8 + 4 + 8 + 32 + 2;

/// Locations of the two index artifacts.
#[derive(Debug, Clone)]
pub struct IndexPaths {
    pub vectors: PathBuf,
    pub snippets: PathBuf,
}

/// Exact (brute-force) L2 nearest-neighbor store.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatL2Index {
    dims: usize,
    count: usize,
    data: Vec<f32>,
}

impl FlatL2Index {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            count: 0,
            data: Vec::new(),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Append a vector. Its position is the previous `len()`.
    pub fn add(&mut self, vector: &[f32]) -> Result<usize> {
        if vector.len() != self.dims {
            return Err(Error::ConsistencyViolation(format!(
                "cannot add a {}-dim vector to a {}-dim index",
                vector.len(),
                self.dims
            )));
        }
        self.data.extend_from_slice(vector);
        self.count += 1;
        Ok(self.count - 1)
    }

    pub fn vector(&self, position: usize) -> &[f32] {
        &self.data[position * self.dims..(position + 1) * self.dims]
    }

    /// The `k` nearest positions with their distances, closest first.
    /// Equal distances keep insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        let mut scored: Vec<(usize, f32)> = (0..self.count)
            .map(|i| (i, l2_distance(query, self.vector(i))))
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        scored
    }
}

pub struct CodeIndex {
    model: String,
    vectors: FlatL2Index,
    snippets: Vec<CodeSnippet>,
}

impl CodeIndex {
    /// An empty index for vectors produced by `model`.
    pub fn new(model: impl Into<String>, dims: usize) -> Self {
        Self {
            model: model.into(),
            vectors: FlatL2Index::new(dims),
            snippets: Vec::new(),
        }
    }

    /// Assemble an index from separately obtained halves. Lockstep is not
    /// checked here; every search checks it.
    pub fn from_parts(
        model: impl Into<String>,
        vectors: FlatL2Index,
        snippets: Vec<CodeSnippet>,
    ) -> Self {
        Self {
            model: model.into(),
            vectors,
            snippets,
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    pub fn dims(&self) -> usize {
        self.vectors.dims()
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn snippets(&self) -> &[CodeSnippet] {
        &self.snippets
    }

    /// Append a vector together with its snippet.
    pub fn push(&mut self, vector: &[f32], snippet: CodeSnippet) -> Result<usize> {
        let position = self.vectors.add(vector)?;
        self.snippets.push(snippet);
        Ok(position)
    }

    pub fn check_consistency(&self) -> Result<()> {
        if self.snippets.len() != self.vectors.len() {
            return Err(Error::ConsistencyViolation(format!(
                "index holds {} vectors but the snippet mapping has {} entries",
                self.vectors.len(),
                self.snippets.len()
            )));
        }
        Ok(())
    }

    /// Nearest snippets to an already-embedded query.
    pub fn search_vector(&self, query: &[f32], k: usize) -> Result<Vec<SnippetHit>> {
        self.check_consistency()?;
        if query.len() != self.dims() {
            return Err(Error::ConsistencyViolation(format!(
                "query vector has {} dims, index has {}",
                query.len(),
                self.dims()
            )));
        }
        Ok(self
            .vectors
            .search(query, k)
            .into_iter()
            .map(|(position, distance)| SnippetHit {
                position,
                distance,
                snippet: self.snippets[position].clone(),
            })
            .collect())
    }

    /// Embed `text` and return the `k` nearest snippets.
    ///
    /// Fails with [`Error::ConsistencyViolation`] before calling the provider
    /// if the embedder's model differs from the one the index was built with,
    /// or if the index halves are out of lockstep.
    pub async fn query(
        &self,
        embedder: &dyn Embedder,
        backoff: &Backoff,
        text: &str,
        k: usize,
    ) -> Result<Vec<SnippetHit>> {
        self.check_model(embedder)?;
        self.check_consistency()?;
        let vector = embed_checked(embedder, backoff, text).await?;
        self.search_vector(&vector, k)
    }

    pub fn check_model(&self, embedder: &dyn Embedder) -> Result<()> {
        if embedder.model_name() != self.model {
            return Err(Error::ConsistencyViolation(format!(
                "index was built with model '{}' but queries use '{}'",
                self.model,
                embedder.model_name()
            )));
        }
        Ok(())
    }

    /// Write both artifacts. Each is written to a temporary sibling first and
    /// renamed into place only after both writes succeeded.
    pub fn save(&self, paths: &IndexPaths) -> Result<()> {
        self.check_consistency()?;

        let snippets = serde_json::to_vec_pretty(&self.snippets)?;

        let mut vectors = Vec::with_capacity(HEADER_LEN + 64 + self.vectors.data.len() * 4);
        vectors.write_all(MAGIC)?;
        vectors.write_all(&(self.dims() as u32).to_le_bytes())?;
        vectors.write_all(&(self.len() as u64).to_le_bytes())?;
        vectors.write_all(&Sha256::digest(&snippets))?;
        let model = self.model.as_bytes();
        let model_len = u16::try_from(model.len()).map_err(|_| {
            Error::InvalidRequest(format!("model name too long: {} bytes", model.len()))
        })?;
        vectors.write_all(&model_len.to_le_bytes())?;
        vectors.write_all(model)?;
        vectors.extend_from_slice(&vec_to_blob(&self.vectors.data));

        let vectors_tmp = tmp_sibling(&paths.vectors);
        let snippets_tmp = tmp_sibling(&paths.snippets);
        for path in [&paths.vectors, &paths.snippets] {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
        }
        fs::write(&vectors_tmp, &vectors)?;
        fs::write(&snippets_tmp, &snippets)?;
        fs::rename(&vectors_tmp, &paths.vectors)?;
        fs::rename(&snippets_tmp, &paths.snippets)?;
        Ok(())
    }

    /// Load both artifacts.
    ///
    /// # Errors
    ///
    /// - [`Error::ArtifactMissing`] if either file does not exist.
    /// - [`Error::ConsistencyViolation`] if the vector file is malformed,
    ///   the snippets file is not the one written with it, or the counts
    ///   differ.
    pub fn open(paths: &IndexPaths) -> Result<Self> {
        for path in [&paths.vectors, &paths.snippets] {
            if !path.exists() {
                return Err(Error::ArtifactMissing(path.clone()));
            }
        }

        let bytes = fs::read(&paths.vectors)?;
        let (model, digest, vectors) = decode_vectors(&bytes)?;
        let snippet_bytes = fs::read(&paths.snippets)?;
        if Sha256::digest(&snippet_bytes).as_slice() != digest {
            return Err(Error::ConsistencyViolation(format!(
                "{} was not written with {}; rebuild the index",
                paths.snippets.display(),
                paths.vectors.display()
            )));
        }
        let snippets: Vec<CodeSnippet> = serde_json::from_slice(&snippet_bytes)?;

        let index = Self::from_parts(model, vectors, snippets);
        index.check_consistency()?;
        Ok(index)
    }
}

fn decode_vectors(bytes: &[u8]) -> Result<(String, &[u8], FlatL2Index)> {
    let malformed = |what: &str| Error::ConsistencyViolation(format!("vector file {}", what));

    let header = bytes
        .get(..HEADER_LEN)
        .ok_or_else(|| malformed("too short"))?;
    if &header[..8] != MAGIC {
        return Err(malformed("has an unknown format"));
    }
    let dims = u32::from_le_bytes([header[8], header[9], header[10], header[11]]) as usize;
    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&header[12..20]);
    let count = u64::from_le_bytes(count_bytes) as usize;
    let digest = &header[20..52];
    let model_len = u16::from_le_bytes([header[52], header[53]]) as usize;

    let model = bytes
        .get(HEADER_LEN..HEADER_LEN + model_len)
        .ok_or_else(|| malformed("is truncated in its header"))?;
    let model = String::from_utf8_lossy(model).into_owned();

    let body = &bytes[HEADER_LEN + model_len..];
    let expected = count
        .checked_mul(dims)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| malformed("declares an impossible size"))?;
    if body.len() != expected {
        return Err(malformed(&format!(
            "holds {} bytes of vectors, expected {} for {} × {} dims",
            body.len(),
            expected,
            count,
            dims
        )));
    }

    Ok((
        model,
        digest,
        FlatL2Index {
            dims,
            count,
            data: blob_to_vec(body),
        },
    ))
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// A chunk that could not be embedded during a build.
#[derive(Debug, Clone, Serialize)]
pub struct FailedChunk {
    /// Position of the input snippet.
    pub snippet: usize,
    /// Position of the chunk within that snippet.
    pub chunk: usize,
    pub source: Option<String>,
    pub reason: String,
}

/// Outcome of [`build_index`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    pub snippets: usize,
    pub chunks: usize,
    pub embedded: usize,
    pub failed: Vec<FailedChunk>,
}

/// Chunk, embed, and index `snippets`.
///
/// Each chunk becomes its own retrievable snippet. Chunks above the hard
/// ceiling or whose embedding fails after backoff are skipped and listed in
/// the report; the build carries on. A vector of the wrong dimensionality
/// aborts the build.
pub async fn build_index(
    snippets: &[CodeSnippet],
    embedder: &dyn Embedder,
    chunker: &Chunker,
    backoff: &Backoff,
) -> Result<(CodeIndex, BuildReport)> {
    let mut index = CodeIndex::new(embedder.model_name(), embedder.dims());
    let mut report = BuildReport {
        snippets: snippets.len(),
        ..BuildReport::default()
    };

    for (si, snippet) in snippets.iter().enumerate() {
        for (ci, piece) in chunker.split(&snippet.text).into_iter().enumerate() {
            report.chunks += 1;

            let outcome = match piece {
                Ok(text) => embed_checked(embedder, backoff, text)
                    .await
                    .map(|vector| (text, vector)),
                Err(e) => Err(e),
            };

            match outcome {
                Ok((text, vector)) => {
                    index.push(
                        &vector,
                        CodeSnippet {
                            text: text.to_string(),
                            source: snippet.source.clone(),
                        },
                    )?;
                    report.embedded += 1;
                }
                Err(e @ Error::ConsistencyViolation(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        snippet = si,
                        chunk = ci,
                        source = snippet.source.as_deref().unwrap_or("-"),
                        error = %e,
                        "skipping chunk"
                    );
                    report.failed.push(FailedChunk {
                        snippet: si,
                        chunk: ci,
                        source: snippet.source.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    Ok((index, report))
}
