//! Incremental corpus ingestion.
//!
//! Walks the Markdown corpus, decides per file whether re-ingestion is
//! needed (modification-time equality within a small epsilon), chunks and
//! embeds changed files in batches, and replaces each file's records in the
//! index as one unit of work. One file's failure never aborts the rest of
//! the corpus.
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use ignore::WalkBuilder;
use tracing::{info, warn};

use crate::chunker::{self, ChunkParams};
use crate::embedder::{Embedder, EmbedderError};
use crate::index::VectorIndex;

/// Filesystem timestamps equal within this many seconds count as unchanged.
///
/// Deliberately tight; coarse-timestamp filesystems or clock skew defeat it,
/// in which case the file is simply re-ingested.
pub const MTIME_EPSILON: f64 = 1e-6;

/// Outcome counters for one ingestion run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestSummary {
    /// Markdown files found under the corpus roots.
    pub scanned: usize,
    /// Files left untouched because their mtime matched the recorded one.
    pub skipped: usize,
    /// Files whose chunks were replaced.
    pub updated: usize,
    /// Files that could not be read, embedded, or stored.
    pub failed: usize,
    /// Stored files no longer present on disk, deleted from the index.
    pub removed: usize,
    /// Total chunks written across all updated files.
    pub chunks_inserted: usize,
}

/// Ingestion engine: sole writer of the vector index.
pub struct Ingestor<'a, E: Embedder + ?Sized> {
    index: &'a mut dyn VectorIndex,
    embedder: &'a E,
    chunk_params: ChunkParams,
    batch_size: usize,
}

impl<'a, E: Embedder + ?Sized> Ingestor<'a, E> {
    pub fn new(
        index: &'a mut dyn VectorIndex,
        embedder: &'a E,
        chunk_params: ChunkParams,
        batch_size: usize,
    ) -> Self {
        Self {
            index,
            embedder,
            chunk_params,
            batch_size,
        }
    }

    /// Scan every Markdown file under `roots` and bring the index up to date.
    pub fn ingest(&mut self, roots: &[PathBuf]) -> Result<IngestSummary> {
        let existing = self
            .index
            .list_files()
            .context("failed to list indexed files")?;

        let files = gather_markdown_files(roots);
        info!("Found {} markdown files under {roots:?}", files.len());

        let mut summary = IngestSummary::default();
        let mut seen = HashSet::new();

        for (path, key) in &files {
            summary.scanned += 1;
            seen.insert(key.clone());

            let mtime = match file_mtime(path) {
                Ok(t) => t,
                Err(e) => {
                    warn!("Cannot stat {key}: {e}");
                    summary.failed += 1;
                    continue;
                }
            };

            if let Some(prev) = existing.get(key) {
                if (mtime - prev).abs() <= MTIME_EPSILON {
                    summary.skipped += 1;
                    continue;
                }
            }

            match self.ingest_file(path, key, mtime) {
                Ok(inserted) => {
                    summary.updated += 1;
                    summary.chunks_inserted += inserted;
                }
                Err(e) => {
                    warn!("Failed to ingest {key}: {e:#}");
                    summary.failed += 1;
                }
            }
        }

        // Complete the lifecycle: drop records whose file left the corpus
        for path in existing.keys() {
            if seen.contains(path) || !under_any_root(path, roots) {
                continue;
            }
            match self.index.delete_file(path) {
                Ok(_) => {
                    info!("Removed stale records for {path}");
                    summary.removed += 1;
                }
                Err(e) => {
                    warn!("Failed to remove stale records for {path}: {e}");
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Chunk, embed, and store one file. Returns the number of chunks written.
    fn ingest_file(&mut self, path: &Path, key: &str, mtime: f64) -> Result<usize> {
        info!("Ingesting {key}");

        let chunks = chunker::chunk_file(path, self.chunk_params)
            .with_context(|| format!("failed to read {key}"))?;

        if chunks.is_empty() {
            info!("  No chunks.");
        }

        let texts: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        let embeddings = self
            .embed_batched(&texts)
            .context("embedding service failed")?;

        self.index
            .replace_file(key, mtime, &chunks, &embeddings)
            .context("index write failed")?;

        Ok(chunks.len())
    }

    /// Embed texts in fixed-size batches to bound memory per call.
    fn embed_batched(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size.max(1)) {
            vectors.extend(self.embedder.embed_batch(batch)?);
        }
        Ok(vectors)
    }
}

/// Current modification time as seconds since the epoch.
fn file_mtime(path: &Path) -> std::io::Result<f64> {
    let modified = std::fs::metadata(path)?.modified()?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0))
}

/// Enumerate `*.md` files under each root, deterministically ordered.
///
/// Returns (real path, normalized key) pairs sorted by key; the key uses
/// forward slashes so records stay portable across platforms.
fn gather_markdown_files(roots: &[PathBuf]) -> Vec<(PathBuf, String)> {
    let mut files = Vec::new();

    for root in roots {
        let walker = WalkBuilder::new(root).hidden(false).build();
        for entry in walker.into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.is_dir() {
                continue;
            }
            if path.extension().and_then(|s| s.to_str()) != Some("md") {
                continue;
            }
            files.push((path.to_path_buf(), normalize_path(path)));
        }
    }

    files.sort_by(|a, b| a.1.cmp(&b.1));
    files.dedup_by(|a, b| a.1 == b.1);
    files
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn under_any_root(key: &str, roots: &[PathBuf]) -> bool {
    roots.iter().any(|root| {
        let prefix = normalize_path(root);
        key.strip_prefix(&prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    })
}
