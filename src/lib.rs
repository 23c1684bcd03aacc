//! # askmd — ask questions against your Markdown notes
//!
//! Local retrieval-augmented-generation pipeline: Markdown notes are chunked,
//! embedded, and stored in a vector index; at query time the closest chunks
//! ground an answer produced by a local llama.cpp model.
//!
//! ## Architecture
//!
//! - **[`config`]** — Configuration loading, validation, and pattern expansion
//! - **[`chunker`]** — Markdown-aware splitting into overlapping, size-bounded segments
//! - **[`embedder`]** — Text embedding via ONNX Runtime (gte-small, 384 dims)
//! - **[`index`]** — Vector index backends: SQLite + sqlite-vec, or Qdrant over REST
//! - **[`ingest`]** — Incremental corpus ingestion (mtime-based change detection)
//! - **[`retrieve`]** — k-NN retrieval and budgeted context assembly
//! - **[`answer`]** — Prompt construction and llama-cli invocation

pub mod answer;
pub mod chunker;
pub mod config;
pub mod embedder;
pub mod index;
pub mod ingest;
pub mod retrieve;
