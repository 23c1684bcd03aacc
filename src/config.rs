/// Configuration module for askmd.
///
/// Handles loading, validating, and providing default configuration values.
/// All tunables the core consumes (chunk geometry, batch size, backend
/// selection, llama-cli parameters) are load-time constants defined here.
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// ── Default value functions ──────────────────────────────────────────

fn default_note_dirs() -> Vec<String> {
    vec!["./notes".to_string()]
}

fn default_chunk_size() -> usize {
    400
}

fn default_chunk_overlap() -> usize {
    80
}

fn default_embed_batch_size() -> usize {
    32
}

fn default_top_k() -> usize {
    5
}

fn default_max_context() -> usize {
    8000
}

fn default_backend() -> Backend {
    Backend::Sqlite
}

fn default_db_path() -> String {
    "./notes.db".to_string()
}

fn default_qdrant_url() -> String {
    "http://localhost:6333".to_string()
}

fn default_collection() -> String {
    "notes".to_string()
}

fn default_model_name() -> String {
    "gte-small".to_string()
}

fn default_dimensions() -> usize {
    384
}

fn default_llama_cli_path() -> String {
    "llama-cli".to_string()
}

fn default_llama_ctx() -> usize {
    8192
}

fn default_llama_threads() -> usize {
    4
}

fn default_llama_threads_batch() -> usize {
    2
}

fn default_llama_gpu_layers() -> usize {
    20
}

// ── Config structs ───────────────────────────────────────────────────

/// Which vector index backend to use.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Embedded SQLite database with the sqlite-vec extension.
    Sqlite,
    /// External Qdrant service reached over its REST API.
    Qdrant,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Directories holding the Markdown corpus, scanned recursively.
    #[serde(default = "default_note_dirs")]
    pub note_dirs: Vec<String>,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: usize,

    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Character budget for the assembled context string.
    #[serde(default = "default_max_context")]
    pub max_context: usize,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub llama: LlamaConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_backend")]
    pub backend: Backend,

    /// Database file for the sqlite backend.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Base URL for the qdrant backend.
    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,

    /// Collection name for the qdrant backend.
    #[serde(default = "default_collection")]
    pub collection: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_model_name")]
    pub name: String,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlamaConfig {
    #[serde(default = "default_llama_cli_path")]
    pub cli_path: String,

    /// Path to the GGUF model file. Empty means generation is unavailable.
    #[serde(default)]
    pub model_path: String,

    #[serde(default = "default_llama_ctx")]
    pub ctx_size: usize,

    #[serde(default = "default_llama_threads")]
    pub threads: usize,

    #[serde(default = "default_llama_threads_batch")]
    pub threads_batch: usize,

    #[serde(default = "default_llama_gpu_layers")]
    pub gpu_layers: usize,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            note_dirs: default_note_dirs(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            embed_batch_size: default_embed_batch_size(),
            top_k: default_top_k(),
            max_context: default_max_context(),
            index: IndexConfig::default(),
            model: ModelConfig::default(),
            llama: LlamaConfig::default(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            db_path: default_db_path(),
            qdrant_url: default_qdrant_url(),
            collection: default_collection(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            dimensions: default_dimensions(),
        }
    }
}

impl Default for LlamaConfig {
    fn default() -> Self {
        Self {
            cli_path: default_llama_cli_path(),
            model_path: String::new(),
            ctx_size: default_llama_ctx(),
            threads: default_llama_threads(),
            threads_batch: default_llama_threads_batch(),
            gpu_layers: default_llama_gpu_layers(),
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// If `config_path` is empty, defaults to `"config.json"`.
    /// If the file does not exist, returns a default config and optionally
    /// generates a template file.
    pub fn load(config_path: &str) -> Result<Self> {
        let path = if config_path.is_empty() {
            "config.json"
        } else {
            config_path
        };

        if !Path::new(path).exists() {
            info!("{path} not found, using defaults");
            let cfg = Self::default();

            // Generate template only for the default path
            if path == "config.json" {
                match cfg.save(path) {
                    Ok(()) => info!("Generated config template: {path}"),
                    Err(e) => warn!("Failed to generate config template: {e}"),
                }
            }

            return Ok(cfg);
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;

        let mut cfg: Config = match serde_json::from_str(&data) {
            Ok(c) => c,
            Err(e) => {
                warn!("Invalid JSON in {path}: {e}");
                warn!("Using default configuration");
                return Ok(Self::default());
            }
        };

        info!("Loaded configuration from {path}");

        // Ensure at least one corpus directory
        if cfg.note_dirs.is_empty() {
            cfg.note_dirs = default_note_dirs();
        }

        Ok(cfg)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data).with_context(|| format!("failed to write config: {path}"))?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.chunk_size > 0, "chunk_size must be positive");
        anyhow::ensure!(
            self.chunk_overlap < self.chunk_size,
            "chunk_overlap must be smaller than chunk_size"
        );
        anyhow::ensure!(
            self.embed_batch_size > 0,
            "embed_batch_size must be positive"
        );
        anyhow::ensure!(self.top_k > 0, "top_k must be positive");
        anyhow::ensure!(
            self.model.dimensions > 0,
            "model.dimensions must be positive"
        );
        anyhow::ensure!(
            !self.note_dirs.is_empty(),
            "at least one note directory must be specified"
        );
        Ok(())
    }

    /// Return the corpus directories as absolute, de-duplicated paths.
    #[must_use]
    pub fn corpus_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = HashSet::new();

        for dir in &self.note_dirs {
            if let Ok(abs) = std::path::absolute(Path::new(dir)) {
                dirs.insert(abs);
            }
        }

        let mut dirs: Vec<PathBuf> = dirs.into_iter().collect();
        dirs.sort();
        dirs
    }
}

// ── Tests ────────────────────────────────────────────────────────────
