//! Vector index backends.
//!
//! The `VectorIndex` trait is the single capability interface over the two
//! deployment variants: an embedded SQLite database with the sqlite-vec
//! extension, and an external Qdrant service reached over its REST API.
//! The ingestion engine is the sole writer; retrieval only reads.
use std::collections::HashMap;

use thiserror::Error;

use crate::chunker::Chunk;

pub mod qdrant;
pub mod sqlite;

/// Errors that can occur against a vector index backend.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{backend} backend error: {details}")]
    Backend {
        backend: &'static str,
        details: String,
    },

    #[error("dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// A retrieval hit: one stored chunk joined back from a nearest-neighbor search.
#[derive(Debug, Clone)]
pub struct Hit {
    /// Source file path the chunk came from.
    pub path: String,
    /// The chunk text.
    pub content: String,
    /// Ordinal of the chunk within its file.
    pub position: usize,
    /// Cosine similarity to the query, higher is better.
    pub score: f64,
}

/// Capability interface over a chunk store plus nearest-neighbor index.
pub trait VectorIndex {
    /// Drop all stored data and recreate an empty, schema-valid store.
    fn reset(&mut self) -> Result<(), IndexError>;

    /// Map of file path → recorded modification time (seconds since epoch).
    fn list_files(&self) -> Result<HashMap<String, f64>, IndexError>;

    /// Delete a file's chunks and index entries.
    fn delete_file(&mut self, path: &str) -> Result<bool, IndexError>;

    /// Replace a file's chunks and index entries as one unit of work.
    ///
    /// Old entries for `path` are removed and the new ones inserted; on error
    /// no mix of old and new data may be observable afterwards (the sqlite
    /// backend guarantees this transactionally, the qdrant backend surfaces
    /// the failure for the caller to report).
    fn replace_file(
        &mut self,
        path: &str,
        modified_at: f64,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
    ) -> Result<(), IndexError>;

    /// k-nearest-neighbor search, best match first. Returns at most `top_k` hits.
    fn search(&self, query_vector: &[f32], top_k: usize) -> Result<Vec<Hit>, IndexError>;

    /// Dimensionality the index was created with.
    fn dimensions(&self) -> usize;
}

/// Serialize a float32 vector into little-endian bytes for the vec0 virtual table.
pub fn serialize_vector(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// FNV-1a 64-bit hash of a chunk's text, rendered as fixed-width hex.
///
/// Recorded alongside each chunk but not consulted by change detection;
/// mtime equality is the active policy.
pub fn content_hash(text: &str) -> String {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in text.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    format!("{hash:016x}")
}

pub(crate) fn check_dimensions(
    expected: usize,
    embeddings: &[Vec<f32>],
) -> Result<(), IndexError> {
    for embedding in embeddings {
        if embedding.len() != expected {
            return Err(IndexError::DimensionMismatch {
                expected,
                actual: embedding.len(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_vector() {
        let vec = vec![1.0, 2.0, -3.5];
        let bytes = serialize_vector(&vec);
        assert_eq!(bytes.len(), 12);

        // 1.0f32 in hex: 0x3f800000 -> little endian: 00 00 80 3f
        assert_eq!(&bytes[0..4], &[0x00, 0x00, 0x80, 0x3f]);
        // 2.0f32 in hex: 0x40000000 -> little endian: 00 00 00 40
        assert_eq!(&bytes[4..8], &[0x00, 0x00, 0x00, 0x40]);
        // -3.5f32 in hex: 0xc0600000 -> little endian: 00 00 60 c0
        assert_eq!(&bytes[8..12], &[0x00, 0x00, 0x60, 0xc0]);
    }

    #[test]
    fn test_content_hash_stable() {
        assert_eq!(content_hash("hello"), content_hash("hello"));
        assert_ne!(content_hash("hello"), content_hash("hello!"));
        // FNV-1a of the empty string is the offset basis
        assert_eq!(content_hash(""), "cbf29ce484222325");
    }

    #[test]
    fn test_check_dimensions() {
        assert!(check_dimensions(3, &[vec![0.0; 3], vec![1.0; 3]]).is_ok());
        let err = check_dimensions(3, &[vec![0.0; 4]]).unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch {
                expected: 3,
                actual: 4
            }
        ));
    }
}
