//! Embedded vector index using SQLite and sqlite-vec.
use std::collections::HashMap;
use std::path::Path;
use std::sync::Once;

use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;

use super::{Hit, IndexError, VectorIndex, check_dimensions, content_hash, serialize_vector};
use crate::chunker::Chunk;

static INIT_VEC: Once = Once::new();

/// Initialize the sqlite-vec extension. Safe to call multiple times.
fn init_sqlite_vec() {
    INIT_VEC.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite_vec::sqlite3_vec_init as *const (),
        )));
    });
}

/// SQLite-backed `VectorIndex`: chunk rows plus a vec0 virtual table keyed
/// by chunk rowid.
pub struct SqliteIndex {
    conn: Connection,
    dimensions: usize,
}

impl SqliteIndex {
    /// Open a database at the given path and initialize the schema.
    pub fn open<P: AsRef<Path>>(path: P, dimensions: usize) -> Result<Self, IndexError> {
        let path = path.as_ref();
        info!("Initializing database: {}", path.display());

        init_sqlite_vec();

        let conn = Connection::open(path)?;
        Self::init(conn, dimensions)
    }

    /// Open an in-memory database (useful for testing).
    pub fn open_in_memory(dimensions: usize) -> Result<Self, IndexError> {
        init_sqlite_vec();
        let conn = Connection::open_in_memory()?;
        Self::init(conn, dimensions)
    }

    fn init(conn: Connection, dimensions: usize) -> Result<Self, IndexError> {
        // Verify sqlite-vec is loaded
        let vec_version: String = conn.query_row("SELECT vec_version()", [], |row| row.get(0))?;
        info!("sqlite-vec version: {vec_version}");

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(&schema_sql(dimensions))?;

        Ok(Self { conn, dimensions })
    }

    fn document_id(&self, path: &str) -> Result<Option<i64>, IndexError> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM documents WHERE path = ?",
                params![path],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    #[cfg(test)]
    pub(crate) fn count_chunks(&self) -> Result<(i64, i64), IndexError> {
        let chunks: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        let vectors: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM vec_chunks", [], |row| row.get(0))?;
        Ok((chunks, vectors))
    }

    #[cfg(test)]
    pub(crate) fn chunk_ids_for(&self, path: &str) -> Result<Vec<i64>, IndexError> {
        let mut stmt = self.conn.prepare(
            "SELECT c.id FROM chunks c JOIN documents d ON c.document_id = d.id
             WHERE d.path = ? ORDER BY c.position",
        )?;
        let rows = stmt.query_map(params![path], |row| row.get(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }
}

fn schema_sql(dimensions: usize) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS documents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL UNIQUE,
    modified_at REAL NOT NULL,
    indexed_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_path ON documents(path);

CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id INTEGER NOT NULL,
    position INTEGER NOT NULL,
    content TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_document_id ON chunks(document_id);

CREATE VIRTUAL TABLE IF NOT EXISTS vec_chunks USING vec0(
    embedding FLOAT[{dimensions}]
);
"#
    )
}

impl VectorIndex for SqliteIndex {
    fn reset(&mut self) -> Result<(), IndexError> {
        self.conn.execute_batch(
            "DROP TABLE IF EXISTS vec_chunks;
             DROP TABLE IF EXISTS chunks;
             DROP TABLE IF EXISTS documents;",
        )?;
        self.conn.execute_batch(&schema_sql(self.dimensions))?;
        Ok(())
    }

    fn list_files(&self) -> Result<HashMap<String, f64>, IndexError> {
        let mut stmt = self
            .conn
            .prepare("SELECT path, modified_at FROM documents")?;
        let rows = stmt.query_map([], |row| {
            let path: String = row.get(0)?;
            let modified_at: f64 = row.get(1)?;
            Ok((path, modified_at))
        })?;

        let mut files = HashMap::new();
        for row in rows {
            let (path, modified_at) = row?;
            files.insert(path, modified_at);
        }

        Ok(files)
    }

    fn delete_file(&mut self, path: &str) -> Result<bool, IndexError> {
        let doc_id = match self.document_id(path)? {
            Some(id) => id,
            None => return Ok(false),
        };

        let tx = self.conn.transaction()?;
        // Virtual tables don't participate in cascade deletion
        tx.execute(
            "DELETE FROM vec_chunks WHERE rowid IN (SELECT id FROM chunks WHERE document_id = ?)",
            params![doc_id],
        )?;
        // Cascade deletes chunks
        let rows = tx.execute("DELETE FROM documents WHERE id = ?", params![doc_id])?;
        tx.commit()?;

        Ok(rows > 0)
    }

    fn replace_file(
        &mut self,
        path: &str,
        modified_at: f64,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
    ) -> Result<(), IndexError> {
        assert_eq!(
            chunks.len(),
            embeddings.len(),
            "chunks and embeddings length mismatch"
        );
        check_dimensions(self.dimensions, embeddings)?;

        let tx = self.conn.transaction()?;

        // Insert or update the document row and get the stable ID
        let doc_id: i64 = tx.query_row(
            r#"
            INSERT INTO documents (path, modified_at, indexed_at)
            VALUES (?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(path) DO UPDATE SET
                modified_at = excluded.modified_at,
                indexed_at = CURRENT_TIMESTAMP
            RETURNING id
            "#,
            params![path, modified_at],
            |row| row.get(0),
        )?;

        // Clean up old contents if any (re-ingestion)
        tx.execute(
            "DELETE FROM vec_chunks WHERE rowid IN (SELECT id FROM chunks WHERE document_id = ?)",
            params![doc_id],
        )?;
        tx.execute("DELETE FROM chunks WHERE document_id = ?", params![doc_id])?;

        for (chunk, embedding) in chunks.iter().zip(embeddings.iter()) {
            tx.execute(
                "INSERT INTO chunks (document_id, position, content, content_hash) VALUES (?, ?, ?, ?)",
                params![
                    doc_id,
                    chunk.position as i64,
                    chunk.content,
                    content_hash(&chunk.content)
                ],
            )?;
            let chunk_id = tx.last_insert_rowid();

            let vector_blob = serialize_vector(embedding);
            tx.execute(
                "INSERT INTO vec_chunks (rowid, embedding) VALUES (?, ?)",
                params![chunk_id, vector_blob],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn search(&self, query_vector: &[f32], top_k: usize) -> Result<Vec<Hit>, IndexError> {
        if query_vector.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                actual: query_vector.len(),
            });
        }

        let mut stmt = self.conn.prepare(
            r#"
            SELECT
                d.path,
                c.content,
                c.position,
                vec_distance_cosine(v.embedding, ?) AS distance
            FROM vec_chunks v
            JOIN chunks c ON v.rowid = c.id
            JOIN documents d ON c.document_id = d.id
            ORDER BY distance ASC
            LIMIT ?
            "#,
        )?;

        let rows = stmt.query_map(
            params![serialize_vector(query_vector), top_k as i64],
            |row| {
                let distance: f64 = row.get(3)?;
                Ok(Hit {
                    path: row.get(0)?,
                    content: row.get(1)?,
                    position: row.get::<_, i64>(2)? as usize,
                    // vec_distance_cosine returns 1 - cos for unit vectors
                    score: 1.0 - distance,
                })
            },
        )?;

        let mut hits = Vec::new();
        for row in rows {
            hits.push(row?);
        }

        Ok(hits)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(position: usize, content: &str) -> Chunk {
        Chunk {
            position,
            content: content.to_string(),
        }
    }

    fn unit(dim: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; dim];
        v[hot] = 1.0;
        v
    }

    #[test]
    fn test_schema_init() {
        let index = SqliteIndex::open_in_memory(8).unwrap();
        let tables: usize = index.conn.query_row(
            "SELECT count(*) FROM sqlite_master WHERE type='table' AND name IN ('documents', 'chunks', 'vec_chunks')",
            [],
            |row| row.get(0),
        ).unwrap();
        assert_eq!(tables, 3);
    }

    #[test]
    fn test_replace_and_delete_file() {
        let mut index = SqliteIndex::open_in_memory(8).unwrap();

        index
            .replace_file(
                "notes/a.md",
                100.0,
                &[chunk(0, "Hello"), chunk(1, "World")],
                &[unit(8, 0), unit(8, 1)],
            )
            .unwrap();

        let files = index.list_files().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files["notes/a.md"], 100.0);
        assert_eq!(index.count_chunks().unwrap(), (2, 2));

        // Re-ingestion replaces, never accumulates
        index
            .replace_file("notes/a.md", 200.0, &[chunk(0, "Replaced")], &[unit(8, 2)])
            .unwrap();
        assert_eq!(index.count_chunks().unwrap(), (1, 1));
        assert_eq!(index.list_files().unwrap()["notes/a.md"], 200.0);

        assert!(index.delete_file("notes/a.md").unwrap());
        assert!(!index.delete_file("notes/a.md").unwrap());
        assert_eq!(index.count_chunks().unwrap(), (0, 0));
        assert!(index.list_files().unwrap().is_empty());
    }

    #[test]
    fn test_replace_file_empty_chunks_records_mtime() {
        let mut index = SqliteIndex::open_in_memory(8).unwrap();
        index.replace_file("empty.md", 42.0, &[], &[]).unwrap();

        assert_eq!(index.list_files().unwrap()["empty.md"], 42.0);
        assert_eq!(index.count_chunks().unwrap(), (0, 0));
    }

    #[test]
    fn test_replace_untouched_files_keep_ids() {
        let mut index = SqliteIndex::open_in_memory(8).unwrap();
        index
            .replace_file("a.md", 1.0, &[chunk(0, "A text")], &[unit(8, 0)])
            .unwrap();
        index
            .replace_file("b.md", 1.0, &[chunk(0, "B text")], &[unit(8, 1)])
            .unwrap();

        let ids_before = index.chunk_ids_for("b.md").unwrap();
        index
            .replace_file("a.md", 2.0, &[chunk(0, "A changed")], &[unit(8, 2)])
            .unwrap();
        let ids_after = index.chunk_ids_for("b.md").unwrap();

        assert_eq!(ids_before, ids_after);
    }

    #[test]
    fn test_search_ranking_and_roundtrip() {
        let mut index = SqliteIndex::open_in_memory(4).unwrap();
        index
            .replace_file(
                "x.md",
                1.0,
                &[chunk(0, "x axis"), chunk(1, "y axis")],
                &[unit(4, 0), unit(4, 1)],
            )
            .unwrap();

        // A stored vector queried with itself is its own nearest neighbor
        let hits = index.search(&unit(4, 0), 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].content, "x axis");
        assert_eq!(hits[0].path, "x.md");
        assert_eq!(hits[0].position, 0);
        assert!((hits[0].score - 1.0).abs() < 1e-4);

        // Ranked by non-increasing similarity
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn test_search_respects_top_k() {
        let mut index = SqliteIndex::open_in_memory(4).unwrap();
        let chunks: Vec<Chunk> = (0..4).map(|i| chunk(i, &format!("chunk {i}"))).collect();
        let embeddings: Vec<Vec<f32>> = (0..4).map(|i| unit(4, i)).collect();
        index
            .replace_file("many.md", 1.0, &chunks, &embeddings)
            .unwrap();

        assert_eq!(index.search(&unit(4, 0), 2).unwrap().len(), 2);
        assert_eq!(index.search(&unit(4, 0), 10).unwrap().len(), 4);
    }

    #[test]
    fn test_search_empty_index() {
        let index = SqliteIndex::open_in_memory(4).unwrap();
        assert!(index.search(&unit(4, 0), 5).unwrap().is_empty());
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let mut index = SqliteIndex::open_in_memory(4).unwrap();
        let err = index
            .replace_file("a.md", 1.0, &[chunk(0, "text")], &[vec![0.0; 3]])
            .unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_reset_recreates_empty_schema() {
        let mut index = SqliteIndex::open_in_memory(4).unwrap();
        index
            .replace_file("a.md", 1.0, &[chunk(0, "text")], &[unit(4, 0)])
            .unwrap();

        index.reset().unwrap();

        assert!(index.list_files().unwrap().is_empty());
        assert_eq!(index.count_chunks().unwrap(), (0, 0));

        // Still usable after reset
        index
            .replace_file("b.md", 1.0, &[chunk(0, "fresh")], &[unit(4, 1)])
            .unwrap();
        assert_eq!(index.count_chunks().unwrap(), (1, 1));
    }
}
