//! Vector index backed by a Qdrant service, reached over its REST API.
//!
//! Point payloads carry everything needed to join a hit back to its chunk
//! (path, text, ordinal, content hash) plus the file's recorded mtime, so
//! the file records of the data model are derived by scrolling payloads.
use std::collections::HashMap;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde_json::{Value, json};
use tracing::info;
use uuid::Uuid;

use super::{Hit, IndexError, VectorIndex, check_dimensions, content_hash};
use crate::chunker::Chunk;

const SCROLL_PAGE: usize = 256;

/// Qdrant-backed `VectorIndex` over one named collection.
pub struct QdrantIndex {
    base_url: String,
    collection: String,
    client: Client,
    dimensions: usize,
}

impl QdrantIndex {
    /// Connect to a Qdrant instance and make sure the collection exists
    /// with the configured dimensionality and cosine distance.
    pub fn connect(
        base_url: impl Into<String>,
        collection: impl Into<String>,
        dimensions: usize,
    ) -> Result<Self, IndexError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        let index = Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            client,
            dimensions,
        };

        if !index.collection_exists()? {
            index.create_collection()?;
        }

        Ok(index)
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.base_url, self.collection)
    }

    fn collection_exists(&self) -> Result<bool, IndexError> {
        let resp = self.client.get(self.collection_url()).send()?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(backend_error(format!(
                "collection lookup returned {status}"
            ))),
        }
    }

    fn create_collection(&self) -> Result<(), IndexError> {
        info!(
            "Creating qdrant collection {} ({} dims, cosine)",
            self.collection, self.dimensions
        );

        let resp = self
            .client
            .put(self.collection_url())
            .json(&json!({
                "vectors": { "size": self.dimensions, "distance": "Cosine" }
            }))
            .send()?;

        expect_success(resp, "collection create")
    }

    fn delete_points_for(&self, path: &str) -> Result<(), IndexError> {
        let resp = self
            .client
            .post(format!("{}/points/delete?wait=true", self.collection_url()))
            .json(&json!({
                "filter": {
                    "must": [{ "key": "path", "match": { "value": path } }]
                }
            }))
            .send()?;

        expect_success(resp, "points delete")
    }
}

fn backend_error(details: String) -> IndexError {
    IndexError::Backend {
        backend: "qdrant",
        details,
    }
}

fn expect_success(resp: reqwest::blocking::Response, op: &str) -> Result<(), IndexError> {
    let status = resp.status();
    if status.is_success() {
        Ok(())
    } else {
        let body = resp.text().unwrap_or_default();
        Err(backend_error(format!("{op} returned {status}: {body}")))
    }
}

impl VectorIndex for QdrantIndex {
    fn reset(&mut self) -> Result<(), IndexError> {
        let resp = self.client.delete(self.collection_url()).send()?;
        if !resp.status().is_success() && resp.status() != StatusCode::NOT_FOUND {
            return Err(backend_error(format!(
                "collection delete returned {}",
                resp.status()
            )));
        }

        self.create_collection()
    }

    fn list_files(&self) -> Result<HashMap<String, f64>, IndexError> {
        let mut files = HashMap::new();
        let mut offset: Option<Value> = None;

        loop {
            let mut body = json!({
                "limit": SCROLL_PAGE,
                "with_payload": ["path", "mtime"],
                "with_vector": false,
            });
            if let Some(ref next) = offset {
                body["offset"] = next.clone();
            }

            let resp = self
                .client
                .post(format!("{}/points/scroll", self.collection_url()))
                .json(&body)
                .send()?;

            let status = resp.status();
            if !status.is_success() {
                return Err(backend_error(format!("points scroll returned {status}")));
            }

            let parsed: Value = resp.json()?;
            let points = parsed
                .pointer("/result/points")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            for point in &points {
                let path = point
                    .pointer("/payload/path")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let mtime = point
                    .pointer("/payload/mtime")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0);
                if !path.is_empty() {
                    files.insert(path.to_string(), mtime);
                }
            }

            match parsed.pointer("/result/next_page_offset") {
                Some(next) if !next.is_null() => offset = Some(next.clone()),
                _ => break,
            }
        }

        Ok(files)
    }

    fn delete_file(&mut self, path: &str) -> Result<bool, IndexError> {
        // The delete endpoint doesn't report how many points matched
        self.delete_points_for(path)?;
        Ok(true)
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

        self.delete_points_for(path)?;

        if chunks.is_empty() {
            return Ok(());
        }

        let points: Vec<Value> = chunks
            .iter()
            .zip(embeddings.iter())
            .map(|(chunk, embedding)| {
                json!({
                    "id": Uuid::new_v4().to_string(),
                    "vector": embedding,
                    "payload": {
                        "path": path,
                        "position": chunk.position,
                        "content": chunk.content,
                        "content_hash": content_hash(&chunk.content),
                        "mtime": modified_at,
                    }
                })
            })
            .collect();

        let resp = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&json!({ "points": points }))
            .send()?;

        expect_success(resp, "points upsert")
    }

    fn search(&self, query_vector: &[f32], top_k: usize) -> Result<Vec<Hit>, IndexError> {
        if query_vector.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                actual: query_vector.len(),
            });
        }

        let resp = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&json!({
                "vector": query_vector,
                "limit": top_k,
                "with_payload": true,
            }))
            .send()?;

        let status = resp.status();
        if !status.is_success() {
            return Err(backend_error(format!("points search returned {status}")));
        }

        let parsed: Value = resp.json()?;
        let raw_hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut hits = Vec::new();
        for raw in &raw_hits {
            let path = raw
                .pointer("/payload/path")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let content = raw
                .pointer("/payload/content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let position = raw
                .pointer("/payload/position")
                .and_then(Value::as_u64)
                .unwrap_or(0) as usize;
            // Qdrant reports cosine similarity directly
            let score = raw.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);

            hits.push(Hit {
                path,
                content,
                position,
                score,
            });
        }

        Ok(hits)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
