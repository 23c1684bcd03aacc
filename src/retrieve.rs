//! k-NN retrieval and budgeted context assembly.
//!
//! The question is embedded with the same embedder used at ingestion time,
//! searched against the index, and the ranked hits are concatenated into a
//! context string under a hard character budget.
use anyhow::{Context, Result};

use crate::embedder::Embedder;
use crate::index::{Hit, VectorIndex};

/// Read-only retrieval engine.
pub struct Retriever<'a, E: Embedder + ?Sized> {
    index: &'a dyn VectorIndex,
    embedder: &'a E,
}

impl<'a, E: Embedder + ?Sized> Retriever<'a, E> {
    pub fn new(index: &'a dyn VectorIndex, embedder: &'a E) -> Self {
        Self { index, embedder }
    }

    /// Return the `top_k` chunks closest to `question`, best match first.
    pub fn retrieve(&self, question: &str, top_k: usize) -> Result<Vec<Hit>> {
        let query = self
            .embedder
            .embed(question)
            .context("failed to embed question")?;

        let hits = self
            .index
            .search(&query, top_k)
            .context("vector search failed")?;

        Ok(hits)
    }
}

/// Format one hit the way it appears in the prompt context.
fn format_entry(rank: usize, hit: &Hit) -> String {
    format!("[chunk {rank} / score={:.4}]\n{}\n\n", hit.score, hit.content)
}

/// Greedy, order-preserving context assembly under a character budget.
///
/// Entries are included whole, in rank order, stopping before the first one
/// that would push the total past `max_context`. May be empty if even the
/// first entry exceeds the budget.
pub fn build_context(hits: &[Hit], max_context: usize) -> String {
    let mut ctx = String::new();
    let mut used = 0usize;

    for (rank, hit) in hits.iter().enumerate() {
        let entry = format_entry(rank, hit);
        let entry_len = entry.chars().count();
        if used + entry_len > max_context {
            break;
        }
        used += entry_len;
        ctx.push_str(&entry);
    }

    ctx
}

/// Distinct source paths of the hits, in rank order.
pub fn references(hits: &[Hit]) -> Vec<String> {
    let mut refs = Vec::new();
    for hit in hits {
        if !refs.contains(&hit.path) {
            refs.push(hit.path.clone());
        }
    }
    refs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::Chunk;
    use crate::embedder::mock::MockEmbedder;
    use crate::index::sqlite::SqliteIndex;

    const DIMS: usize = 384;

    fn hit(path: &str, content: &str, score: f64) -> Hit {
        Hit {
            path: path.to_string(),
            content: content.to_string(),
            position: 0,
            score,
        }
    }

    fn seeded_index(embedder: &MockEmbedder, docs: &[(&str, &str)]) -> SqliteIndex {
        let mut index = SqliteIndex::open_in_memory(DIMS).unwrap();
        for (path, text) in docs {
            let chunks = vec![Chunk {
                position: 0,
                content: text.to_string(),
            }];
            let embeddings = vec![embedder.embed(text).unwrap()];
            index.replace_file(path, 1.0, &chunks, &embeddings).unwrap();
        }
        index
    }

    #[test]
    fn test_retrieve_ranked_and_bounded() {
        let embedder = MockEmbedder::new(DIMS);
        let index = seeded_index(
            &embedder,
            &[
                ("defs.md", "FleetFix is defined as a maintenance scheduler."),
                ("recipes.md", "Carbonara wants guanciale, eggs, pecorino."),
                ("gym.md", "Deadlift volume should stay moderate."),
            ],
        );

        let retriever = Retriever::new(&index, &embedder);
        let hits = retriever.retrieve("What is FleetFix?", 2).unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].path, "defs.md");
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_retrieve_empty_index() {
        let embedder = MockEmbedder::new(DIMS);
        let index = SqliteIndex::open_in_memory(DIMS).unwrap();
        let retriever = Retriever::new(&index, &embedder);

        let hits = retriever.retrieve("anything", 5).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_build_context_within_budget() {
        let hits = vec![
            hit("a.md", "first chunk text", 0.9),
            hit("b.md", "second chunk text", 0.8),
            hit("c.md", "third chunk text", 0.7),
        ];

        for budget in [0, 10, 50, 100, 500] {
            let ctx = build_context(&hits, budget);
            assert!(
                ctx.chars().count() <= budget,
                "context of {} chars exceeds budget {budget}",
                ctx.chars().count()
            );
        }
    }

    #[test]
    fn test_build_context_keeps_entries_whole() {
        let hits = vec![
            hit("a.md", "alpha alpha alpha", 0.9),
            hit("b.md", "beta beta beta", 0.8),
        ];

        let first = format!("[chunk 0 / score={:.4}]\n{}\n\n", 0.9, "alpha alpha alpha");
        // Budget fits the first entry plus a little, but not the second
        let ctx = build_context(&hits, first.chars().count() + 5);

        assert_eq!(ctx, first);
        assert!(!ctx.contains("beta"));
    }

    #[test]
    fn test_build_context_first_entry_over_budget() {
        let hits = vec![hit("a.md", &"x".repeat(300), 0.9)];
        let ctx = build_context(&hits, 100);
        assert!(ctx.is_empty());
    }

    #[test]
    fn test_build_context_entry_format() {
        let hits = vec![hit("a.md", "the text", 0.1234)];
        let ctx = build_context(&hits, 1000);
        assert_eq!(ctx, "[chunk 0 / score=0.1234]\nthe text\n\n");
    }

    #[test]
    fn test_references_deduplicated_in_rank_order() {
        let hits = vec![
            hit("b.md", "one", 0.9),
            hit("a.md", "two", 0.8),
            hit("b.md", "three", 0.7),
        ];
        assert_eq!(references(&hits), vec!["b.md", "a.md"]);
    }

    #[test]
    fn test_references_empty() {
        assert!(references(&[]).is_empty());
    }
}
