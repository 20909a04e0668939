//! Semantic retrieval.
//!
//! Embeds the query with the configured provider and asks the retrieval
//! index for the nearest chunks in the same `(owner, repo, provider)`
//! scope. An empty or whitespace-only query returns no hits without
//! calling the provider.

use anyhow::Result;
use tracing::debug;

use crate::embedding::{embed_query, Embedder};
use crate::index::RetrievalIndex;
use crate::models::SearchHit;

/// Nearest chunks to an already-embedded query, ascending by distance.
pub async fn search(
    index: &dyn RetrievalIndex,
    owner: &str,
    repo: &str,
    query_vector: &[f32],
    top_k: usize,
    provider: &str,
) -> Result<Vec<SearchHit>> {
    if top_k == 0 {
        return Ok(Vec::new());
    }
    let hits = index
        .query(owner, repo, provider, query_vector, top_k)
        .await?;
    debug!(owner, repo, provider, hits = hits.len(), "search complete");
    Ok(hits)
}

/// Embed `query` and search.
pub async fn search_text(
    index: &dyn RetrievalIndex,
    embedder: &dyn Embedder,
    owner: &str,
    repo: &str,
    query: &str,
    top_k: usize,
) -> Result<Vec<SearchHit>> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }
    let vector = embed_query(embedder, query).await?;
    search(index, owner, repo, &vector, top_k, embedder.name()).await
}

/// Human-readable hit list, one line per hit.
pub fn format_hits(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return "No results.\n".to_string();
    }
    let mut out = String::new();
    for (i, hit) in hits.iter().enumerate() {
        out.push_str(&format!(
            "{}. [{:.4}] {}:{}-{} ({})\n    id: {}\n",
            i + 1,
            hit.distance,
            hit.file_path,
            hit.start_line,
            hit.end_line,
            hit.lang,
            hit.id
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::memory::InMemoryIndex;

    #[tokio::test]
    async fn test_empty_index_returns_no_hits() {
        let index = InMemoryIndex::new();
        let hits = search(&index, "acme", "widgets", &[0.1, 0.2], 8, "openai")
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_format_hits() {
        assert_eq!(format_hits(&[]), "No results.\n");
        let hit = SearchHit {
            id: "aabbccddeeff-0002".into(),
            file_path: "src/lib.rs".into(),
            start_line: 3,
            end_line: 9,
            lang: "rust".into(),
            distance: 0.25,
        };
        let out = format_hits(&[hit]);
        assert!(out.starts_with("1. [0.2500] src/lib.rs:3-9 (rust)"));
        assert!(out.contains("id: aabbccddeeff-0002"));
    }
}
