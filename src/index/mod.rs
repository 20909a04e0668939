//! Retrieval index capability.
//!
//! Holds commit rows, chunk locations and vectors, and answers top-K
//! nearest-neighbour queries. Every row is scoped by `(owner, repo)`;
//! vectors are additionally scoped by embedding provider, so repositories
//! and providers never mix in results.
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`memory::InMemoryIndex`] | tests, dry runs |
//! | [`sqlite::SqliteIndex`] | default, `[index] path` |
//!
//! Chunk ids hash only the file path, so chunk rows are keyed by
//! `(owner, repo, id)` and hold the most recent parse of the repository.

pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::config::IndexConfig;
use crate::embed_cmd::VectorSink;
use crate::embedding::l2_distance;
use crate::models::{ChunkRecord, SearchHit, VectorRow};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexCounts {
    pub commits: u64,
    pub chunks: u64,
    pub embeddings: u64,
}

#[async_trait]
pub trait RetrievalIndex: Send + Sync {
    /// Record an ingested commit. Existing rows are left untouched.
    async fn upsert_commit(
        &self,
        owner: &str,
        repo: &str,
        commit: &str,
        ingested_at: &str,
    ) -> Result<()>;

    /// Replace the repository's chunk rows with `chunks`. Chunks missing
    /// from the new set (shrunk, renamed or deleted files) are removed along
    /// with their vectors.
    async fn replace_chunks(
        &self,
        owner: &str,
        repo: &str,
        commit: &str,
        chunks: &[ChunkRecord],
    ) -> Result<()>;

    /// Insert or overwrite vectors keyed by `(owner, repo, chunk id, provider)`.
    async fn upsert_embeddings(
        &self,
        owner: &str,
        repo: &str,
        provider: &str,
        dim: usize,
        rows: &[VectorRow],
    ) -> Result<()>;

    /// Up to `top_k` chunks nearest to `vector`, ascending by L2 distance.
    async fn query(
        &self,
        owner: &str,
        repo: &str,
        provider: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>>;

    async fn counts(&self, owner: &str, repo: &str) -> Result<IndexCounts>;
}

pub async fn open_index(config: &IndexConfig) -> Result<Arc<dyn RetrievalIndex>> {
    Ok(Arc::new(sqlite::SqliteIndex::open(&config.path).await?))
}

/// Forwards embedding batches for one repository into a [`RetrievalIndex`].
pub struct IndexSink<'a> {
    pub index: &'a dyn RetrievalIndex,
    pub owner: &'a str,
    pub repo: &'a str,
}

#[async_trait]
impl VectorSink for IndexSink<'_> {
    async fn upsert(&self, provider: &str, dim: usize, rows: &[VectorRow]) -> Result<()> {
        self.index
            .upsert_embeddings(self.owner, self.repo, provider, dim, rows)
            .await
    }
}

/// Candidate vector with the location fields a hit needs.
pub(crate) struct Candidate<'a> {
    pub chunk_id: &'a str,
    pub file_path: &'a str,
    pub start_line: usize,
    pub end_line: usize,
    pub lang: &'a str,
    pub vector: &'a [f32],
}

/// Brute-force nearest neighbours. Candidates of a different dimension
/// are ignored.
pub(crate) fn rank<'a>(
    query: &[f32],
    candidates: impl IntoIterator<Item = Candidate<'a>>,
    top_k: usize,
) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = candidates
        .into_iter()
        .filter_map(|c| {
            let distance = l2_distance(query, c.vector)?;
            Some(SearchHit {
                id: c.chunk_id.to_string(),
                file_path: c.file_path.to_string(),
                start_line: c.start_line,
                end_line: c.end_line,
                lang: c.lang.to_string(),
                distance,
            })
        })
        .collect();
    hits.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(top_k);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate<'a>(id: &'a str, vector: &'a [f32]) -> Candidate<'a> {
        Candidate {
            chunk_id: id,
            file_path: "a.rs",
            start_line: 1,
            end_line: 2,
            lang: "rust",
            vector,
        }
    }

    #[test]
    fn test_rank_orders_by_distance_and_truncates() {
        let far = [10.0f32, 0.0];
        let near = [1.0f32, 0.0];
        let exact = [0.0f32, 0.0];
        let wrong_dim = [0.0f32];
        let hits = rank(
            &[0.0, 0.0],
            vec![
                candidate("far", &far),
                candidate("near", &near),
                candidate("exact", &exact),
                candidate("odd", &wrong_dim),
            ],
            2,
        );
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["exact", "near"]);
        assert_eq!(hits[1].distance, 1.0);
    }
}
