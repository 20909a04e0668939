//! In-memory [`RetrievalIndex`].

use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::{rank, Candidate, IndexCounts, RetrievalIndex};
use crate::models::{ChunkRecord, SearchHit, VectorRow};

type RepoKey = (String, String);

#[derive(Default)]
struct State {
    commits: BTreeMap<(RepoKey, String), String>,
    chunks: BTreeMap<(RepoKey, String), ChunkRecord>,
    embeddings: BTreeMap<(RepoKey, String, String), Vec<f32>>,
}

#[derive(Default)]
pub struct InMemoryIndex {
    state: RwLock<State>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

fn repo_key(owner: &str, repo: &str) -> RepoKey {
    (owner.to_string(), repo.to_string())
}

#[async_trait]
impl RetrievalIndex for InMemoryIndex {
    async fn upsert_commit(
        &self,
        owner: &str,
        repo: &str,
        commit: &str,
        ingested_at: &str,
    ) -> Result<()> {
        let mut state = self.state.write().map_err(|_| anyhow!("index lock poisoned"))?;
        state
            .commits
            .entry((repo_key(owner, repo), commit.to_string()))
            .or_insert_with(|| ingested_at.to_string());
        Ok(())
    }

    async fn replace_chunks(
        &self,
        owner: &str,
        repo: &str,
        _commit: &str,
        chunks: &[ChunkRecord],
    ) -> Result<()> {
        let mut state = self.state.write().map_err(|_| anyhow!("index lock poisoned"))?;
        let scope = repo_key(owner, repo);
        state.chunks.retain(|(key, _), _| *key != scope);
        for chunk in chunks {
            state
                .chunks
                .insert((scope.clone(), chunk.id.clone()), chunk.clone());
        }
        let State {
            chunks, embeddings, ..
        } = &mut *state;
        embeddings.retain(|(key, chunk_id, _), _| {
            *key != scope || chunks.contains_key(&(scope.clone(), chunk_id.clone()))
        });
        Ok(())
    }

    async fn upsert_embeddings(
        &self,
        owner: &str,
        repo: &str,
        provider: &str,
        _dim: usize,
        rows: &[VectorRow],
    ) -> Result<()> {
        let mut state = self.state.write().map_err(|_| anyhow!("index lock poisoned"))?;
        for row in rows {
            state.embeddings.insert(
                (
                    repo_key(owner, repo),
                    row.chunk_id.clone(),
                    provider.to_string(),
                ),
                row.vector.clone(),
            );
        }
        Ok(())
    }

    async fn query(
        &self,
        owner: &str,
        repo: &str,
        provider: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>> {
        let state = self.state.read().map_err(|_| anyhow!("index lock poisoned"))?;
        let scope = repo_key(owner, repo);
        let candidates = state
            .embeddings
            .iter()
            .filter(|((key, _, p), _)| *key == scope && p == provider)
            .filter_map(|((_, chunk_id, _), v)| {
                let chunk = state.chunks.get(&(scope.clone(), chunk_id.clone()))?;
                Some(Candidate {
                    chunk_id,
                    file_path: &chunk.file_path,
                    start_line: chunk.start_line,
                    end_line: chunk.end_line,
                    lang: &chunk.lang,
                    vector: v,
                })
            });
        Ok(rank(vector, candidates, top_k))
    }

    async fn counts(&self, owner: &str, repo: &str) -> Result<IndexCounts> {
        let state = self.state.read().map_err(|_| anyhow!("index lock poisoned"))?;
        let scope = repo_key(owner, repo);
        Ok(IndexCounts {
            commits: state.commits.keys().filter(|(k, _)| *k == scope).count() as u64,
            chunks: state.chunks.keys().filter(|(k, _)| *k == scope).count() as u64,
            embeddings: state
                .embeddings
                .keys()
                .filter(|(k, _, _)| *k == scope)
                .count() as u64,
        })
    }
}
