//! SQLite [`RetrievalIndex`].
//!
//! Vectors are stored as little-endian `f32` BLOBs and ranked in process;
//! the scan is bounded by the `(owner, repo, provider)` index.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use super::{rank, Candidate, IndexCounts, RetrievalIndex};
use crate::db;
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::migrate;
use crate::models::{ChunkRecord, SearchHit, VectorRow};

pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    /// Open the index file, creating tables on first use.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

struct StoredVector {
    chunk_id: String,
    file_path: String,
    start_line: usize,
    end_line: usize,
    lang: String,
    vector: Vec<f32>,
}

#[async_trait]
impl RetrievalIndex for SqliteIndex {
    async fn upsert_commit(
        &self,
        owner: &str,
        repo: &str,
        commit: &str,
        ingested_at: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO commits (owner, repo, commit_sha, ingested_at) VALUES (?, ?, ?, ?)",
        )
        .bind(owner)
        .bind(repo)
        .bind(commit)
        .bind(ingested_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn replace_chunks(
        &self,
        owner: &str,
        repo: &str,
        commit: &str,
        chunks: &[ChunkRecord],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks WHERE owner = ? AND repo = ?")
            .bind(owner)
            .bind(repo)
            .execute(&mut *tx)
            .await?;
        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (owner, repo, id, commit_sha, file_path, start_line, end_line, lang, hash)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(owner, repo, id) DO UPDATE SET
                    commit_sha = excluded.commit_sha,
                    file_path = excluded.file_path,
                    start_line = excluded.start_line,
                    end_line = excluded.end_line,
                    lang = excluded.lang,
                    hash = excluded.hash
                "#,
            )
            .bind(owner)
            .bind(repo)
            .bind(&chunk.id)
            .bind(commit)
            .bind(&chunk.file_path)
            .bind(chunk.start_line as i64)
            .bind(chunk.end_line as i64)
            .bind(&chunk.lang)
            .bind(&chunk.hash)
            .execute(&mut *tx)
            .await?;
        }
        // vectors of chunks that no longer exist
        sqlx::query(
            r#"
            DELETE FROM embeddings
            WHERE owner = ? AND repo = ?
              AND chunk_id NOT IN (SELECT id FROM chunks WHERE owner = ? AND repo = ?)
            "#,
        )
        .bind(owner)
        .bind(repo)
        .bind(owner)
        .bind(repo)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_embeddings(
        &self,
        owner: &str,
        repo: &str,
        provider: &str,
        dim: usize,
        rows: &[VectorRow],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO embeddings (owner, repo, chunk_id, provider, dim, embedding)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(owner, repo, chunk_id, provider) DO UPDATE SET
                    dim = excluded.dim,
                    embedding = excluded.embedding
                "#,
            )
            .bind(owner)
            .bind(repo)
            .bind(&row.chunk_id)
            .bind(provider)
            .bind(dim as i64)
            .bind(vec_to_blob(&row.vector))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
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
        let rows = sqlx::query(
            r#"
            SELECT e.chunk_id, e.embedding, c.file_path, c.start_line, c.end_line, c.lang
            FROM embeddings e
            JOIN chunks c ON c.owner = e.owner AND c.repo = e.repo AND c.id = e.chunk_id
            WHERE e.owner = ? AND e.repo = ? AND e.provider = ?
            "#,
        )
        .bind(owner)
        .bind(repo)
        .bind(provider)
        .fetch_all(&self.pool)
        .await?;

        let stored: Vec<StoredVector> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                StoredVector {
                    chunk_id: row.get("chunk_id"),
                    file_path: row.get("file_path"),
                    start_line: row.get::<i64, _>("start_line") as usize,
                    end_line: row.get::<i64, _>("end_line") as usize,
                    lang: row.get("lang"),
                    vector: blob_to_vec(&blob),
                }
            })
            .collect();

        Ok(rank(
            vector,
            stored.iter().map(|s| Candidate {
                chunk_id: &s.chunk_id,
                file_path: &s.file_path,
                start_line: s.start_line,
                end_line: s.end_line,
                lang: &s.lang,
                vector: &s.vector,
            }),
            top_k,
        ))
    }

    async fn counts(&self, owner: &str, repo: &str) -> Result<IndexCounts> {
        let mut counts = [0u64; 3];
        for (slot, table) in counts.iter_mut().zip(["commits", "chunks", "embeddings"]) {
            let n: i64 = sqlx::query_scalar(&format!(
                "SELECT COUNT(*) FROM {} WHERE owner = ? AND repo = ?",
                table
            ))
            .bind(owner)
            .bind(repo)
            .fetch_one(&self.pool)
            .await?;
            *slot = n as u64;
        }
        Ok(IndexCounts {
            commits: counts[0],
            chunks: counts[1],
            embeddings: counts[2],
        })
    }
}
