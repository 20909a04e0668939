//! Embedding stage for one commit.
//!
//! Walks the commit's chunk index file by file, sends chunk texts to the
//! [`Embedder`] in fixed-size batches, and for every returned vector:
//!
//! - appends a [`VectorLine`] to a partition buffer, flushed to
//!   `parse/embeddings/{provider}/vectors_part-NNNNN.jsonl` every
//!   `partition_size` vectors;
//! - forwards the batch's rows to a [`VectorSink`] (the retrieval index).
//!
//! `parse/embeddings.index.json` is written last and marks the commit as
//! fully embedded. A provider failure aborts the run; partitions already
//! flushed stay in place and are overwritten by the next full run.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::blob_store::{self, BlobStore};
use crate::embedding::{encode_vector_b64, Embedder};
use crate::error::PipelineError;
use crate::lang;
use crate::layout::RepoLayout;
use crate::models::{ChunkText, EmbeddingsIndex, VectorLine, VectorRow};
use crate::normalize::short_hash;
use crate::parse::load_chunk_index;

pub const LAYOUT_VERSION: u32 = 1;

/// Receives each embedding batch's rows as soon as they are produced.
#[async_trait]
pub trait VectorSink: Send + Sync {
    async fn upsert(&self, provider: &str, dim: usize, rows: &[VectorRow]) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
pub struct EmbedOptions {
    pub batch_size: usize,
    pub partition_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedSummary {
    pub provider: String,
    pub dim: usize,
    pub total_vectors: usize,
    pub parts: usize,
}

/// Buffers vector lines and writes numbered partitions.
struct PartitionWriter<'a> {
    store: &'a dyn BlobStore,
    layout: &'a RepoLayout,
    commit: &'a str,
    provider: &'a str,
    partition_size: usize,
    buffer: Vec<VectorLine>,
    parts: usize,
}

impl PartitionWriter<'_> {
    async fn push(&mut self, line: VectorLine) -> Result<()> {
        self.buffer.push(line);
        if self.buffer.len() >= self.partition_size {
            self.flush().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let key = self
            .layout
            .embeddings_part(self.commit, self.provider, self.parts);
        blob_store::put_jsonl(self.store, &key, &self.buffer)
            .await
            .with_context(|| format!("Failed to write embedding partition {}", key))?;
        debug!(key = %key, vectors = self.buffer.len(), "partition flushed");
        self.buffer.clear();
        self.parts += 1;
        Ok(())
    }
}

/// Embed every chunk of `commit` and write partitions plus the summary index.
pub async fn embed_commit(
    store: &dyn BlobStore,
    layout: &RepoLayout,
    commit: &str,
    embedder: &dyn Embedder,
    sink: Option<&dyn VectorSink>,
    options: EmbedOptions,
) -> Result<EmbedSummary> {
    let index = load_chunk_index(store, layout, commit)
        .await?
        .ok_or_else(|| PipelineError::MissingArtifact {
            commit: commit.to_string(),
            artifact: "chunk index".to_string(),
        })?;

    let provider = embedder.name().to_string();
    let dim = embedder.dim();
    let batch_size = options.batch_size.max(1);

    // Distinct files in index order.
    let mut files: Vec<&str> = Vec::new();
    for chunk in &index.chunks {
        if !lang::is_code_or_markdown(&chunk.lang) {
            continue;
        }
        if files.last() != Some(&chunk.file_path.as_str()) {
            files.push(&chunk.file_path);
        }
    }

    let mut writer = PartitionWriter {
        store,
        layout,
        commit,
        provider: &provider,
        partition_size: options.partition_size.max(1),
        buffer: Vec::new(),
        parts: 0,
    };
    let mut total_vectors = 0usize;

    for path in files {
        let key = layout.chunk_file(commit, &short_hash(path));
        let Some(chunks) = blob_store::get_jsonl::<ChunkText>(store, &key).await? else {
            warn!(path, key = %key, "chunk text missing, file not embedded");
            continue;
        };

        for batch in chunks.chunks(batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = embedder.embed(&texts).await?;
            if vectors.len() < texts.len() {
                warn!(
                    path,
                    requested = texts.len(),
                    returned = vectors.len(),
                    "provider returned fewer vectors than inputs"
                );
            }

            let mut rows = Vec::with_capacity(vectors.len());
            for (j, chunk) in batch.iter().enumerate() {
                let Some(vector) = vectors.get(j) else {
                    continue;
                };
                writer
                    .push(VectorLine {
                        id: chunk.record.id.clone(),
                        dim: vector.len(),
                        vector_b64: encode_vector_b64(vector),
                    })
                    .await?;
                rows.push(VectorRow {
                    chunk_id: chunk.record.id.clone(),
                    vector: vector.clone(),
                });
            }

            total_vectors += rows.len();
            if let Some(sink) = sink {
                if !rows.is_empty() {
                    sink.upsert(&provider, dim, &rows).await?;
                }
            }
        }
    }
    writer.flush().await?;
    let parts = writer.parts;

    let summary = EmbeddingsIndex {
        commit: commit.to_string(),
        provider: provider.clone(),
        dim,
        total_vectors,
        parts,
        generated_at: Utc::now().to_rfc3339(),
        layout_version: LAYOUT_VERSION,
    };
    blob_store::put_json(store, &layout.embeddings_index(commit), &summary)
        .await
        .context("Failed to write embeddings index")?;

    info!(
        owner = %layout.owner,
        repo = %layout.repo,
        commit,
        provider = %provider,
        total_vectors,
        parts,
        "embedding complete"
    );
    Ok(EmbedSummary {
        provider,
        dim,
        total_vectors,
        parts,
    })
}

pub async fn load_embeddings_index(
    store: &dyn BlobStore,
    layout: &RepoLayout,
    commit: &str,
) -> Result<Option<EmbeddingsIndex>> {
    blob_store::get_json(store, &layout.embeddings_index(commit)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::memory::InMemoryBlobStore;
    use crate::chunk::{chunk_file, ChunkParams};
    use crate::embedding::decode_vector_b64;
    use crate::models::ChunkIndex;
    use std::sync::Mutex;

    const COMMIT: &str = "c0ffee";

    /// Embeds text `t` as `[len(t), k]` where k is the input position.
    struct FakeEmbedder {
        drop_last: bool,
        calls: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl Embedder for FakeEmbedder {
        fn name(&self) -> &str {
            "fake"
        }
        fn dim(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.lock().unwrap().push(texts.len());
            let mut out: Vec<Vec<f32>> = texts
                .iter()
                .enumerate()
                .map(|(k, t)| vec![t.len() as f32, k as f32])
                .collect();
            if self.drop_last {
                out.pop();
            }
            Ok(out)
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn name(&self) -> &str {
            "broken"
        }
        fn dim(&self) -> usize {
            2
        }
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(PipelineError::Provider {
                provider: "broken".into(),
                status: Some(400),
                message: "bad request".into(),
            }
            .into())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        batches: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl VectorSink for RecordingSink {
        async fn upsert(&self, _provider: &str, _dim: usize, rows: &[VectorRow]) -> Result<()> {
            self.batches
                .lock()
                .unwrap()
                .push(rows.iter().map(|r| r.chunk_id.clone()).collect());
            Ok(())
        }
    }

    /// One rust file with `n` tiny single-line chunks.
    async fn seed(store: &InMemoryBlobStore, layout: &RepoLayout, n: usize) -> Vec<ChunkText> {
        let params = ChunkParams {
            target_tokens: 1,
            max_lines: 1,
            min_lines: 1,
            overlap_lines: 0,
        };
        let text: String = (0..n).map(|i| format!("line {}\n", i)).collect();
        let chunks = chunk_file("src/lib.rs", "sha", "rust", &text, &params);
        assert_eq!(chunks.len(), n);
        blob_store::put_jsonl(
            store,
            &layout.chunk_file(COMMIT, &short_hash("src/lib.rs")),
            &chunks,
        )
        .await
        .unwrap();
        let index = ChunkIndex {
            commit: COMMIT.into(),
            chunk_model: "chunker-v0.1".into(),
            generated_at: "2026-01-01T00:00:00Z".into(),
            chunks: chunks.iter().map(|c| c.record.clone()).collect(),
        };
        blob_store::put_json(store, &layout.chunk_index(COMMIT), &index)
            .await
            .unwrap();
        chunks
    }

    #[tokio::test]
    async fn test_partitions_and_summary() {
        let store = InMemoryBlobStore::new();
        let layout = RepoLayout::new("default", "acme", "widgets");
        let chunks = seed(&store, &layout, 5).await;
        let embedder = FakeEmbedder {
            drop_last: false,
            calls: Mutex::new(Vec::new()),
        };
        let sink = RecordingSink::default();

        let summary = embed_commit(
            &store,
            &layout,
            COMMIT,
            &embedder,
            Some(&sink),
            EmbedOptions {
                batch_size: 2,
                partition_size: 3,
            },
        )
        .await
        .unwrap();

        assert_eq!(summary.total_vectors, 5);
        assert_eq!(summary.parts, 2);
        assert_eq!(*embedder.calls.lock().unwrap(), vec![2, 2, 1]);
        // one sink call per embedding call
        assert_eq!(sink.batches.lock().unwrap().len(), 3);

        let first: Vec<VectorLine> =
            blob_store::get_jsonl(&store, &layout.embeddings_part(COMMIT, "fake", 0))
                .await
                .unwrap()
                .unwrap();
        let second: Vec<VectorLine> =
            blob_store::get_jsonl(&store, &layout.embeddings_part(COMMIT, "fake", 1))
                .await
                .unwrap()
                .unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(second.len(), 2);
        let ids: Vec<&str> = first.iter().chain(&second).map(|l| l.id.as_str()).collect();
        let expected: Vec<&str> = chunks.iter().map(|c| c.record.id.as_str()).collect();
        assert_eq!(ids, expected);
        assert_eq!(
            decode_vector_b64(&first[1].vector_b64).unwrap(),
            vec![chunks[1].text.len() as f32, 1.0]
        );

        let index = load_embeddings_index(&store, &layout, COMMIT)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(index.total_vectors, 5);
        assert_eq!(index.parts, 2);
        assert_eq!(index.layout_version, LAYOUT_VERSION);
    }

    #[tokio::test]
    async fn test_short_provider_response_skips_missing_vector() {
        let store = InMemoryBlobStore::new();
        let layout = RepoLayout::new("default", "acme", "widgets");
        let chunks = seed(&store, &layout, 64).await;
        let embedder = FakeEmbedder {
            drop_last: true,
            calls: Mutex::new(Vec::new()),
        };
        let sink = RecordingSink::default();

        let summary = embed_commit(
            &store,
            &layout,
            COMMIT,
            &embedder,
            Some(&sink),
            EmbedOptions {
                batch_size: 64,
                partition_size: 2000,
            },
        )
        .await
        .unwrap();

        assert_eq!(summary.total_vectors, 63);
        let batches = sink.batches.lock().unwrap();
        assert_eq!(batches[0].len(), 63);
        assert!(!batches[0].contains(&chunks[63].record.id));
    }

    #[tokio::test]
    async fn test_provider_failure_aborts_without_summary() {
        let store = InMemoryBlobStore::new();
        let layout = RepoLayout::new("default", "acme", "widgets");
        seed(&store, &layout, 3).await;

        let err = embed_commit(
            &store,
            &layout,
            COMMIT,
            &FailingEmbedder,
            None,
            EmbedOptions {
                batch_size: 2,
                partition_size: 10,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::Provider { .. })
        ));
        assert!(load_embeddings_index(&store, &layout, COMMIT)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_missing_chunk_index() {
        let store = InMemoryBlobStore::new();
        let layout = RepoLayout::new("default", "acme", "widgets");
        let embedder = FakeEmbedder {
            drop_last: false,
            calls: Mutex::new(Vec::new()),
        };
        let err = embed_commit(
            &store,
            &layout,
            COMMIT,
            &embedder,
            None,
            EmbedOptions {
                batch_size: 2,
                partition_size: 10,
            },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("chunk index"));
    }
}
