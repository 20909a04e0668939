//! Per-commit chunking stage.
//!
//! Reads the commit's manifest, chunks every stored code or markdown file,
//! and writes:
//!
//! - `parse/chunks/{fileId}.jsonl`: one [`ChunkText`] per line, per file;
//! - `parse/chunks.index.json`: the metadata-only [`ChunkIndex`].
//!
//! The index is written last, so its presence means every per-file
//! artifact it references exists.

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info};

use crate::blob_store::{self, BlobStore};
use crate::chunk::{chunk_file, ChunkParams};
use crate::error::PipelineError;
use crate::ingest::load_manifest;
use crate::lang;
use crate::layout::RepoLayout;
use crate::models::{ChunkIndex, ChunkText, FileEntry};
use crate::normalize::{normalize_text, short_hash};

/// Files eligible for chunking: stored, text, code or markdown.
pub fn is_selected(file: &FileEntry) -> bool {
    !file.binary && file.stored_at.is_some() && lang::is_code_or_markdown(&file.lang)
}

/// Chunk every selected file of `commit` and persist the results.
pub async fn parse_commit(
    store: &dyn BlobStore,
    layout: &RepoLayout,
    commit: &str,
    params: &ChunkParams,
    model_label: &str,
) -> Result<ChunkIndex> {
    let manifest = load_manifest(store, layout, commit)
        .await?
        .ok_or_else(|| PipelineError::MissingArtifact {
            commit: commit.to_string(),
            artifact: "manifest".to_string(),
        })?;

    let mut records = Vec::new();
    let mut files_parsed = 0usize;

    for file in manifest.files.iter().filter(|f| is_selected(f)) {
        let Some(stored_at) = file.stored_at.as_deref() else {
            continue;
        };
        let bytes = store
            .get(&layout.blob(stored_at))
            .await?
            .with_context(|| format!("Blob {} for {} is missing", stored_at, file.path))?;
        let text = normalize_text(&String::from_utf8_lossy(&bytes));

        let chunks: Vec<ChunkText> = chunk_file(&file.path, &file.sha, &file.lang, &text, params);
        files_parsed += 1;
        if chunks.is_empty() {
            debug!(path = %file.path, "file produced no chunks");
            continue;
        }

        let key = layout.chunk_file(commit, &short_hash(&file.path));
        blob_store::put_jsonl(store, &key, &chunks)
            .await
            .with_context(|| format!("Failed to write chunk text for {}", file.path))?;
        records.extend(chunks.into_iter().map(|c| c.record));
    }

    let index = ChunkIndex {
        commit: commit.to_string(),
        chunk_model: model_label.to_string(),
        generated_at: Utc::now().to_rfc3339(),
        chunks: records,
    };
    blob_store::put_json(store, &layout.chunk_index(commit), &index)
        .await
        .context("Failed to write chunk index")?;

    info!(
        owner = %layout.owner,
        repo = %layout.repo,
        commit,
        files_parsed,
        chunks = index.chunks.len(),
        "parse complete"
    );
    Ok(index)
}

pub async fn load_chunk_index(
    store: &dyn BlobStore,
    layout: &RepoLayout,
    commit: &str,
) -> Result<Option<ChunkIndex>> {
    blob_store::get_json(store, &layout.chunk_index(commit)).await
}

/// Number of distinct files in a chunk index.
pub fn files_in(index: &ChunkIndex) -> usize {
    let mut paths: Vec<&str> = index.chunks.iter().map(|c| c.file_path.as_str()).collect();
    paths.dedup();
    paths.len()
}
