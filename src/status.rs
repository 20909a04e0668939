//! Per-commit stage status and the `rctx status` report.
//!
//! `commits/{sha}/parse/status.json` records the last completed stage of a
//! commit. The report combines it with the ref pointer, the manifest
//! statistics and the retrieval index row counts for the repository.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::blob_store::{self, BlobStore};
use crate::index::{IndexCounts, RetrievalIndex};
use crate::ingest::load_manifest;
use crate::layout::RepoLayout;
use crate::models::{CommitStage, CommitStatus, ManifestStats};
use crate::resolve::load_ref;

pub async fn read_status(
    store: &dyn BlobStore,
    layout: &RepoLayout,
    commit: &str,
) -> Result<Option<CommitStatus>> {
    blob_store::get_json(store, &layout.status(commit)).await
}

pub async fn write_status(
    store: &dyn BlobStore,
    layout: &RepoLayout,
    commit: &str,
    status: &CommitStatus,
) -> Result<()> {
    blob_store::put_json(store, &layout.status(commit), status).await
}

/// A fresh status record for `stage`, timestamped now.
pub fn stage_status(stage: CommitStage) -> CommitStatus {
    CommitStatus {
        stage,
        updated_at: Utc::now().to_rfc3339(),
        files_parsed: None,
        chunks: None,
        model: None,
        provider: None,
        total_vectors: None,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoStatus {
    pub owner: String,
    pub repo: String,
    pub branch: Option<String>,
    pub commit: String,
    pub ref_updated_at: String,
    /// `None` when the commit was ingested by a run that wrote no status.
    pub status: Option<CommitStatus>,
    pub manifest: Option<ManifestStats>,
    pub index: IndexCounts,
}

/// Status of the commit the branch (or latest) pointer names.
pub async fn repo_status(
    store: &dyn BlobStore,
    layout: &RepoLayout,
    index: &dyn RetrievalIndex,
    branch: Option<&str>,
) -> Result<RepoStatus> {
    let pointer = load_ref(store, layout, branch).await?;
    let status = read_status(store, layout, &pointer.commit).await?;
    let manifest = load_manifest(store, layout, &pointer.commit)
        .await?
        .map(|m| m.stats);
    let counts = index.counts(&layout.owner, &layout.repo).await?;

    Ok(RepoStatus {
        owner: layout.owner.clone(),
        repo: layout.repo.clone(),
        branch: pointer.branch,
        commit: pointer.commit,
        ref_updated_at: pointer.updated_at,
        status,
        manifest,
        index: counts,
    })
}

pub fn format_status(status: &RepoStatus) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}/{}\n", status.owner, status.repo));
    out.push_str(&format!("  commit:      {}\n", status.commit));
    if let Some(branch) = &status.branch {
        out.push_str(&format!("  branch:      {}\n", branch));
    }
    out.push_str(&format!(
        "  ref updated: {}\n",
        format_relative(&status.ref_updated_at)
    ));

    match &status.status {
        Some(s) => {
            out.push_str(&format!(
                "  stage:       {} ({})\n",
                s.stage,
                format_relative(&s.updated_at)
            ));
            if let (Some(files), Some(chunks)) = (s.files_parsed, s.chunks) {
                out.push_str(&format!("  parsed:      {} files, {} chunks\n", files, chunks));
            }
            if let (Some(provider), Some(vectors)) = (&s.provider, s.total_vectors) {
                out.push_str(&format!("  embedded:    {} vectors ({})\n", vectors, provider));
            }
        }
        None => out.push_str("  stage:       unknown\n"),
    }

    if let Some(m) = &status.manifest {
        out.push_str(&format!(
            "  files:       {} kept / {} seen, {} skipped, {}\n",
            m.files_kept,
            m.files_seen,
            m.files_skipped,
            format_bytes(m.bytes_kept)
        ));
    }
    out.push_str(&format!(
        "  index:       {} commits, {} chunks, {} embeddings\n",
        status.index.commits, status.index.chunks, status.index.embeddings
    ));
    out
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format an RFC 3339 timestamp relative to now (e.g. "3 hours ago").
fn format_relative(timestamp: &str) -> String {
    let Ok(then) = DateTime::parse_from_rfc3339(timestamp) else {
        return timestamp.to_string();
    };
    let then = then.with_timezone(&Utc);
    let delta = (Utc::now() - then).num_seconds();

    if delta < 0 {
        then.format("%Y-%m-%d %H:%M").to_string()
    } else if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        then.format("%Y-%m-%d %H:%M").to_string()
    }
}
