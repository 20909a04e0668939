//! Snapshot ingestion.
//!
//! Resolves a reference to a commit, lists its tree, selects text files
//! with the include/exclude globs and size cap, and stores each selected
//! file once under its content-addressed key. The resulting [`Manifest`] is
//! written only after every blob is stored, followed by the ref pointers.
//!
//! Passing no target store performs a dry run: filtering, fetching and
//! hashing happen as usual but nothing is written.

use anyhow::{Context, Result};
use chrono::Utc;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tracing::{debug, info, warn};

use crate::blob_store::{self, BlobStore, GZIP, TEXT_UTF8};
use crate::lang;
use crate::layout::{is_full_sha, sanitize_branch, RepoLayout};
use crate::models::{
    FileEntry, FilterConfig, Manifest, ManifestStats, RefPointer, SkipReason, SkippedFile,
};
use crate::normalize::{blob_key, count_lines, is_binary, normalize_line_endings};
use crate::source::{EntryKind, RepoSource};

/// Compiled include/exclude globs.
///
/// Patterns follow shell glob semantics: `*` stays within one path segment,
/// `**` crosses directories, and dot-files are matched like any other file.
pub struct PathFilter {
    include: Option<GlobSet>,
    exclude: GlobSet,
    max_bytes: u64,
}

impl PathFilter {
    pub fn new(config: &FilterConfig) -> Result<Self> {
        let include = if config.include.is_empty() {
            None
        } else {
            Some(build_globset(&config.include)?)
        };
        Ok(Self {
            include,
            exclude: build_globset(&config.exclude)?,
            max_bytes: config.max_file_kb.saturating_mul(1024),
        })
    }

    /// Path passes the include/exclude globs.
    pub fn matches_path(&self, path: &str) -> bool {
        let included = self.include.as_ref().map_or(true, |set| set.is_match(path));
        included && !self.exclude.is_match(path)
    }

    pub fn within_size(&self, size: u64) -> bool {
        size <= self.max_bytes
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .with_context(|| format!("Invalid glob pattern: '{}'", pattern))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

/// Ingest one snapshot of `layout.owner/layout.repo` at `reference`.
///
/// `branch`, when given, also receives a branch ref pointer. `store` is the
/// write target; `None` is a dry run.
pub async fn ingest(
    source: &dyn RepoSource,
    store: Option<&dyn BlobStore>,
    layout: &RepoLayout,
    reference: &str,
    branch: Option<&str>,
    filter_config: &FilterConfig,
) -> Result<Manifest> {
    let owner = layout.owner.as_str();
    let repo = layout.repo.as_str();
    let filter = PathFilter::new(filter_config)?;

    let commit = if is_full_sha(reference) {
        reference.to_ascii_lowercase()
    } else {
        source.resolve_commit(owner, repo, reference).await?
    };
    info!(owner, repo, reference, commit = %commit, source = source.name(), "ingesting snapshot");

    let listing = source.list_tree(owner, repo, &commit).await?;
    if listing.truncated {
        warn!(
            owner,
            repo,
            commit = %commit,
            entries = listing.entries.len(),
            "tree listing was truncated upstream; ingesting the entries that were returned \
             (set source.save_tarball to keep a full archive)"
        );
    }

    let blobs: Vec<_> = listing
        .entries
        .iter()
        .filter(|e| e.kind == EntryKind::Blob)
        .collect();

    let mut files = Vec::new();
    let mut skipped = Vec::new();
    let mut bytes_kept = 0u64;
    let mut blobs_written = 0usize;

    for entry in &blobs {
        if !filter.matches_path(&entry.path) {
            continue;
        }
        let tree_size = entry.size.unwrap_or(0);
        if !filter.within_size(tree_size) {
            debug!(path = %entry.path, size = tree_size, "skipping file over size cap");
            skipped.push(SkippedFile {
                path: entry.path.clone(),
                sha: entry.sha.clone(),
                size: tree_size,
                reason: SkipReason::MaxSize,
            });
            continue;
        }

        let raw = source
            .fetch_blob(owner, repo, &entry.sha)
            .await
            .with_context(|| format!("Failed to fetch blob for {}", entry.path))?;
        if is_binary(&raw) {
            debug!(path = %entry.path, "skipping binary file");
            skipped.push(SkippedFile {
                path: entry.path.clone(),
                sha: entry.sha.clone(),
                size: raw.len() as u64,
                reason: SkipReason::Binary,
            });
            continue;
        }

        let text = normalize_line_endings(&String::from_utf8_lossy(&raw));
        let lines = count_lines(&text) as u64;
        let bytes = text.into_bytes();
        let key = blob_key(&bytes);
        let size = bytes.len() as u64;

        if let Some(store) = store {
            let full_key = layout.blob(&key);
            if !store.exists(&full_key).await? {
                store
                    .put(&full_key, bytes, TEXT_UTF8)
                    .await
                    .with_context(|| format!("Failed to store blob for {}", entry.path))?;
                blobs_written += 1;
            }
        }

        bytes_kept += size;
        files.push(FileEntry {
            path: entry.path.clone(),
            sha: entry.sha.clone(),
            size,
            lang: lang::detect(&entry.path).to_string(),
            mime: TEXT_UTF8.to_string(),
            binary: false,
            lines,
            stored_at: store.map(|_| key),
        });
    }

    let files_seen = blobs.len() as u64;
    let files_kept = files.len() as u64;
    let manifest = Manifest {
        owner: owner.to_string(),
        repo: repo.to_string(),
        commit: commit.clone(),
        ingested_at: Utc::now().to_rfc3339(),
        config: filter_config.clone(),
        stats: ManifestStats {
            files_seen,
            files_kept,
            files_skipped: files_seen - files_kept,
            bytes_kept,
        },
        files,
        skipped,
    };

    if let Some(store) = store {
        write_manifest(store, layout, &manifest, branch).await?;
    }

    info!(
        owner,
        repo,
        commit = %commit,
        kept = manifest.stats.files_kept,
        skipped = manifest.stats.files_skipped,
        blobs_written,
        dry_run = store.is_none(),
        "ingest complete"
    );
    Ok(manifest)
}

async fn write_manifest(
    store: &dyn BlobStore,
    layout: &RepoLayout,
    manifest: &Manifest,
    branch: Option<&str>,
) -> Result<()> {
    let commit = &manifest.commit;
    blob_store::put_json(store, &layout.manifest(commit), manifest)
        .await
        .context("Failed to write manifest")?;
    blob_store::put_json(store, &layout.selection(commit), &manifest.config).await?;

    let now = Utc::now().to_rfc3339();
    let latest = RefPointer {
        commit: commit.clone(),
        branch: None,
        updated_at: now.clone(),
    };
    blob_store::put_json(store, &layout.latest_ref(), &latest).await?;

    if let Some(branch) = branch.map(sanitize_branch).filter(|b| !b.is_empty()) {
        let pointer = RefPointer {
            commit: commit.clone(),
            branch: Some(branch.to_string()),
            updated_at: now,
        };
        blob_store::put_json(store, &layout.branch_ref(branch), &pointer).await?;
    }

    blob_store::put_json(store, &layout.latest_manifest(), manifest).await?;
    Ok(())
}

/// Store the source's tarball of `commit` at `commits/{sha}/repo.tar.gz`.
/// Returns the archive size in bytes.
pub async fn store_archive(
    source: &dyn RepoSource,
    store: &dyn BlobStore,
    layout: &RepoLayout,
    commit: &str,
) -> Result<u64> {
    let archive = source
        .fetch_archive(&layout.owner, &layout.repo, commit)
        .await
        .with_context(|| format!("Failed to fetch archive of {}", commit))?;
    let size = archive.len() as u64;
    store
        .put(&layout.archive(commit), archive, GZIP)
        .await
        .context("Failed to store archive")?;
    info!(owner = %layout.owner, repo = %layout.repo, commit, bytes = size, "archive stored");
    Ok(size)
}

/// Load a previously written manifest.
pub async fn load_manifest(
    store: &dyn BlobStore,
    layout: &RepoLayout,
    commit: &str,
) -> Result<Option<Manifest>> {
    blob_store::get_json(store, &layout.manifest(commit)).await
}
