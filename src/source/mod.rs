//! Repository source capability.
//!
//! A [`RepoSource`] resolves references to commits, lists the file tree of
//! a commit and fetches raw blob content, and optionally a gzipped tarball
//! of the whole commit. The ingestor only depends on this
//! trait; backends are:
//!
//! - [`github::GitHubSource`]: the GitHub REST API.
//! - [`git::LocalGitSource`]: a local clone, via the `git` binary.

pub mod git;
pub mod github;

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::SourceConfig;
use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Blob,
    Tree,
    /// A submodule pointer.
    Commit,
    Other,
}

impl EntryKind {
    pub fn parse(s: &str) -> Self {
        match s {
            "blob" => EntryKind::Blob,
            "tree" => EntryKind::Tree,
            "commit" => EntryKind::Commit,
            _ => EntryKind::Other,
        }
    }
}

/// One entry of a recursive tree listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub path: String,
    pub kind: EntryKind,
    /// Object id assigned by the source control system.
    pub sha: String,
    /// Raw size in bytes (blobs only).
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct TreeListing {
    pub entries: Vec<TreeEntry>,
    /// The upstream listing was cut short; entries are incomplete.
    pub truncated: bool,
}

#[async_trait]
pub trait RepoSource: Send + Sync {
    /// Short label used in logs (`github`, `git`, ...).
    fn name(&self) -> &str;

    /// Resolve a branch, tag or short SHA to a full commit SHA.
    async fn resolve_commit(&self, owner: &str, repo: &str, reference: &str) -> Result<String>;

    async fn list_tree(&self, owner: &str, repo: &str, commit: &str) -> Result<TreeListing>;

    async fn fetch_blob(&self, owner: &str, repo: &str, sha: &str) -> Result<Vec<u8>>;

    /// Gzipped tarball of the full tree at `commit`.
    async fn fetch_archive(&self, _owner: &str, _repo: &str, _commit: &str) -> Result<Vec<u8>> {
        bail!("{} source cannot produce archives", self.name())
    }
}

/// Open the configured source backend.
pub fn open_source(config: &SourceConfig) -> Result<Arc<dyn RepoSource>> {
    match config.kind.as_str() {
        "github" => Ok(Arc::new(github::GitHubSource::from_config(config)?)),
        "git" => {
            let path = config
                .path
                .clone()
                .ok_or_else(|| PipelineError::config("source.path must be set when kind is 'git'"))?;
            Ok(Arc::new(git::LocalGitSource::new(path)))
        }
        other => Err(PipelineError::config(format!("Unknown source kind: '{}'", other)).into()),
    }
}
