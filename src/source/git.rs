//! Local git clone source.
//!
//! Reads snapshots straight out of the object database of an existing
//! clone with the `git` binary, so a commit can be ingested without a
//! checkout and without network access. `owner` and `repo` only name the
//! artifact namespace; the clone at `path` is always the one read.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

use super::{EntryKind, RepoSource, TreeEntry, TreeListing};
use crate::error::PipelineError;

pub struct LocalGitSource {
    repo_dir: PathBuf,
}

impl LocalGitSource {
    pub fn new(repo_dir: PathBuf) -> Self {
        Self { repo_dir }
    }

    async fn git(&self, args: &[&str]) -> Result<Vec<u8>> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_dir)
            .output()
            .await
            .with_context(|| format!("Failed to execute 'git {}'. Is git installed?", args[0]))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git {} failed: {}", args[0], stderr.trim());
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl RepoSource for LocalGitSource {
    fn name(&self) -> &str {
        "git"
    }

    async fn resolve_commit(&self, owner: &str, repo: &str, reference: &str) -> Result<String> {
        let spec = format!("{}^{{commit}}", reference);
        let out = self
            .git(&["rev-parse", "--verify", "--quiet", &spec])
            .await
            .map_err(|e| PipelineError::CommitResolution {
                owner: owner.to_string(),
                repo: repo.to_string(),
                reference: reference.to_string(),
                reason: e.to_string(),
            })?;
        Ok(String::from_utf8_lossy(&out).trim().to_string())
    }

    async fn list_tree(&self, owner: &str, repo: &str, commit: &str) -> Result<TreeListing> {
        let out = self
            .git(&["ls-tree", "-r", "-l", "-z", "--full-tree", commit])
            .await
            .map_err(|e| PipelineError::TreeFetch {
                owner: owner.to_string(),
                repo: repo.to_string(),
                commit: commit.to_string(),
                reason: e.to_string(),
            })?;
        Ok(TreeListing {
            entries: parse_ls_tree(&out)?,
            truncated: false,
        })
    }

    async fn fetch_blob(&self, _owner: &str, _repo: &str, sha: &str) -> Result<Vec<u8>> {
        self.git(&["cat-file", "blob", sha]).await
    }

    async fn fetch_archive(&self, _owner: &str, _repo: &str, commit: &str) -> Result<Vec<u8>> {
        self.git(&["archive", "--format=tar.gz", commit]).await
    }
}

/// Parse `git ls-tree -r -l -z` output:
/// `<mode> SP <type> SP <object> SP+ <size> TAB <path> NUL`.
pub fn parse_ls_tree(output: &[u8]) -> Result<Vec<TreeEntry>> {
    let mut entries = Vec::new();
    for record in output.split(|&b| b == 0) {
        if record.is_empty() {
            continue;
        }
        let record = String::from_utf8_lossy(record);
        let (meta, path) = record
            .split_once('\t')
            .with_context(|| format!("Malformed ls-tree record: {}", record))?;

        let mut fields = meta.split_whitespace();
        let (Some(_mode), Some(kind), Some(sha), Some(size)) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            bail!("Malformed ls-tree record: {}", record);
        };

        entries.push(TreeEntry {
            path: path.to_string(),
            kind: EntryKind::parse(kind),
            sha: sha.to_string(),
            size: size.parse::<u64>().ok(),
        });
    }
    Ok(entries)
}
