//! Artifact key layout.
//!
//! All keys for one repository live under
//! `tenants/{tenant}/repos/{owner}/{repo}/`, so pipelines for different
//! repositories or tenants never write to the same key.

/// Key builder for one (tenant, owner, repo) namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoLayout {
    pub tenant: String,
    pub owner: String,
    pub repo: String,
}

impl RepoLayout {
    pub fn new(tenant: &str, owner: &str, repo: &str) -> Self {
        Self {
            tenant: tenant.to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
        }
    }

    pub fn prefix(&self) -> String {
        format!("tenants/{}/repos/{}/{}/", self.tenant, self.owner, self.repo)
    }

    /// Namespaced key for a content-addressed blob key (`blobs/aa/bb/<sha>`).
    pub fn blob(&self, blob_key: &str) -> String {
        format!("{}{}", self.prefix(), blob_key)
    }

    fn commit_key(&self, commit: &str, rest: &str) -> String {
        format!("{}commits/{}/{}", self.prefix(), commit, rest)
    }

    pub fn manifest(&self, commit: &str) -> String {
        self.commit_key(commit, "manifest.json")
    }

    pub fn selection(&self, commit: &str) -> String {
        self.commit_key(commit, "selection.json")
    }

    /// Optional gzipped tarball of the whole commit.
    pub fn archive(&self, commit: &str) -> String {
        self.commit_key(commit, "repo.tar.gz")
    }

    /// Mirror of the most recently ingested manifest.
    pub fn latest_manifest(&self) -> String {
        self.commit_key("latest", "manifest.json")
    }

    pub fn chunk_index(&self, commit: &str) -> String {
        self.commit_key(commit, "parse/chunks.index.json")
    }

    pub fn chunk_file(&self, commit: &str, file_id: &str) -> String {
        self.commit_key(commit, &format!("parse/chunks/{}.jsonl", file_id))
    }

    pub fn embeddings_dir(&self, commit: &str, provider: &str) -> String {
        self.commit_key(commit, &format!("parse/embeddings/{}/", provider))
    }

    pub fn embeddings_part(&self, commit: &str, provider: &str, part: usize) -> String {
        format!(
            "{}vectors_part-{:05}.jsonl",
            self.embeddings_dir(commit, provider),
            part
        )
    }

    pub fn embeddings_index(&self, commit: &str) -> String {
        self.commit_key(commit, "parse/embeddings.index.json")
    }

    pub fn status(&self, commit: &str) -> String {
        self.commit_key(commit, "parse/status.json")
    }

    pub fn latest_ref(&self) -> String {
        format!("{}refs/latest.json", self.prefix())
    }

    pub fn branch_ref(&self, branch: &str) -> String {
        format!("{}refs/branches/{}.json", self.prefix(), sanitize_branch(branch))
    }
}

/// Strip a leading `refs/heads/` so `refs/heads/main` and `main` share a pointer.
pub fn sanitize_branch(branch: &str) -> &str {
    branch.strip_prefix("refs/heads/").unwrap_or(branch)
}

/// A full 40-character hexadecimal commit SHA.
pub fn is_full_sha(reference: &str) -> bool {
    reference.len() == 40 && reference.bytes().all(|b| b.is_ascii_hexdigit())
}
