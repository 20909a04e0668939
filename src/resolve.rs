//! Commit resolution from stored ref pointers.
//!
//! A branch name reads `refs/branches/{branch}.json`; no branch reads
//! `refs/latest.json`. A missing pointer is an error: there is no fallback
//! to some other commit.

use anyhow::Result;

use crate::blob_store::{self, BlobStore};
use crate::error::PipelineError;
use crate::layout::RepoLayout;
use crate::models::RefPointer;

pub async fn load_ref(
    store: &dyn BlobStore,
    layout: &RepoLayout,
    branch: Option<&str>,
) -> Result<RefPointer> {
    let key = match branch {
        Some(b) => layout.branch_ref(b),
        None => layout.latest_ref(),
    };
    blob_store::get_json::<RefPointer>(store, &key)
        .await?
        .ok_or_else(|| PipelineError::RefNotFound { key }.into())
}

/// Commit SHA the branch pointer (or the latest pointer) names.
pub async fn resolve_commit(
    store: &dyn BlobStore,
    layout: &RepoLayout,
    branch: Option<&str>,
) -> Result<String> {
    Ok(load_ref(store, layout, branch).await?.commit)
}
