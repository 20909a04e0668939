//! Typed failure categories that callers need to tell apart.
//!
//! Library functions return [`anyhow::Result`]; the variants here are
//! attached at the boundaries where a caller (the CLI, the pipeline) has to
//! branch on *what kind* of failure happened rather than just report it.
//! Recover them with [`anyhow::Error::downcast_ref`].

/// Failure categories surfaced by the ingestion and query pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Missing credentials or invalid settings. Reported distinctly from
    /// runtime failures.
    #[error("configuration error: {0}")]
    Config(String),

    /// A branch, tag or short SHA could not be resolved to a commit.
    #[error("cannot resolve '{reference}' in {owner}/{repo}: {reason}")]
    CommitResolution {
        owner: String,
        repo: String,
        reference: String,
        reason: String,
    },

    /// The file tree of a resolved commit could not be read.
    #[error("cannot read tree of {owner}/{repo}@{commit}: {reason}")]
    TreeFetch {
        owner: String,
        repo: String,
        commit: String,
        reason: String,
    },

    /// No ref pointer exists for the requested branch / latest commit.
    #[error("no ref pointer at '{key}' (has this repository been ingested?)")]
    RefNotFound { key: String },

    /// A downstream stage ran before its upstream artifact was written.
    #[error("commit {commit} has no {artifact}; run the previous stage first")]
    MissingArtifact { commit: String, artifact: String },

    /// An embedding / generation / source provider rejected a request.
    #[error("{provider} request failed{}: {message}", status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Provider {
        provider: String,
        status: Option<u16>,
        message: String,
    },
}

impl PipelineError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether this error is a configuration problem rather than a runtime one.
    pub fn is_config(err: &anyhow::Error) -> bool {
        matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::Config(_)))
    }
}

/// HTTP 429 and 5xx are worth one more attempt; everything else is final.
pub fn is_retryable(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}
