//! Core data models used throughout the pipeline.
//!
//! These types are the persisted artifacts (manifest, chunk index, chunk
//! text records, embedding partitions, ref pointers, status) and the
//! ephemeral query-time results (hits, snippets, citations). Persisted
//! types serialize as camelCase JSON.

use serde::{Deserialize, Serialize};

/// Include/exclude/size-cap configuration used for one ingest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterConfig {
    /// Glob patterns a path must match (any). Empty means "match everything".
    pub include: Vec<String>,
    /// Glob patterns that reject a path (any).
    pub exclude: Vec<String>,
    /// Per-file size cap in kilobytes, measured on the source tree entry.
    #[serde(rename = "maxFileKB")]
    pub max_file_kb: u64,
}

/// Aggregate counters for one ingest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestStats {
    /// Blob entries in the commit tree.
    pub files_seen: u64,
    /// Text files selected and (in write mode) stored.
    pub files_kept: u64,
    /// `files_seen - files_kept`.
    pub files_skipped: u64,
    /// Sum of normalized sizes of kept files.
    pub bytes_kept: u64,
}

/// One selected text file of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    /// Repository-relative path.
    pub path: String,
    /// Blob identifier assigned by the source control system.
    pub sha: String,
    /// Size in bytes after line-ending normalization.
    pub size: u64,
    /// Detected language tag (see [`crate::lang`]).
    pub lang: String,
    pub mime: String,
    pub binary: bool,
    /// Number of lines in the stored text.
    pub lines: u64,
    /// Content-addressed key (`blobs/aa/bb/<sha256>`); absent on dry runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored_at: Option<String>,
}

/// Why a tree entry that passed the path filters was not kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Binary,
    MaxSize,
}

/// A tree entry that matched the path filters but was not stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedFile {
    pub path: String,
    pub sha: String,
    pub size: u64,
    pub reason: SkipReason,
}

/// Per-commit record of which files were selected for ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub owner: String,
    pub repo: String,
    pub commit: String,
    /// RFC 3339 timestamp.
    pub ingested_at: String,
    pub config: FilterConfig,
    pub stats: ManifestStats,
    pub files: Vec<FileEntry>,
    #[serde(default)]
    pub skipped: Vec<SkippedFile>,
}

/// Metadata of one chunk. The content hash is always present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRecord {
    /// `{12-hex path hash}-{4-digit ordinal}`.
    pub id: String,
    pub file_path: String,
    /// Blob SHA of the source file.
    pub file_sha: String,
    pub lang: String,
    /// 1-based, inclusive.
    pub start_line: usize,
    /// 1-based, inclusive.
    pub end_line: usize,
    pub byte_start: usize,
    pub byte_end: usize,
    pub token_count: usize,
    /// `sha256:<hex>` of the chunk text.
    pub hash: String,
}

/// A chunk record together with its text, as stored in the per-file JSONL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkText {
    #[serde(flatten)]
    pub record: ChunkRecord,
    pub text: String,
}

/// Metadata-only listing of every chunk produced for a commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkIndex {
    pub commit: String,
    pub chunk_model: String,
    pub generated_at: String,
    pub chunks: Vec<ChunkRecord>,
}

/// One line of an embedding partition file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorLine {
    pub id: String,
    pub dim: usize,
    /// Little-endian packed `f32`s, base64 encoded.
    pub vector_b64: String,
}

/// A vector produced for a chunk, forwarded to the retrieval index.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRow {
    pub chunk_id: String,
    pub vector: Vec<f32>,
}

/// Durable record that embedding finished for a commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingsIndex {
    pub commit: String,
    pub provider: String,
    pub dim: usize,
    pub total_vectors: usize,
    pub parts: usize,
    pub generated_at: String,
    pub layout_version: u32,
}

/// Mutable pointer from `latest` or a branch name to a commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefPointer {
    pub commit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub updated_at: String,
}

/// Last completed stage of a commit's pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitStage {
    Ingested,
    Parsed,
    Embedded,
}

impl std::fmt::Display for CommitStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CommitStage::Ingested => "ingested",
            CommitStage::Parsed => "parsed",
            CommitStage::Embedded => "embedded",
        };
        f.write_str(s)
    }
}

/// Contents of `commits/{sha}/parse/status.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitStatus {
    pub stage: CommitStage,
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_parsed: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunks: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_vectors: Option<usize>,
}

/// A retrieval result. Lower distance is closer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub id: String,
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub lang: String,
    pub distance: f64,
}

/// A hit enriched with its chunk text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snippet {
    pub id: String,
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
}

/// A snippet confirmed to be referenced by a generated answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub id: String,
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
}

impl From<&Snippet> for Citation {
    fn from(s: &Snippet) -> Self {
        Self {
            id: s.id.clone(),
            file_path: s.file_path.clone(),
            start_line: s.start_line,
            end_line: s.end_line,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_text_flattens_record() {
        let ct = ChunkText {
            record: ChunkRecord {
                id: "aabbccddeeff-0000".into(),
                file_path: "src/lib.rs".into(),
                file_sha: "deadbeef".into(),
                lang: "rust".into(),
                start_line: 1,
                end_line: 3,
                byte_start: 0,
                byte_end: 20,
                token_count: 5,
                hash: "sha256:00".into(),
            },
            text: "fn main() {}".into(),
        };
        let json = serde_json::to_value(&ct).unwrap();
        assert_eq!(json["id"], "aabbccddeeff-0000");
        assert_eq!(json["filePath"], "src/lib.rs");
        assert_eq!(json["startLine"], 1);
        assert_eq!(json["text"], "fn main() {}");

        let back: ChunkText = serde_json::from_value(json).unwrap();
        assert_eq!(back, ct);
    }

    #[test]
    fn test_filter_config_uses_kb_field_name() {
        let cfg = FilterConfig {
            include: vec![],
            exclude: vec![],
            max_file_kb: 800,
        };
        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(json["maxFileKB"], 800);
    }

    #[test]
    fn test_stage_ordering() {
        assert!(CommitStage::Ingested < CommitStage::Parsed);
        assert!(CommitStage::Parsed < CommitStage::Embedded);
        assert_eq!(CommitStage::Embedded.to_string(), "embedded");
    }
}
