//! Text normalization and the deterministic identities derived from it.
//!
//! Everything that ends up as a key (blob keys, chunk ids, chunk hashes)
//! is computed here so that ingest, parse and retrieval agree on it.

use sha2::{Digest, Sha256};

/// Convert CRLF line endings to LF. Applied to every stored text blob
/// before hashing so storage keys are encoding-stable.
pub fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n")
}

/// Full normalization applied before chunking: CRLF to LF, then trailing
/// spaces and tabs removed from every line. Idempotent.
pub fn normalize_text(text: &str) -> String {
    let lf = normalize_line_endings(text);
    lf.split('\n')
        .map(|line| line.trim_end_matches([' ', '\t']))
        .collect::<Vec<_>>()
        .join("\n")
}

/// NUL anywhere in the content marks it as binary.
pub fn is_binary(bytes: &[u8]) -> bool {
    bytes.contains(&0)
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Content-addressed key for already-normalized bytes:
/// `blobs/{h[0:2]}/{h[2:4]}/{h}`.
pub fn blob_key(normalized: &[u8]) -> String {
    let h = sha256_hex(normalized);
    format!("blobs/{}/{}/{}", &h[0..2], &h[2..4], h)
}

/// First 12 hex characters of the SHA-256 of `input`. Identifies a file
/// by its repository path; also names the per-file chunk text artifact.
pub fn short_hash(input: &str) -> String {
    let mut h = sha256_hex(input.as_bytes());
    h.truncate(12);
    h
}

/// `{short_hash(path)}-{ordinal:04}`.
pub fn chunk_id(path: &str, ordinal: usize) -> String {
    format!("{}-{:04}", short_hash(path), ordinal)
}

/// The file-identifying prefix of a chunk id (everything before the first `-`).
pub fn file_id_of(chunk_id: &str) -> &str {
    chunk_id.split_once('-').map(|(f, _)| f).unwrap_or(chunk_id)
}

/// `sha256:`-prefixed hash of a chunk's own text.
pub fn content_hash(text: &str) -> String {
    format!("sha256:{}", sha256_hex(text.as_bytes()))
}

/// Approximate token count: one token per four bytes, at least one.
pub fn approx_tokens(text: &str) -> usize {
    text.len().div_ceil(4).max(1)
}

/// Number of lines; a trailing newline does not start a new line.
pub fn count_lines(text: &str) -> usize {
    text.lines().count()
}
