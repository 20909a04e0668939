//! Blob store capability.
//!
//! The pipeline treats the object store as an idempotent key-value store:
//! content-addressed blobs are write-once, and every other artifact lives
//! under a per-commit key so concurrent pipelines never share a key.
//!
//! Backends:
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`memory::InMemoryBlobStore`] | tests |
//! | [`fs::FsBlobStore`] | local directory (default) |
//! | [`s3::S3BlobStore`] | S3 and S3-compatible services |

pub mod fs;
pub mod memory;
pub mod s3;

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::StoreConfig;
use crate::error::PipelineError;

pub const JSON: &str = "application/json";
pub const NDJSON: &str = "application/x-ndjson";
pub const TEXT_UTF8: &str = "text/plain; charset=utf-8";
pub const GZIP: &str = "application/gzip";

/// Key-value object storage used for blobs and pipeline artifacts.
///
/// `get` distinguishes a genuinely absent key (`Ok(None)`) from a read
/// failure (`Err`), so callers can skip the former and surface the latter.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn exists(&self, key: &str) -> Result<bool>;
}

pub async fn put_json<T: Serialize + ?Sized>(
    store: &dyn BlobStore,
    key: &str,
    value: &T,
) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    store.put(key, bytes, JSON).await
}

pub async fn get_json<T: DeserializeOwned>(store: &dyn BlobStore, key: &str) -> Result<Option<T>> {
    match store.get(key).await? {
        Some(bytes) => {
            let value = serde_json::from_slice(&bytes)
                .with_context(|| format!("Invalid JSON at '{}'", key))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Write a line-delimited JSON artifact, one record per line.
pub async fn put_jsonl<T: Serialize>(store: &dyn BlobStore, key: &str, records: &[T]) -> Result<()> {
    let mut body = String::new();
    for record in records {
        body.push_str(&serde_json::to_string(record)?);
        body.push('\n');
    }
    store.put(key, body.into_bytes(), NDJSON).await
}

/// Read a line-delimited JSON artifact. Blank lines are ignored.
pub async fn get_jsonl<T: DeserializeOwned>(
    store: &dyn BlobStore,
    key: &str,
) -> Result<Option<Vec<T>>> {
    let Some(bytes) = store.get(key).await? else {
        return Ok(None);
    };
    let text = String::from_utf8(bytes).with_context(|| format!("'{}' is not UTF-8", key))?;
    let mut records = Vec::new();
    for (n, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(line)
            .with_context(|| format!("Invalid JSON on line {} of '{}'", n + 1, key))?;
        records.push(record);
    }
    Ok(Some(records))
}

/// Open the configured backend.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn BlobStore>> {
    match config.backend.as_str() {
        "filesystem" => Ok(Arc::new(fs::FsBlobStore::new(&config.root))),
        "s3" => Ok(Arc::new(s3::S3BlobStore::from_config(config)?)),
        other => Err(PipelineError::config(format!("Unknown store backend: '{}'", other)).into()),
    }
}
