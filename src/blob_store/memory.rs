//! In-memory [`BlobStore`] for tests.
//!
//! Uses a `BTreeMap` behind `std::sync::RwLock` and counts writes so tests
//! can assert write-once behaviour of content-addressed blobs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::BlobStore;

struct StoredObject {
    bytes: Vec<u8>,
    content_type: String,
}

pub struct InMemoryBlobStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
    puts: AtomicUsize,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            puts: AtomicUsize::new(0),
        }
    }

    /// Number of `put` calls served so far.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Keys under `prefix`, in lexicographic order.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.objects
            .read()
            .map(|objects| {
                objects
                    .keys()
                    .filter(|k| k.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects
            .read()
            .ok()
            .and_then(|objects| objects.get(key).map(|o| o.content_type.clone()))
    }

    pub fn remove(&self, key: &str) {
        if let Ok(mut objects) = self.objects.write() {
            objects.remove(key);
        }
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let mut objects = self.objects.write().map_err(|_| anyhow!("store lock poisoned"))?;
        objects.insert(
            key.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let objects = self.objects.read().map_err(|_| anyhow!("store lock poisoned"))?;
        Ok(objects.get(key).map(|o| o.bytes.clone()))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let objects = self.objects.read().map_err(|_| anyhow!("store lock poisoned"))?;
        Ok(objects.contains_key(key))
    }
}
