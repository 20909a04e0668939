//! Filesystem [`BlobStore`].
//!
//! Keys map to paths under a root directory (`/`-separated key segments
//! become directories). Writes go to a temporary sibling file first and are
//! renamed into place, so a reader never observes a half-written object.

use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use super::BlobStore;

pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let rel = Path::new(key);
        if key.is_empty()
            || rel
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!("Invalid store key: '{}'", key);
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let tmp = path.with_file_name(format!(".{}.tmp-{}", file_name, std::process::id()));

        tokio::fs::write(&tmp, &bytes)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move object into {}", path.display()))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        tokio::fs::try_exists(&path)
            .await
            .with_context(|| format!("Failed to stat {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_creates_nested_dirs() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path());
        store
            .put("blobs/ab/cd/abcd", b"hello".to_vec(), "text/plain")
            .await
            .unwrap();

        assert!(dir.path().join("blobs/ab/cd/abcd").is_file());
        assert!(store.exists("blobs/ab/cd/abcd").await.unwrap());
        assert_eq!(
            store.get("blobs/ab/cd/abcd").await.unwrap(),
            Some(b"hello".to_vec())
        );
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path());
        assert_eq!(store.get("nope.json").await.unwrap(), None);
        assert!(!store.exists("nope.json").await.unwrap());
    }

    #[tokio::test]
    async fn test_overwrite_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path());
        store.put("refs/latest.json", b"1".to_vec(), "").await.unwrap();
        store.put("refs/latest.json", b"2".to_vec(), "").await.unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path().join("refs"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            store.get("refs/latest.json").await.unwrap(),
            Some(b"2".to_vec())
        );
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path());
        assert!(store.get("../etc/passwd").await.is_err());
        assert!(store.put("/abs", vec![], "").await.is_err());
    }
}
