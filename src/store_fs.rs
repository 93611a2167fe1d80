//! Filesystem-backed [`ObjectStore`]: one file per key under a root
//! directory.
//!
//! Keys map directly to relative paths with a `.json` extension tacked on.
//! Writes go through a temp file in the same directory and a rename, so a
//! crashed write never leaves a half-record behind.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::error::{KnowledgeError, Result};
use crate::store::ObjectStore;

pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> FsStore {
        FsStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.split('/').any(|part| part.is_empty() || part.starts_with('.')) {
            return Err(KnowledgeError::storage(format!("invalid store key '{key}'")));
        }
        Ok(self.root.join(format!("{key}.json")))
    }
}

#[async_trait]
impl ObjectStore for FsStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let path = self.path_for(key)?;
        let parent = path
            .parent()
            .ok_or_else(|| KnowledgeError::storage(format!("invalid store key '{key}'")))?;
        fs::create_dir_all(parent).await?;

        let temp = parent.join(format!(
            ".write-{}.tmp",
            uuid::Uuid::new_v4().simple()
        ));
        fs::write(&temp, &data).await?;
        match fs::rename(&temp, &path).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = fs::remove_file(&temp).await;
                Err(err.into())
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        // walkdir is synchronous; listings are small and infrequent enough
        // that blocking in place is acceptable here.
        let root = self.root.clone();
        let prefix = prefix.to_string();
        let keys = tokio::task::spawn_blocking(move || {
            let mut keys = Vec::new();
            if !root.exists() {
                return keys;
            }
            for entry in walkdir::WalkDir::new(&root)
                .into_iter()
                .filter_map(|entry| entry.ok())
            {
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(relative) = entry.path().strip_prefix(&root) else {
                    continue;
                };
                let Some(relative) = relative.to_str() else {
                    continue;
                };
                let Some(key) = relative.strip_suffix(".json") else {
                    continue;
                };
                if key.starts_with(&prefix) {
                    keys.push(key.to_string());
                }
            }
            keys.sort();
            keys
        })
        .await
        .map_err(|err| KnowledgeError::internal(format!("listing task failed: {err}")))?;
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());

        assert!(store.get("resource/wiki/eng/page").await.unwrap().is_none());
        store
            .put("resource/wiki/eng/page", b"{}".to_vec())
            .await
            .unwrap();
        assert_eq!(
            store.get("resource/wiki/eng/page").await.unwrap(),
            Some(b"{}".to_vec())
        );

        store.delete("resource/wiki/eng/page").await.unwrap();
        assert!(store.get("resource/wiki/eng/page").await.unwrap().is_none());
        // Deleting again is a no-op, not an error.
        store.delete("resource/wiki/eng/page").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        store
            .put("relation/refs/wiki+eng+a/link-aaa", b"link-aaa".to_vec())
            .await
            .unwrap();
        store
            .put("relation/refs/wiki+eng+a/link-bbb", b"link-bbb".to_vec())
            .await
            .unwrap();
        store
            .put("relation/refs/wiki+eng+b/link-ccc", b"link-ccc".to_vec())
            .await
            .unwrap();

        let keys = store.list("relation/refs/wiki+eng+a/").await.unwrap();
        assert_eq!(
            keys,
            vec![
                "relation/refs/wiki+eng+a/link-aaa".to_string(),
                "relation/refs/wiki+eng+a/link-bbb".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_rejects_traversal_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        assert!(store.get("../outside").await.is_err());
        assert!(store.put("a//b", Vec::new()).await.is_err());
    }
}
