//! Filesystem-backed object store.
//!
//! Documents and oversized results live under a root directory, keyed
//! by relative path. Keys are sanitized so a crafted key cannot escape
//! the root.

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use tokio::fs;

use crate::error::PipelineError;
use crate::kernel::BaseObjectStore;

pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative.components().any(|c| {
            matches!(
                c,
                std::path::Component::ParentDir | std::path::Component::RootDir
            )
        });
        if key.is_empty() || escapes {
            return Err(PipelineError::Validation(format!("invalid object key {key:?}")).into());
        }

        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BaseObjectStore for FsObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::Resource(format!("mkdir failed: {e}")))?;
        }

        fs::write(&path, bytes)
            .await
            .map_err(|e| PipelineError::Resource(format!("write {key} failed: {e}")).into())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(PipelineError::Resource(format!("object {key} not found")).into())
            }
            Err(e) => Err(PipelineError::Resource(format!("read {key} failed: {e}")).into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PipelineError::Resource(format!("delete {key} failed: {e}")).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_keys_that_escape_the_root() {
        let store = FsObjectStore::new("/tmp/objects");
        assert!(store.resolve("../etc/passwd").is_err());
        assert!(store.resolve("/etc/passwd").is_err());
        assert!(store.resolve("").is_err());
        assert!(store.resolve("batch-1/doc.pdf").is_ok());
    }
}
