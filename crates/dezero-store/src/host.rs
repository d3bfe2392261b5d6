use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::path::resolve_path;
use crate::{BackingStore, StoreDirEntry, StoreError, StoreResult, StoreSpace};

/// A [`BackingStore`] rooted at a directory on the host filesystem.
///
/// The directory stands in for the device's flash partition; `capacity_bytes`
/// is the partition size reported through [`BackingStore::space`] and
/// enforced on writes.
#[derive(Debug, Clone)]
pub struct HostStore {
    root: PathBuf,
    capacity_bytes: u64,
}

fn map_io(path: &str, e: std::io::Error) -> StoreError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StoreError::NotFound(path.to_string())
    } else {
        StoreError::Io(e)
    }
}

impl HostStore {
    /// Open a store at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the root directory cannot be created.
    pub async fn open(root: impl Into<PathBuf>, capacity_bytes: u64) -> StoreResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        debug!(root = %root.display(), capacity_bytes, "Opened host store");
        Ok(Self {
            root,
            capacity_bytes,
        })
    }

    /// Physical root directory of this store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn resolve(&self, path: &str) -> StoreResult<PathBuf> {
        let resolved = resolve_path(&self.root, path)?;

        // Symlinks could point anywhere on the host; refuse any in the chain.
        let mut current = resolved.as_path();
        while current != self.root {
            if let Ok(meta) = tokio::fs::symlink_metadata(current).await
                && meta.is_symlink()
            {
                return Err(StoreError::SandboxViolation(format!(
                    "symlinks are not allowed in the store: {path}"
                )));
            }
            match current.parent() {
                Some(parent) => current = parent,
                None => break,
            }
        }
        Ok(resolved)
    }

    async fn used_bytes(&self) -> StoreResult<u64> {
        let root = self.root.clone();
        let used = tokio::task::spawn_blocking(move || {
            walkdir::WalkDir::new(root)
                .follow_links(false)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|entry| entry.file_type().is_file())
                .filter_map(|entry| entry.metadata().ok())
                .fold(0u64, |acc, meta| acc.saturating_add(meta.len()))
        })
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))?;
        Ok(used)
    }
}

#[async_trait]
impl BackingStore for HostStore {
    async fn exists(&self, path: &str) -> StoreResult<bool> {
        let target = self.resolve(path).await?;
        Ok(tokio::fs::try_exists(&target).await.unwrap_or(false))
    }

    async fn read(&self, path: &str) -> StoreResult<Vec<u8>> {
        let target = self.resolve(path).await?;
        let meta = tokio::fs::metadata(&target)
            .await
            .map_err(|e| map_io(path, e))?;
        if !meta.is_file() {
            return Err(StoreError::WrongKind(path.to_string()));
        }
        tokio::fs::read(&target).await.map_err(|e| map_io(path, e))
    }

    async fn write(&self, path: &str, data: &[u8]) -> StoreResult<()> {
        let target = self.resolve(path).await?;
        if target == self.root {
            return Err(StoreError::WrongKind(path.to_string()));
        }

        let existing = match tokio::fs::metadata(&target).await {
            Ok(meta) if meta.is_dir() => return Err(StoreError::WrongKind(path.to_string())),
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };
        let used = self.used_bytes().await?.saturating_sub(existing);
        let available = self.capacity_bytes.saturating_sub(used);
        let needed = u64::try_from(data.len()).unwrap_or(u64::MAX);
        if needed > available {
            return Err(StoreError::NoSpace { needed, available });
        }

        tokio::fs::write(&target, data)
            .await
            .map_err(|e| map_io(path, e))
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        let target = self.resolve(path).await?;
        let meta = tokio::fs::symlink_metadata(&target)
            .await
            .map_err(|e| map_io(path, e))?;
        if meta.is_dir() {
            return Err(StoreError::WrongKind(path.to_string()));
        }
        tokio::fs::remove_file(&target)
            .await
            .map_err(|e| map_io(path, e))
    }

    async fn list_directory(&self, path: &str) -> StoreResult<Vec<StoreDirEntry>> {
        let target = self.resolve(path).await?;
        let mut entries = Vec::new();
        let mut read_dir = tokio::fs::read_dir(&target)
            .await
            .map_err(|e| map_io(path, e))?;

        while let Some(entry) = read_dir.next_entry().await? {
            let is_dir = match tokio::fs::symlink_metadata(entry.path()).await {
                Ok(meta) => meta.is_dir(),
                Err(_) => false,
            };
            entries.push(StoreDirEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                is_dir,
            });
        }
        Ok(entries)
    }

    async fn create_directory(&self, path: &str) -> StoreResult<()> {
        let target = self.resolve(path).await?;
        tokio::fs::create_dir_all(&target)
            .await
            .map_err(|e| map_io(path, e))
    }

    async fn delete_directory(&self, path: &str) -> StoreResult<()> {
        let target = self.resolve(path).await?;
        if target == self.root {
            return Err(StoreError::SandboxViolation(
                "cannot remove the store root".into(),
            ));
        }
        let meta = tokio::fs::symlink_metadata(&target)
            .await
            .map_err(|e| map_io(path, e))?;
        if !meta.is_dir() {
            return Err(StoreError::WrongKind(path.to_string()));
        }
        tokio::fs::remove_dir_all(&target)
            .await
            .map_err(|e| map_io(path, e))
    }

    async fn space(&self) -> StoreResult<StoreSpace> {
        Ok(StoreSpace {
            total_bytes: self.capacity_bytes,
            used_bytes: self.used_bytes().await?,
        })
    }
}
