use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::path::normalize;
use crate::{BackingStore, StoreDirEntry, StoreError, StoreResult, StoreSpace};

#[derive(Debug, Default)]
struct Tree {
    dirs: BTreeSet<Vec<String>>,
    files: BTreeMap<Vec<String>, Vec<u8>>,
}

impl Tree {
    fn used(&self) -> u64 {
        self.files
            .values()
            .fold(0u64, |acc, f| acc.saturating_add(f.len() as u64))
    }

    fn is_dir(&self, parts: &[String]) -> bool {
        parts.is_empty() || self.dirs.contains(parts)
    }
}

/// A RAM-backed [`BackingStore`].
///
/// Used for targets without a mounted partition and as a fast test store.
#[derive(Debug)]
pub struct MemoryStore {
    tree: RwLock<Tree>,
    capacity_bytes: u64,
}

impl MemoryStore {
    /// Create an empty store with the given capacity.
    #[must_use]
    pub fn new(capacity_bytes: u64) -> Self {
        Self {
            tree: RwLock::new(Tree::default()),
            capacity_bytes,
        }
    }
}

#[async_trait]
impl BackingStore for MemoryStore {
    async fn exists(&self, path: &str) -> StoreResult<bool> {
        let parts = normalize(path)?;
        let tree = self.tree.read().await;
        Ok(tree.is_dir(&parts) || tree.files.contains_key(&parts))
    }

    async fn read(&self, path: &str) -> StoreResult<Vec<u8>> {
        let parts = normalize(path)?;
        let tree = self.tree.read().await;
        if tree.is_dir(&parts) {
            return Err(StoreError::WrongKind(path.to_string()));
        }
        tree.files
            .get(&parts)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    async fn write(&self, path: &str, data: &[u8]) -> StoreResult<()> {
        let parts = normalize(path)?;
        let mut tree = self.tree.write().await;
        if tree.is_dir(&parts) {
            return Err(StoreError::WrongKind(path.to_string()));
        }
        let parent = &parts[..parts.len().saturating_sub(1)];
        if !tree.is_dir(parent) {
            return Err(StoreError::NotFound(parent.join("/")));
        }

        let existing = tree.files.get(&parts).map_or(0, |f| f.len() as u64);
        let available = self
            .capacity_bytes
            .saturating_sub(tree.used().saturating_sub(existing));
        let needed = data.len() as u64;
        if needed > available {
            return Err(StoreError::NoSpace { needed, available });
        }
        tree.files.insert(parts, data.to_vec());
        Ok(())
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        let parts = normalize(path)?;
        let mut tree = self.tree.write().await;
        if tree.is_dir(&parts) {
            return Err(StoreError::WrongKind(path.to_string()));
        }
        tree.files
            .remove(&parts)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    async fn list_directory(&self, path: &str) -> StoreResult<Vec<StoreDirEntry>> {
        let parts = normalize(path)?;
        let tree = self.tree.read().await;
        if !tree.is_dir(&parts) {
            return Err(StoreError::NotFound(path.to_string()));
        }
        let depth = parts.len().saturating_add(1);
        let child_of = |p: &Vec<String>| p.len() == depth && p.starts_with(&parts);

        let dirs = tree.dirs.iter().filter(|&p| child_of(p)).map(|p| StoreDirEntry {
            name: p.last().cloned().unwrap_or_default(),
            is_dir: true,
        });
        let files = tree.files.keys().filter(|&p| child_of(p)).map(|p| StoreDirEntry {
            name: p.last().cloned().unwrap_or_default(),
            is_dir: false,
        });
        Ok(dirs.chain(files).collect())
    }

    async fn create_directory(&self, path: &str) -> StoreResult<()> {
        let parts = normalize(path)?;
        let mut tree = self.tree.write().await;
        for end in 1..=parts.len() {
            let prefix = parts[..end].to_vec();
            if tree.files.contains_key(&prefix) {
                return Err(StoreError::WrongKind(prefix.join("/")));
            }
            tree.dirs.insert(prefix);
        }
        Ok(())
    }

    async fn delete_directory(&self, path: &str) -> StoreResult<()> {
        let parts = normalize(path)?;
        if parts.is_empty() {
            return Err(StoreError::SandboxViolation(
                "cannot remove the store root".into(),
            ));
        }
        let mut tree = self.tree.write().await;
        if !tree.dirs.contains(&parts) {
            return Err(StoreError::NotFound(path.to_string()));
        }
        tree.dirs.retain(|p| !p.starts_with(&parts));
        tree.files.retain(|p, _| !p.starts_with(&parts));
        Ok(())
    }

    async fn space(&self) -> StoreResult<StoreSpace> {
        let tree = self.tree.read().await;
        Ok(StoreSpace {
            total_bytes: self.capacity_bytes,
            used_bytes: tree.used(),
        })
    }
}
