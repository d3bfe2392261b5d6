//! DeZero backing store.
//!
//! Abstracts the flash file store the payload registry reads and writes
//! through. Paths are relative and `/`-separated; every implementation
//! confines them to its own root.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

/// Store error types.
pub mod error;
/// Host-directory backed store.
pub mod host;
/// RAM-backed store.
pub mod memory;
/// Path normalization and sandboxing utilities.
pub mod path;

pub use error::{StoreError, StoreResult};
pub use host::HostStore;
pub use memory::MemoryStore;

use async_trait::async_trait;

/// Directory entry returned by [`BackingStore::list_directory`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StoreDirEntry {
    /// Name of the entry.
    pub name: String,
    /// True if the entry is a directory.
    pub is_dir: bool,
}

/// Capacity report for a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StoreSpace {
    /// Total capacity in bytes.
    pub total_bytes: u64,
    /// Bytes currently occupied by file contents.
    pub used_bytes: u64,
}

impl StoreSpace {
    /// Bytes still available for writes.
    #[must_use]
    pub fn free_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.used_bytes)
    }
}

/// The persistent file store collaborator.
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Check whether a file or directory exists.
    async fn exists(&self, path: &str) -> StoreResult<bool>;

    /// Read a whole file.
    async fn read(&self, path: &str) -> StoreResult<Vec<u8>>;

    /// Create or truncate a file with the given contents.
    ///
    /// The parent directory must already exist.
    async fn write(&self, path: &str, data: &[u8]) -> StoreResult<()>;

    /// Remove a single file.
    async fn delete(&self, path: &str) -> StoreResult<()>;

    /// List the entries of a directory.
    async fn list_directory(&self, path: &str) -> StoreResult<Vec<StoreDirEntry>>;

    /// Create a directory and any missing parents. Succeeds if it already exists.
    async fn create_directory(&self, path: &str) -> StoreResult<()>;

    /// Remove a directory together with everything below it.
    async fn delete_directory(&self, path: &str) -> StoreResult<()>;

    /// Report total and used space.
    async fn space(&self) -> StoreResult<StoreSpace>;
}
