//! Admission checks run before a payload is executed.
//!
//! Two independent gates: [`ResourcePolicy::check_requirements`] compares the
//! manifest's memory and storage needs against what is free right now, and
//! [`ResourcePolicy::check_permissions`] asks the configured
//! [`PermissionPolicy`] whether the requested capabilities are granted.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dezero_store::BackingStore;
use tracing::{debug, warn};

use crate::error::{PayloadError, PayloadResult};
use crate::manifest::PayloadManifest;
use crate::permission::PermissionSet;

/// Reports free heap memory on the device.
pub trait MemoryProbe: Send + Sync {
    /// Bytes currently free.
    fn free_bytes(&self) -> u64;
}

/// A probe that always reports the same amount of free memory.
///
/// Stands in for the heap allocator on hosts without one to ask.
#[derive(Debug, Clone, Copy)]
pub struct FixedMemory(pub u64);

impl MemoryProbe for FixedMemory {
    fn free_bytes(&self) -> u64 {
        self.0
    }
}

/// Decides which requested permissions a payload may use.
pub trait PermissionPolicy: Send + Sync {
    /// The subset of `requested` that is refused for `payload_id`.
    fn denied(&self, payload_id: &str, requested: PermissionSet) -> PermissionSet;
}

/// Grants every permission (for development and testing).
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllPolicy;

impl PermissionPolicy for AllowAllPolicy {
    fn denied(&self, _payload_id: &str, _requested: PermissionSet) -> PermissionSet {
        PermissionSet::EMPTY
    }
}

/// Refuses every permission (for testing).
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAllPolicy;

impl PermissionPolicy for DenyAllPolicy {
    fn denied(&self, _payload_id: &str, requested: PermissionSet) -> PermissionSet {
        requested
    }
}

/// Denies anything not explicitly granted.
///
/// A global grant set applies to every payload; per-payload grants extend it.
#[derive(Debug, Clone, Default)]
pub struct GrantListPolicy {
    global: PermissionSet,
    per_payload: HashMap<String, PermissionSet>,
}

impl GrantListPolicy {
    /// Policy granting `global` to every payload.
    #[must_use]
    pub fn new(global: PermissionSet) -> Self {
        Self {
            global,
            per_payload: HashMap::new(),
        }
    }

    /// Additionally grant `permissions` to one payload.
    #[must_use]
    pub fn with_grant(mut self, payload_id: impl Into<String>, permissions: PermissionSet) -> Self {
        let entry = self.per_payload.entry(payload_id.into()).or_default();
        *entry = entry.union(permissions);
        self
    }

    /// The full grant set for one payload.
    #[must_use]
    pub fn granted(&self, payload_id: &str) -> PermissionSet {
        self.per_payload
            .get(payload_id)
            .map_or(self.global, |extra| self.global.union(*extra))
    }
}

impl PermissionPolicy for GrantListPolicy {
    fn denied(&self, payload_id: &str, requested: PermissionSet) -> PermissionSet {
        requested.difference(self.granted(payload_id))
    }
}

/// Admission gate combining resource and permission checks.
#[derive(Clone)]
pub struct ResourcePolicy {
    store: Arc<dyn BackingStore>,
    memory: Arc<dyn MemoryProbe>,
    permissions: Arc<dyn PermissionPolicy>,
}

impl ResourcePolicy {
    /// Create a policy over the given collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn BackingStore>,
        memory: Arc<dyn MemoryProbe>,
        permissions: Arc<dyn PermissionPolicy>,
    ) -> Self {
        Self {
            store,
            memory,
            permissions,
        }
    }

    /// Check that the manifest's memory and storage needs fit in what is free.
    ///
    /// Equality passes. The check reads current free space and reserves
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::InsufficientMemory`],
    /// [`PayloadError::InsufficientStorage`], or a storage error if free
    /// space cannot be determined.
    pub async fn check_requirements(&self, manifest: &PayloadManifest) -> PayloadResult<()> {
        let needed = manifest.memory_limit_bytes();
        let available = self.memory.free_bytes();
        if needed > available {
            warn!(payload_id = %manifest.id, needed, available, "Insufficient memory");
            return Err(PayloadError::InsufficientMemory { needed, available });
        }

        let needed = manifest.storage_bytes();
        let available = self.store.space().await?.free_bytes();
        if needed > available {
            warn!(payload_id = %manifest.id, needed, available, "Insufficient storage");
            return Err(PayloadError::InsufficientStorage { needed, available });
        }
        Ok(())
    }

    /// Check the manifest's requested permissions and return them as granted.
    ///
    /// An empty request always passes.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::PermissionDenied`] naming the refused subset.
    pub fn check_permissions(&self, manifest: &PayloadManifest) -> PayloadResult<PermissionSet> {
        let requested = manifest.permissions;
        if requested.is_empty() {
            return Ok(requested);
        }
        let denied = self.permissions.denied(&manifest.id, requested);
        if !denied.is_empty() {
            warn!(payload_id = %manifest.id, %denied, "Permission denied");
            return Err(PayloadError::PermissionDenied {
                id: manifest.id.clone(),
                denied,
            });
        }
        debug!(payload_id = %manifest.id, granted = %requested, "Permissions granted");
        Ok(requested)
    }
}

impl fmt::Debug for ResourcePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePolicy")
            .field("free_memory", &self.memory.free_bytes())
            .finish_non_exhaustive()
    }
}
