//! Payload registry.
//!
//! Keeps the in-memory map of installed payload manifests, keyed by payload
//! id, and mirrors it from the backing store. The store is authoritative:
//! every mutation of the payload directories is followed by a full rescan.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use dezero_store::{BackingStore, StoreError};
use tracing::{debug, info, warn};

use crate::discovery::{self, PayloadLayout, validate_id};
use crate::error::{PayloadError, PayloadResult};
use crate::manifest::{self, ManifestCodec, PayloadManifest};

/// Prefix accepted in front of hex digests in `payload.checksum`.
pub const CHECKSUM_PREFIX: &str = "blake3:";

/// Default per-artifact size limit in bytes.
pub const DEFAULT_MAX_PAYLOAD_SIZE: u64 = 512 * 1024;

/// Default maximum number of installed payloads.
pub const DEFAULT_MAX_PAYLOADS: usize = 32;

/// An uploaded payload: manifest bytes plus the artifact.
#[derive(Debug, Clone, Default)]
pub struct PayloadPackage {
    /// Raw `manifest.json` contents.
    pub manifest: Vec<u8>,
    /// Artifact bytes, may be empty for built-ins.
    pub artifact: Vec<u8>,
}

/// Limits enforced on install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallLimits {
    /// Largest accepted artifact in bytes.
    pub max_payload_size: u64,
    /// Largest number of installed payloads.
    pub max_payloads: usize,
}

impl Default for InstallLimits {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            max_payloads: DEFAULT_MAX_PAYLOADS,
        }
    }
}

/// Hex BLAKE3 digest of an artifact.
#[must_use]
pub fn artifact_digest(artifact: &[u8]) -> String {
    blake3::hash(artifact).to_hex().to_string()
}

/// Check an artifact against the manifest's declared checksum and size.
///
/// An empty checksum or a zero size skips the corresponding check.
///
/// # Errors
///
/// Returns [`PayloadError::ChecksumMismatch`] or [`PayloadError::Validation`].
pub fn verify_artifact(manifest: &PayloadManifest, artifact: &[u8]) -> PayloadResult<()> {
    let declared = manifest.payload.checksum.trim();
    if !declared.is_empty() {
        let expected = declared
            .strip_prefix(CHECKSUM_PREFIX)
            .unwrap_or(declared)
            .to_ascii_lowercase();
        let actual = artifact_digest(artifact);
        if expected != actual {
            return Err(PayloadError::ChecksumMismatch { expected, actual });
        }
    }

    let size = u64::try_from(artifact.len()).unwrap_or(u64::MAX);
    if manifest.payload.size != 0 && manifest.payload.size != size {
        return Err(PayloadError::Validation(format!(
            "artifact is {size} bytes, manifest declares {}",
            manifest.payload.size
        )));
    }
    Ok(())
}

/// The set of installed payload manifests.
pub struct PayloadRegistry {
    store: Arc<dyn BackingStore>,
    layout: PayloadLayout,
    codec: ManifestCodec,
    manifests: BTreeMap<String, PayloadManifest>,
}

impl PayloadRegistry {
    /// Create an empty registry over `store`. Call [`scan`](Self::scan) to populate it.
    #[must_use]
    pub fn new(store: Arc<dyn BackingStore>, layout: PayloadLayout, codec: ManifestCodec) -> Self {
        Self {
            store,
            layout,
            codec,
            manifests: BTreeMap::new(),
        }
    }

    /// The store layout used by this registry.
    #[must_use]
    pub fn layout(&self) -> &PayloadLayout {
        &self.layout
    }

    /// The codec used to parse manifests.
    #[must_use]
    pub fn codec(&self) -> &ManifestCodec {
        &self.codec
    }

    /// Rebuild the registry from the store and return the number of payloads.
    ///
    /// The previous contents are replaced wholesale, so payloads whose
    /// directories vanished are dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload base directory cannot be listed. The
    /// registry keeps its previous contents in that case.
    pub async fn scan(&mut self) -> PayloadResult<usize> {
        let found =
            discovery::discover_manifests(self.store.as_ref(), &self.layout, &self.codec).await?;
        self.manifests = found.into_iter().map(|m| (m.id.clone(), m)).collect();
        info!(count = self.manifests.len(), "Payload registry scanned");
        Ok(self.manifests.len())
    }

    /// Snapshot of every registered manifest.
    #[must_use]
    pub fn available(&self) -> Vec<PayloadManifest> {
        self.manifests.values().cloned().collect()
    }

    /// Look up one manifest.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&PayloadManifest> {
        self.manifests.get(id)
    }

    /// Whether `id` is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.manifests.contains_key(id)
    }

    /// Number of registered payloads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.manifests.len()
    }

    /// Whether no payloads are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }

    /// Whether files for `id` exist in the store, registered or not.
    ///
    /// # Errors
    ///
    /// Returns storage errors from the existence check.
    pub async fn has_files(&self, id: &str) -> PayloadResult<bool> {
        Ok(self.store.exists(&self.layout.payload_dir(id)).await?)
    }

    /// Verify a package without touching the store.
    ///
    /// # Errors
    ///
    /// Returns the first failed pre-check: id syntax, artifact size limit,
    /// manifest parse/validate, id match, checksum and declared size, and
    /// registry capacity (reinstalls do not count against it).
    pub fn verify_package(
        &self,
        id: &str,
        package: &PayloadPackage,
        limits: InstallLimits,
    ) -> PayloadResult<PayloadManifest> {
        validate_id(id)?;

        let size = u64::try_from(package.artifact.len()).unwrap_or(u64::MAX);
        if size > limits.max_payload_size {
            return Err(PayloadError::PayloadTooLarge {
                size,
                max: limits.max_payload_size,
            });
        }

        let manifest = self.codec.parse(&package.manifest)?;
        manifest::check(&manifest)?;
        if manifest.id != id {
            return Err(PayloadError::IdMismatch {
                install: id.to_string(),
                manifest: manifest.id,
            });
        }
        verify_artifact(&manifest, &package.artifact)?;

        if !self.contains(id) && self.len() >= limits.max_payloads {
            return Err(PayloadError::RegistryFull {
                max: limits.max_payloads,
            });
        }
        Ok(manifest)
    }

    /// Verify a package, write it to the store and rescan.
    ///
    /// A failed write puts the store back as it was: a fresh install has its
    /// directory removed, a reinstall has the previous files written back.
    /// The registry is rescanned either way so it matches the store.
    ///
    /// # Errors
    ///
    /// Returns verification errors from [`verify_package`](Self::verify_package)
    /// or the storage error that aborted the write.
    pub async fn install(
        &mut self,
        id: &str,
        package: &PayloadPackage,
        limits: InstallLimits,
    ) -> PayloadResult<PayloadManifest> {
        let manifest = self.verify_package(id, package, limits)?;
        let previous = self.snapshot_files(id).await?;

        if let Err(e) = self.write_files(id, package).await {
            warn!(payload_id = %id, error = %e, "Install failed, rolling back");
            self.roll_back(id, previous).await;
            if let Err(rescan) = self.scan().await {
                warn!(payload_id = %id, error = %rescan, "Rescan after rollback failed");
            }
            return Err(e);
        }

        self.scan().await?;
        info!(payload_id = %id, version = %manifest.version, "Installed payload");
        Ok(manifest)
    }

    /// Files of an existing install, or `None` for a fresh id.
    async fn snapshot_files(&self, id: &str) -> PayloadResult<Option<PayloadPackage>> {
        if !self.has_files(id).await? {
            return Ok(None);
        }
        Ok(Some(PayloadPackage {
            manifest: read_or_empty(&*self.store, &self.layout.manifest_path(id)).await?,
            artifact: read_or_empty(&*self.store, &self.layout.artifact_path(id)).await?,
        }))
    }

    async fn roll_back(&self, id: &str, previous: Option<PayloadPackage>) {
        let Some(previous) = previous else {
            if let Err(cleanup) = self.store.delete_directory(&self.layout.payload_dir(id)).await
                && !matches!(cleanup, StoreError::NotFound(_))
            {
                warn!(payload_id = %id, error = %cleanup, "Failed to remove partial install");
            }
            return;
        };
        let files = [
            (self.layout.manifest_path(id), previous.manifest),
            (self.layout.artifact_path(id), previous.artifact),
        ];
        for (path, data) in files {
            if let Err(restore) = self.store.write(&path, &data).await {
                warn!(
                    payload_id = %id,
                    path = %path,
                    error = %restore,
                    "Failed to restore previous file"
                );
            }
        }
    }

    /// Delete the files of `id` and drop it from the registry.
    ///
    /// A directory that is already gone counts as deleted.
    ///
    /// # Errors
    ///
    /// Returns the storage error if the directory cannot be removed; the
    /// registry entry is kept in that case.
    pub async fn remove(&mut self, id: &str) -> PayloadResult<()> {
        match self.store.delete_directory(&self.layout.payload_dir(id)).await {
            Ok(()) => {},
            Err(StoreError::NotFound(_)) => {
                debug!(payload_id = %id, "Payload directory already absent");
            },
            Err(e) => return Err(e.into()),
        }
        self.manifests.remove(id);
        info!(payload_id = %id, "Removed payload");
        Ok(())
    }
}

async fn read_or_empty(store: &dyn BackingStore, path: &str) -> PayloadResult<Vec<u8>> {
    match store.read(path).await {
        Ok(data) => Ok(data),
        Err(StoreError::NotFound(_)) => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

impl fmt::Debug for PayloadRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadRegistry")
            .field("layout", &self.layout)
            .field("codec", &self.codec)
            .field("payloads", &self.manifests.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
