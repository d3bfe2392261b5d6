//! Payload layout in the backing store and manifest discovery.
//!
//! Every installed payload lives in its own directory under the payload
//! base path: `<base>/<id>/manifest.json` and `<base>/<id>/payload`.

use dezero_store::{BackingStore, StoreError, path::join};
use tracing::{debug, info, warn};

use crate::error::{PayloadError, PayloadResult};
use crate::manifest::{self, ManifestCodec, PayloadManifest};

/// Standard manifest file name.
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Standard artifact file name.
pub const ARTIFACT_FILE_NAME: &str = "payload";

/// Default payload base directory, relative to the store root.
pub const DEFAULT_PAYLOAD_DIR: &str = "payloads";

/// Longest accepted payload id.
pub const MAX_ID_LEN: usize = 64;

/// Where payload files live inside the backing store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadLayout {
    base: String,
}

impl Default for PayloadLayout {
    fn default() -> Self {
        Self::new(DEFAULT_PAYLOAD_DIR)
    }
}

impl PayloadLayout {
    /// Layout rooted at `base`.
    #[must_use]
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }

    /// The payload base directory.
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Directory of one payload.
    #[must_use]
    pub fn payload_dir(&self, id: &str) -> String {
        join(&self.base, id)
    }

    /// Manifest path of one payload.
    #[must_use]
    pub fn manifest_path(&self, id: &str) -> String {
        join(&self.payload_dir(id), MANIFEST_FILE_NAME)
    }

    /// Artifact path of one payload.
    #[must_use]
    pub fn artifact_path(&self, id: &str) -> String {
        join(&self.payload_dir(id), ARTIFACT_FILE_NAME)
    }
}

/// Check that `id` can name a payload directory.
///
/// Ids are ASCII letters, digits, `_` and `-`, at most [`MAX_ID_LEN`] long.
///
/// # Errors
///
/// Returns [`PayloadError::InvalidId`] otherwise.
pub fn validate_id(id: &str) -> PayloadResult<()> {
    if id.is_empty() || id.len() > MAX_ID_LEN {
        return Err(PayloadError::InvalidId(id.to_string()));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(PayloadError::InvalidId(id.to_string()));
    }
    Ok(())
}

/// Read, parse and validate the manifest of the payload in directory `dir_name`.
///
/// # Errors
///
/// Returns storage errors from the read, codec errors from parsing,
/// [`PayloadError::Validation`] when the manifest is not runnable and
/// [`PayloadError::IdMismatch`] when the manifest id differs from the
/// directory name.
pub async fn load_manifest(
    store: &dyn BackingStore,
    layout: &PayloadLayout,
    codec: &ManifestCodec,
    dir_name: &str,
) -> PayloadResult<PayloadManifest> {
    let raw = store.read(&layout.manifest_path(dir_name)).await?;
    let manifest = codec.parse(&raw)?;
    manifest::check(&manifest)?;
    if manifest.id != dir_name {
        return Err(PayloadError::IdMismatch {
            install: dir_name.to_string(),
            manifest: manifest.id,
        });
    }
    Ok(manifest)
}

/// Discover every loadable manifest under the payload base directory.
///
/// Subdirectories without a manifest, or with one that fails to parse or
/// validate, are skipped with a warning. A missing base directory yields no
/// manifests.
///
/// # Errors
///
/// Returns an error only if the base directory exists but cannot be listed.
pub async fn discover_manifests(
    store: &dyn BackingStore,
    layout: &PayloadLayout,
    codec: &ManifestCodec,
) -> PayloadResult<Vec<PayloadManifest>> {
    let entries = match store.list_directory(layout.base()).await {
        Ok(entries) => entries,
        Err(StoreError::NotFound(_)) => {
            debug!(base = %layout.base(), "Payload directory does not exist yet");
            return Ok(Vec::new());
        },
        Err(e) => return Err(e.into()),
    };

    let mut manifests = Vec::new();
    for entry in entries.into_iter().filter(|e| e.is_dir) {
        match load_manifest(store, layout, codec, &entry.name).await {
            Ok(manifest) => {
                debug!(payload_id = %manifest.id, "Loaded payload manifest");
                manifests.push(manifest);
            },
            Err(PayloadError::Storage(StoreError::NotFound(_))) => {
                debug!(dir = %entry.name, "Skipping directory without manifest");
            },
            Err(e) => {
                warn!(dir = %entry.name, error = %e, "Failed to load payload manifest");
            },
        }
    }

    info!(count = manifests.len(), base = %layout.base(), "Discovered payload manifests");
    Ok(manifests)
}
