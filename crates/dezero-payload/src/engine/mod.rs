//! Execution backends.
//!
//! A backend knows how to bring one [`PayloadType`](crate::manifest::PayloadType)
//! to life inside a [`PayloadContext`] and how to tear it down again. The
//! [`BackendLoader`](crate::loader::BackendLoader) owns status transitions;
//! backends only attach and release their runtime state.

mod native;
mod script;

pub use native::{NativeBackend, NativeImage};
pub use script::{ScriptBackend, ScriptDialect, ScriptImage};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dezero_store::BackingStore;

use crate::context::{PayloadContext, PayloadParams};
use crate::discovery::PayloadLayout;
use crate::error::{PayloadError, PayloadResult};

/// A runtime capable of executing one kind of payload.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Prepare and start the payload, attaching runtime state to `ctx`.
    async fn load(
        &self,
        payload_id: &str,
        ctx: &mut PayloadContext,
        params: &PayloadParams,
    ) -> PayloadResult<()>;

    /// Release everything `load` attached to `ctx`.
    async fn stop(&self, ctx: &mut PayloadContext) -> PayloadResult<()>;

    /// Live memory use of the run, if the backend can measure it.
    ///
    /// Sampled on every supervisor tick.
    fn memory_in_use(&self, _ctx: &PayloadContext) -> Option<u64> {
        None
    }
}

/// Reads payload artifacts from the backing store.
#[derive(Clone)]
pub struct ArtifactSource {
    store: Arc<dyn BackingStore>,
    layout: PayloadLayout,
}

impl ArtifactSource {
    /// Create a source over `store` using `layout`.
    #[must_use]
    pub fn new(store: Arc<dyn BackingStore>, layout: PayloadLayout) -> Self {
        Self { store, layout }
    }

    /// Read the artifact of `payload_id`.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::BackendLoad`] if the artifact is missing,
    /// unreadable or empty.
    pub async fn read(&self, payload_id: &str) -> PayloadResult<Vec<u8>> {
        let path = self.layout.artifact_path(payload_id);
        let bytes = self
            .store
            .read(&path)
            .await
            .map_err(|e| PayloadError::BackendLoad {
                id: payload_id.to_string(),
                reason: format!("cannot read artifact {path}: {e}"),
            })?;
        if bytes.is_empty() {
            return Err(PayloadError::BackendLoad {
                id: payload_id.to_string(),
                reason: "artifact is empty".into(),
            });
        }
        Ok(bytes)
    }
}

impl fmt::Debug for ArtifactSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactSource")
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

/// Size of an in-memory image as attributed memory.
pub(crate) fn image_bytes(image: &[u8]) -> u64 {
    u64::try_from(image.len()).unwrap_or(u64::MAX)
}

/// Entry identifier from the manifest, or `default` when none is declared.
pub(crate) fn entry_or<'a>(ctx: &'a PayloadContext, default: &'a str) -> &'a str {
    let entry = ctx.manifest().payload.entry.as_str();
    if entry.is_empty() { default } else { entry }
}
