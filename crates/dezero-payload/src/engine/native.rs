use async_trait::async_trait;
use tracing::{debug, info};

use super::{ArtifactSource, ExecutionBackend, entry_or, image_bytes};
use crate::context::{PayloadContext, PayloadParams};
use crate::error::PayloadResult;

const DEFAULT_ENTRY: &str = "payload_main";

/// A native image held in memory for the duration of a run.
#[derive(Debug)]
pub struct NativeImage {
    /// Entry symbol inside the image.
    pub entry: String,
    /// Raw image bytes.
    pub image: Vec<u8>,
    /// Parameters the run was started with.
    pub params: PayloadParams,
}

/// Backend for precompiled native payloads.
///
/// Loads the artifact into memory and keeps it as the run's runtime handle.
/// The image size is attributed to the run as memory.
#[derive(Debug, Clone)]
pub struct NativeBackend {
    artifacts: ArtifactSource,
}

impl NativeBackend {
    /// Create a backend reading artifacts from `artifacts`.
    #[must_use]
    pub fn new(artifacts: ArtifactSource) -> Self {
        Self { artifacts }
    }
}

#[async_trait]
impl ExecutionBackend for NativeBackend {
    fn name(&self) -> &'static str {
        "native"
    }

    async fn load(
        &self,
        payload_id: &str,
        ctx: &mut PayloadContext,
        params: &PayloadParams,
    ) -> PayloadResult<()> {
        let image = self.artifacts.read(payload_id).await?;
        let entry = entry_or(ctx, DEFAULT_ENTRY).to_string();
        let bytes = image_bytes(&image);

        ctx.set_memory_allocated(bytes);
        ctx.runtime_handle = Some(Box::new(NativeImage {
            entry: entry.clone(),
            image,
            params: params.clone(),
        }));
        info!(payload_id, %entry, bytes, "Native image loaded");
        Ok(())
    }

    async fn stop(&self, ctx: &mut PayloadContext) -> PayloadResult<()> {
        if ctx.runtime_handle.take().is_some() {
            debug!(payload_id = %ctx.payload_id(), "Native image released");
        }
        ctx.user_data = None;
        ctx.set_memory_allocated(0);
        Ok(())
    }

    fn memory_in_use(&self, ctx: &PayloadContext) -> Option<u64> {
        ctx.runtime::<NativeImage>().map(|n| image_bytes(&n.image))
    }
}
