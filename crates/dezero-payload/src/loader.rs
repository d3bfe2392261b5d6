//! Routing from payload type to execution backend.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dezero_store::BackingStore;
use tracing::{error, info, warn};

use crate::context::{PayloadContext, PayloadParams, PayloadStatus};
use crate::discovery::PayloadLayout;
use crate::engine::{ArtifactSource, ExecutionBackend, NativeBackend, ScriptBackend};
use crate::error::{PayloadError, PayloadResult};
use crate::manifest::PayloadType;

/// Maps each [`PayloadType`] to the backend that runs it and drives the
/// context status around backend calls.
///
/// `load_and_execute` moves a context to `Loading`, then to `Running` on
/// success or `Error` on failure. `stop` always leaves it `Completed`.
#[derive(Default, Clone)]
pub struct BackendLoader {
    backends: HashMap<PayloadType, Arc<dyn ExecutionBackend>>,
}

impl BackendLoader {
    /// A loader with no backends registered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A loader with the artifact-based backends for `native`, `micropython`
    /// and `lua`. Built-ins are executed by the manager directly and have no
    /// backend here.
    #[must_use]
    pub fn with_standard_backends(store: Arc<dyn BackingStore>, layout: PayloadLayout) -> Self {
        let artifacts = ArtifactSource::new(store, layout);
        let mut loader = Self::new();
        loader.register(
            PayloadType::Native,
            Arc::new(NativeBackend::new(artifacts.clone())),
        );
        loader.register(
            PayloadType::MicroPython,
            Arc::new(ScriptBackend::micropython(artifacts.clone())),
        );
        loader.register(PayloadType::Lua, Arc::new(ScriptBackend::lua(artifacts)));
        loader
    }

    /// Install or replace the backend for `payload_type`.
    pub fn register(&mut self, payload_type: PayloadType, backend: Arc<dyn ExecutionBackend>) {
        if let Some(previous) = self.backends.insert(payload_type, backend) {
            info!(%payload_type, replaced = previous.name(), "Replaced execution backend");
        }
    }

    /// The backend registered for `payload_type`.
    #[must_use]
    pub fn backend(&self, payload_type: PayloadType) -> Option<&Arc<dyn ExecutionBackend>> {
        self.backends.get(&payload_type)
    }

    fn backend_for(&self, ctx: &PayloadContext) -> Option<&Arc<dyn ExecutionBackend>> {
        ctx.manifest()
            .payload_type()
            .and_then(|t| self.backends.get(&t))
    }

    /// Load a payload through the backend for its type.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::BackendLoad`] if no backend handles the type
    /// or the backend fails. The context is left in `Error`.
    pub async fn load_and_execute(
        &self,
        payload_id: &str,
        ctx: &mut PayloadContext,
        params: &PayloadParams,
    ) -> PayloadResult<()> {
        ctx.set_status(PayloadStatus::Loading);

        let Some(backend) = self.backend_for(ctx) else {
            ctx.set_status(PayloadStatus::Error);
            let type_name = ctx.manifest().payload.type_name.clone();
            warn!(payload_id, %type_name, "No execution backend for payload type");
            return Err(PayloadError::BackendLoad {
                id: payload_id.to_string(),
                reason: format!("no backend for payload type `{type_name}`"),
            });
        };

        match backend.load(payload_id, ctx, params).await {
            Ok(()) => {
                ctx.set_status(PayloadStatus::Running);
                info!(payload_id, backend = backend.name(), "Payload running");
                Ok(())
            },
            Err(e) => {
                ctx.set_status(PayloadStatus::Error);
                error!(payload_id, backend = backend.name(), error = %e, "Payload failed to load");
                Err(match e {
                    e @ PayloadError::BackendLoad { .. } => e,
                    other => PayloadError::BackendLoad {
                        id: payload_id.to_string(),
                        reason: other.to_string(),
                    },
                })
            },
        }
    }

    /// Tear down a run and mark it `Completed`.
    ///
    /// Backend teardown errors are logged; the status still ends `Completed`.
    pub async fn stop(&self, ctx: &mut PayloadContext) {
        if let Some(backend) = self.backend_for(ctx).cloned()
            && let Err(e) = backend.stop(ctx).await
        {
            warn!(payload_id = %ctx.payload_id(), error = %e, "Backend stop failed");
        }
        ctx.runtime_handle = None;
        ctx.set_status(PayloadStatus::Completed);
        info!(payload_id = %ctx.payload_id(), "Payload stopped");
    }

    /// Live memory use reported by the run's backend.
    #[must_use]
    pub fn memory_in_use(&self, ctx: &PayloadContext) -> Option<u64> {
        self.backend_for(ctx)?.memory_in_use(ctx)
    }
}

impl fmt::Debug for BackendLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self
            .backends
            .iter()
            .map(|(t, b)| (t.as_str(), b.name()))
            .collect();
        names.sort_unstable();
        f.debug_struct("BackendLoader")
            .field("backends", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use dezero_store::MemoryStore;
    use tokio::time::Instant;

    use super::*;
    use crate::engine::{NativeImage, ScriptImage};
    use crate::manifest::ManifestCodec;

    async fn setup(type_name: &str, artifact: &[u8]) -> (BackendLoader, PayloadContext) {
        let store = Arc::new(MemoryStore::new(1 << 16));
        store.create_directory("payloads/demo").await.unwrap();
        store.write("payloads/demo/payload", artifact).await.unwrap();

        let loader = BackendLoader::with_standard_backends(store, PayloadLayout::default());
        let raw = format!(
            r#"{{"id":"demo","name":"Demo","version":"1","payload":{{"type":"{type_name}"}}}}"#
        );
        let manifest = ManifestCodec::lenient().parse(raw.as_bytes()).unwrap();
        let ctx = PayloadContext::new(manifest, Duration::from_secs(60), Instant::now());
        (loader, ctx)
    }

    #[tokio::test]
    async fn test_native_load_and_stop() {
        let (loader, mut ctx) = setup("native", &[0xE9, 0x01, 0x02]).await;
        let mut params = PayloadParams::new();
        params.insert("channel".into(), "6".into());

        loader
            .load_and_execute("demo", &mut ctx, &params)
            .await
            .unwrap();
        assert_eq!(ctx.status(), PayloadStatus::Running);
        let image = ctx.runtime::<NativeImage>().unwrap();
        assert_eq!(image.entry, "payload_main");
        assert_eq!(image.params.get("channel").map(String::as_str), Some("6"));
        assert_eq!(ctx.memory_allocated(), 3);
        assert_eq!(loader.memory_in_use(&ctx), Some(3));

        loader.stop(&mut ctx).await;
        assert_eq!(ctx.status(), PayloadStatus::Completed);
        assert!(ctx.runtime_handle.is_none());
        assert_eq!(ctx.memory_allocated(), 0);
    }

    #[tokio::test]
    async fn test_lua_rejects_binary() {
        let (loader, mut ctx) = setup("lua", &[0xFF, 0xFE, 0x00]).await;
        let err = loader
            .load_and_execute("demo", &mut ctx, &PayloadParams::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PayloadError::BackendLoad { .. }));
        assert_eq!(ctx.status(), PayloadStatus::Error);
    }

    #[tokio::test]
    async fn test_micropython_loads_text() {
        let (loader, mut ctx) = setup("micropython", b"print('hi')").await;
        loader
            .load_and_execute("demo", &mut ctx, &PayloadParams::new())
            .await
            .unwrap();
        let script = ctx.runtime::<ScriptImage>().unwrap();
        assert_eq!(script.entry, "main");
    }

    #[tokio::test]
    async fn test_builtin_has_no_backend() {
        let (loader, mut ctx) = setup("builtin", b"").await;
        let err = loader
            .load_and_execute("demo", &mut ctx, &PayloadParams::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PayloadError::BackendLoad { reason, .. } if reason.contains("builtin")));
        assert_eq!(ctx.status(), PayloadStatus::Error);
    }

    #[tokio::test]
    async fn test_missing_artifact_is_load_error() {
        let store = Arc::new(MemoryStore::new(1024));
        let loader = BackendLoader::with_standard_backends(store, PayloadLayout::default());
        let manifest = ManifestCodec::lenient()
            .parse(br#"{"id":"ghost","name":"g","version":"1","payload":{"type":"native"}}"#)
            .unwrap();
        let mut ctx = PayloadContext::new(manifest, Duration::from_secs(1), Instant::now());
        let err = loader
            .load_and_execute("ghost", &mut ctx, &PayloadParams::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PayloadError::BackendLoad { .. }));
        assert_eq!(ctx.status(), PayloadStatus::Error);
    }

    #[tokio::test]
    async fn test_stop_without_backend_still_completes() {
        let (loader, mut ctx) = setup("builtin", b"").await;
        loader.stop(&mut ctx).await;
        assert_eq!(ctx.status(), PayloadStatus::Completed);
    }
}
