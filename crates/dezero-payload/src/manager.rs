//! The payload manager: one entry point for every payload operation.
//!
//! All registry and context state sits behind a single async mutex, so
//! install, uninstall, execute, stop and the budget sweep are serialized
//! against each other. Built-in modules run while the lock is held, which
//! bounds how long a sweep can be delayed by their budget.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dezero_store::BackingStore;
use tokio::sync::{Mutex, broadcast};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::builtin::{BuiltinModule, BuiltinRegistry};
use crate::context::{ContextSnapshot, PayloadParams, PayloadStatus};
use crate::discovery::{DEFAULT_PAYLOAD_DIR, PayloadLayout, validate_id};
use crate::engine::ExecutionBackend;
use crate::error::{PayloadError, PayloadResult};
use crate::events::{EventSink, PayloadEvent};
use crate::hal::HalScope;
use crate::loader::BackendLoader;
use crate::manifest::{ManifestCodec, PayloadManifest, PayloadType};
use crate::permission::PermissionSet;
use crate::policy::{FixedMemory, GrantListPolicy, MemoryProbe, PermissionPolicy, ResourcePolicy};
use crate::registry::{InstallLimits, PayloadPackage, PayloadRegistry};
use crate::supervisor::{BudgetViolation, ContextSupervisor, DEFAULT_CPU_TIME_LIMIT};

/// Free memory reported when no probe is configured.
pub const DEFAULT_FREE_MEMORY: u64 = 320 * 1024;

/// Tunables for a [`PayloadManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerSettings {
    /// Payload base directory inside the store.
    pub payload_dir: String,
    /// Wall-clock ceiling for each run.
    pub cpu_time_limit: Duration,
    /// Install limits.
    pub limits: InstallLimits,
    /// Reject manifests with unknown permission strings.
    pub strict_manifests: bool,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            payload_dir: DEFAULT_PAYLOAD_DIR.to_string(),
            cpu_time_limit: DEFAULT_CPU_TIME_LIMIT,
            limits: InstallLimits::default(),
            strict_manifests: false,
        }
    }
}

/// Builder for [`PayloadManager`].
pub struct PayloadManagerBuilder {
    store: Arc<dyn BackingStore>,
    settings: ManagerSettings,
    memory: Arc<dyn MemoryProbe>,
    permissions: Arc<dyn PermissionPolicy>,
    backends: Vec<(PayloadType, Arc<dyn ExecutionBackend>)>,
    builtins: BuiltinRegistry,
    events: EventSink,
}

impl PayloadManagerBuilder {
    /// Replace the default settings.
    #[must_use]
    pub fn settings(mut self, settings: ManagerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Source of free-memory readings.
    #[must_use]
    pub fn memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.memory = probe;
        self
    }

    /// Permission policy. Defaults to a grant list with nothing granted.
    #[must_use]
    pub fn permission_policy(mut self, policy: Arc<dyn PermissionPolicy>) -> Self {
        self.permissions = policy;
        self
    }

    /// Override the backend for one payload type.
    #[must_use]
    pub fn backend(mut self, payload_type: PayloadType, backend: Arc<dyn ExecutionBackend>) -> Self {
        self.backends.push((payload_type, backend));
        self
    }

    /// Register a built-in module.
    #[must_use]
    pub fn builtin(mut self, module: Arc<dyn BuiltinModule>) -> Self {
        self.builtins.register(module);
        self
    }

    /// Publish events through an existing sink.
    #[must_use]
    pub fn events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Assemble the manager. The registry starts empty; call
    /// [`PayloadManager::scan`] to load installed payloads.
    #[must_use]
    pub fn build(self) -> PayloadManager {
        let layout = PayloadLayout::new(self.settings.payload_dir.clone());
        let codec = if self.settings.strict_manifests {
            ManifestCodec::strict()
        } else {
            ManifestCodec::lenient()
        };

        let mut loader =
            BackendLoader::with_standard_backends(Arc::clone(&self.store), layout.clone());
        for (payload_type, backend) in self.backends {
            loader.register(payload_type, backend);
        }

        let policy = ResourcePolicy::new(Arc::clone(&self.store), self.memory, self.permissions);
        let state = ManagerState {
            registry: PayloadRegistry::new(self.store, layout, codec),
            supervisor: ContextSupervisor::new(self.settings.cpu_time_limit),
        };

        PayloadManager {
            state: Mutex::new(state),
            loader,
            builtins: self.builtins,
            policy,
            limits: self.settings.limits,
            events: self.events,
        }
    }
}

struct ManagerState {
    registry: PayloadRegistry,
    supervisor: ContextSupervisor,
}

/// Registry, admission policy, backends and context supervision in one place.
pub struct PayloadManager {
    state: Mutex<ManagerState>,
    loader: BackendLoader,
    builtins: BuiltinRegistry,
    policy: ResourcePolicy,
    limits: InstallLimits,
    events: EventSink,
}

impl PayloadManager {
    /// Start building a manager over `store`.
    #[must_use]
    pub fn builder(store: Arc<dyn BackingStore>) -> PayloadManagerBuilder {
        PayloadManagerBuilder {
            store,
            settings: ManagerSettings::default(),
            memory: Arc::new(FixedMemory(DEFAULT_FREE_MEMORY)),
            permissions: Arc::new(GrantListPolicy::default()),
            backends: Vec::new(),
            builtins: BuiltinRegistry::new(),
            events: EventSink::default(),
        }
    }

    /// Subscribe to lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PayloadEvent> {
        self.events.subscribe()
    }

    /// Names of the registered built-in modules.
    #[must_use]
    pub fn builtin_names(&self) -> Vec<&'static str> {
        self.builtins.names()
    }

    /// Rebuild the registry from storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload directory cannot be listed.
    pub async fn scan(&self) -> PayloadResult<usize> {
        let count = self.state.lock().await.registry.scan().await?;
        self.events.publish(PayloadEvent::Scanned { count });
        Ok(count)
    }

    /// Every registered manifest.
    pub async fn available(&self) -> Vec<PayloadManifest> {
        self.state.lock().await.registry.available()
    }

    /// One registered manifest.
    pub async fn manifest(&self, payload_id: &str) -> Option<PayloadManifest> {
        self.state.lock().await.registry.get(payload_id).cloned()
    }

    /// Verify and store a payload package, then rescan.
    ///
    /// A terminal context left by an earlier version is discarded.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::AlreadyRunning`] if the id has a live run, or
    /// any verification or storage error from the registry.
    pub async fn install(
        &self,
        payload_id: &str,
        package: &PayloadPackage,
    ) -> PayloadResult<PayloadManifest> {
        let mut state = self.state.lock().await;
        if state.supervisor.status(payload_id).is_live() {
            return Err(PayloadError::AlreadyRunning(payload_id.to_string()));
        }

        let manifest = state
            .registry
            .install(payload_id, package, self.limits)
            .await?;
        state.supervisor.remove(payload_id);

        self.events.publish(PayloadEvent::Installed {
            payload_id: payload_id.to_string(),
            version: manifest.version.clone(),
        });
        Ok(manifest)
    }

    /// Stop the payload if it is running, delete its files and forget it.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::NotFound`] if the id is neither registered nor
    /// present in storage, or the storage error if deletion fails. On
    /// deletion failure the payload stays registered.
    pub async fn uninstall(&self, payload_id: &str) -> PayloadResult<()> {
        validate_id(payload_id)?;
        let mut state = self.state.lock().await;

        if !state.registry.contains(payload_id) && !state.registry.has_files(payload_id).await? {
            return Err(PayloadError::NotFound(payload_id.to_string()));
        }

        if let Some(ctx) = state.supervisor.get_mut(payload_id)
            && ctx.status().is_live()
        {
            self.loader.stop(ctx).await;
            self.events.publish(PayloadEvent::Stopped {
                payload_id: payload_id.to_string(),
            });
        }

        state.registry.remove(payload_id).await?;
        state.supervisor.remove(payload_id);
        self.events.publish(PayloadEvent::Uninstalled {
            payload_id: payload_id.to_string(),
        });
        Ok(())
    }

    /// Admit and start a payload.
    ///
    /// Admission runs in order: lookup, live-run check, resource check,
    /// permission check. A rejected payload gets no context. Built-in
    /// payloads run to completion before this returns; every other type is
    /// left `Running` under its backend.
    ///
    /// # Errors
    ///
    /// Returns the first admission failure, or the load/run failure, in
    /// which case the context is left in `Error`.
    pub async fn execute(&self, payload_id: &str, params: &PayloadParams) -> PayloadResult<()> {
        let mut state = self.state.lock().await;

        let manifest = state
            .registry
            .get(payload_id)
            .cloned()
            .ok_or_else(|| PayloadError::NotFound(payload_id.to_string()))?;
        if state.supervisor.status(payload_id).is_live() {
            return Err(PayloadError::AlreadyRunning(payload_id.to_string()));
        }
        self.policy.check_requirements(&manifest).await?;
        let granted = self.policy.check_permissions(&manifest)?;

        if manifest.payload_type() == Some(PayloadType::Builtin) {
            return self.run_builtin(&mut state, manifest, granted, params).await;
        }

        let payload_type = manifest.payload_type();
        let ctx = state.supervisor.create(manifest, Instant::now());
        match self.loader.load_and_execute(payload_id, ctx, params).await {
            Ok(()) => {
                if let Some(payload_type) = payload_type {
                    self.events.publish(PayloadEvent::Started {
                        payload_id: payload_id.to_string(),
                        payload_type,
                    });
                }
                Ok(())
            },
            Err(e) => {
                self.events.publish(PayloadEvent::Failed {
                    payload_id: payload_id.to_string(),
                    reason: e.to_string(),
                });
                Err(e)
            },
        }
    }

    async fn run_builtin(
        &self,
        state: &mut ManagerState,
        manifest: PayloadManifest,
        granted: PermissionSet,
        params: &PayloadParams,
    ) -> PayloadResult<()> {
        let payload_id = manifest.id.clone();
        let entry = manifest.payload.entry.clone();
        let module = self
            .builtins
            .get(&entry)
            .ok_or_else(|| PayloadError::UnknownBuiltin(entry.clone()))?;

        let required = module.required_permission();
        if !granted.contains(required) {
            warn!(payload_id = %payload_id, module = %entry, %required, "Built-in needs an undeclared permission");
            return Err(PayloadError::PermissionDenied {
                id: payload_id,
                denied: required.into(),
            });
        }

        let ctx = state.supervisor.create(manifest, Instant::now());
        ctx.set_status(PayloadStatus::Running);
        self.events.publish(PayloadEvent::Started {
            payload_id: payload_id.clone(),
            payload_type: PayloadType::Builtin,
        });
        info!(payload_id = %payload_id, module = %entry, "Running built-in module");

        let scope = HalScope::new(payload_id.clone(), granted);
        let budget = module.budget(params);
        let outcome = match tokio::time::timeout(budget, module.execute(&scope, params)).await {
            Ok(result) => result,
            Err(_) => Err(PayloadError::Builtin {
                module: entry.clone(),
                reason: format!(
                    "exceeded budget of {} ms",
                    u64::try_from(budget.as_millis()).unwrap_or(u64::MAX)
                ),
            }),
        };

        match outcome {
            Ok(report) => {
                ctx.set_status(PayloadStatus::Completed);
                debug!(payload_id = %payload_id, results = report.results, "Built-in module finished");
                self.events.publish(PayloadEvent::Completed { payload_id });
                Ok(())
            },
            Err(e) => {
                ctx.set_status(PayloadStatus::Error);
                warn!(payload_id = %payload_id, error = %e, "Built-in module failed");
                self.events.publish(PayloadEvent::Failed {
                    payload_id,
                    reason: e.to_string(),
                });
                Err(e)
            },
        }
    }

    /// Stop a live run. Stopping a finished run is a no-op that keeps its status.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::NotFound`] if the payload has no context.
    pub async fn stop(&self, payload_id: &str) -> PayloadResult<()> {
        let mut state = self.state.lock().await;
        let ctx = state
            .supervisor
            .get_mut(payload_id)
            .ok_or_else(|| PayloadError::NotFound(payload_id.to_string()))?;

        if !ctx.status().is_live() {
            debug!(payload_id, status = %ctx.status(), "Stop requested for finished payload");
            return Ok(());
        }
        self.loader.stop(ctx).await;
        self.events.publish(PayloadEvent::Stopped {
            payload_id: payload_id.to_string(),
        });
        Ok(())
    }

    /// Current status; `Idle` if the payload has never run.
    pub async fn status(&self, payload_id: &str) -> PayloadStatus {
        self.state.lock().await.supervisor.status(payload_id)
    }

    /// Snapshot of the payload's context.
    pub async fn context(&self, payload_id: &str) -> Option<ContextSnapshot> {
        self.state
            .lock()
            .await
            .supervisor
            .snapshot(payload_id, Instant::now())
    }

    /// Ids of payloads with a live run.
    pub async fn running(&self) -> Vec<String> {
        self.state.lock().await.supervisor.live_ids()
    }

    /// Run the budget sweep once.
    pub async fn tick(&self) -> Vec<BudgetViolation> {
        let mut state = self.state.lock().await;
        let violations = state.supervisor.sweep(&self.loader, Instant::now()).await;
        for violation in &violations {
            self.events.publish(PayloadEvent::BudgetExceeded {
                payload_id: violation.payload_id().to_string(),
                detail: violation.to_string(),
            });
        }
        violations
    }

    /// Stop every live run.
    pub async fn stop_all(&self) {
        let mut state = self.state.lock().await;
        for payload_id in state.supervisor.live_ids() {
            if let Some(ctx) = state.supervisor.get_mut(&payload_id) {
                self.loader.stop(ctx).await;
                self.events.publish(PayloadEvent::Stopped { payload_id });
            }
        }
    }
}

impl fmt::Debug for PayloadManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadManager")
            .field("loader", &self.loader)
            .field("builtins", &self.builtins)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}
