//! Ownership of live execution contexts and the periodic budget sweep.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::context::{ContextSnapshot, PayloadContext, PayloadStatus};
use crate::loader::BackendLoader;
use crate::manifest::PayloadManifest;

/// Default wall-clock ceiling for a run.
pub const DEFAULT_CPU_TIME_LIMIT: Duration = Duration::from_secs(60);

/// A budget a running payload was stopped for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BudgetViolation {
    /// The run outlived its time limit.
    Time {
        /// Payload id.
        payload_id: String,
        /// Run time at the sweep, in milliseconds.
        elapsed_ms: u64,
        /// Limit in milliseconds.
        limit_ms: u64,
    },
    /// The run held more memory than its limit.
    Memory {
        /// Payload id.
        payload_id: String,
        /// Bytes attributed at the sweep.
        allocated: u64,
        /// Limit in bytes.
        limit: u64,
    },
}

impl BudgetViolation {
    /// Id of the stopped payload.
    #[must_use]
    pub fn payload_id(&self) -> &str {
        match self {
            Self::Time { payload_id, .. } | Self::Memory { payload_id, .. } => payload_id,
        }
    }
}

impl fmt::Display for BudgetViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Time {
                elapsed_ms,
                limit_ms,
                ..
            } => write!(f, "ran {elapsed_ms} ms, limit {limit_ms} ms"),
            Self::Memory { allocated, limit, .. } => {
                write!(f, "holds {allocated} bytes, limit {limit} bytes")
            },
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Holds at most one context per payload id.
///
/// A context survives its run so status queries keep answering `Completed` or
/// `Error` until the payload is executed again or uninstalled.
#[derive(Debug)]
pub struct ContextSupervisor {
    contexts: HashMap<String, PayloadContext>,
    cpu_time_limit: Duration,
}

impl Default for ContextSupervisor {
    fn default() -> Self {
        Self::new(DEFAULT_CPU_TIME_LIMIT)
    }
}

impl ContextSupervisor {
    /// Supervisor giving every new context `cpu_time_limit`.
    #[must_use]
    pub fn new(cpu_time_limit: Duration) -> Self {
        Self {
            contexts: HashMap::new(),
            cpu_time_limit,
        }
    }

    /// Time limit applied to new contexts.
    #[must_use]
    pub fn cpu_time_limit(&self) -> Duration {
        self.cpu_time_limit
    }

    /// Create a fresh context for `manifest`, replacing any previous one.
    pub fn create(&mut self, manifest: PayloadManifest, now: Instant) -> &mut PayloadContext {
        let id = manifest.id.clone();
        let ctx = PayloadContext::new(manifest, self.cpu_time_limit, now);
        debug!(payload_id = %id, "Created execution context");
        self.contexts.entry(id).insert_entry(ctx).into_mut()
    }

    /// The context of `payload_id`.
    #[must_use]
    pub fn get(&self, payload_id: &str) -> Option<&PayloadContext> {
        self.contexts.get(payload_id)
    }

    /// Mutable access to the context of `payload_id`.
    pub fn get_mut(&mut self, payload_id: &str) -> Option<&mut PayloadContext> {
        self.contexts.get_mut(payload_id)
    }

    /// Status of `payload_id`; `Idle` when there is no context.
    #[must_use]
    pub fn status(&self, payload_id: &str) -> PayloadStatus {
        self.contexts
            .get(payload_id)
            .map_or(PayloadStatus::Idle, PayloadContext::status)
    }

    /// Snapshot of the context of `payload_id`.
    #[must_use]
    pub fn snapshot(&self, payload_id: &str, now: Instant) -> Option<ContextSnapshot> {
        self.contexts.get(payload_id).map(|c| c.snapshot(now))
    }

    /// Drop the context of `payload_id`.
    pub fn remove(&mut self, payload_id: &str) -> Option<PayloadContext> {
        self.contexts.remove(payload_id)
    }

    /// Ids of contexts in a live state, sorted.
    #[must_use]
    pub fn live_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self
            .contexts
            .iter()
            .filter(|(_, c)| c.status().is_live())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Stop every `Running` context that is over its time or memory budget.
    ///
    /// Memory attribution is refreshed from the backend first. A memory
    /// limit of zero means the manifest declared no requirement and is not
    /// enforced.
    pub async fn sweep(&mut self, loader: &BackendLoader, now: Instant) -> Vec<BudgetViolation> {
        let mut violations = Vec::new();

        for (id, ctx) in &mut self.contexts {
            if ctx.status() != PayloadStatus::Running {
                continue;
            }
            if let Some(bytes) = loader.memory_in_use(ctx) {
                ctx.set_memory_allocated(bytes);
            }

            let elapsed = ctx.elapsed(now);
            let violation = if elapsed > ctx.cpu_time_limit() {
                Some(BudgetViolation::Time {
                    payload_id: id.clone(),
                    elapsed_ms: millis(elapsed),
                    limit_ms: millis(ctx.cpu_time_limit()),
                })
            } else if ctx.memory_limit() > 0 && ctx.memory_allocated() > ctx.memory_limit() {
                Some(BudgetViolation::Memory {
                    payload_id: id.clone(),
                    allocated: ctx.memory_allocated(),
                    limit: ctx.memory_limit(),
                })
            } else {
                None
            };

            if let Some(violation) = violation {
                warn!(payload_id = %id, %violation, "Payload exceeded budget, stopping");
                loader.stop(ctx).await;
                violations.push(violation);
            }
        }
        violations
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::context::PayloadParams;
    use crate::engine::ExecutionBackend;
    use crate::error::PayloadResult;
    use crate::manifest::{ManifestCodec, PayloadType};

    /// Attributes a fixed amount of memory while loaded.
    struct Resident(u64);

    #[async_trait]
    impl ExecutionBackend for Resident {
        fn name(&self) -> &'static str {
            "resident"
        }

        async fn load(
            &self,
            _payload_id: &str,
            ctx: &mut PayloadContext,
            _params: &PayloadParams,
        ) -> PayloadResult<()> {
            ctx.runtime_handle = Some(Box::new(()));
            Ok(())
        }

        async fn stop(&self, ctx: &mut PayloadContext) -> PayloadResult<()> {
            ctx.set_memory_allocated(0);
            Ok(())
        }

        fn memory_in_use(&self, _ctx: &PayloadContext) -> Option<u64> {
            Some(self.0)
        }
    }

    fn manifest(id: &str, memory_kb: u32) -> PayloadManifest {
        let raw = format!(
            r#"{{"id":"{id}","name":"{id}","version":"1","payload":{{"type":"lua"}},
                "requirements":{{"memory_kb":{memory_kb}}}}}"#
        );
        ManifestCodec::lenient().parse(raw.as_bytes()).unwrap()
    }

    fn loader(resident_bytes: u64) -> BackendLoader {
        let mut loader = BackendLoader::new();
        loader.register(PayloadType::Lua, Arc::new(Resident(resident_bytes)));
        loader
    }

    async fn start(sup: &mut ContextSupervisor, loader: &BackendLoader, id: &str, memory_kb: u32) {
        let ctx = sup.create(manifest(id, memory_kb), Instant::now());
        loader
            .load_and_execute(id, ctx, &PayloadParams::new())
            .await
            .unwrap();
    }

    #[test]
    fn test_status_idle_without_context() {
        let sup = ContextSupervisor::default();
        assert_eq!(sup.status("nobody"), PayloadStatus::Idle);
        assert_eq!(sup.cpu_time_limit(), DEFAULT_CPU_TIME_LIMIT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_budget_boundary() {
        let loader = loader(0);
        let mut sup = ContextSupervisor::new(Duration::from_secs(10));
        start(&mut sup, &loader, "slow", 0).await;

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(sup.sweep(&loader, Instant::now()).await.is_empty());
        assert_eq!(sup.status("slow"), PayloadStatus::Running);

        tokio::time::advance(Duration::from_millis(1)).await;
        let violations = sup.sweep(&loader, Instant::now()).await;
        assert_eq!(violations.len(), 1);
        assert!(matches!(
            &violations[0],
            BudgetViolation::Time { payload_id, elapsed_ms: 10_001, limit_ms: 10_000 } if payload_id == "slow"
        ));
        assert_eq!(sup.status("slow"), PayloadStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_budget() {
        let loader = loader(2048);
        let mut sup = ContextSupervisor::new(Duration::from_secs(60));
        start(&mut sup, &loader, "hungry", 1).await;
        start(&mut sup, &loader, "modest", 2).await;
        start(&mut sup, &loader, "undeclared", 0).await;

        let violations = sup.sweep(&loader, Instant::now()).await;
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].payload_id(), "hungry");
        assert_eq!(sup.status("hungry"), PayloadStatus::Completed);
        assert_eq!(sup.status("modest"), PayloadStatus::Running);
        assert_eq!(sup.status("undeclared"), PayloadStatus::Running);
        assert_eq!(sup.get("modest").unwrap().memory_allocated(), 2048);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_memory_limit_is_unbounded() {
        let loader = loader(u64::MAX);
        let mut sup = ContextSupervisor::new(Duration::from_secs(60));
        start(&mut sup, &loader, "greedy", 0).await;

        for _ in 0..3 {
            assert!(sup.sweep(&loader, Instant::now()).await.is_empty());
        }
        let ctx = sup.get("greedy").unwrap();
        assert_eq!(ctx.memory_limit(), 0);
        assert_eq!(ctx.memory_allocated(), u64::MAX);
        assert_eq!(ctx.status(), PayloadStatus::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_ignores_finished_contexts() {
        let loader = loader(0);
        let mut sup = ContextSupervisor::new(Duration::from_secs(1));
        start(&mut sup, &loader, "done", 0).await;
        loader.stop(sup.get_mut("done").unwrap()).await;

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(sup.sweep(&loader, Instant::now()).await.is_empty());
        assert!(sup.live_ids().is_empty());
    }

    #[tokio::test]
    async fn test_create_replaces_context() {
        let loader = loader(0);
        let mut sup = ContextSupervisor::default();
        start(&mut sup, &loader, "p", 0).await;
        sup.create(manifest("p", 0), Instant::now());
        assert_eq!(sup.status("p"), PayloadStatus::Loading);
        assert!(sup.remove("p").is_some());
        assert_eq!(sup.status("p"), PayloadStatus::Idle);
    }
}
