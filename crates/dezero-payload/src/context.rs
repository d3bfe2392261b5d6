//! Execution contexts for payload runs.
//!
//! A [`PayloadContext`] is created each time a payload is executed and owns
//! everything the run needs: a snapshot of the manifest, its status, the
//! backend's runtime handle and the budget it is held to.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::manifest::PayloadManifest;

/// Key/value execution parameters.
pub type PayloadParams = BTreeMap<String, String>;

/// Opaque backend-owned runtime state.
pub type RuntimeHandle = Box<dyn Any + Send + Sync>;

/// Lifecycle status of a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadStatus {
    /// Not running. Reported for payloads without a context.
    Idle,
    /// A backend is preparing the payload.
    Loading,
    /// The payload is executing.
    Running,
    /// Reserved. No operation enters this state.
    Paused,
    /// The run finished or was stopped.
    Completed,
    /// The run failed to load or crashed.
    Error,
}

impl PayloadStatus {
    /// Whether a run is in flight. A live payload cannot be executed again.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Loading | Self::Running | Self::Paused)
    }

    /// Whether the run has ended.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl fmt::Display for PayloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// The runtime record of one payload run.
pub struct PayloadContext {
    manifest: PayloadManifest,
    status: PayloadStatus,
    /// Backend-owned runtime state, cleared on stop.
    pub runtime_handle: Option<RuntimeHandle>,
    /// Backend-owned scratch data, cleared on stop.
    pub user_data: Option<RuntimeHandle>,
    memory_allocated: u64,
    memory_limit: u64,
    start_time: Instant,
    cpu_time_limit: Duration,
}

impl PayloadContext {
    /// Create a context in [`PayloadStatus::Loading`].
    ///
    /// The memory limit comes from the manifest; both limits are fixed for
    /// the lifetime of the context.
    #[must_use]
    pub fn new(manifest: PayloadManifest, cpu_time_limit: Duration, start_time: Instant) -> Self {
        let memory_limit = manifest.memory_limit_bytes();
        Self {
            manifest,
            status: PayloadStatus::Loading,
            runtime_handle: None,
            user_data: None,
            memory_allocated: 0,
            memory_limit,
            start_time,
            cpu_time_limit,
        }
    }

    /// Id of the payload this context runs.
    #[must_use]
    pub fn payload_id(&self) -> &str {
        &self.manifest.id
    }

    /// The manifest snapshot taken at execute time.
    #[must_use]
    pub fn manifest(&self) -> &PayloadManifest {
        &self.manifest
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> PayloadStatus {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: PayloadStatus) {
        self.status = status;
    }

    /// Bytes currently attributed to this run.
    #[must_use]
    pub fn memory_allocated(&self) -> u64 {
        self.memory_allocated
    }

    /// Record the bytes the backend holds for this run.
    pub fn set_memory_allocated(&mut self, bytes: u64) {
        self.memory_allocated = bytes;
    }

    /// Memory ceiling in bytes.
    #[must_use]
    pub fn memory_limit(&self) -> u64 {
        self.memory_limit
    }

    /// Wall-clock ceiling for the run.
    #[must_use]
    pub fn cpu_time_limit(&self) -> Duration {
        self.cpu_time_limit
    }

    /// When the context was created.
    #[must_use]
    pub fn start_time(&self) -> Instant {
        self.start_time
    }

    /// Time since creation as seen at `now`.
    #[must_use]
    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.start_time)
    }

    /// Borrow the runtime handle as a concrete backend type.
    #[must_use]
    pub fn runtime<T: Any>(&self) -> Option<&T> {
        self.runtime_handle.as_ref()?.downcast_ref::<T>()
    }

    /// A serializable view of this context.
    #[must_use]
    pub fn snapshot(&self, now: Instant) -> ContextSnapshot {
        ContextSnapshot {
            payload_id: self.manifest.id.clone(),
            status: self.status,
            memory_allocated: self.memory_allocated,
            memory_limit: self.memory_limit,
            cpu_time_limit_ms: duration_ms(self.cpu_time_limit),
            elapsed_ms: duration_ms(self.elapsed(now)),
            has_runtime: self.runtime_handle.is_some(),
        }
    }
}

impl fmt::Debug for PayloadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadContext")
            .field("payload_id", &self.manifest.id)
            .field("status", &self.status)
            .field("has_runtime", &self.runtime_handle.is_some())
            .field("memory_allocated", &self.memory_allocated)
            .field("memory_limit", &self.memory_limit)
            .field("cpu_time_limit", &self.cpu_time_limit)
            .finish_non_exhaustive()
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Read-only copy of a context's observable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    /// Payload id.
    pub payload_id: String,
    /// Status at snapshot time.
    pub status: PayloadStatus,
    /// Bytes attributed to the run.
    pub memory_allocated: u64,
    /// Memory ceiling in bytes.
    pub memory_limit: u64,
    /// Wall-clock ceiling in milliseconds.
    pub cpu_time_limit_ms: u64,
    /// Milliseconds since the context was created.
    pub elapsed_ms: u64,
    /// Whether a backend runtime handle is attached.
    pub has_runtime: bool,
}
