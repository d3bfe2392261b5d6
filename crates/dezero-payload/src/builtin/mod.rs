//! Modules compiled into the firmware.
//!
//! A `builtin` payload's `payload.entry` names one of these modules. They run
//! to completion on the caller's task, bounded by [`BuiltinModule::budget`],
//! and push their results through the [`Notifier`](crate::notify::Notifier).

mod ble_scan;
mod wifi_scan;

pub use ble_scan::{BLE_SCAN_WINDOW, BleScanModule, MAX_BLE_SCAN_WINDOW};
pub use wifi_scan::{WIFI_SCAN_WINDOW, WifiScanModule};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::context::PayloadParams;
use crate::error::{PayloadError, PayloadResult};
use crate::hal::{HalError, HalScope};
use crate::permission::Permission;

/// Most results a scanning module reports.
pub const MAX_SCAN_RESULTS: usize = 5;

/// Headroom added to a module's scan window to form its budget.
pub const BUDGET_SLACK: Duration = Duration::from_secs(2);

/// Summary of a finished built-in run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuiltinReport {
    /// Module name.
    pub module: String,
    /// Number of results delivered.
    pub results: usize,
}

/// A firmware-resident payload.
#[async_trait]
pub trait BuiltinModule: Send + Sync {
    /// Name matched against `payload.entry`.
    fn name(&self) -> &'static str;

    /// Permission the calling payload must hold.
    fn required_permission(&self) -> Permission;

    /// Longest the module may run before it is abandoned.
    fn budget(&self, params: &PayloadParams) -> Duration;

    /// Run to completion.
    async fn execute(&self, scope: &HalScope, params: &PayloadParams)
    -> PayloadResult<BuiltinReport>;
}

/// Built-in modules by name.
#[derive(Default, Clone)]
pub struct BuiltinRegistry {
    modules: HashMap<&'static str, Arc<dyn BuiltinModule>>,
}

impl BuiltinRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a module.
    pub fn register(&mut self, module: Arc<dyn BuiltinModule>) {
        self.modules.insert(module.name(), module);
    }

    /// Look up a module by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn BuiltinModule>> {
        self.modules.get(name).cloned()
    }

    /// Registered module names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.modules.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for BuiltinRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltinRegistry")
            .field("modules", &self.names())
            .finish()
    }
}

pub(crate) fn hal_failure(module: &str, e: &HalError) -> PayloadError {
    PayloadError::Builtin {
        module: module.to_string(),
        reason: e.to_string(),
    }
}

pub(crate) fn encode_results<T: Serialize>(module: &str, results: &[T]) -> PayloadResult<Vec<u8>> {
    serde_json::to_vec(results).map_err(|e| PayloadError::Builtin {
        module: module.to_string(),
        reason: format!("failed to encode results: {e}"),
    })
}
