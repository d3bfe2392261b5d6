//! Configuration types for the DeZero device runtime.
//!
//! Every struct implements [`Default`] with the device's stock values so that
//! a bare `[section]` header in TOML produces a working configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root configuration for the DeZero runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where payloads live and how much space the store reports.
    pub storage: StorageSection,
    /// Supervisor cadence, run budgets and install limits.
    pub runtime: RuntimeSection,
    /// Which permissions payloads may be granted.
    pub policy: PolicySection,
    /// Logging level, format, and per-crate directives.
    pub logging: LoggingSection,
}

// ---------------------------------------------------------------------------
// StorageSection
// ---------------------------------------------------------------------------

/// Host directory standing in for the device's flash partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Root directory of the store. Relative paths resolve against the
    /// working directory.
    pub root: PathBuf,
    /// Directory under `root` holding one subdirectory per payload.
    pub payload_dir: String,
    /// Quota reported as the store's total space, in KiB.
    pub capacity_kb: u64,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            root: PathBuf::from("dezero-data"),
            payload_dir: "payloads".to_owned(),
            capacity_kb: 1536,
        }
    }
}

// ---------------------------------------------------------------------------
// RuntimeSection
// ---------------------------------------------------------------------------

/// Supervisor and install limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    /// Interval between budget sweeps, in milliseconds.
    pub tick_interval_ms: u64,
    /// Wall-clock budget of a single run, in milliseconds.
    pub cpu_time_limit_ms: u64,
    /// Free heap reported to admission checks, in KiB.
    pub memory_budget_kb: u64,
    /// Largest artifact accepted by install, in KiB.
    pub max_payload_size_kb: u64,
    /// Maximum number of installed payloads.
    pub max_payloads: usize,
    /// Reject manifests that name unknown permissions.
    pub strict_manifests: bool,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            cpu_time_limit_ms: 60_000,
            memory_budget_kb: 320,
            max_payload_size_kb: 512,
            max_payloads: 32,
            strict_manifests: false,
        }
    }
}

// ---------------------------------------------------------------------------
// PolicySection
// ---------------------------------------------------------------------------

/// How permission requests are decided.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyMode {
    /// Grant only the permissions listed in `granted`.
    #[default]
    GrantList,
    /// Grant every request.
    AllowAll,
}

/// Permission policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySection {
    /// Decision mode.
    pub mode: PolicyMode,
    /// Permission names granted under [`PolicyMode::GrantList`].
    pub granted: Vec<String>,
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            mode: PolicyMode::GrantList,
            granted: [
                "wifi_scan",
                "ble_scan",
                "gpio_read",
                "display_write",
                "storage_read",
            ]
            .into_iter()
            .map(str::to_owned)
            .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// LoggingSection
// ---------------------------------------------------------------------------

/// Logging and tracing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Global log level filter (`"trace"`, `"debug"`, `"info"`, `"warn"`,
    /// `"error"`).
    pub level: String,
    /// Output format: `"pretty"`, `"compact"`, `"json"`, or `"full"`.
    pub format: String,
    /// Per-crate tracing directives (e.g. `["dezero_payload=debug"]`).
    pub directives: Vec<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
            directives: Vec::new(),
        }
    }
}
