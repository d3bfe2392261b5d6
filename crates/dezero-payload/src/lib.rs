//! Payload runtime for the DeZero handheld.
//!
//! Installed payloads are described by a JSON manifest and stored under a
//! payload directory in the [`BackingStore`](dezero_store::BackingStore).
//! This crate parses manifests, keeps the registry of installed payloads,
//! admits runs against resource and permission policy, routes them to an
//! execution backend or built-in module, and sweeps running payloads for
//! budget overruns. [`PayloadManager`] ties it together.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod builtin;
pub mod context;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod events;
pub mod hal;
pub mod loader;
pub mod manager;
pub mod manifest;
pub mod notify;
pub mod permission;
pub mod policy;
pub mod registry;
pub mod supervisor;

pub use builtin::{BleScanModule, BuiltinModule, BuiltinRegistry, BuiltinReport, WifiScanModule};
pub use context::{ContextSnapshot, PayloadContext, PayloadParams, PayloadStatus};
pub use discovery::PayloadLayout;
pub use engine::{ArtifactSource, ExecutionBackend};
pub use error::{PayloadError, PayloadResult, ResponseCode};
pub use events::{EventSink, PayloadEvent};
pub use hal::{AccessPoint, BleDevice, BleRadio, HalError, HalScope, MacAddress, WifiRadio};
pub use loader::BackendLoader;
pub use manager::{ManagerSettings, PayloadManager, PayloadManagerBuilder};
pub use manifest::{ManifestCodec, PayloadManifest, PayloadType};
pub use notify::{Notifier, NullNotifier};
pub use permission::{Permission, PermissionSet};
pub use policy::{
    AllowAllPolicy, DenyAllPolicy, FixedMemory, GrantListPolicy, MemoryProbe, PermissionPolicy,
    ResourcePolicy,
};
pub use registry::{InstallLimits, PayloadPackage, PayloadRegistry};
pub use supervisor::{BudgetViolation, ContextSupervisor};
