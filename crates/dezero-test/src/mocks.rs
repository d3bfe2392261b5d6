//! Mock collaborators for payload runtime tests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use dezero_payload::{
    AccessPoint, BleDevice, BleRadio, ExecutionBackend, HalError, HalScope, MacAddress,
    MemoryProbe, Notifier, PayloadContext, PayloadError, PayloadParams, PayloadResult, Permission,
    WifiRadio,
};
use dezero_store::{
    BackingStore, MemoryStore, StoreDirEntry, StoreError, StoreResult, StoreSpace,
};

#[derive(Debug, Default)]
struct BackendState {
    loads: Vec<(String, PayloadParams)>,
    stops: Vec<String>,
    fail_next_load: Option<String>,
    memory: Option<u64>,
}

/// Execution backend that records calls and can be told to fail.
///
/// Uses `std::sync::Mutex` so expectations can be set without a runtime.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<BackendState>>,
}

impl MockBackend {
    /// Create a new mock backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `load` fail with `reason`.
    pub fn fail_next_load(&self, reason: impl Into<String>) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_next_load = Some(reason.into());
        }
    }

    /// Report `bytes` as live memory use of every run.
    pub fn set_memory_in_use(&self, bytes: u64) {
        if let Ok(mut state) = self.state.lock() {
            state.memory = Some(bytes);
        }
    }

    /// Payload ids passed to `load`, in call order.
    #[must_use]
    pub fn loads(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.loads.iter().map(|(id, _)| id.clone()).collect())
            .unwrap_or_default()
    }

    /// Parameters of the most recent `load`.
    #[must_use]
    pub fn last_params(&self) -> Option<PayloadParams> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.loads.last().map(|(_, p)| p.clone()))
    }

    /// Payload ids passed to `stop`, in call order.
    #[must_use]
    pub fn stops(&self) -> Vec<String> {
        self.state.lock().map(|s| s.stops.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ExecutionBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn load(
        &self,
        payload_id: &str,
        ctx: &mut PayloadContext,
        params: &PayloadParams,
    ) -> PayloadResult<()> {
        let failure = {
            let mut state = self
                .state
                .lock()
                .map_err(|_| PayloadError::BackendLoad {
                    id: payload_id.to_string(),
                    reason: "mock state poisoned".into(),
                })?;
            state.loads.push((payload_id.to_string(), params.clone()));
            state.fail_next_load.take()
        };
        if let Some(reason) = failure {
            return Err(PayloadError::BackendLoad {
                id: payload_id.to_string(),
                reason,
            });
        }
        ctx.runtime_handle = Some(Box::new(payload_id.to_string()));
        Ok(())
    }

    async fn stop(&self, ctx: &mut PayloadContext) -> PayloadResult<()> {
        if let Ok(mut state) = self.state.lock() {
            state.stops.push(ctx.payload_id().to_string());
        }
        ctx.runtime_handle = None;
        ctx.set_memory_allocated(0);
        Ok(())
    }

    fn memory_in_use(&self, ctx: &PayloadContext) -> Option<u64> {
        ctx.runtime_handle.as_ref()?;
        self.state.lock().ok().and_then(|s| s.memory)
    }
}

/// Notifier that keeps every blob it is handed.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    blobs: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl RecordingNotifier {
    /// Create a new recording notifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All blobs received so far.
    #[must_use]
    pub fn blobs(&self) -> Vec<Vec<u8>> {
        self.blobs.lock().map(|b| b.clone()).unwrap_or_default()
    }

    /// The last blob decoded as JSON.
    #[must_use]
    pub fn last_json(&self) -> Option<serde_json::Value> {
        let blobs = self.blobs.lock().ok()?;
        serde_json::from_slice(blobs.last()?).ok()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, blob: &[u8]) {
        if let Ok(mut blobs) = self.blobs.lock() {
            blobs.push(blob.to_vec());
        }
    }
}

/// Wi-Fi radio returning a fixed list of access points.
///
/// Refuses callers without `wifi_scan`, like the device driver.
#[derive(Debug, Clone, Default)]
pub struct ScriptedWifiRadio {
    networks: Vec<AccessPoint>,
    scans: Arc<AtomicU64>,
    unavailable: bool,
}

impl ScriptedWifiRadio {
    /// Radio that will report `networks`.
    #[must_use]
    pub fn new(networks: Vec<AccessPoint>) -> Self {
        Self {
            networks,
            ..Self::default()
        }
    }

    /// Radio that fails every scan.
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    /// Number of scans started.
    #[must_use]
    pub fn scans(&self) -> u64 {
        self.scans.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WifiRadio for ScriptedWifiRadio {
    async fn start_scan(&self, scope: &HalScope) -> Result<(), HalError> {
        scope.require(Permission::WifiScan)?;
        if self.unavailable {
            return Err(HalError::Unavailable("wifi radio off".into()));
        }
        self.scans.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn scan_results(&self, _scope: &HalScope) -> Result<Vec<AccessPoint>, HalError> {
        Ok(self.networks.clone())
    }
}

/// BLE radio returning a fixed list of devices and recording scan windows.
#[derive(Debug, Clone, Default)]
pub struct ScriptedBleRadio {
    devices: Vec<BleDevice>,
    windows: Arc<Mutex<Vec<Duration>>>,
    stops: Arc<AtomicU64>,
}

impl ScriptedBleRadio {
    /// Radio that will report `devices`.
    #[must_use]
    pub fn new(devices: Vec<BleDevice>) -> Self {
        Self {
            devices,
            ..Self::default()
        }
    }

    /// Scan windows requested so far.
    #[must_use]
    pub fn windows(&self) -> Vec<Duration> {
        self.windows.lock().map(|w| w.clone()).unwrap_or_default()
    }

    /// Number of times the scan was stopped.
    #[must_use]
    pub fn stops(&self) -> u64 {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BleRadio for ScriptedBleRadio {
    async fn start_scan(&self, scope: &HalScope, window: Duration) -> Result<(), HalError> {
        scope.require(Permission::BleScan)?;
        if let Ok(mut windows) = self.windows.lock() {
            windows.push(window);
        }
        Ok(())
    }

    async fn scan_results(&self, _scope: &HalScope) -> Result<Vec<BleDevice>, HalError> {
        Ok(self.devices.clone())
    }

    async fn stop_scan(&self, _scope: &HalScope) -> Result<(), HalError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// An access point fixture.
#[must_use]
pub fn test_access_point(ssid: &str, rssi: i8, channel: u8) -> AccessPoint {
    AccessPoint {
        ssid: ssid.to_string(),
        rssi,
        channel,
    }
}

/// A BLE device fixture whose address ends in `last_octet`.
#[must_use]
pub fn test_ble_device(name: &str, last_octet: u8, rssi: i8) -> BleDevice {
    BleDevice {
        name: name.to_string(),
        address: MacAddress([0x24, 0x0A, 0xC4, 0x00, 0x00, last_octet]),
        rssi,
    }
}

/// Memory probe whose reading can be changed mid-test.
#[derive(Debug, Clone)]
pub struct SettableMemory {
    free: Arc<AtomicU64>,
}

impl SettableMemory {
    /// Probe starting at `free` bytes.
    #[must_use]
    pub fn new(free: u64) -> Self {
        Self {
            free: Arc::new(AtomicU64::new(free)),
        }
    }

    /// Change the reported free memory.
    pub fn set(&self, free: u64) {
        self.free.store(free, Ordering::SeqCst);
    }
}

impl MemoryProbe for SettableMemory {
    fn free_bytes(&self) -> u64 {
        self.free.load(Ordering::SeqCst)
    }
}

/// A [`MemoryStore`] that can be told to fail writes or deletes.
#[derive(Debug, Clone)]
pub struct FaultyStore {
    inner: Arc<MemoryStore>,
    fail_writes_to: Arc<Mutex<Option<String>>>,
    fail_deletes: Arc<AtomicBool>,
}

impl FaultyStore {
    /// Wrap a fresh memory store of `capacity_bytes`.
    #[must_use]
    pub fn new(capacity_bytes: u64) -> Self {
        Self {
            inner: Arc::new(MemoryStore::new(capacity_bytes)),
            fail_writes_to: Arc::new(Mutex::new(None)),
            fail_deletes: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Fail writes to paths ending in `suffix`.
    pub fn fail_writes_to(&self, suffix: impl Into<String>) {
        if let Ok(mut slot) = self.fail_writes_to.lock() {
            *slot = Some(suffix.into());
        }
    }

    /// Fail every directory or file deletion.
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    fn injected(path: &str) -> StoreError {
        StoreError::Io(std::io::Error::other(format!("injected failure at {path}")))
    }
}

#[async_trait]
impl BackingStore for FaultyStore {
    async fn exists(&self, path: &str) -> StoreResult<bool> {
        self.inner.exists(path).await
    }

    async fn read(&self, path: &str) -> StoreResult<Vec<u8>> {
        self.inner.read(path).await
    }

    async fn write(&self, path: &str, data: &[u8]) -> StoreResult<()> {
        let fail = self
            .fail_writes_to
            .lock()
            .map(|s| s.as_deref().is_some_and(|suffix| path.ends_with(suffix)))
            .unwrap_or(false);
        if fail {
            return Err(Self::injected(path));
        }
        self.inner.write(path, data).await
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Self::injected(path));
        }
        self.inner.delete(path).await
    }

    async fn list_directory(&self, path: &str) -> StoreResult<Vec<StoreDirEntry>> {
        self.inner.list_directory(path).await
    }

    async fn create_directory(&self, path: &str) -> StoreResult<()> {
        self.inner.create_directory(path).await
    }

    async fn delete_directory(&self, path: &str) -> StoreResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Self::injected(path));
        }
        self.inner.delete_directory(path).await
    }

    async fn space(&self) -> StoreResult<StoreSpace> {
        self.inner.space().await
    }
}
