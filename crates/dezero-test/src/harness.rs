//! A payload manager wired to in-memory collaborators.

use std::sync::Arc;
use std::time::Duration;

use dezero_payload::{
    AllowAllPolicy, BleScanModule, ManagerSettings, PayloadManager, PayloadManagerBuilder,
    PayloadType, WifiScanModule,
};
use dezero_store::BackingStore;

use crate::mocks::{
    FaultyStore, MockBackend, RecordingNotifier, ScriptedBleRadio, ScriptedWifiRadio,
    SettableMemory,
};

/// Store capacity used by [`TestBed`].
pub const TEST_STORE_CAPACITY: u64 = 256 * 1024;

/// Free memory reported by [`TestBed`] until changed.
pub const TEST_FREE_MEMORY: u64 = 128 * 1024;

/// Everything a payload manager test needs.
///
/// `lua` payloads run on [`MockBackend`]; `native` and `micropython` use the
/// real artifact backends. Both scanners are registered against scripted
/// radios, and every permission is granted.
pub struct TestBed {
    /// Backing store.
    pub store: FaultyStore,
    /// Free-memory probe.
    pub memory: SettableMemory,
    /// Backend serving `lua` payloads.
    pub backend: MockBackend,
    /// Notifier handed to the built-ins.
    pub notifier: RecordingNotifier,
    /// Radio behind `wifi_scan`.
    pub wifi: ScriptedWifiRadio,
    /// Radio behind `ble_scan`.
    pub ble: ScriptedBleRadio,
}

impl Default for TestBed {
    fn default() -> Self {
        Self::new()
    }
}

impl TestBed {
    /// A test bed with empty radios.
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: FaultyStore::new(TEST_STORE_CAPACITY),
            memory: SettableMemory::new(TEST_FREE_MEMORY),
            backend: MockBackend::new(),
            notifier: RecordingNotifier::new(),
            wifi: ScriptedWifiRadio::default(),
            ble: ScriptedBleRadio::default(),
        }
    }

    /// Replace the Wi-Fi radio.
    #[must_use]
    pub fn with_wifi(mut self, wifi: ScriptedWifiRadio) -> Self {
        self.wifi = wifi;
        self
    }

    /// Replace the BLE radio.
    #[must_use]
    pub fn with_ble(mut self, ble: ScriptedBleRadio) -> Self {
        self.ble = ble;
        self
    }

    /// A manager builder preloaded with this bed's collaborators.
    #[must_use]
    pub fn builder(&self) -> PayloadManagerBuilder {
        let store: Arc<dyn BackingStore> = Arc::new(self.store.clone());
        PayloadManager::builder(store)
            .memory_probe(Arc::new(self.memory.clone()))
            .permission_policy(Arc::new(AllowAllPolicy))
            .backend(PayloadType::Lua, Arc::new(self.backend.clone()))
            .builtin(Arc::new(WifiScanModule::new(
                Arc::new(self.wifi.clone()),
                Arc::new(self.notifier.clone()),
            )))
            .builtin(Arc::new(BleScanModule::new(
                Arc::new(self.ble.clone()),
                Arc::new(self.notifier.clone()),
            )))
    }

    /// A manager with a 10 second run budget.
    #[must_use]
    pub fn manager(&self) -> PayloadManager {
        self.builder()
            .settings(ManagerSettings {
                cpu_time_limit: Duration::from_secs(10),
                ..ManagerSettings::default()
            })
            .build()
    }
}
