//! Kernel assembly and the supervisor tick loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use dezero_config::{Config, PolicyMode};
use dezero_payload::{
    AllowAllPolicy, BleRadio, BleScanModule, FixedMemory, GrantListPolicy, InstallLimits,
    ManagerSettings, MemoryProbe, Notifier, PayloadManager, Permission, PermissionPolicy,
    PermissionSet, WifiRadio, WifiScanModule,
};
use dezero_store::{BackingStore, HostStore};

use crate::error::KernelResult;
use crate::host::{LogNotifier, LoopbackBle, LoopbackWifi};
use crate::journal::EventJournal;

/// Collaborators the kernel runs on top of.
pub struct KernelParts {
    /// Persistent store.
    pub store: Arc<dyn BackingStore>,
    /// Free-memory probe used by admission and `get_info`.
    pub memory: Arc<dyn MemoryProbe>,
    /// Radio behind the `wifi_scan` built-in.
    pub wifi: Arc<dyn WifiRadio>,
    /// Radio behind the `ble_scan` built-in.
    pub ble: Arc<dyn BleRadio>,
    /// Where built-in results are delivered.
    pub notifier: Arc<dyn Notifier>,
}

impl KernelParts {
    /// Host parts for `config`: a directory store, a fixed memory budget,
    /// silent radios and a logging notifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage root cannot be created.
    pub async fn host(config: &Config) -> KernelResult<Self> {
        let capacity = config.storage.capacity_kb.saturating_mul(1024);
        let store = HostStore::open(&config.storage.root, capacity).await?;
        Ok(Self {
            store: Arc::new(store),
            memory: Arc::new(FixedMemory(config.runtime.memory_budget_kb.saturating_mul(1024))),
            wifi: Arc::new(LoopbackWifi::default()),
            ble: Arc::new(LoopbackBle::default()),
            notifier: Arc::new(LogNotifier),
        })
    }

    /// Replace the notifier.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }
}

/// The device runtime: payload manager, command surface and supervisor.
pub struct Kernel {
    pub(crate) manager: PayloadManager,
    pub(crate) store: Arc<dyn BackingStore>,
    pub(crate) memory: Arc<dyn MemoryProbe>,
    pub(crate) journal: EventJournal,
    pub(crate) booted: Instant,
    tick_interval: Duration,
    shutdown: CancellationToken,
}

impl Kernel {
    /// Boot on host parts derived from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened or the payload
    /// directory cannot be scanned.
    pub async fn boot(config: &Config) -> KernelResult<Self> {
        let parts = KernelParts::host(config).await?;
        Self::assemble(config, parts).await
    }

    /// Wire a kernel from `config` and explicit collaborators, then scan
    /// installed payloads.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload directory cannot be scanned.
    pub async fn assemble(config: &Config, parts: KernelParts) -> KernelResult<Self> {
        let settings = manager_settings(config);
        let manager = PayloadManager::builder(Arc::clone(&parts.store))
            .settings(settings)
            .memory_probe(Arc::clone(&parts.memory))
            .permission_policy(permission_policy(config))
            .builtin(Arc::new(WifiScanModule::new(
                parts.wifi,
                Arc::clone(&parts.notifier),
            )))
            .builtin(Arc::new(BleScanModule::new(parts.ble, parts.notifier)))
            .build();

        let booted = Instant::now();
        let journal = EventJournal::new(manager.subscribe(), booted);
        let count = manager.scan().await?;
        info!(
            payloads = count,
            root = %config.storage.root.display(),
            "Kernel ready"
        );

        Ok(Self {
            manager,
            store: parts.store,
            memory: parts.memory,
            journal,
            booted,
            tick_interval: Duration::from_millis(config.runtime.tick_interval_ms),
            shutdown: CancellationToken::new(),
        })
    }

    /// The payload manager.
    #[must_use]
    pub fn manager(&self) -> &PayloadManager {
        &self.manager
    }

    /// The event journal.
    #[must_use]
    pub fn journal(&self) -> &EventJournal {
        &self.journal
    }

    /// Interval between budget sweeps.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Token cancelled when the kernel shuts down or reboots.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Request shutdown.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Milliseconds since assembly.
    #[must_use]
    pub fn uptime_ms(&self) -> u64 {
        u64::try_from(self.booted.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Spawn the supervisor loop. It sweeps budgets every tick, and on
    /// shutdown stops every live run before exiting.
    #[must_use]
    pub fn spawn_supervisor(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let kernel = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(kernel.tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = kernel.shutdown.cancelled() => break,
                    _ = ticker.tick() => {},
                }
                let violations = kernel.manager.tick().await;
                for violation in &violations {
                    warn!(payload_id = %violation.payload_id(), %violation, "Budget enforced");
                }
                kernel.journal.collect().await;
            }
            kernel.manager.stop_all().await;
            kernel.journal.collect().await;
            info!("Supervisor stopped");
        })
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("manager", &self.manager)
            .field("tick_interval", &self.tick_interval)
            .finish_non_exhaustive()
    }
}

/// Manager settings derived from config.
#[must_use]
pub fn manager_settings(config: &Config) -> ManagerSettings {
    ManagerSettings {
        payload_dir: config.storage.payload_dir.clone(),
        cpu_time_limit: Duration::from_millis(config.runtime.cpu_time_limit_ms),
        limits: InstallLimits {
            max_payload_size: config.runtime.max_payload_size_kb.saturating_mul(1024),
            max_payloads: config.runtime.max_payloads,
        },
        strict_manifests: config.runtime.strict_manifests,
    }
}

/// Permission policy derived from config.
#[must_use]
pub fn permission_policy(config: &Config) -> Arc<dyn PermissionPolicy> {
    match config.policy.mode {
        PolicyMode::AllowAll => Arc::new(AllowAllPolicy),
        PolicyMode::GrantList => {
            let granted: PermissionSet = config
                .policy
                .granted
                .iter()
                .filter_map(|name| {
                    let permission = Permission::from_name(name);
                    if permission.is_none() {
                        warn!(permission = %name, "Ignoring unknown granted permission");
                    }
                    permission
                })
                .collect();
            Arc::new(GrantListPolicy::new(granted))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manager_settings_from_config() {
        let mut config = Config::default();
        config.runtime.cpu_time_limit_ms = 1500;
        config.runtime.max_payload_size_kb = 4;
        config.runtime.strict_manifests = true;

        let settings = manager_settings(&config);
        assert_eq!(settings.cpu_time_limit, Duration::from_millis(1500));
        assert_eq!(settings.limits.max_payload_size, 4096);
        assert_eq!(settings.limits.max_payloads, 32);
        assert_eq!(settings.payload_dir, "payloads");
        assert!(settings.strict_manifests);
    }

    #[test]
    fn test_grant_list_policy_from_config() {
        let config = Config::default();
        let policy = permission_policy(&config);
        let requested: PermissionSet = [Permission::WifiScan, Permission::WifiInject]
            .into_iter()
            .collect();
        assert_eq!(
            policy.denied("any", requested),
            PermissionSet::from(Permission::WifiInject)
        );
    }

    #[test]
    fn test_allow_all_policy_from_config() {
        let mut config = Config::default();
        config.policy.mode = PolicyMode::AllowAll;
        let policy = permission_policy(&config);
        assert!(policy.denied("any", PermissionSet::all()).is_empty());
    }
}
