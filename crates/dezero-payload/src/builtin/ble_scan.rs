use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use super::{BUDGET_SLACK, BuiltinModule, BuiltinReport, MAX_SCAN_RESULTS, encode_results, hal_failure};
use crate::context::PayloadParams;
use crate::error::{PayloadError, PayloadResult};
use crate::hal::{BleRadio, HalScope, MacAddress};
use crate::notify::Notifier;
use crate::permission::Permission;

/// Scan window used when no `duration_ms` parameter is given.
pub const BLE_SCAN_WINDOW: Duration = Duration::from_secs(5);

/// Longest scan window a caller may request.
pub const MAX_BLE_SCAN_WINDOW: Duration = Duration::from_secs(30);

const DURATION_PARAM: &str = "duration_ms";

#[derive(Serialize)]
struct DeviceRecord<'a> {
    name: &'a str,
    addr: MacAddress,
    rssi: i8,
}

/// Scans for BLE advertisers and reports the strongest ones.
pub struct BleScanModule {
    radio: Arc<dyn BleRadio>,
    notifier: Arc<dyn Notifier>,
}

impl BleScanModule {
    /// Module using `radio` for scans and `notifier` for results.
    #[must_use]
    pub fn new(radio: Arc<dyn BleRadio>, notifier: Arc<dyn Notifier>) -> Self {
        Self { radio, notifier }
    }

    fn window(params: &PayloadParams) -> PayloadResult<Duration> {
        let Some(raw) = params.get(DURATION_PARAM) else {
            return Ok(BLE_SCAN_WINDOW);
        };
        let ms: u64 = raw.trim().parse().map_err(|_| PayloadError::Builtin {
            module: "ble_scan".into(),
            reason: format!("`{DURATION_PARAM}` must be a whole number of milliseconds, got `{raw}`"),
        })?;
        if ms == 0 {
            return Err(PayloadError::Builtin {
                module: "ble_scan".into(),
                reason: format!("`{DURATION_PARAM}` must be positive"),
            });
        }
        Ok(Duration::from_millis(ms).min(MAX_BLE_SCAN_WINDOW))
    }
}

#[async_trait]
impl BuiltinModule for BleScanModule {
    fn name(&self) -> &'static str {
        "ble_scan"
    }

    fn required_permission(&self) -> Permission {
        Permission::BleScan
    }

    fn budget(&self, params: &PayloadParams) -> Duration {
        Self::window(params)
            .unwrap_or(BLE_SCAN_WINDOW)
            .saturating_add(BUDGET_SLACK)
    }

    async fn execute(
        &self,
        scope: &HalScope,
        params: &PayloadParams,
    ) -> PayloadResult<BuiltinReport> {
        let window = Self::window(params)?;
        self.radio
            .start_scan(scope, window)
            .await
            .map_err(|e| hal_failure(self.name(), &e))?;
        tokio::time::sleep(window).await;

        let collected = self.radio.scan_results(scope).await;
        if let Err(e) = self.radio.stop_scan(scope).await {
            warn!(payload_id = %scope.payload_id, error = %e, "Failed to stop BLE scan");
        }
        let mut found = collected.map_err(|e| hal_failure(self.name(), &e))?;
        found.sort_by(|a, b| b.rssi.cmp(&a.rssi));
        found.truncate(MAX_SCAN_RESULTS);

        let records: Vec<DeviceRecord<'_>> = found
            .iter()
            .map(|d| DeviceRecord {
                name: &d.name,
                addr: d.address,
                rssi: d.rssi,
            })
            .collect();
        let blob = encode_results(self.name(), &records)?;
        self.notifier.notify(&blob);

        info!(
            payload_id = %scope.payload_id,
            window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX),
            results = records.len(),
            "BLE scan complete"
        );
        Ok(BuiltinReport {
            module: self.name().to_string(),
            results: records.len(),
        })
    }
}
