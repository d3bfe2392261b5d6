use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use super::{BUDGET_SLACK, BuiltinModule, BuiltinReport, MAX_SCAN_RESULTS, encode_results, hal_failure};
use crate::context::PayloadParams;
use crate::error::PayloadResult;
use crate::hal::{AccessPoint, HalScope, WifiRadio};
use crate::notify::Notifier;
use crate::permission::Permission;

/// How long the radio listens before results are collected.
pub const WIFI_SCAN_WINDOW: Duration = Duration::from_secs(3);

#[derive(Serialize)]
struct ApRecord<'a> {
    ssid: &'a str,
    rssi: i8,
    ch: u8,
}

/// Scans for access points and reports the strongest ones.
pub struct WifiScanModule {
    radio: Arc<dyn WifiRadio>,
    notifier: Arc<dyn Notifier>,
    window: Duration,
}

impl WifiScanModule {
    /// Module using `radio` for scans and `notifier` for results.
    #[must_use]
    pub fn new(radio: Arc<dyn WifiRadio>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            radio,
            notifier,
            window: WIFI_SCAN_WINDOW,
        }
    }
}

#[async_trait]
impl BuiltinModule for WifiScanModule {
    fn name(&self) -> &'static str {
        "wifi_scan"
    }

    fn required_permission(&self) -> Permission {
        Permission::WifiScan
    }

    fn budget(&self, _params: &PayloadParams) -> Duration {
        self.window.saturating_add(BUDGET_SLACK)
    }

    async fn execute(
        &self,
        scope: &HalScope,
        _params: &PayloadParams,
    ) -> PayloadResult<BuiltinReport> {
        self.radio
            .start_scan(scope)
            .await
            .map_err(|e| hal_failure(self.name(), &e))?;
        tokio::time::sleep(self.window).await;

        let mut found: Vec<AccessPoint> = self
            .radio
            .scan_results(scope)
            .await
            .map_err(|e| hal_failure(self.name(), &e))?;
        found.sort_by(|a, b| b.rssi.cmp(&a.rssi));
        found.truncate(MAX_SCAN_RESULTS);

        let records: Vec<ApRecord<'_>> = found
            .iter()
            .map(|ap| ApRecord {
                ssid: &ap.ssid,
                rssi: ap.rssi,
                ch: ap.channel,
            })
            .collect();
        let blob = encode_results(self.name(), &records)?;
        self.notifier.notify(&blob);

        info!(payload_id = %scope.payload_id, results = records.len(), "Wi-Fi scan complete");
        Ok(BuiltinReport {
            module: self.name().to_string(),
            results: records.len(),
        })
    }
}
