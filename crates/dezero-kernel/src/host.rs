//! Host stand-ins for the device's radios and companion link.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info};

use dezero_payload::{
    AccessPoint, BleDevice, BleRadio, HalError, HalScope, Notifier, Permission, WifiRadio,
};

/// Wi-Fi radio that reports a fixed set of access points.
#[derive(Debug, Clone, Default)]
pub struct LoopbackWifi {
    networks: Vec<AccessPoint>,
}

impl LoopbackWifi {
    /// Radio reporting `networks` on every scan.
    #[must_use]
    pub fn new(networks: Vec<AccessPoint>) -> Self {
        Self { networks }
    }
}

#[async_trait]
impl WifiRadio for LoopbackWifi {
    async fn start_scan(&self, scope: &HalScope) -> Result<(), HalError> {
        scope.require(Permission::WifiScan)?;
        debug!(payload_id = %scope.payload_id, "Loopback Wi-Fi scan started");
        Ok(())
    }

    async fn scan_results(&self, scope: &HalScope) -> Result<Vec<AccessPoint>, HalError> {
        scope.require(Permission::WifiScan)?;
        Ok(self.networks.clone())
    }
}

/// BLE radio that reports a fixed set of devices.
#[derive(Debug, Clone, Default)]
pub struct LoopbackBle {
    devices: Vec<BleDevice>,
}

impl LoopbackBle {
    /// Radio reporting `devices` on every scan.
    #[must_use]
    pub fn new(devices: Vec<BleDevice>) -> Self {
        Self { devices }
    }
}

#[async_trait]
impl BleRadio for LoopbackBle {
    async fn start_scan(&self, scope: &HalScope, window: Duration) -> Result<(), HalError> {
        scope.require(Permission::BleScan)?;
        debug!(
            payload_id = %scope.payload_id,
            window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX),
            "Loopback BLE scan started"
        );
        Ok(())
    }

    async fn scan_results(&self, scope: &HalScope) -> Result<Vec<BleDevice>, HalError> {
        scope.require(Permission::BleScan)?;
        Ok(self.devices.clone())
    }

    async fn stop_scan(&self, _scope: &HalScope) -> Result<(), HalError> {
        Ok(())
    }
}

/// Notifier that writes each blob to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, blob: &[u8]) {
        info!(bytes = blob.len(), body = %String::from_utf8_lossy(blob), "Notification");
    }
}

/// Notifier that forwards each blob over a channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl ChannelNotifier {
    /// A notifier and the receiving end of its channel.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, blob: &[u8]) {
        if self.tx.send(blob.to_vec()).is_err() {
            debug!("Notification receiver gone");
        }
    }
}

#[cfg(test)]
mod tests {
    use dezero_payload::{MacAddress, PermissionSet};

    use super::*;

    #[tokio::test]
    async fn test_loopback_wifi_checks_scope() {
        let radio = LoopbackWifi::new(vec![AccessPoint {
            ssid: "lab".into(),
            rssi: -42,
            channel: 6,
        }]);
        let denied = HalScope::new("p", PermissionSet::EMPTY);
        assert_eq!(
            radio.start_scan(&denied).await,
            Err(HalError::NotGranted(Permission::WifiScan))
        );

        let granted = HalScope::new("p", Permission::WifiScan.into());
        radio.start_scan(&granted).await.unwrap();
        assert_eq!(radio.scan_results(&granted).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_loopback_ble() {
        let radio = LoopbackBle::new(vec![BleDevice {
            name: "tag".into(),
            address: MacAddress([1, 2, 3, 4, 5, 6]),
            rssi: -70,
        }]);
        let scope = HalScope::new("p", Permission::BleScan.into());
        radio.start_scan(&scope, Duration::from_secs(1)).await.unwrap();
        assert_eq!(radio.scan_results(&scope).await.unwrap()[0].name, "tag");
        radio.stop_scan(&scope).await.unwrap();
    }

    #[tokio::test]
    async fn test_channel_notifier() {
        let (notifier, mut rx) = ChannelNotifier::new();
        notifier.notify(b"[]");
        assert_eq!(rx.recv().await.unwrap(), b"[]".to_vec());
        drop(rx);
        notifier.notify(b"ignored");
    }
}
