//! Radio hardware abstraction used by built-in modules.
//!
//! Every call carries a [`HalScope`] naming the payload on whose behalf it is
//! made and the permissions that payload was granted, so implementations can
//! refuse capabilities the payload does not hold.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::permission::{Permission, PermissionSet};

/// Errors reported by radio drivers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HalError {
    /// The calling payload does not hold the required permission.
    #[error("permission `{0}` not granted to caller")]
    NotGranted(Permission),
    /// The radio is absent or powered down.
    #[error("radio unavailable: {0}")]
    Unavailable(String),
    /// The driver reported a failure.
    #[error("driver error: {0}")]
    Driver(String),
}

/// The identity and grants a HAL call is made under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HalScope {
    /// Calling payload.
    pub payload_id: String,
    /// Permissions granted to the caller.
    pub granted: PermissionSet,
}

impl HalScope {
    /// Scope for `payload_id` with `granted` permissions.
    #[must_use]
    pub fn new(payload_id: impl Into<String>, granted: PermissionSet) -> Self {
        Self {
            payload_id: payload_id.into(),
            granted,
        }
    }

    /// Fail unless `permission` was granted.
    ///
    /// # Errors
    ///
    /// Returns [`HalError::NotGranted`].
    pub fn require(&self, permission: Permission) -> Result<(), HalError> {
        if self.granted.contains(permission) {
            Ok(())
        } else {
            Err(HalError::NotGranted(permission))
        }
    }
}

/// A six-byte hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddress(pub [u8; 6]);

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl Serialize for MacAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One access point seen by a Wi-Fi scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPoint {
    /// Network name.
    pub ssid: String,
    /// Signal strength in dBm.
    pub rssi: i8,
    /// Primary channel.
    pub channel: u8,
}

/// One device seen by a BLE scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BleDevice {
    /// Advertised name, empty if none.
    pub name: String,
    /// Device address.
    pub address: MacAddress,
    /// Signal strength in dBm.
    pub rssi: i8,
}

/// Wi-Fi radio driver.
#[async_trait]
pub trait WifiRadio: Send + Sync {
    /// Begin an asynchronous scan.
    async fn start_scan(&self, scope: &HalScope) -> Result<(), HalError>;

    /// Access points collected by the last scan.
    async fn scan_results(&self, scope: &HalScope) -> Result<Vec<AccessPoint>, HalError>;
}

/// BLE radio driver.
#[async_trait]
pub trait BleRadio: Send + Sync {
    /// Begin scanning for `window`.
    async fn start_scan(&self, scope: &HalScope, window: Duration) -> Result<(), HalError>;

    /// Devices collected so far.
    async fn scan_results(&self, scope: &HalScope) -> Result<Vec<BleDevice>, HalError>;

    /// End the scan.
    async fn stop_scan(&self, scope: &HalScope) -> Result<(), HalError>;
}
