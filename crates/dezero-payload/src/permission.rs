//! Capability permissions a payload can request.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A single capability from the fixed permission enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Permission {
    /// Passive Wi-Fi scanning.
    WifiScan,
    /// Raw 802.11 frame injection.
    WifiInject,
    /// BLE scanning.
    BleScan,
    /// BLE advertising.
    BleAdvertise,
    /// Reading GPIO pins.
    GpioRead,
    /// Driving GPIO pins.
    GpioWrite,
    /// Drawing to the display.
    DisplayWrite,
    /// Reading from the file store.
    StorageRead,
    /// Writing to the file store.
    StorageWrite,
    /// Outbound network access.
    Network,
}

impl Permission {
    /// Every permission, in bit order.
    pub const ALL: [Self; 10] = [
        Self::WifiScan,
        Self::WifiInject,
        Self::BleScan,
        Self::BleAdvertise,
        Self::GpioRead,
        Self::GpioWrite,
        Self::DisplayWrite,
        Self::StorageRead,
        Self::StorageWrite,
        Self::Network,
    ];

    /// The bit this permission occupies in a [`PermissionSet`].
    #[must_use]
    pub const fn bit(self) -> u32 {
        match self {
            Self::WifiScan => 0x001,
            Self::WifiInject => 0x002,
            Self::BleScan => 0x004,
            Self::BleAdvertise => 0x008,
            Self::GpioRead => 0x010,
            Self::GpioWrite => 0x020,
            Self::DisplayWrite => 0x040,
            Self::StorageRead => 0x080,
            Self::StorageWrite => 0x100,
            Self::Network => 0x200,
        }
    }

    /// Manifest spelling of this permission.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WifiScan => "wifi_scan",
            Self::WifiInject => "wifi_inject",
            Self::BleScan => "ble_scan",
            Self::BleAdvertise => "ble_advertise",
            Self::GpioRead => "gpio_read",
            Self::GpioWrite => "gpio_write",
            Self::DisplayWrite => "display_write",
            Self::StorageRead => "storage_read",
            Self::StorageWrite => "storage_write",
            Self::Network => "network",
        }
    }

    /// Case-sensitive lookup by manifest spelling.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == name)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| format!("unknown permission: {s}"))
    }
}

impl Serialize for Permission {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Permission {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A set of [`Permission`]s packed into a bit field.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PermissionSet(u32);

impl PermissionSet {
    /// The empty set.
    pub const EMPTY: Self = Self(0);

    const MASK: u32 = 0x3FF;

    /// Build a set from raw bits, dropping bits outside the enumeration.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & Self::MASK)
    }

    /// Every permission.
    #[must_use]
    pub const fn all() -> Self {
        Self(Self::MASK)
    }

    /// Raw bit representation.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Add a permission.
    pub fn insert(&mut self, permission: Permission) {
        self.0 |= permission.bit();
    }

    /// Whether the set holds `permission`.
    #[must_use]
    pub const fn contains(self, permission: Permission) -> bool {
        self.0 & permission.bit() != 0
    }

    /// Whether every permission of `other` is in this set.
    #[must_use]
    pub const fn contains_all(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Permissions in `self` that are not in `other`.
    #[must_use]
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Permissions in both sets.
    #[must_use]
    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Permissions in either set.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Whether the set is empty.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterate the permissions in bit order.
    pub fn iter(self) -> impl Iterator<Item = Permission> {
        Permission::ALL.into_iter().filter(move |p| self.contains(*p))
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        let mut set = Self::EMPTY;
        for permission in iter {
            set.insert(permission);
        }
        set
    }
}

impl From<Permission> for PermissionSet {
    fn from(permission: Permission) -> Self {
        Self(permission.bit())
    }
}

impl fmt::Display for PermissionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("(none)");
        }
        let names: Vec<&str> = self.iter().map(Permission::as_str).collect();
        f.write_str(&names.join(","))
    }
}

impl fmt::Debug for PermissionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl Serialize for PermissionSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl<'de> Deserialize<'de> for PermissionSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let list = Vec::<Permission>::deserialize(deserializer)?;
        Ok(list.into_iter().collect())
    }
}
