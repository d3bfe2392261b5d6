//! Outbound result channel to the connected companion device.

/// Delivers opaque result blobs to whoever is listening.
///
/// Delivery is fire-and-forget: implementations must not block and cannot
/// report failure back to the caller.
pub trait Notifier: Send + Sync {
    /// Send one blob.
    fn notify(&self, blob: &[u8]);
}

/// A notifier that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _blob: &[u8]) {}
}
