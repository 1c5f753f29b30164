//! Transport capability.
//!
//! The session never talks to an OS HID stack directly. It is handed a
//! [`HidTransport`] that can select devices, and drives the selected
//! [`HidDevice`] through this small surface only:
//! request-device, open, close, send-report, and add/remove listener.
//!
//! Backends live in [`crate::backends`]; tests substitute the virtual backend.

use crate::error::TransportError;
use crate::eventbus::{DeviceListener, EventFilter, ListenerId};
use crate::metadata::DeviceMeta;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Vendor/product pair a device must match to be offered for selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceFilter {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceFilter {
    /// The EZ-GPIO firmware's identifiers.
    pub const EZ_GPIO: DeviceFilter = DeviceFilter {
        vendor_id: 0x6666,
        product_id: 0x6910,
    };

    #[inline]
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }
}

impl Default for DeviceFilter {
    fn default() -> Self {
        Self::EZ_GPIO
    }
}

/// Device-selection half of the capability.
#[async_trait]
pub trait HidTransport: Send + Sync + 'static {
    type Device: HidDevice;

    /// Offer the devices matching `filter` for selection.
    ///
    /// May wait on a user for an unbounded time. An empty result means
    /// nothing matched (or the user chose nothing).
    async fn request_device(&self, filter: &DeviceFilter)
        -> Result<Vec<Self::Device>, TransportError>;
}

/// One selectable device.
#[async_trait]
pub trait HidDevice: Send + Sync + 'static {
    fn meta(&self) -> DeviceMeta;

    async fn open(&self) -> Result<(), TransportError>;

    /// Release the OS handle. Closing an already-closed device is not an error.
    fn close(&self) -> Result<(), TransportError>;

    /// Transmit one output report. `data` excludes the report-id byte.
    async fn send_report(&self, report_id: u8, data: &[u8]) -> Result<(), TransportError>;

    /// Subscribe to input-report and/or disconnect notifications.
    fn add_listener(&self, listener: Box<dyn DeviceListener>, filter: EventFilter) -> ListenerId;

    /// Unsubscribe. Returns `false` if `id` was not registered.
    fn remove_listener(&self, id: ListenerId) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_requires_both_ids() {
        let f = DeviceFilter::default();
        assert!(f.matches(0x6666, 0x6910));
        assert!(!f.matches(0x6666, 0x0001));
        assert!(!f.matches(0x1209, 0x6910));
    }
}
