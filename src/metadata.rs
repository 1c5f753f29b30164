//! Device metadata snapshot.
//!
//! [`DeviceMeta`] describes the device a session selected. Backends fill what they
//! know; unknown fields stay `None`. It is returned from
//! [`DeviceSession::connect`](crate::session::DeviceSession::connect) and kept for
//! the lifetime of the open handle.
//!
//! `vid`/`pid` always match the session's filter. `path` is platform-specific and
//! should be treated as diagnostic.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMeta {
    /// Short bus hint (`"usb"`, `"virtual"`).
    pub bus: Option<String>,

    /// USB Vendor ID.
    pub vid: Option<u16>,

    /// USB Product ID.
    pub pid: Option<u16>,

    /// Product string reported by firmware.
    pub product_string: Option<String>,

    pub serial_number: Option<String>,

    /// HID interface index; `None` when the platform does not report one.
    pub interface_number: Option<i32>,

    pub usage_page: Option<u16>,

    pub usage: Option<u16>,

    /// OS path to the device node.
    pub path: Option<String>,
}

impl fmt::Display for DeviceMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.product_string.as_deref().unwrap_or("Unknown");
        match (self.vid, self.pid) {
            (Some(vid), Some(pid)) => write!(f, "{name} [{vid:04x}:{pid:04x}]"),
            _ => f.write_str(name),
        }
    }
}
