//! Transport backends for `ezgpio`.
//!
//! Implementations of [`HidTransport`](crate::device::HidTransport) and
//! [`HidDevice`](crate::device::HidDevice).
//!
//! # Feature flags
//! - **`virtual`** (default): in-memory bridge emulation for tests and demos.
//! - **`hid`**: real devices through `hidapi`. Needs the platform HID libraries
//!   (libudev on Linux) at build time.

#[cfg(feature = "virtual")]
#[cfg_attr(docsrs, doc(cfg(feature = "virtual")))]
pub mod virtual_device;

#[cfg(feature = "hid")]
#[cfg_attr(docsrs, doc(cfg(feature = "hid")))]
pub mod hid;
