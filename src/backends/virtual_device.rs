//! In-memory transport and device.
//!
//! [`VirtualTransport`] stands in for a HID stack: it offers whatever
//! [`VirtualDevice`]s are attached and match the filter. [`VirtualDevice`] emulates
//! the bridge firmware closely enough to drive a session end to end:
//!
//! - a 16-byte output report updates its pin model (other lengths are recorded but
//!   otherwise ignored, like the firmware does);
//! - the input word it reports is `(output & direction) | (external & !direction)`,
//!   i.e. outputs read back what is driven and inputs read what the outside world
//!   drives via [`VirtualDevice::set_external_levels`];
//! - with echo enabled, every accepted output report is answered with an input report.
//!
//! Test hooks let callers inject raw frames, unplug the device (also from inside
//! `open`), fail opens or writes, and hold device selection open to observe the
//! `Connecting` state.

use crate::codec::{InputReport, OutputReport, OUTPUT_REPORT_LEN};
use crate::device::{DeviceFilter, HidDevice, HidTransport};
use crate::error::TransportError;
use crate::event::DeviceEvent;
use crate::eventbus::{DeviceListener, EventFilter, ListenerId, ListenerRegistry};
use crate::metadata::DeviceMeta;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;

/// One report written to a virtual device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentReport {
    pub report_id: u8,
    pub data: Vec<u8>,
}

#[derive(Default)]
struct PinModel {
    report: OutputReport,
    external: u32,
}

impl PinModel {
    fn input(&self) -> InputReport {
        let dir = self.report.direction;
        InputReport {
            input: (self.report.output & dir) | (self.external & !dir),
        }
    }
}

#[derive(Default)]
struct DeviceState {
    open: bool,
    open_error: Option<String>,
    write_error: Option<String>,
    echo: bool,
    during_open: Vec<DeviceEvent>,
    sent: Vec<SentReport>,
    pins: PinModel,
    opens: usize,
    closes: usize,
}

struct DeviceInner {
    meta: DeviceMeta,
    state: Mutex<DeviceState>,
    listeners: Mutex<ListenerRegistry>,
}

/// Emulated EZ-GPIO bridge. Clones share the same device.
#[derive(Clone)]
pub struct VirtualDevice {
    inner: Arc<DeviceInner>,
}

impl VirtualDevice {
    /// A device carrying the stock EZ-GPIO identifiers.
    pub fn new(name: &str) -> Self {
        let DeviceFilter {
            vendor_id,
            product_id,
        } = DeviceFilter::EZ_GPIO;
        Self::with_ids(name, vendor_id, product_id)
    }

    pub fn with_ids(name: &str, vendor_id: u16, product_id: u16) -> Self {
        let meta = DeviceMeta {
            bus: Some("virtual".into()),
            vid: Some(vendor_id),
            pid: Some(product_id),
            product_string: Some(name.to_string()),
            path: Some(format!("virtual:{name}")),
            ..DeviceMeta::default()
        };
        Self {
            inner: Arc::new(DeviceInner {
                meta,
                state: Mutex::new(DeviceState::default()),
                listeners: Mutex::new(ListenerRegistry::new()),
            }),
        }
    }

    /// Make subsequent opens fail with `reason`.
    pub fn fail_open(&self, reason: &str) {
        self.inner.state.lock().open_error = Some(reason.to_string());
    }

    /// Make subsequent writes fail with `reason`.
    pub fn fail_writes(&self, reason: &str) {
        self.inner.state.lock().write_error = Some(reason.to_string());
    }

    /// Deliver `event` from inside the next open, before it returns.
    pub fn emit_during_open(&self, event: DeviceEvent) {
        self.inner.state.lock().during_open.push(event);
    }

    /// Answer every accepted output report with an input report.
    pub fn set_echo(&self, echo: bool) {
        self.inner.state.lock().echo = echo;
    }

    /// Drive the levels seen on input channels and report them.
    pub fn set_external_levels(&self, levels: u32) {
        let report = {
            let mut state = self.inner.state.lock();
            state.pins.external = levels;
            state.pins.input()
        };
        self.inject_report(&report.to_bytes());
    }

    /// Deliver a raw input frame to listeners, whatever its length.
    pub fn inject_report(&self, data: &[u8]) {
        self.emit(&DeviceEvent::InputReport {
            report_id: 0,
            data: data.to_vec(),
        });
    }

    /// Simulate the device going away.
    pub fn unplug(&self) {
        self.emit(&DeviceEvent::Disconnected);
    }

    pub fn is_open(&self) -> bool {
        self.inner.state.lock().open
    }

    pub fn open_count(&self) -> usize {
        self.inner.state.lock().opens
    }

    pub fn close_count(&self) -> usize {
        self.inner.state.lock().closes
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    pub fn sent_reports(&self) -> Vec<SentReport> {
        self.inner.state.lock().sent.clone()
    }

    /// The pin configuration from the last accepted output report.
    pub fn last_output(&self) -> Option<OutputReport> {
        let state = self.inner.state.lock();
        state
            .sent
            .iter()
            .rev()
            .find(|r| r.data.len() == OUTPUT_REPORT_LEN)
            .map(|_| state.pins.report)
    }

    fn emit(&self, event: &DeviceEvent) {
        self.inner.listeners.lock().emit(event);
    }
}

#[async_trait]
impl HidDevice for VirtualDevice {
    fn meta(&self) -> DeviceMeta {
        self.inner.meta.clone()
    }

    async fn open(&self) -> Result<(), TransportError> {
        let pending = {
            let mut state = self.inner.state.lock();
            if let Some(reason) = &state.open_error {
                return Err(TransportError::Open(reason.clone()));
            }
            state.open = true;
            state.opens += 1;
            std::mem::take(&mut state.during_open)
        };
        for event in &pending {
            self.emit(event);
        }
        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        let mut state = self.inner.state.lock();
        if state.open {
            state.open = false;
            state.closes += 1;
        }
        Ok(())
    }

    async fn send_report(&self, report_id: u8, data: &[u8]) -> Result<(), TransportError> {
        let echo = {
            let mut state = self.inner.state.lock();
            if !state.open {
                return Err(TransportError::Closed);
            }
            if let Some(reason) = &state.write_error {
                return Err(TransportError::Write(reason.clone()));
            }
            state.sent.push(SentReport {
                report_id,
                data: data.to_vec(),
            });
            match <&[u8; OUTPUT_REPORT_LEN]>::try_from(data) {
                Ok(bytes) => {
                    state.pins.report = OutputReport::from_bytes(bytes);
                    state.echo.then(|| state.pins.input())
                }
                Err(_) => None,
            }
        };
        if let Some(report) = echo {
            self.inject_report(&report.to_bytes());
        }
        Ok(())
    }

    fn add_listener(&self, listener: Box<dyn DeviceListener>, filter: EventFilter) -> ListenerId {
        self.inner.listeners.lock().add(listener, filter)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.lock().remove(id)
    }
}

#[derive(Default)]
struct TransportState {
    devices: Vec<VirtualDevice>,
    gate: Option<Arc<Notify>>,
    selection_error: Option<String>,
    requests: usize,
}

/// Device-selection stand-in. Clones share the same device list.
#[derive(Clone, Default)]
pub struct VirtualTransport {
    inner: Arc<Mutex<TransportState>>,
}

impl VirtualTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(device: VirtualDevice) -> Self {
        let transport = Self::new();
        transport.attach(device);
        transport
    }

    /// Make `device` selectable.
    pub fn attach(&self, device: VirtualDevice) {
        self.inner.lock().devices.push(device);
    }

    pub fn detach_all(&self) {
        self.inner.lock().devices.clear();
    }

    /// Make the selection capability itself fail.
    pub fn fail_selection(&self, reason: &str) {
        self.inner.lock().selection_error = Some(reason.to_string());
    }

    /// Block selection until the returned gate is released, like a pending prompt.
    pub fn hold_selection(&self) -> SelectionGate {
        let notify = Arc::new(Notify::new());
        self.inner.lock().gate = Some(Arc::clone(&notify));
        SelectionGate {
            transport: self.clone(),
            notify,
        }
    }

    /// How many times selection has been requested.
    pub fn selection_requests(&self) -> usize {
        self.inner.lock().requests
    }
}

#[async_trait]
impl HidTransport for VirtualTransport {
    type Device = VirtualDevice;

    async fn request_device(
        &self,
        filter: &DeviceFilter,
    ) -> Result<Vec<VirtualDevice>, TransportError> {
        let gate = {
            let mut state = self.inner.lock();
            state.requests += 1;
            state.gate.clone()
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let state = self.inner.lock();
        if let Some(reason) = &state.selection_error {
            return Err(TransportError::Selection(reason.clone()));
        }
        Ok(state
            .devices
            .iter()
            .filter(|d| {
                let meta = &d.inner.meta;
                matches!((meta.vid, meta.pid), (Some(v), Some(p)) if filter.matches(v, p))
            })
            .cloned()
            .collect())
    }
}

/// A pending selection prompt; see [`VirtualTransport::hold_selection`].
pub struct SelectionGate {
    transport: VirtualTransport,
    notify: Arc<Notify>,
}

impl SelectionGate {
    /// Let the pending (or next) selection proceed.
    pub fn release(self) {
        self.transport.inner.lock().gate = None;
        self.notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Channel, ChannelTable, Direction};
    use crate::codec::encode;

    #[tokio::test]
    async fn emulates_firmware_readback() {
        let dev = VirtualDevice::new("bench");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        dev.add_listener(
            Box::new(move |ev: &DeviceEvent| sink.lock().push(ev.clone())),
            EventFilter::InputReports,
        );
        dev.open().await.unwrap();
        dev.set_echo(true);

        let table = ChannelTable::new()
            .with_channel(
                0,
                Channel {
                    direction: Direction::Output,
                    value: true,
                    ..Channel::default()
                },
            )
            .unwrap();
        dev.send_report(0, &encode(&table)).await.unwrap();
        // Channel 0 is driven high; channel 1 is an input pulled high externally;
        // channel 0's external level is masked by its direction.
        dev.set_external_levels(0b10);

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(
            seen[0],
            DeviceEvent::InputReport {
                report_id: 0,
                data: vec![0b01, 0, 0, 0]
            }
        );
        assert_eq!(
            seen[1],
            DeviceEvent::InputReport {
                report_id: 0,
                data: vec![0b11, 0, 0, 0]
            }
        );
        assert_eq!(dev.last_output().map(|r| r.direction), Some(1));
    }

    #[tokio::test]
    async fn open_time_events_fire_once() {
        let dev = VirtualDevice::new("bench");
        let seen = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&seen);
        dev.add_listener(
            Box::new(move |_: &DeviceEvent| *sink.lock() += 1),
            EventFilter::Disconnects,
        );
        dev.emit_during_open(DeviceEvent::Disconnected);

        dev.open().await.unwrap();
        assert_eq!(*seen.lock(), 1);
        dev.close().unwrap();
        dev.open().await.unwrap();
        assert_eq!(*seen.lock(), 1);
    }

    #[tokio::test]
    async fn closed_device_rejects_writes() {
        let dev = VirtualDevice::new("bench");
        let err = dev.send_report(0, &[0; OUTPUT_REPORT_LEN]).await;
        assert!(matches!(err, Err(TransportError::Closed)));
        assert!(dev.sent_reports().is_empty());
    }

    #[tokio::test]
    async fn selection_filters_by_ids() {
        let transport = VirtualTransport::new();
        transport.attach(VirtualDevice::with_ids("other", 0x1209, 0x0001));
        transport.attach(VirtualDevice::new("gpio"));

        let found = transport
            .request_device(&DeviceFilter::EZ_GPIO)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].meta().product_string.as_deref(), Some("gpio"));
        assert_eq!(transport.selection_requests(), 1);
    }
}
