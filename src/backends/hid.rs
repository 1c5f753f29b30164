//! `hidapi` backend.
//!
//! [`HidApiTransport`] enumerates the OS HID devices matching the filter; there is
//! no chooser, every match is returned and the session opens the first.
//! Enumeration runs on the blocking pool.
//!
//! Each opened [`HidApiDevice`] gets one I/O thread that owns the hidapi handle.
//! The thread opens the device, then alternates between draining queued writes
//! and one `read_timeout`, so async callers never block on hidapi and writes never
//! wait on a lock held by a read. hidapi has no unplug notification, so a read
//! error is reported as [`DeviceEvent::Disconnected`] and ends the thread.
//!
//! Writes prefix the report id, as hidapi expects.

use crate::config::HidConfig;
use crate::device::{DeviceFilter, HidDevice, HidTransport};
use crate::error::TransportError;
use crate::event::DeviceEvent;
use crate::eventbus::{DeviceListener, EventFilter, ListenerId, ListenerRegistry};
use crate::metadata::DeviceMeta;
use async_trait::async_trait;
use hidapi::{DeviceInfo, HidApi};
use parking_lot::Mutex;
use std::ffi::CString;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Large enough for any report the bridge sends.
const READ_BUF_LEN: usize = 64;

pub struct HidApiTransport {
    api: Arc<Mutex<HidApi>>,
    config: HidConfig,
}

impl HidApiTransport {
    pub fn new(config: HidConfig) -> Result<Self, TransportError> {
        Ok(Self {
            api: Arc::new(Mutex::new(HidApi::new()?)),
            config,
        })
    }
}

#[async_trait]
impl HidTransport for HidApiTransport {
    type Device = HidApiDevice;

    async fn request_device(
        &self,
        filter: &DeviceFilter,
    ) -> Result<Vec<HidApiDevice>, TransportError> {
        let api = Arc::clone(&self.api);
        let config = self.config.clone();
        let filter = *filter;

        let found = tokio::task::spawn_blocking(move || {
            let mut guard = api.lock();
            guard.refresh_devices()?;
            let found: Vec<HidApiDevice> = guard
                .device_list()
                .filter(|info| filter.matches(info.vendor_id(), info.product_id()))
                .map(|info| HidApiDevice::new(info, Arc::clone(&api), &config))
                .collect();
            Ok::<_, TransportError>(found)
        })
        .await
        .map_err(|e| TransportError::Selection(e.to_string()))??;

        debug!(count = found.len(), ?filter, "enumerated hid devices");
        Ok(found)
    }
}

/// Build [`DeviceMeta`] from a hidapi enumeration entry.
pub fn meta(info: &DeviceInfo) -> DeviceMeta {
    DeviceMeta {
        bus: Some("usb".into()),
        vid: Some(info.vendor_id()),
        pid: Some(info.product_id()),
        product_string: info.product_string().map(str::to_string),
        serial_number: info.serial_number().map(str::to_string),
        interface_number: Some(info.interface_number()),
        usage_page: Some(info.usage_page()),
        usage: Some(info.usage()),
        path: Some(info.path().to_string_lossy().into_owned()),
    }
}

/// Work queued for the I/O thread.
struct WriteRequest {
    frame: Vec<u8>,
    reply: oneshot::Sender<Result<(), TransportError>>,
}

struct IoThread {
    writes: mpsc::UnboundedSender<WriteRequest>,
    thread: JoinHandle<()>,
}

#[derive(Default)]
struct Shared {
    io: Mutex<Option<IoThread>>,
    /// Thread of a closed handle, joined by the next `open`.
    retired: Mutex<Option<JoinHandle<()>>>,
    listeners: Mutex<ListenerRegistry>,
}

impl Shared {
    fn emit(&self, event: &DeviceEvent) {
        self.listeners.lock().emit(event);
    }
}

/// One enumerated EZ-GPIO bridge.
pub struct HidApiDevice {
    api: Arc<Mutex<HidApi>>,
    path: CString,
    meta: DeviceMeta,
    read_timeout_ms: i32,
    shared: Arc<Shared>,
}

impl HidApiDevice {
    fn new(info: &DeviceInfo, api: Arc<Mutex<HidApi>>, config: &HidConfig) -> Self {
        Self {
            api,
            path: info.path().to_owned(),
            meta: meta(info),
            read_timeout_ms: i32::try_from(config.read_timeout_ms).unwrap_or(i32::MAX),
            shared: Arc::new(Shared::default()),
        }
    }

    fn spawn_io(
        &self,
        writes: mpsc::UnboundedReceiver<WriteRequest>,
        opened: oneshot::Sender<Result<(), TransportError>>,
    ) -> std::io::Result<JoinHandle<()>> {
        let api = Arc::clone(&self.api);
        let path = self.path.clone();
        let shared = Arc::clone(&self.shared);
        let timeout = self.read_timeout_ms;
        let name = self.meta.to_string();
        std::thread::Builder::new()
            .name("ezgpio-hid-io".into())
            .spawn(move || {
                let device = match api.lock().open_path(&path) {
                    Ok(device) => device,
                    Err(e) => {
                        let _ = opened.send(Err(TransportError::Open(e.to_string())));
                        return;
                    }
                };
                let _ = opened.send(Ok(()));
                io_loop(&device, writes, &shared, timeout, &name);
            })
    }
}

/// Serve writes and reads until the handle is closed or a read fails.
fn io_loop(
    device: &hidapi::HidDevice,
    mut writes: mpsc::UnboundedReceiver<WriteRequest>,
    shared: &Shared,
    timeout: i32,
    name: &str,
) {
    let mut buf = [0u8; READ_BUF_LEN];
    loop {
        loop {
            match writes.try_recv() {
                Ok(WriteRequest { frame, reply }) => {
                    let _ = reply.send(write_frame(device, &frame));
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return,
            }
        }
        match device.read_timeout(&mut buf, timeout) {
            Ok(0) => {}
            Ok(n) => shared.emit(&DeviceEvent::InputReport {
                report_id: 0,
                data: buf[..n].to_vec(),
            }),
            Err(e) => {
                warn!(device = %name, error = %e, "read failed, treating as disconnect");
                shared.emit(&DeviceEvent::Disconnected);
                return;
            }
        }
    }
}

fn write_frame(device: &hidapi::HidDevice, frame: &[u8]) -> Result<(), TransportError> {
    let written = device.write(frame)?;
    if written < frame.len() {
        return Err(TransportError::Write(format!(
            "short write: {written} of {} bytes",
            frame.len()
        )));
    }
    Ok(())
}

#[async_trait]
impl HidDevice for HidApiDevice {
    fn meta(&self) -> DeviceMeta {
        self.meta.clone()
    }

    async fn open(&self) -> Result<(), TransportError> {
        let retired = self.shared.retired.lock().take();
        if let Some(thread) = retired {
            // The old thread exits within one read timeout of its close.
            let _ = tokio::task::spawn_blocking(move || thread.join()).await;
        }

        let (writes_tx, writes_rx) = mpsc::unbounded_channel();
        let (opened_tx, opened_rx) = oneshot::channel();
        let thread = self
            .spawn_io(writes_rx, opened_tx)
            .map_err(|e| TransportError::Open(e.to_string()))?;

        match opened_rx.await {
            Ok(Ok(())) => {
                *self.shared.io.lock() = Some(IoThread {
                    writes: writes_tx,
                    thread,
                });
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TransportError::Open("i/o thread exited".into())),
        }
    }

    /// Stops the I/O thread without waiting for it; the handle is released when
    /// its current read returns.
    fn close(&self) -> Result<(), TransportError> {
        if let Some(IoThread { writes, thread }) = self.shared.io.lock().take() {
            drop(writes);
            *self.shared.retired.lock() = Some(thread);
        }
        Ok(())
    }

    async fn send_report(&self, report_id: u8, data: &[u8]) -> Result<(), TransportError> {
        let writes = self
            .shared
            .io
            .lock()
            .as_ref()
            .map(|io| io.writes.clone())
            .ok_or(TransportError::Closed)?;

        let mut frame = Vec::with_capacity(data.len() + 1);
        frame.push(report_id);
        frame.extend_from_slice(data);

        let (reply, done) = oneshot::channel();
        writes
            .send(WriteRequest { frame, reply })
            .map_err(|_| TransportError::Closed)?;
        done.await.map_err(|_| TransportError::Closed)?
    }

    fn add_listener(&self, listener: Box<dyn DeviceListener>, filter: EventFilter) -> ListenerId {
        self.shared.listeners.lock().add(listener, filter)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.listeners.lock().remove(id)
    }
}
