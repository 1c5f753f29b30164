//! Device session.
//!
//! [`DeviceSession`] owns the single device connection. States:
//!
//! ```text
//!              connect()                 selected + opened
//! Disconnected ─────────▶ Connecting ──────────────────────▶ Connected
//!      ▲                      │ no match / open failed /          │
//!      │                      │ cancelled / dropped / lost        │ disconnect() or
//!      └──────────────────────┴───────────────────────────────────┘ device lost
//! ```
//!
//! State and handle are stored together (`Slot`), so there is no reachable
//! `Connected` without a handle. Transitions happen under one lock and are atomic
//! from a caller's view. Teardown removes every listener before closing the
//! handle, so no callback fires after the session is `Disconnected`. Listeners
//! are registered before the device is opened, so nothing it raises while
//! opening goes unobserved. [`DeviceSession::watch_state`] follows every
//! transition.
//!
//! Only [`DeviceSession::connect`] waits on the outside world. The
//! `Disconnected → Connecting` step is taken synchronously, so a concurrent second
//! call is rejected immediately and never reaches device selection.
//!
//! There is no automatic reconnect.

use crate::channel::ChannelTable;
use crate::codec;
use crate::device::{DeviceFilter, HidDevice, HidTransport};
use crate::error::GpioError;
use crate::event::{DeviceEvent, Event, Generation};
use crate::eventbus::{EventFilter, ListenerId};
use crate::logger::ReportLogger;
use crate::metadata::DeviceMeta;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Externally visible connection state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Session parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    pub filter: DeviceFilter,
    /// Report id used for outbound reports.
    pub report_id: u8,
    /// Attach a [`ReportLogger`] to every opened device.
    pub trace_reports: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            filter: DeviceFilter::EZ_GPIO,
            report_id: 0,
            trace_reports: false,
        }
    }
}

/// A device and everything registered on it.
///
/// Dropping the handle deregisters the listeners, then closes the device.
struct OpenHandle<D: HidDevice> {
    device: Arc<D>,
    listeners: Vec<ListenerId>,
    meta: DeviceMeta,
    generation: Generation,
}

impl<D: HidDevice> Drop for OpenHandle<D> {
    fn drop(&mut self) {
        for id in self.listeners.drain(..) {
            self.device.remove_listener(id);
        }
        if let Err(e) = self.device.close() {
            warn!(device = %self.meta, error = %e, "close failed");
        }
    }
}

enum Slot<D: HidDevice> {
    Idle,
    Connecting { attempt: Generation },
    Open(OpenHandle<D>),
}

impl<D: HidDevice> Slot<D> {
    fn state(&self) -> SessionState {
        match self {
            Slot::Idle => SessionState::Disconnected,
            Slot::Connecting { .. } => SessionState::Connecting,
            Slot::Open(_) => SessionState::Connected,
        }
    }
}

/// Exclusive connection to one bridge.
pub struct DeviceSession<T: HidTransport> {
    transport: T,
    config: SessionConfig,
    slot: Mutex<Slot<T::Device>>,
    last_generation: Mutex<Generation>,
    state_tx: watch::Sender<SessionState>,
    events: mpsc::UnboundedSender<Event>,
}

impl<T: HidTransport> DeviceSession<T> {
    /// `events` receives decoded reports and disconnect notices from open handles.
    pub fn new(transport: T, config: SessionConfig, events: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            transport,
            config,
            slot: Mutex::new(Slot::Idle),
            last_generation: Mutex::new(0),
            state_tx: watch::channel(SessionState::Disconnected).0,
            events,
        }
    }

    pub fn state(&self) -> SessionState {
        self.slot.lock().state()
    }

    /// Receiver notified on every state transition.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Metadata of the connected device.
    pub fn device(&self) -> Option<DeviceMeta> {
        match &*self.slot.lock() {
            Slot::Open(handle) => Some(handle.meta.clone()),
            _ => None,
        }
    }

    /// `true` if `generation` identifies the open handle, or the attempt still
    /// connecting (its listeners are live before the handle is installed).
    pub fn is_current(&self, generation: Generation) -> bool {
        match &*self.slot.lock() {
            Slot::Open(h) => h.generation == generation,
            Slot::Connecting { attempt } => *attempt == generation,
            Slot::Idle => false,
        }
    }

    /// Select, open and subscribe to the first matching device.
    ///
    /// Fails immediately with [`GpioError::AlreadyConnecting`] or
    /// [`GpioError::AlreadyConnected`] without touching the in-flight attempt or
    /// the open handle. Cancelling `cancel`, calling [`disconnect`](Self::disconnect)
    /// meanwhile, or dropping the returned future all end the attempt in
    /// `Disconnected`.
    pub async fn connect(&self, cancel: &CancellationToken) -> Result<DeviceMeta, GpioError> {
        let attempt = self.begin_connect()?;
        let guard = ConnectGuard {
            session: self,
            attempt,
            armed: true,
        };
        debug!(attempt, filter = ?self.config.filter, "connecting");

        let acquired = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(GpioError::Cancelled),
            res = self.acquire(attempt) => res,
        };

        match acquired {
            Ok(handle) => {
                let meta = handle.meta.clone();
                guard.complete(handle)?;
                info!(device = %meta, generation = attempt, "connected");
                Ok(meta)
            }
            Err(err) => {
                debug!(attempt, error = %err, "connect failed");
                Err(err)
            }
        }
    }

    /// Tear down the open handle. A no-op when nothing is open.
    ///
    /// During `Connecting` this abandons the attempt; it then resolves with
    /// [`GpioError::Cancelled`].
    pub fn disconnect(&self) {
        let mut slot = self.slot.lock();
        match std::mem::replace(&mut *slot, Slot::Idle) {
            Slot::Open(handle) => {
                let meta = handle.meta.clone();
                drop(handle);
                info!(device = %meta, "disconnected");
            }
            Slot::Connecting { attempt } => {
                debug!(attempt, "connect attempt abandoned");
            }
            Slot::Idle => {}
        }
        self.publish_state(&slot);
    }

    /// Device-initiated disconnect for the handle identified by `generation`.
    ///
    /// A notice for the attempt still connecting abandons it, so the device
    /// that was lost during open is never installed. Ignored if that handle
    /// has already been replaced or released.
    pub fn handle_device_lost(&self, generation: Generation) {
        let mut slot = self.slot.lock();
        let lost = match &*slot {
            Slot::Open(h) => h.generation == generation,
            Slot::Connecting { attempt } => *attempt == generation,
            Slot::Idle => false,
        };
        if !lost {
            trace!(generation, "stale disconnect notice");
            return;
        }
        match std::mem::replace(&mut *slot, Slot::Idle) {
            Slot::Open(handle) => {
                let meta = handle.meta.clone();
                drop(handle);
                info!(device = %meta, "device disconnected");
            }
            Slot::Connecting { attempt } => {
                info!(attempt, "device lost while connecting");
            }
            Slot::Idle => {}
        }
        self.publish_state(&slot);
    }

    /// Encode `table` in full and transmit it as one output report.
    pub async fn send_state(&self, table: &ChannelTable) -> Result<(), GpioError> {
        let device = self.open_device().ok_or(GpioError::NotConnected)?;
        let report = codec::encode(table);
        device
            .send_report(self.config.report_id, &report)
            .await
            .map_err(GpioError::SendFailed)?;
        debug!(report = ?report, "state sent");
        Ok(())
    }

    fn open_device(&self) -> Option<Arc<T::Device>> {
        match &*self.slot.lock() {
            Slot::Open(handle) => Some(Arc::clone(&handle.device)),
            _ => None,
        }
    }

    fn begin_connect(&self) -> Result<Generation, GpioError> {
        let mut slot = self.slot.lock();
        match *slot {
            Slot::Open(_) => Err(GpioError::AlreadyConnected),
            Slot::Connecting { .. } => Err(GpioError::AlreadyConnecting),
            Slot::Idle => {
                let mut last = self.last_generation.lock();
                *last += 1;
                *slot = Slot::Connecting { attempt: *last };
                self.publish_state(&slot);
                Ok(*last)
            }
        }
    }

    async fn acquire(&self, generation: Generation) -> Result<OpenHandle<T::Device>, GpioError> {
        let devices = self
            .transport
            .request_device(&self.config.filter)
            .await
            .map_err(GpioError::SelectionFailed)?;
        let device = devices
            .into_iter()
            .next()
            .map(Arc::new)
            .ok_or(GpioError::NoDeviceFound)?;

        // Listeners go in before open so a report or disconnect raised while
        // opening is not lost. A failed open drops the handle and removes them.
        let meta = device.meta();
        let listeners = self.register_listeners(device.as_ref(), &meta, generation);
        let handle = OpenHandle {
            device,
            listeners,
            meta,
            generation,
        };
        handle.device.open().await.map_err(GpioError::OpenFailed)?;
        Ok(handle)
    }

    fn publish_state(&self, slot: &Slot<T::Device>) {
        let next = slot.state();
        self.state_tx.send_if_modified(|state| {
            let changed = *state != next;
            *state = next;
            changed
        });
    }

    fn register_listeners(
        &self,
        device: &T::Device,
        meta: &DeviceMeta,
        generation: Generation,
    ) -> Vec<ListenerId> {
        let mut ids = Vec::with_capacity(3);

        let reports = self.events.clone();
        ids.push(device.add_listener(
            Box::new(move |event: &DeviceEvent| {
                let DeviceEvent::InputReport { data, .. } = event else {
                    return;
                };
                match codec::parse_input_report(data) {
                    Some(levels) => {
                        let _ = reports.send(Event::DeviceReport { generation, levels });
                    }
                    None => trace!(len = data.len(), "dropping malformed input report"),
                }
            }),
            EventFilter::InputReports,
        ));

        let lost = self.events.clone();
        ids.push(device.add_listener(
            Box::new(move |_: &DeviceEvent| {
                let _ = lost.send(Event::DeviceLost { generation });
            }),
            EventFilter::Disconnects,
        ));

        if self.config.trace_reports {
            ids.push(device.add_listener(
                Box::new(ReportLogger::new(meta.to_string())),
                EventFilter::All,
            ));
        }
        ids
    }
}

/// Returns the slot to `Idle` unless the attempt completed.
struct ConnectGuard<'a, T: HidTransport> {
    session: &'a DeviceSession<T>,
    attempt: Generation,
    armed: bool,
}

impl<T: HidTransport> ConnectGuard<'_, T> {
    /// Install `handle` if this attempt still owns the slot; otherwise release it.
    fn complete(mut self, handle: OpenHandle<T::Device>) -> Result<(), GpioError> {
        self.armed = false;
        let mut slot = self.session.slot.lock();
        if matches!(*slot, Slot::Connecting { attempt } if attempt == self.attempt) {
            *slot = Slot::Open(handle);
            self.session.publish_state(&slot);
            return Ok(());
        }
        drop(slot);
        drop(handle);
        Err(GpioError::Cancelled)
    }
}

impl<T: HidTransport> Drop for ConnectGuard<'_, T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut slot = self.session.slot.lock();
        if matches!(*slot, Slot::Connecting { attempt } if attempt == self.attempt) {
            *slot = Slot::Idle;
            self.session.publish_state(&slot);
        }
    }
}

/// Sender half of a [`SendTicket`].
pub type SendTicketSender = oneshot::Sender<Result<(), GpioError>>;

/// Outcome of a queued state transmission.
///
/// Returned without waiting for the transmission. Await
/// [`outcome`](SendTicket::outcome) to observe failures such as
/// [`GpioError::NotConnected`], or drop it to discard them deliberately.
#[must_use = "await `outcome()` or drop the ticket explicitly to ignore send failures"]
#[derive(Debug)]
pub struct SendTicket(oneshot::Receiver<Result<(), GpioError>>);

impl SendTicket {
    pub fn channel() -> (SendTicketSender, SendTicket) {
        let (tx, rx) = oneshot::channel();
        (tx, SendTicket(rx))
    }

    pub async fn outcome(self) -> Result<(), GpioError> {
        self.0.await.unwrap_or(Err(GpioError::Stopped))
    }
}

struct Outbound {
    table: ChannelTable,
    reply: Option<SendTicketSender>,
}

/// Submits tables for transmission, in order, through one writer task.
#[derive(Clone, Debug)]
pub struct StateWriter {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl std::fmt::Debug for Outbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbound")
            .field("awaited", &self.reply.is_some())
            .finish()
    }
}

impl StateWriter {
    /// Writer handle plus the queue its task drains.
    pub fn channel() -> (StateWriter, OutboundQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        (StateWriter { tx }, OutboundQueue { rx })
    }

    /// Queue `table`. `reply`, if given, receives the outcome.
    pub fn submit(&self, table: ChannelTable, reply: Option<SendTicketSender>) {
        if let Err(mpsc::error::SendError(item)) = self.tx.send(Outbound { table, reply }) {
            if let Some(reply) = item.reply {
                let _ = reply.send(Err(GpioError::Stopped));
            }
        }
    }
}

/// Receiving end of a [`StateWriter`].
#[derive(Debug)]
pub struct OutboundQueue {
    rx: mpsc::UnboundedReceiver<Outbound>,
}

impl OutboundQueue {
    /// Transmit queued tables one at a time until every writer is dropped.
    pub async fn run<T: HidTransport>(mut self, session: Arc<DeviceSession<T>>) {
        while let Some(Outbound { table, reply }) = self.rx.recv().await {
            let result = session.send_state(&table).await;
            match reply {
                Some(reply) => {
                    let _ = reply.send(result);
                }
                None => {
                    if let Err(e) = result {
                        warn!(error = %e, "state transmission failed");
                    }
                }
            }
        }
    }

    /// Pop the next queued table without transmitting it.
    pub fn try_next(&mut self) -> Option<ChannelTable> {
        self.rx.try_recv().ok().map(|item| item.table)
    }
}
