//! Manager: the single logical thread that owns the channel table.
//!
//! [`GpioManager::run`] drains one FIFO queue of [`Event`]s. User edits posted
//! through a [`GpioHandle`] and reports delivered by the open device land in the
//! same queue, so they are applied strictly in arrival order, one at a time.
//!
//! `connect` is the exception: it waits on device selection and therefore runs
//! on the caller's task against the shared [`DeviceSession`], never inside the
//! loop. Transmissions are handed to a separate writer task so the loop never
//! waits on the device either.
//!
//! ```no_run
//! # async fn demo() -> Result<(), ezgpio::GpioError> {
//! use ezgpio::backends::virtual_device::{VirtualDevice, VirtualTransport};
//! use ezgpio::{ChannelEdit, Direction, GpioConfig, GpioManager};
//! use tokio_util::sync::CancellationToken;
//!
//! let transport = VirtualTransport::with_device(VirtualDevice::new("bench"));
//! let shutdown = CancellationToken::new();
//! let (gpio, _task) = GpioManager::new(transport, &GpioConfig::default()).spawn(shutdown.clone());
//!
//! gpio.connect(&CancellationToken::new()).await?;
//! gpio.edit(25, ChannelEdit::direction(Direction::Output).with_value(true))
//!     .outcome()
//!     .await?;
//! shutdown.cancel();
//! # Ok(())
//! # }
//! ```

use crate::channel::{ChannelTable, Direction, Pull};
use crate::config::GpioConfig;
use crate::device::HidTransport;
use crate::error::GpioError;
use crate::event::Event;
use crate::metadata::DeviceMeta;
use crate::reconciler::{ChannelEdit, Reconciler};
use crate::session::{DeviceSession, OutboundQueue, SendTicket, SessionConfig, SessionState, StateWriter};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

pub struct GpioManager<T: HidTransport> {
    session: Arc<DeviceSession<T>>,
    reconciler: Reconciler,
    outbound: OutboundQueue,
    events_tx: mpsc::UnboundedSender<Event>,
    events: mpsc::UnboundedReceiver<Event>,
}

impl<T: HidTransport> GpioManager<T> {
    pub fn new(transport: T, config: &GpioConfig) -> Self {
        Self::with_session_config(transport, config.session_config())
    }

    pub fn with_session_config(transport: T, config: SessionConfig) -> Self {
        let (events_tx, events) = mpsc::unbounded_channel();
        let session = Arc::new(DeviceSession::new(transport, config, events_tx.clone()));
        let (writer, outbound) = StateWriter::channel();
        Self {
            session,
            reconciler: Reconciler::new(ChannelTable::new(), writer),
            outbound,
            events_tx,
            events,
        }
    }

    /// A handle for posting edits and driving the session.
    pub fn handle(&self) -> GpioHandle<T> {
        GpioHandle {
            session: Arc::clone(&self.session),
            events: self.events_tx.clone(),
            snapshots: self.reconciler.subscribe(),
        }
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn spawn(self, shutdown: CancellationToken) -> (GpioHandle<T>, JoinHandle<()>) {
        let handle = self.handle();
        let task = tokio::spawn(self.run(shutdown));
        (handle, task)
    }

    /// Process events until `shutdown` fires. Disconnects the session on exit.
    pub async fn run(self, shutdown: CancellationToken) {
        let Self {
            session,
            mut reconciler,
            outbound,
            events_tx,
            mut events,
        } = self;
        drop(events_tx);
        let writer = tokio::spawn(outbound.run(Arc::clone(&session)));

        loop {
            let event = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            process(&session, &mut reconciler, event);
        }

        session.disconnect();
        drop(reconciler);
        let _ = writer.await;
        debug!("gpio manager stopped");
    }
}

fn process<T: HidTransport>(
    session: &DeviceSession<T>,
    reconciler: &mut Reconciler,
    event: Event,
) {
    match event {
        Event::LocalEdit { index, edit, reply } => {
            reconciler.apply_local_edit(index, &edit, reply);
        }
        Event::DeviceReport { generation, levels } => {
            if session.is_current(generation) {
                reconciler.apply_device_report(&levels);
            } else {
                trace!(generation, "ignoring report from a released handle");
            }
        }
        Event::DeviceLost { generation } => session.handle_device_lost(generation),
        Event::Resync => reconciler.resync(),
        Event::Flush(done) => {
            let _ = done.send(());
        }
    }
}

/// Cloneable front end of a running [`GpioManager`].
pub struct GpioHandle<T: HidTransport> {
    session: Arc<DeviceSession<T>>,
    events: mpsc::UnboundedSender<Event>,
    snapshots: watch::Receiver<ChannelTable>,
}

impl<T: HidTransport> Clone for GpioHandle<T> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            events: self.events.clone(),
            snapshots: self.snapshots.clone(),
        }
    }
}

impl<T: HidTransport> GpioHandle<T> {
    /// Connect, then retransmit the current table so the device matches local state.
    pub async fn connect(&self, cancel: &CancellationToken) -> Result<DeviceMeta, GpioError> {
        let meta = self.session.connect(cancel).await?;
        self.post(Event::Resync)?;
        Ok(meta)
    }

    /// Explicit disconnect. Idempotent.
    pub fn disconnect(&self) {
        self.session.disconnect();
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn device(&self) -> Option<DeviceMeta> {
        self.session.device()
    }

    /// Receiver notified on every session state transition, including a
    /// device-initiated disconnect.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.session.watch_state()
    }

    pub fn session(&self) -> &Arc<DeviceSession<T>> {
        &self.session
    }

    /// Queue an edit of channel `index`.
    ///
    /// Returns at once. The ticket resolves with the outcome of transmitting the
    /// resulting full table.
    pub fn edit(&self, index: usize, edit: ChannelEdit) -> SendTicket {
        let (reply, ticket) = SendTicket::channel();
        // On failure the reply is dropped with the event and the ticket reports `Stopped`.
        let _ = self.post(Event::LocalEdit { index, edit, reply });
        ticket
    }

    pub fn set_pull(&self, index: usize, pull: Pull) -> SendTicket {
        self.edit(index, ChannelEdit::pull(pull))
    }

    pub fn set_direction(&self, index: usize, direction: Direction) -> SendTicket {
        self.edit(index, ChannelEdit::direction(direction))
    }

    pub fn set_value(&self, index: usize, value: bool) -> SendTicket {
        self.edit(index, ChannelEdit::value(value))
    }

    /// Latest published table.
    pub fn snapshot(&self) -> ChannelTable {
        self.snapshots.borrow().clone()
    }

    /// Receiver notified on every new table.
    pub fn subscribe(&self) -> watch::Receiver<ChannelTable> {
        self.snapshots.clone()
    }

    /// Wait until every event queued before this call has been processed.
    pub async fn flush(&self) -> Result<(), GpioError> {
        let (done, wait) = oneshot::channel();
        self.post(Event::Flush(done))?;
        wait.await.map_err(|_| GpioError::Stopped)
    }

    fn post(&self, event: Event) -> Result<(), GpioError> {
        self.events.send(event).map_err(|_| GpioError::Stopped)
    }
}
