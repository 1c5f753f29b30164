//! Events.
//!
//! Two layers:
//! - [`DeviceEvent`]: what a transport backend delivers to registered listeners
//!   (raw input reports and the device going away).
//! - [`Event`]: items of the manager's single FIFO queue. User edits and
//!   device-derived updates share this queue so they are applied strictly in
//!   arrival order, one at a time.

use crate::codec::InputLevels;
use crate::reconciler::ChannelEdit;
use crate::session::SendTicketSender;
use tokio::sync::oneshot;

/// Raw notification from a device handle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceEvent {
    /// An input report arrived. `data` excludes the report-id byte.
    InputReport { report_id: u8, data: Vec<u8> },

    /// The device was unplugged or its handle failed.
    Disconnected,
}

impl DeviceEvent {
    #[inline]
    pub fn is_input_report(&self) -> bool {
        matches!(self, DeviceEvent::InputReport { .. })
    }
}

/// Identifies which open handle produced a device-derived event.
///
/// Incremented on every successful connect. Events carrying a generation other
/// than the current one are stale and ignored.
pub type Generation = u64;

/// One unit of work for the manager loop.
#[derive(Debug)]
pub enum Event {
    /// Local edit of one channel.
    LocalEdit {
        index: usize,
        edit: ChannelEdit,
        reply: SendTicketSender,
    },

    /// A well-formed input report, already decoded.
    DeviceReport {
        generation: Generation,
        levels: InputLevels,
    },

    /// The device signalled a disconnect.
    DeviceLost { generation: Generation },

    /// Retransmit the current table (sent after a fresh connect).
    Resync,

    /// Resolves once every earlier event has been processed.
    Flush(oneshot::Sender<()>),
}
