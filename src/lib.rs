//! ezgpio: host-side driver for the EZ-GPIO USB bridge.
//!
//! The bridge exposes 32 GPIO channels over HID. The host keeps the authoritative
//! configuration table ([`ChannelTable`]), sends it whole as a 16-byte output
//! report after every edit, and folds the 4-byte input reports coming back into the
//! same table. Outputs are owned by the host; inputs by the device.
//!
//! - [`codec`]: report layouts.
//! - [`session`]: one exclusive device connection.
//! - [`reconciler`]: merges edits and reports into the table.
//! - [`manager`]: the event loop tying them together; start here.
//! - [`backends`]: `hidapi` and in-memory transports.

pub mod backends;
pub mod channel;
pub mod codec;
pub mod config;
pub mod device;
pub mod error;
pub mod event;
pub mod eventbus;
pub mod logger;
pub mod manager;
pub mod metadata;
pub mod reconciler;
pub mod session;

pub use channel::{Channel, ChannelTable, Direction, Pull, CHANNEL_COUNT};
pub use codec::{decode, encode, parse_input_report, InputLevels, InputReport, OutputReport};
pub use config::{GpioConfig, LogFormat, LoggingConfig};
pub use device::{DeviceFilter, HidDevice, HidTransport};
pub use error::{ConfigError, GpioError, Result, TransportError};
pub use event::DeviceEvent;
pub use eventbus::{DeviceListener, EventFilter, ListenerId};
pub use logger::init_logging;
pub use manager::{GpioHandle, GpioManager};
pub use metadata::DeviceMeta;
pub use reconciler::ChannelEdit;
pub use session::{DeviceSession, SendTicket, SessionConfig, SessionState};
