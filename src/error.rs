//! Error types.

use std::path::PathBuf;

/// Failures reported by a transport backend.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The device-selection capability itself failed (not "no match").
    #[error("device selection failed: {0}")]
    Selection(String),

    /// The device was selected but could not be opened.
    #[error("device open failed: {0}")]
    Open(String),

    /// The handle is not open.
    #[error("device is closed")]
    Closed,

    /// The device rejected or short-wrote a report.
    #[error("report write failed: {0}")]
    Write(String),

    #[cfg(feature = "hid")]
    #[error("hidapi: {0}")]
    Hid(#[from] hidapi::HidError),
}

/// Errors surfaced by session and channel operations.
#[derive(Debug, thiserror::Error)]
pub enum GpioError {
    #[error("already connected")]
    AlreadyConnected,

    #[error("a connect attempt is already in progress")]
    AlreadyConnecting,

    /// Selection returned no matching device.
    #[error("no matching device found")]
    NoDeviceFound,

    #[error("device selected but could not be opened: {0}")]
    OpenFailed(#[source] TransportError),

    #[error("not connected")]
    NotConnected,

    /// The connect attempt was cancelled before it completed.
    #[error("connect cancelled")]
    Cancelled,

    #[error("device selection failed: {0}")]
    SelectionFailed(#[source] TransportError),

    #[error("state transmission failed: {0}")]
    SendFailed(#[source] TransportError),

    #[error("channel {index} out of range")]
    ChannelOutOfRange { index: usize },

    /// The manager event loop is no longer running.
    #[error("gpio manager stopped")]
    Stopped,
}

/// Configuration load/save errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

pub type Result<T> = std::result::Result<T, GpioError>;
