//! Logging.
//!
//! The crate logs through `tracing`. Applications that do not install their own
//! subscriber can call [`init_logging`]. [`ReportLogger`] is a listener that traces
//! every raw event of a device.

use crate::config::{LogFormat, LoggingConfig};
use crate::event::DeviceEvent;
use crate::eventbus::DeviceListener;
use tracing::trace;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a global fmt subscriber. `RUST_LOG` overrides `config.level`.
///
/// Returns `false` if a global subscriber was already set.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
    };
    installed.is_ok()
}

/// Traces raw device events at `TRACE` level.
pub struct ReportLogger {
    device: String,
}

impl ReportLogger {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
        }
    }
}

impl DeviceListener for ReportLogger {
    fn on_event(&mut self, event: &DeviceEvent) {
        match event {
            DeviceEvent::InputReport { report_id, data } => {
                trace!(device = %self.device, report_id, len = data.len(), bytes = ?data, "input report");
            }
            DeviceEvent::Disconnected => {
                trace!(device = %self.device, "disconnect notice");
            }
        }
    }
}
