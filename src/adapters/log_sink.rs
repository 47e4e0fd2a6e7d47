//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing each application event as one line
//! to the ESP-IDF logger (UART in production).

use log::{debug, info, warn};

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`AppEvent`] to the serial console.
#[derive(Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        match event {
            AppEvent::Published { bytes, qos } => {
                debug!("PUB   | {:?} | {} bytes", qos, bytes);
            }
            AppEvent::PublishFailed { qos, error } => {
                warn!("PUB   | {:?} failed: {}", qos, error);
            }
            AppEvent::AckTimeoutTolerated => {
                warn!("PUB   | ack timeout tolerated");
            }
            AppEvent::CycleSkipped(reason) => {
                debug!("CYCLE | skipped: {:?}", reason);
            }
            AppEvent::SampleFailed { label, error } => {
                warn!("READ  | {}: {}", label, error);
            }
            AppEvent::Alert { label, toggles } => {
                warn!("ALERT | {} | {} toggles", label, toggles);
            }
            AppEvent::Normal { label } => {
                info!("CLASS | {} (normal)", label);
            }
        }
    }
}
