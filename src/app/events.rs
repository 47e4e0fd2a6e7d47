//! Outbound application events.
//!
//! The publish loop and the reactor emit these through the
//! [`EventSink`](super::ports::EventSink) port.

use crate::error::Error;
use crate::link::Qos;
use crate::sensors::Label;

/// Why a publish cycle did not reach the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Wall clock not yet synchronised; no timestamp to stamp.
    ClockNotSynced,
    LinkConnecting,
    /// Automatic recovery in progress.
    LinkReconnecting,
    /// No session and no automatic recovery.
    LinkDown,
}

/// Structured events emitted by the units.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    /// A payload went out on one delivery class.
    Published { bytes: usize, qos: Qos },

    /// A publish failed on one delivery class.
    PublishFailed { qos: Qos, error: Error },

    /// An acknowledged publish timed out; the cycle carried on.
    AckTimeoutTolerated,

    /// The cycle never reached the transport.
    CycleSkipped(SkipReason),

    /// One source could not be read this cycle.
    SampleFailed { label: Label, error: Error },

    /// An alert classification drove the output pattern.
    Alert { label: heapless::String<32>, toggles: u32 },

    /// A classification outside the alert set.
    Normal { label: heapless::String<32> },
}
