//! Publish loop: the sampling/publishing unit's cycle.
//!
//! ```text
//!  Link::poll ──▶ WallClock ──▶ SensorPort ──▶ format_into ──▶ Link::publish
//!   (skip if       (skip if      (failed         (PayloadTooLarge   QoS0 then QoS1
//!    not ready)     unsynced)     sources null)   is fatal)
//! ```
//!
//! [`TelemetryService`] owns the payload buffer and runs one cycle per
//! call.  Nothing in here aborts the unit: every outcome, fatal ones
//! included, is reported and the next period runs normally.

use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::config::{DeliveryMode, NodeConfig};
use crate::diagnostics::Metrics;
use crate::error::Error;
use crate::link::{Link, LinkStatus, PublishOutcome, Qos, Transport};
use crate::telemetry::{self, TelemetryRecord};

use super::events::{AppEvent, SkipReason};
use super::ports::{EventSink, SensorPort, WallClock};

/// How one delivery class fared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Best-effort publish failed; logged only.
    Failed,
    /// Acknowledged publish went out but the ack never came back.
    AckTimeout,
    NotAttempted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub bytes: usize,
    pub best_effort: Delivery,
    pub acknowledged: Delivery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed(CycleReport),
    Skipped(SkipReason),
    /// This cycle is lost; the next one runs as usual.
    Failed(Error),
}

impl From<LinkStatus> for SkipReason {
    fn from(status: LinkStatus) -> Self {
        match status {
            LinkStatus::Connecting => Self::LinkConnecting,
            LinkStatus::Reconnecting => Self::LinkReconnecting,
            LinkStatus::Down | LinkStatus::Ready => Self::LinkDown,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// TelemetryService
// ───────────────────────────────────────────────────────────────

pub struct TelemetryService {
    data_topic: heapless::String<64>,
    delivery: DeliveryMode,
    buffer: Vec<u8>,
    metrics: Arc<Metrics>,
}

impl TelemetryService {
    pub fn new(config: &NodeConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            data_topic: config.data_topic.clone(),
            delivery: config.delivery,
            buffer: vec![0; config.payload_capacity],
            metrics,
        }
    }

    /// Payload of the last completed cycle.
    pub fn last_payload(&self, len: usize) -> &[u8] {
        &self.buffer[..len.min(self.buffer.len())]
    }

    /// Run one sample → format → publish cycle.
    pub fn cycle<T: Transport>(
        &mut self,
        sensors: &mut impl SensorPort,
        link: &Link<T>,
        wall: &impl WallClock,
        sink: &mut impl EventSink,
    ) -> CycleOutcome {
        self.metrics.record(|m| m.cycles += 1);
        let outcome = self.run(sensors, link, wall, sink);

        match outcome {
            CycleOutcome::Completed(_) => self.metrics.record(|m| m.last_cycle_failed = false),
            CycleOutcome::Skipped(reason) => {
                self.metrics.record(|m| m.skipped_cycles += 1);
                sink.emit(&AppEvent::CycleSkipped(reason));
            }
            CycleOutcome::Failed(e) => {
                self.metrics.record(|m| {
                    m.fatal_cycles += 1;
                    m.last_cycle_failed = true;
                });
                error!("Publish cycle failed: {}", e);
            }
        }
        outcome
    }

    fn run<T: Transport>(
        &mut self,
        sensors: &mut impl SensorPort,
        link: &Link<T>,
        wall: &impl WallClock,
        sink: &mut impl EventSink,
    ) -> CycleOutcome {
        let status = link.poll();
        if status != LinkStatus::Ready {
            return skip(SkipReason::from(status));
        }
        let Some(timestamp) = wall.now() else {
            return skip(SkipReason::ClockNotSynced);
        };

        let samples = sensors.sample();
        let mut failures = 0;
        for source in &samples {
            if let Err(e) = source.reading {
                failures += 1;
                sink.emit(&AppEvent::SampleFailed {
                    label: source.label.clone(),
                    error: e,
                });
            }
        }
        if failures > 0 {
            self.metrics.record(|m| m.sample_failures += failures);
        }

        let record = TelemetryRecord {
            timestamp,
            sources: &samples,
        };
        let bytes = match telemetry::format_into(&record, &mut self.buffer) {
            Ok(n) => n,
            Err(e) => return CycleOutcome::Failed(e),
        };
        let payload = &self.buffer[..bytes];

        let mut report = CycleReport {
            bytes,
            best_effort: Delivery::NotAttempted,
            acknowledged: Delivery::NotAttempted,
        };

        if self.delivery.best_effort() {
            match link.publish(&self.data_topic, payload, Qos::AtMostOnce) {
                Ok(PublishOutcome::Sent) => {
                    report.best_effort = Delivery::Sent;
                    self.metrics.record(|m| m.published += 1);
                    sink.emit(&AppEvent::Published { bytes, qos: Qos::AtMostOnce });
                }
                Ok(PublishOutcome::Skipped(status)) => return skip(SkipReason::from(status)),
                Err(e) => {
                    warn!("Best-effort publish failed: {}", e);
                    report.best_effort = Delivery::Failed;
                    self.metrics.record(|m| m.best_effort_failures += 1);
                    sink.emit(&AppEvent::PublishFailed { qos: Qos::AtMostOnce, error: e });
                }
            }
        }

        if self.delivery.acknowledged() {
            match link.publish(&self.data_topic, payload, Qos::AtLeastOnce) {
                Ok(PublishOutcome::Sent) => {
                    report.acknowledged = Delivery::Sent;
                    self.metrics.record(|m| m.published += 1);
                    sink.emit(&AppEvent::Published { bytes, qos: Qos::AtLeastOnce });
                }
                Ok(PublishOutcome::Skipped(status)) => {
                    // Lost between the two classes; what was sent stands.
                    if report.best_effort != Delivery::Sent {
                        return skip(SkipReason::from(status));
                    }
                }
                Err(Error::AckTimeout) => {
                    warn!("Acknowledged publish timed out; reading not retried");
                    report.acknowledged = Delivery::AckTimeout;
                    self.metrics.record(|m| m.ack_timeouts += 1);
                    sink.emit(&AppEvent::AckTimeoutTolerated);
                }
                Err(e) => {
                    sink.emit(&AppEvent::PublishFailed { qos: Qos::AtLeastOnce, error: e });
                    return CycleOutcome::Failed(e);
                }
            }
        }

        info!("Published {} bytes to {}", bytes, self.data_topic);
        CycleOutcome::Completed(report)
    }
}

fn skip(reason: SkipReason) -> CycleOutcome {
    match reason {
        SkipReason::LinkDown => warn!("Cycle skipped: link down"),
        other => debug!("Cycle skipped: {:?}", other),
    }
    CycleOutcome::Skipped(reason)
}
