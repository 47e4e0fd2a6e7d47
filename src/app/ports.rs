//! Port traits: the hexagonal boundary between the units and the board.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ TelemetryService / Reactor / runtime
//! ```
//!
//! Driven adapters (sampler, clocks, event sinks, status indicator)
//! implement these traits.  The services consume them via generics, so
//! the pipeline runs against mocks and a virtual clock on the host.

use time::OffsetDateTime;

use crate::drivers::led_patterns::Rgb;
use crate::error::Result;
use crate::sensors::SampleSet;

// ───────────────────────────────────────────────────────────────
// Sensor port (driven adapter: hardware → domain)
// ───────────────────────────────────────────────────────────────

/// Read-side port: one poll of every configured telemetry source.
pub trait SensorPort {
    /// Sources come back in declared order.  A failed source carries its
    /// error; it is never reported as zero.
    fn sample(&mut self) -> SampleSet;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging)
// ───────────────────────────────────────────────────────────────

/// The units emit structured [`AppEvent`](super::events::AppEvent)s
/// through this port.  Adapters decide where they go.
pub trait EventSink {
    fn emit(&mut self, event: &super::events::AppEvent);
}

// ───────────────────────────────────────────────────────────────
// Time ports
// ───────────────────────────────────────────────────────────────

/// Monotonic time source that drives every schedule.
pub trait Clock {
    /// Milliseconds since an arbitrary fixed origin.  Never goes backwards.
    fn now_ms(&self) -> u64;

    /// Block the calling unit until `deadline_ms` (returns at once if it
    /// has passed).  A virtual clock advances instead of sleeping.
    fn sleep_until_ms(&self, deadline_ms: u64);
}

/// Calendar time for telemetry timestamps.
pub trait WallClock {
    /// Local time with the configured offset, or `None` until the clock
    /// has been synchronised.
    fn now(&self) -> Option<OffsetDateTime>;
}

// ───────────────────────────────────────────────────────────────
// Indicator port (driven adapter: domain → status LED)
// ───────────────────────────────────────────────────────────────

pub trait IndicatorPort {
    fn show(&mut self, colour: Rgb) -> Result<()>;
}

// ───────────────────────────────────────────────────────────────
// Scheduler delegate (decouples scheduler from the units)
// ───────────────────────────────────────────────────────────────

/// Callback trait that the scheduler invokes when a schedule fires.
///
/// The [`Scheduler`](crate::scheduler::Scheduler) only tracks deadlines;
/// what a firing means belongs to the unit implementing this trait.
pub trait SchedulerDelegate {
    /// * `label`: the label of the schedule that fired.
    /// * `kind`: periodic or one-shot.
    /// * `now_ms`: the clock reading the scheduler was ticked with.
    fn on_schedule_fired(&mut self, label: &str, kind: ScheduleFiredKind, now_ms: u64);
}

/// Discriminant passed to [`SchedulerDelegate::on_schedule_fired`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleFiredKind {
    /// A recurring periodic schedule fired.
    Periodic,
    /// A one-shot schedule fired (auto-disables after).
    OneShot,
}
