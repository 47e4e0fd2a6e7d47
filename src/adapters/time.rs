//! Time adapters.
//!
//! - [`MonotonicClock`] implements [`Clock`] for the unit schedulers.
//!   On ESP-IDF it wraps `esp_timer_get_time()` (microsecond, monotonic);
//!   on the host it uses `std::time::Instant`.
//! - [`SystemWallClock`] implements [`WallClock`] for telemetry
//!   timestamps.  The system clock is set by SNTP on target; until then
//!   it reads near the epoch and is reported as not synced.

use std::time::Duration;

use time::{OffsetDateTime, UtcOffset};

use crate::app::ports::{Clock, WallClock};
use crate::error::{Error, Result};

/// 2025-01-01T00:00:00Z.  Anything earlier means SNTP has not run yet.
pub const SYNC_THRESHOLD_UNIX: i64 = 1_735_689_600;

// ───────────────────────────────────────────────────────────────
// Monotonic clock
// ───────────────────────────────────────────────────────────────

pub struct MonotonicClock {
    #[cfg(not(target_os = "espidf"))]
    start: std::time::Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            start: std::time::Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    #[cfg(target_os = "espidf")]
    fn now_ms(&self) -> u64 {
        // SAFETY: read-only query of the high-resolution timer.
        (unsafe { esp_idf_svc::sys::esp_timer_get_time() }) as u64 / 1_000
    }

    #[cfg(not(target_os = "espidf"))]
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn sleep_until_ms(&self, deadline_ms: u64) {
        let now = self.now_ms();
        if deadline_ms > now {
            std::thread::sleep(Duration::from_millis(deadline_ms - now));
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Wall clock
// ───────────────────────────────────────────────────────────────

pub struct SystemWallClock {
    offset: UtcOffset,
}

impl SystemWallClock {
    pub fn new(utc_offset_minutes: i16) -> Result<Self> {
        let offset = UtcOffset::from_whole_seconds(i32::from(utc_offset_minutes) * 60)
            .map_err(|_| Error::InvalidArgument("utc offset out of range"))?;
        Ok(Self { offset })
    }
}

impl WallClock for SystemWallClock {
    fn now(&self) -> Option<OffsetDateTime> {
        localise(OffsetDateTime::now_utc(), self.offset)
    }
}

/// Apply `offset` to `utc`, or `None` if `utc` predates the sync threshold.
pub fn localise(utc: OffsetDateTime, offset: UtcOffset) -> Option<OffsetDateTime> {
    if utc.unix_timestamp() < SYNC_THRESHOLD_UNIX {
        return None;
    }
    Some(utc.to_offset(offset))
}
