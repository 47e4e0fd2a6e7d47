//! Deadline scheduler.
//!
//! Each unit owns one [`Scheduler`] holding the work it does on a timer:
//! the publish cycle, link servicing, the diagnostics report.  The
//! scheduler only tracks deadlines against a caller-supplied monotonic
//! `now_ms`; firing is delegated to a [`SchedulerDelegate`] and waiting
//! is the [`Clock`](crate::app::ports::Clock)'s business.
//!
//! ```text
//!   Clock::now_ms ──▶ Scheduler::tick ──▶ SchedulerDelegate::on_schedule_fired
//!        ▲                  │
//!        └── sleep_until ◀──┘ next_due_ms
//! ```
//!
//! Keeping sleep out of the scheduler is what lets tests drive a whole
//! unit with a virtual clock.

use crate::app::ports::{ScheduleFiredKind, SchedulerDelegate};
use log::{debug, info};

// ═══════════════════════════════════════════════════════════════
//  Schedule types
// ═══════════════════════════════════════════════════════════════

/// A single schedule entry.
#[derive(Debug, Clone)]
pub struct Schedule {
    pub label: &'static str,
    pub kind: ScheduleKind,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleKind {
    /// Fire every `interval_ms`, first at `add` time + interval.
    Periodic { interval_ms: u32 },
    /// Fire once after `delay_ms`, then auto-disable.
    OneShot { delay_ms: u32 },
}

// ═══════════════════════════════════════════════════════════════
//  Scheduler engine
// ═══════════════════════════════════════════════════════════════

/// Maximum number of concurrent schedules (stack-allocated).
const MAX_SCHEDULES: usize = 4;

pub struct Scheduler {
    schedules: [Option<ScheduleEntry>; MAX_SCHEDULES],
}

#[derive(Debug, Clone)]
struct ScheduleEntry {
    schedule: Schedule,
    next_due_ms: u64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            schedules: [None, None, None, None],
        }
    }

    /// Add a schedule.  Returns the slot index, or `None` if full.
    pub fn add(&mut self, schedule: Schedule, now_ms: u64) -> Option<usize> {
        let delay = match schedule.kind {
            ScheduleKind::Periodic { interval_ms } => interval_ms,
            ScheduleKind::OneShot { delay_ms } => delay_ms,
        };
        for (i, slot) in self.schedules.iter_mut().enumerate() {
            if slot.is_none() {
                info!("Scheduler: added '{}' at slot {}", schedule.label, i);
                *slot = Some(ScheduleEntry {
                    schedule,
                    next_due_ms: now_ms.saturating_add(u64::from(delay)),
                });
                return Some(i);
            }
        }
        None
    }

    /// Remove a schedule by slot index.
    pub fn remove(&mut self, slot: usize) {
        if let Some(entry) = self.schedules.get_mut(slot).and_then(Option::take) {
            info!("Scheduler: removed '{}' from slot {}", entry.schedule.label, slot);
        }
    }

    /// Enable or disable one schedule.  Re-enabling restarts its interval
    /// from `now_ms`.
    pub fn set_enabled(&mut self, slot: usize, enabled: bool, now_ms: u64) {
        if let Some(Some(entry)) = self.schedules.get_mut(slot) {
            if enabled && !entry.schedule.enabled {
                let delay = match entry.schedule.kind {
                    ScheduleKind::Periodic { interval_ms } => interval_ms,
                    ScheduleKind::OneShot { delay_ms } => delay_ms,
                };
                entry.next_due_ms = now_ms.saturating_add(u64::from(delay));
            }
            entry.schedule.enabled = enabled;
        }
    }

    /// Fire every schedule whose deadline has passed.
    ///
    /// A periodic schedule fires at most once per tick.  If the unit fell
    /// behind by more than one interval the missed firings are dropped and
    /// the schedule realigns to `now_ms`.
    pub fn tick(&mut self, now_ms: u64, delegate: &mut dyn SchedulerDelegate) {
        for slot in &mut self.schedules {
            let entry = match slot {
                Some(e) if e.schedule.enabled && now_ms >= e.next_due_ms => e,
                _ => continue,
            };

            match entry.schedule.kind {
                ScheduleKind::Periodic { interval_ms } => {
                    let interval = u64::from(interval_ms.max(1));
                    entry.next_due_ms = entry.next_due_ms.saturating_add(interval);
                    if entry.next_due_ms <= now_ms {
                        debug!(
                            "Scheduler: '{}' overran by {} ms",
                            entry.schedule.label,
                            now_ms - entry.next_due_ms
                        );
                        entry.next_due_ms = now_ms.saturating_add(interval);
                    }
                    delegate.on_schedule_fired(
                        entry.schedule.label,
                        ScheduleFiredKind::Periodic,
                        now_ms,
                    );
                }
                ScheduleKind::OneShot { delay_ms } => {
                    info!(
                        "Scheduler: '{}' one-shot fired (after {} ms)",
                        entry.schedule.label, delay_ms
                    );
                    entry.schedule.enabled = false;
                    delegate.on_schedule_fired(
                        entry.schedule.label,
                        ScheduleFiredKind::OneShot,
                        now_ms,
                    );
                }
            }
        }
    }

    /// Earliest deadline among enabled schedules.
    pub fn next_due_ms(&self) -> Option<u64> {
        self.schedules
            .iter()
            .flatten()
            .filter(|e| e.schedule.enabled)
            .map(|e| e.next_due_ms)
            .min()
    }

    /// Number of active (enabled) schedules.
    pub fn active_count(&self) -> usize {
        self.schedules
            .iter()
            .flatten()
            .filter(|e| e.schedule.enabled)
            .count()
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
