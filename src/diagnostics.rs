//! Runtime diagnostics.
//!
//! The publish and reactor units bump counters in a shared [`Metrics`];
//! the liveness unit logs them together with the link counters every
//! `diagnostics_period_ms`.  Counters live behind one lock so a report
//! never mixes values from different cycles.

use std::sync::{Mutex, PoisonError};

use log::{debug, info};
use serde::Serialize;

use crate::link::LinkSnapshot;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Publish cycles started.
    pub cycles: u32,
    /// Payloads handed to the transport successfully (per delivery class).
    pub published: u32,
    pub best_effort_failures: u32,
    pub ack_timeouts: u32,
    /// Cycles that ended in a non-tolerated error.
    pub fatal_cycles: u32,
    pub skipped_cycles: u32,
    /// Individual source reads that failed.
    pub sample_failures: u32,
    pub alerts: u32,
    pub normals: u32,
    /// The most recent cycle that reached the pipeline ended fatally.
    pub last_cycle_failed: bool,
}

#[derive(Default)]
pub struct Metrics {
    inner: Mutex<MetricsSnapshot>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `update` atomically with respect to [`snapshot`](Self::snapshot).
    pub fn record(&self, update: impl FnOnce(&mut MetricsSnapshot)) {
        let mut m = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        update(&mut m);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Free heap in bytes (current, low-water mark).
#[cfg(target_os = "espidf")]
pub fn heap_stats() -> Option<(u32, u32)> {
    use esp_idf_svc::sys::{esp_get_free_heap_size, esp_get_minimum_free_heap_size};
    // SAFETY: both are read-only queries on the allocator.
    let free = unsafe { esp_get_free_heap_size() };
    let min = unsafe { esp_get_minimum_free_heap_size() };
    Some((free, min))
}

#[cfg(not(target_os = "espidf"))]
pub fn heap_stats() -> Option<(u32, u32)> {
    None
}

/// Log one diagnostics report.
pub fn report(uptime_ms: u64, link: &LinkSnapshot, metrics: &MetricsSnapshot) {
    info!(
        "DIAG | up={}s | link={:?} since={}ms sessions={} drops={} retries={} recovered={} manual_fail={}",
        uptime_ms / 1000,
        link.state,
        link.since_ms,
        link.sessions,
        link.disconnects,
        link.reconnect_attempts,
        link.reconnects,
        link.failed_manual_reconnects,
    );
    info!(
        "DIAG | cycles={} sent={} qos0_fail={} ack_timeout={} fatal={} skipped={} sample_fail={} alerts={}",
        metrics.cycles,
        metrics.published,
        metrics.best_effort_failures,
        metrics.ack_timeouts,
        metrics.fatal_cycles,
        metrics.skipped_cycles,
        metrics.sample_failures,
        metrics.alerts,
    );
    if let Some((free, min)) = heap_stats() {
        info!("DIAG | heap free={} min={}", free, min);
    }
    if let Ok(json) = serde_json::to_string(metrics) {
        debug!("DIAG | {}", json);
    }
}
