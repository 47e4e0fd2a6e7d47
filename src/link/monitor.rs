//! Published view of the link for readers on other units.
//!
//! The state machine is the only writer.  Every transition replaces the
//! whole [`LinkSnapshot`] under one lock, so readers never see a state
//! paired with counters from a different transition.  Waiters block on a
//! condvar instead of sleeping and re-checking.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::LinkState;

/// Consistent copy of the link state and its counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSnapshot {
    pub state: LinkState,
    pub auto_reconnect: bool,
    /// A loss happened and no session has been re-established since.
    pub recovery_pending: bool,
    /// Monotonic ms at which `state` was entered.
    pub since_ms: u64,
    /// Sessions opened, first connect included.
    pub sessions: u32,
    /// Edges from CONNECTED into the disconnected condition.
    pub disconnects: u32,
    pub reconnect_attempts: u32,
    pub reconnects: u32,
    pub failed_manual_reconnects: u32,
}

impl LinkSnapshot {
    pub(super) fn initial(auto_reconnect: bool) -> Self {
        Self {
            state: LinkState::Disconnected,
            auto_reconnect,
            recovery_pending: false,
            since_ms: 0,
            sessions: 0,
            disconnects: 0,
            reconnect_attempts: 0,
            reconnects: 0,
            failed_manual_reconnects: 0,
        }
    }
}

pub struct LinkMonitor {
    snapshot: Mutex<LinkSnapshot>,
    changed: Condvar,
}

impl LinkMonitor {
    pub(super) fn new(initial: LinkSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(initial),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LinkSnapshot> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        *self.lock()
    }

    pub fn state(&self) -> LinkState {
        self.lock().state
    }

    pub(super) fn publish(&self, snapshot: LinkSnapshot) {
        *self.lock() = snapshot;
        self.changed.notify_all();
    }

    /// Block until `predicate` holds or `timeout` elapses.
    ///
    /// Returns the satisfying snapshot, or `None` on timeout.  Returns
    /// immediately when the predicate already holds.
    pub fn wait_for(
        &self,
        timeout: Duration,
        mut predicate: impl FnMut(&LinkSnapshot) -> bool,
    ) -> Option<LinkSnapshot> {
        let guard = self.lock();
        let (guard, result) = self
            .changed
            .wait_timeout_while(guard, timeout, |snap| !predicate(snap))
            .unwrap_or_else(PoisonError::into_inner);
        if result.timed_out() && !predicate(&guard) {
            None
        } else {
            Some(*guard)
        }
    }

    /// Block until the link is in `state` or `timeout` elapses.
    pub fn wait_for_state(&self, state: LinkState, timeout: Duration) -> bool {
        self.wait_for(timeout, |snap| snap.state == state).is_some()
    }
}
