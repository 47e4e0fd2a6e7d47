//! Broker link lifecycle.
//!
//! ```text
//!                 connect()
//!  DISCONNECTED ───────────► CONNECTING ───────► CONNECTED
//!       ▲  ▲                      │ fail             │
//!       │  └──────────────────────┘                  │ session lost
//!       │                                            ▼
//!       │      manual reconnect ok           DISCONNECTED ──► observers (once)
//!       │   ◄───────────────────────────────────────┤
//!       │                                            │ auto_reconnect
//!       │  auto disabled                             ▼
//!       └───────────────────────────── ATTEMPTING_RECONNECT ──(attempt ok)──► CONNECTED
//!                                       (backoff min..max)
//! ```
//!
//! [`Link`] is the single writer of the link state.  Lifecycle methods
//! (`connect`, `reconnect`, `disconnect`, `set_auto_reconnect`, `service`)
//! serialise on one internal lock; every transition is then published to
//! the [`LinkMonitor`] so the publish unit and diagnostics read a coherent
//! [`LinkSnapshot`] without taking the lifecycle lock.
//!
//! Publishes hold the read side of a session gate from the status check
//! until the transport returns.  Tearing a session down takes the write
//! side, so a publish that saw READY never reaches a closed transport.
//!
//! Time is passed in as monotonic milliseconds (`now_ms`).  The machine
//! never sleeps: backoff is a deadline checked by `service`, so a virtual
//! clock drives it deterministically in tests.

pub mod backoff;
pub mod monitor;
pub mod transport;

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use log::{info, warn};

use crate::error::{Error, Result};

pub use backoff::{Backoff, ReconnectPolicy};
pub use monitor::{LinkMonitor, LinkSnapshot};
pub use transport::{ConnectParams, NullTransport, Qos, SessionStatus, Transport};

// ---------------------------------------------------------------------------
// State identity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    AttemptingReconnect,
}

/// What the publish path should do this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    /// Session open; publish.
    Ready,
    /// First connect in flight.
    Connecting,
    /// Background recovery in progress; skip quietly.
    Reconnecting,
    /// No session and no automatic recovery running.
    Down,
}

impl From<LinkState> for LinkStatus {
    fn from(state: LinkState) -> Self {
        match state {
            LinkState::Connected => Self::Ready,
            LinkState::Connecting => Self::Connecting,
            LinkState::AttemptingReconnect => Self::Reconnecting,
            LinkState::Disconnected => Self::Down,
        }
    }
}

/// Fired once per loss of an established session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisconnectEvent {
    pub at_ms: u64,
    /// 1 for the first loss since boot, incremented per loss.
    pub sequence: u32,
    /// Policy in force when the loss was detected.
    pub auto_reconnect: bool,
}

/// Disconnect observer.
///
/// Runs synchronously on the liveness unit while the lifecycle lock is
/// held.  It must return quickly and must not call back into the [`Link`]
/// (doing so deadlocks).
pub type DisconnectObserver = Box<dyn FnMut(&DisconnectEvent) + Send>;

/// Result of [`Link::publish`] when no error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Sent,
    /// The link was not ready; the transport was not touched.
    Skipped(LinkStatus),
}

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

struct LinkInner {
    snap: LinkSnapshot,
    policy: ReconnectPolicy,
    backoff: Backoff,
    next_attempt_ms: u64,
    observers: Vec<DisconnectObserver>,
}

pub struct Link<T: Transport> {
    transport: T,
    params: ConnectParams,
    inner: Mutex<LinkInner>,
    /// Read: a publish in flight.  Write: the session is being closed.
    session: RwLock<()>,
    monitor: LinkMonitor,
}

impl<T: Transport> Link<T> {
    pub fn new(transport: T, params: ConnectParams, policy: ReconnectPolicy) -> Result<Self> {
        policy.validate()?;
        let snap = LinkSnapshot::initial(policy.auto_reconnect);
        Ok(Self {
            transport,
            params,
            inner: Mutex::new(LinkInner {
                snap,
                policy,
                backoff: Backoff::new(&policy),
                next_attempt_ms: 0,
                observers: Vec::new(),
            }),
            session: RwLock::new(()),
            monitor: LinkMonitor::new(snap),
        })
    }

    fn lock(&self) -> MutexGuard<'_, LinkInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publishing(&self) -> RwLockReadGuard<'_, ()> {
        self.session.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn closing(&self) -> RwLockWriteGuard<'_, ()> {
        self.session.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a disconnect observer.  See [`DisconnectObserver`].
    pub fn on_disconnect(&self, observer: impl FnMut(&DisconnectEvent) + Send + 'static) {
        self.lock().observers.push(Box::new(observer));
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn params(&self) -> &ConnectParams {
        &self.params
    }

    pub fn monitor(&self) -> &LinkMonitor {
        &self.monitor
    }

    pub fn state(&self) -> LinkState {
        self.monitor.state()
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        self.monitor.snapshot()
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.lock().policy
    }

    /// Non-blocking status read for the publish path.
    pub fn poll(&self) -> LinkStatus {
        LinkStatus::from(self.monitor.state())
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Open the first session, or a fresh one after [`disconnect`](Self::disconnect).
    ///
    /// No-op when already connected.  Fails with `InvalidArgument` while
    /// automatic recovery owns the session.
    pub fn connect(&self, now_ms: u64) -> Result<()> {
        let mut inner = self.lock();
        match inner.snap.state {
            LinkState::Connected => return Ok(()),
            LinkState::AttemptingReconnect => {
                return Err(Error::InvalidArgument("automatic reconnect in progress"));
            }
            LinkState::Disconnected | LinkState::Connecting => {}
        }

        self.enter(&mut inner, LinkState::Connecting, now_ms);
        match self.transport.connect(&self.params) {
            Ok(()) => {
                self.session_opened(&mut inner, now_ms);
                Ok(())
            }
            Err(e) => {
                warn!("Link: connect to {} failed: {}", self.params.endpoint, e);
                self.enter(&mut inner, LinkState::Disconnected, now_ms);
                Err(e.into())
            }
        }
    }

    /// One blocking reconnect attempt.
    ///
    /// On success the link goes straight from DISCONNECTED to CONNECTED.
    /// On failure the state is left DISCONNECTED and
    /// [`Error::ReconnectFailed`] is returned; nothing retries on its own.
    pub fn reconnect(&self, now_ms: u64) -> Result<()> {
        let mut inner = self.lock();
        self.manual_attempt(&mut inner, now_ms)
    }

    /// Close the session on request.  Observers are not notified and no
    /// recovery is scheduled.
    pub fn disconnect(&self, now_ms: u64) {
        let mut inner = self.lock();
        if inner.snap.state == LinkState::Disconnected && !inner.snap.recovery_pending {
            return;
        }
        let _gate = self.closing();
        self.transport.disconnect();
        inner.snap.recovery_pending = false;
        self.enter(&mut inner, LinkState::Disconnected, now_ms);
    }

    /// Change the recovery policy for this and future losses.
    ///
    /// While connected only the policy changes.  While a loss is pending
    /// recovery, enabling starts background attempts and disabling stops
    /// them.  Observers already ran on the loss edge and are not re-run.
    pub fn set_auto_reconnect(&self, enabled: bool, now_ms: u64) {
        let mut inner = self.lock();
        inner.policy.auto_reconnect = enabled;
        inner.snap.auto_reconnect = enabled;

        match (inner.snap.state, enabled) {
            (LinkState::Disconnected, true) if inner.snap.recovery_pending => {
                self.schedule_recovery(&mut inner, now_ms);
            }
            (LinkState::AttemptingReconnect, false) => {
                self.enter(&mut inner, LinkState::Disconnected, now_ms);
            }
            _ => self.monitor.publish(inner.snap),
        }
    }

    /// Liveness tick: service the session, detect loss and drive recovery.
    ///
    /// Blocks for at most `max_wait` inside the transport.
    pub fn service(&self, now_ms: u64, max_wait: Duration) -> LinkStatus {
        let mut inner = self.lock();
        match inner.snap.state {
            LinkState::Connected => {
                if self.transport.service(max_wait) == SessionStatus::Lost {
                    self.session_lost(&mut inner, now_ms);
                }
            }
            LinkState::AttemptingReconnect => {
                if now_ms >= inner.next_attempt_ms {
                    self.auto_attempt(&mut inner, now_ms);
                }
            }
            LinkState::Disconnected | LinkState::Connecting => {}
        }
        LinkStatus::from(inner.snap.state)
    }

    /// Publish on the open session.
    ///
    /// When the link is not ready the transport is not called and
    /// [`PublishOutcome::Skipped`] carries the reason.  Transport failures
    /// do not change the link state; only `service` detects loss.  A loss
    /// detected meanwhile waits for the in-flight publish to return.
    pub fn publish(&self, topic: &str, payload: &[u8], qos: Qos) -> Result<PublishOutcome> {
        let _gate = self.publishing();
        let status = self.poll();
        if status != LinkStatus::Ready {
            return Ok(PublishOutcome::Skipped(status));
        }
        self.transport.publish(topic, payload, qos)?;
        Ok(PublishOutcome::Sent)
    }

    // ── Internal ─────────────────────────────────────────────────

    fn enter(&self, inner: &mut LinkInner, next: LinkState, now_ms: u64) {
        let prev = inner.snap.state;
        if prev != next {
            info!("Link: {:?} -> {:?}", prev, next);
            inner.snap.state = next;
            inner.snap.since_ms = now_ms;
        }
        self.monitor.publish(inner.snap);
    }

    fn session_opened(&self, inner: &mut LinkInner, now_ms: u64) {
        inner.snap.sessions = inner.snap.sessions.saturating_add(1);
        inner.snap.recovery_pending = false;
        inner.backoff.reset();
        self.enter(inner, LinkState::Connected, now_ms);
    }

    fn session_lost(&self, inner: &mut LinkInner, now_ms: u64) {
        {
            let _gate = self.closing();
            self.transport.disconnect();
            inner.snap.disconnects = inner.snap.disconnects.saturating_add(1);
            inner.snap.recovery_pending = true;
            self.enter(inner, LinkState::Disconnected, now_ms);
        }

        let event = DisconnectEvent {
            at_ms: now_ms,
            sequence: inner.snap.disconnects,
            auto_reconnect: inner.policy.auto_reconnect,
        };
        warn!(
            "Link: session lost (#{}, auto_reconnect={})",
            event.sequence, event.auto_reconnect
        );
        for observer in inner.observers.iter_mut() {
            observer(&event);
        }

        if inner.policy.auto_reconnect {
            inner.backoff.reset();
            self.schedule_recovery(inner, now_ms);
        } else {
            // Result already logged and counted.
            let _ = self.manual_attempt(inner, now_ms);
        }
    }

    fn schedule_recovery(&self, inner: &mut LinkInner, now_ms: u64) {
        let delay = inner.backoff.next_delay();
        inner.next_attempt_ms = now_ms.saturating_add(delay);
        info!("Link: reconnect attempt in {} ms", delay);
        self.enter(inner, LinkState::AttemptingReconnect, now_ms);
    }

    fn manual_attempt(&self, inner: &mut LinkInner, now_ms: u64) -> Result<()> {
        match inner.snap.state {
            LinkState::Connected => return Ok(()),
            LinkState::AttemptingReconnect => {
                return Err(Error::InvalidArgument("automatic reconnect in progress"));
            }
            LinkState::Disconnected | LinkState::Connecting => {}
        }
        if inner.snap.sessions == 0 {
            return Err(Error::InvalidArgument("link was never connected"));
        }

        inner.snap.reconnect_attempts = inner.snap.reconnect_attempts.saturating_add(1);
        match self.transport.connect(&self.params) {
            Ok(()) => {
                inner.snap.reconnects = inner.snap.reconnects.saturating_add(1);
                self.session_opened(inner, now_ms);
                Ok(())
            }
            Err(e) => {
                inner.snap.failed_manual_reconnects =
                    inner.snap.failed_manual_reconnects.saturating_add(1);
                warn!("Link: manual reconnect failed: {}", e);
                self.monitor.publish(inner.snap);
                Err(Error::ReconnectFailed)
            }
        }
    }

    fn auto_attempt(&self, inner: &mut LinkInner, now_ms: u64) {
        inner.snap.reconnect_attempts = inner.snap.reconnect_attempts.saturating_add(1);
        match self.transport.connect(&self.params) {
            Ok(()) => {
                inner.snap.reconnects = inner.snap.reconnects.saturating_add(1);
                self.session_opened(inner, now_ms);
            }
            Err(e) => {
                let delay = inner.backoff.next_delay();
                inner.next_attempt_ms = now_ms.saturating_add(delay);
                warn!(
                    "Link: reconnect attempt {} failed ({}), next in {} ms",
                    inner.snap.reconnect_attempts, e, delay
                );
                self.monitor.publish(inner.snap);
            }
        }
    }
}
