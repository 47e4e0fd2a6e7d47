//! Node context and the three execution units.
//!
//! ```text
//!  ┌──────────────── NodeContext ────────────────┐
//!  │ SharedBus · Sampler · Arc<Link> · Arc<Inbox> │
//!  │ Arc<Metrics> · NodeConfig                    │
//!  └──────┬──────────────────┬─────────────┬──────┘
//!         ▼                  ▼             ▼
//!   PublishUnit         LivenessUnit    ReactorUnit
//!   "publish" 5 s       "liveness" 100 ms   blocks on inbox
//!   sample→format→pub   connect/service     alert blink
//!                       "diagnostics" 30 s
//! ```
//!
//! Publish and liveness units are [`SchedulerDelegate`]s run by
//! [`drive`]; tests run them with [`drive_until`] on a virtual clock.
//! The reactor unit waits on the classification inbox instead.

use std::sync::Arc;
use std::time::Duration;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::i2c::I2c;
use futures_lite::future::block_on;
use log::{error, info, warn};

use crate::app::commands::{Classification, Inbox};
use crate::app::ports::{
    Clock, EventSink, IndicatorPort, ScheduleFiredKind, SchedulerDelegate, SensorPort, WallClock,
};
use crate::app::reactor::{Reaction, Reactor};
use crate::app::service::{CycleOutcome, TelemetryService};
use crate::config::NodeConfig;
use crate::diagnostics::{self, Metrics};
use crate::drivers::led_patterns::LedPatternEngine;
use crate::error::{Error, Result};
use crate::link::{ConnectParams, Link, LinkState, Transport};
use crate::scheduler::{Schedule, ScheduleKind, Scheduler};
use crate::sensors::register::SharedBus;
use crate::sensors::Sampler;

pub const PUBLISH_SCHEDULE: &str = "publish";
pub const LIVENESS_SCHEDULE: &str = "liveness";
pub const DIAGNOSTICS_SCHEDULE: &str = "diagnostics";

// ───────────────────────────────────────────────────────────────
// Context
// ───────────────────────────────────────────────────────────────

/// Everything the units share.  Built once at boot, then split.
pub struct NodeContext<B: I2c, T: Transport> {
    pub config: NodeConfig,
    pub bus: SharedBus<B>,
    pub sampler: Sampler<B>,
    pub link: Arc<Link<T>>,
    pub inbox: Arc<Inbox>,
    pub metrics: Arc<Metrics>,
}

impl<B: I2c, T: Transport> NodeContext<B, T> {
    /// Validate `config`, bring up every monitor on `i2c` and wrap
    /// `transport` in a link.  Does not connect.
    pub fn bring_up(config: NodeConfig, i2c: B, transport: T, inbox: Arc<Inbox>) -> Result<Self> {
        config.validate()?;
        let bus = SharedBus::new(i2c);
        let sampler = Sampler::bring_up(&bus, &config)?;
        let link = Link::new(transport, ConnectParams::from_config(&config), config.reconnect)?;
        info!(
            "Node context ready: {} source(s), broker {}",
            sampler.source_count(),
            config.endpoint
        );
        Ok(Self {
            config,
            bus,
            sampler,
            link: Arc::new(link),
            inbox,
            metrics: Arc::new(Metrics::new()),
        })
    }
}

// ───────────────────────────────────────────────────────────────
// Schedules
// ───────────────────────────────────────────────────────────────

pub fn publish_scheduler(config: &NodeConfig, now_ms: u64) -> Scheduler {
    let mut s = Scheduler::new();
    s.add(
        Schedule {
            label: PUBLISH_SCHEDULE,
            kind: ScheduleKind::Periodic { interval_ms: config.publish_period_ms },
            enabled: true,
        },
        now_ms,
    );
    s
}

pub fn liveness_scheduler(config: &NodeConfig, now_ms: u64) -> Scheduler {
    let mut s = Scheduler::new();
    s.add(
        Schedule {
            label: LIVENESS_SCHEDULE,
            kind: ScheduleKind::Periodic { interval_ms: config.liveness_period_ms },
            enabled: true,
        },
        now_ms,
    );
    s.add(
        Schedule {
            label: DIAGNOSTICS_SCHEDULE,
            kind: ScheduleKind::Periodic { interval_ms: config.diagnostics_period_ms },
            enabled: config.diagnostics_period_ms > 0,
        },
        now_ms,
    );
    s
}

/// Run `scheduler` forever against `clock`.
pub fn drive(clock: &impl Clock, scheduler: &mut Scheduler, delegate: &mut dyn SchedulerDelegate) -> ! {
    loop {
        let now = clock.now_ms();
        scheduler.tick(now, delegate);
        let next = scheduler.next_due_ms().unwrap_or(now + 1_000);
        clock.sleep_until_ms(next);
    }
}

/// Run `scheduler` until every deadline up to and including `until_ms`
/// has fired, then leave the clock at `until_ms`.
pub fn drive_until(
    clock: &impl Clock,
    scheduler: &mut Scheduler,
    delegate: &mut dyn SchedulerDelegate,
    until_ms: u64,
) {
    loop {
        scheduler.tick(clock.now_ms(), delegate);
        match scheduler.next_due_ms() {
            Some(next) if next <= until_ms => clock.sleep_until_ms(next),
            _ => {
                clock.sleep_until_ms(until_ms);
                return;
            }
        }
    }
}

/// Two delegates sharing one scheduler; each ignores labels it does not own.
impl<A: SchedulerDelegate, B: SchedulerDelegate> SchedulerDelegate for (A, B) {
    fn on_schedule_fired(&mut self, label: &str, kind: ScheduleFiredKind, now_ms: u64) {
        self.0.on_schedule_fired(label, kind, now_ms);
        self.1.on_schedule_fired(label, kind, now_ms);
    }
}

// ───────────────────────────────────────────────────────────────
// Publish unit
// ───────────────────────────────────────────────────────────────

pub struct PublishUnit<S, T: Transport, W, E> {
    service: TelemetryService,
    sensors: S,
    link: Arc<Link<T>>,
    wall: W,
    sink: E,
    last: Option<CycleOutcome>,
}

impl<S: SensorPort, T: Transport, W: WallClock, E: EventSink> PublishUnit<S, T, W, E> {
    pub fn new(
        config: &NodeConfig,
        sensors: S,
        link: Arc<Link<T>>,
        wall: W,
        sink: E,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            service: TelemetryService::new(config, metrics),
            sensors,
            link,
            wall,
            sink,
            last: None,
        }
    }

    pub fn last_outcome(&self) -> Option<CycleOutcome> {
        self.last
    }

    pub fn sink(&self) -> &E {
        &self.sink
    }
}

impl<S: SensorPort, T: Transport, W: WallClock, E: EventSink> SchedulerDelegate
    for PublishUnit<S, T, W, E>
{
    fn on_schedule_fired(&mut self, label: &str, _kind: ScheduleFiredKind, _now_ms: u64) {
        if label == PUBLISH_SCHEDULE {
            let outcome = self
                .service
                .cycle(&mut self.sensors, &self.link, &self.wall, &mut self.sink);
            self.last = Some(outcome);
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Liveness unit
// ───────────────────────────────────────────────────────────────

pub struct LivenessUnit<T: Transport, I> {
    link: Arc<Link<T>>,
    metrics: Arc<Metrics>,
    indicator: I,
    leds: LedPatternEngine,
    service_wait: Duration,
    retry_interval_ms: u64,
    next_retry_ms: u64,
    last_tick_ms: u64,
}

impl<T: Transport, I: IndicatorPort> LivenessUnit<T, I> {
    pub fn new(config: &NodeConfig, link: Arc<Link<T>>, metrics: Arc<Metrics>, indicator: I) -> Self {
        Self {
            link,
            metrics,
            indicator,
            leds: LedPatternEngine::new(),
            service_wait: Duration::from_millis(u64::from(config.service_wait_ms)),
            retry_interval_ms: u64::from(config.reconnect.min_backoff_ms),
            next_retry_ms: 0,
            last_tick_ms: 0,
        }
    }

    pub fn indicator(&self) -> &I {
        &self.indicator
    }

    /// Open a session when none is open and automatic recovery is not
    /// running: the first connect, and the owner's retries after a failed
    /// manual reconnect.
    fn ensure_session(&mut self, now_ms: u64) {
        let snap = self.link.snapshot();
        if snap.state != LinkState::Disconnected || now_ms < self.next_retry_ms {
            return;
        }
        self.next_retry_ms = now_ms.saturating_add(self.retry_interval_ms);

        let result = if snap.recovery_pending {
            self.link.reconnect(now_ms)
        } else {
            self.link.connect(now_ms)
        };
        match result {
            Ok(()) => {}
            Err(Error::ReconnectFailed) => {
                info!("Liveness: reconnect failed, retry in {} ms", self.retry_interval_ms);
            }
            Err(e) => warn!("Liveness: connect failed: {}", e),
        }
    }

    fn refresh_indicator(&mut self, now_ms: u64) {
        let delta = now_ms.saturating_sub(self.last_tick_ms) as u32;
        self.last_tick_ms = now_ms;
        self.leds.set_link_state(self.link.state());
        self.leds.set_fault(self.metrics.snapshot().last_cycle_failed);
        let colour = self.leds.tick(delta);
        if let Err(e) = self.indicator.show(colour) {
            warn!("Liveness: status LED: {}", e);
        }
    }
}

impl<T: Transport, I: IndicatorPort> SchedulerDelegate for LivenessUnit<T, I> {
    fn on_schedule_fired(&mut self, label: &str, _kind: ScheduleFiredKind, now_ms: u64) {
        match label {
            LIVENESS_SCHEDULE => {
                self.ensure_session(now_ms);
                self.link.service(now_ms, self.service_wait);
                self.refresh_indicator(now_ms);
            }
            DIAGNOSTICS_SCHEDULE => {
                diagnostics::report(now_ms, &self.link.snapshot(), &self.metrics.snapshot());
            }
            _ => {}
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Reactor unit
// ───────────────────────────────────────────────────────────────

pub struct ReactorUnit<P: OutputPin, D: DelayNs, E> {
    reactor: Reactor<P, D>,
    inbox: Arc<Inbox>,
    sink: E,
    metrics: Arc<Metrics>,
}

impl<P: OutputPin, D: DelayNs, E: EventSink> ReactorUnit<P, D, E> {
    pub fn new(reactor: Reactor<P, D>, inbox: Arc<Inbox>, sink: E, metrics: Arc<Metrics>) -> Self {
        Self {
            reactor,
            inbox,
            sink,
            metrics,
        }
    }

    pub fn handle(&mut self, c: &Classification) {
        match self.reactor.react(c, &mut self.sink) {
            Ok(Reaction::Alert { .. }) => self.metrics.record(|m| m.alerts += 1),
            Ok(Reaction::Normal) => self.metrics.record(|m| m.normals += 1),
            Err(e) => error!("Reactor: {}", e),
        }
    }

    /// Handle every classification already queued.  Returns how many.
    pub fn drain(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(c) = self.inbox.try_receive() {
            self.handle(&c);
            handled += 1;
        }
        handled
    }

    /// Block on the inbox forever.
    pub fn run(mut self) -> ! {
        info!("Reactor: waiting for classifications");
        loop {
            let c = block_on(self.inbox.receive());
            self.handle(&c);
        }
    }

    pub fn sink(&self) -> &E {
        &self.sink
    }

    pub fn reactor(&self) -> &Reactor<P, D> {
        &self.reactor
    }
}
