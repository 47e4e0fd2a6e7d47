//! Publish and liveness units on one virtual clock.

use std::sync::Arc;

use smartmeter::app::commands::Inbox;
use smartmeter::app::events::SkipReason;
use smartmeter::app::ports::Clock;
use smartmeter::app::service::CycleOutcome;
use smartmeter::config::NodeConfig;
use smartmeter::drivers::led_patterns::{COLOUR_CONNECTED, COLOUR_DISCONNECTED};
use smartmeter::drivers::status_led::StatusLed;
use smartmeter::link::{LinkState, ReconnectPolicy};
use smartmeter::runtime::{
    drive_until, liveness_scheduler, LivenessUnit, NodeContext, PublishUnit, PUBLISH_SCHEDULE,
};
use smartmeter::scheduler::{Schedule, ScheduleKind, Scheduler};
use time::macros::datetime;

use crate::mock_hw::{
    populated_bus, test_config, FixedWallClock, ManualClock, MockI2c, MockPwm, RecordingIndicator,
    RecordingSink, ScriptedTransport,
};

type Units = (
    PublishUnit<smartmeter::sensors::Sampler<MockI2c>, Arc<ScriptedTransport>, FixedWallClock, RecordingSink>,
    LivenessUnit<Arc<ScriptedTransport>, RecordingIndicator>,
);

fn node(config: NodeConfig) -> (Arc<ScriptedTransport>, NodeContext<MockI2c, Arc<ScriptedTransport>>) {
    let transport = ScriptedTransport::new();
    let ctx = NodeContext::bring_up(
        config,
        populated_bus(),
        Arc::clone(&transport),
        Arc::new(Inbox::new()),
    )
    .unwrap();
    (transport, ctx)
}

/// Both units on one scheduler, as if they shared a core.
fn units(ctx: NodeContext<MockI2c, Arc<ScriptedTransport>>) -> (Units, Scheduler) {
    let NodeContext {
        config,
        sampler,
        link,
        metrics,
        ..
    } = ctx;
    let publish = PublishUnit::new(
        &config,
        sampler,
        Arc::clone(&link),
        FixedWallClock(Some(datetime!(2025-03-01 14:05:09 +03:00))),
        RecordingSink::default(),
        Arc::clone(&metrics),
    );
    let liveness = LivenessUnit::new(&config, link, metrics, RecordingIndicator::default());

    let mut sched = liveness_scheduler(&config, 0);
    sched.add(
        Schedule {
            label: PUBLISH_SCHEDULE,
            kind: ScheduleKind::Periodic {
                interval_ms: config.publish_period_ms,
            },
            enabled: true,
        },
        0,
    );
    ((publish, liveness), sched)
}

#[test]
fn node_connects_then_publishes_every_period() {
    let (transport, ctx) = node(test_config());
    let link = Arc::clone(&ctx.link);
    let metrics = Arc::clone(&ctx.metrics);
    let (mut units, mut sched) = units(ctx);
    let clock = ManualClock::at(0);

    drive_until(&clock, &mut sched, &mut units, 3_500);
    assert_eq!(clock.now_ms(), 3_500);
    assert_eq!(link.state(), LinkState::Connected);
    assert_eq!(transport.connects(), 1);
    // Cycles at 1, 2 and 3 s, two delivery classes each.
    assert_eq!(transport.sent().len(), 6);
    assert_eq!(metrics.snapshot().cycles, 3);
    assert_eq!(units.1.indicator().shown.last(), Some(&COLOUR_CONNECTED));
}

#[test]
fn loss_skips_cycles_until_automatic_recovery() {
    let (transport, ctx) = node(test_config());
    let link = Arc::clone(&ctx.link);
    let metrics = Arc::clone(&ctx.metrics);
    let (mut units, mut sched) = units(ctx);
    let clock = ManualClock::at(0);

    drive_until(&clock, &mut sched, &mut units, 3_500);
    assert_eq!(transport.sent().len(), 6);

    // Lost at the 3.6 s liveness tick; attempts at 4.6 s (refused) and 6.6 s.
    transport.refuse_connects(true);
    transport.drop_session();
    drive_until(&clock, &mut sched, &mut units, 5_500);
    assert_eq!(link.state(), LinkState::AttemptingReconnect);
    assert_eq!(
        units.0.last_outcome(),
        Some(CycleOutcome::Skipped(SkipReason::LinkReconnecting))
    );

    transport.refuse_connects(false);
    drive_until(&clock, &mut sched, &mut units, 7_500);
    assert_eq!(link.state(), LinkState::Connected);
    let snap = link.snapshot();
    assert_eq!(snap.reconnect_attempts, 2);
    assert_eq!(snap.reconnects, 1);

    // 4, 5 and 6 s skipped; 7 s published.
    assert_eq!(metrics.snapshot().skipped_cycles, 3);
    assert_eq!(transport.sent().len(), 8);
    assert!(matches!(units.0.last_outcome(), Some(CycleOutcome::Completed(_))));
}

#[test]
fn liveness_retries_manual_reconnect_at_min_backoff() {
    let (transport, ctx) = node(NodeConfig {
        reconnect: ReconnectPolicy {
            auto_reconnect: false,
            ..ReconnectPolicy::default()
        },
        ..test_config()
    });
    let link = Arc::clone(&ctx.link);
    let (mut units, mut sched) = units(ctx);
    let clock = ManualClock::at(0);

    drive_until(&clock, &mut sched, &mut units, 500);
    assert_eq!(transport.connects(), 1);

    transport.refuse_connects(true);
    transport.drop_session();
    drive_until(&clock, &mut sched, &mut units, 600);
    // Link's own single attempt on the loss edge.
    assert_eq!(transport.connects(), 2);
    assert_eq!(link.state(), LinkState::Disconnected);
    assert_eq!(units.1.indicator().shown.last(), Some(&COLOUR_DISCONNECTED));

    // The liveness unit owns the retries: one second after its last
    // connect (1.1 s), then every second.
    drive_until(&clock, &mut sched, &mut units, 2_750);
    assert_eq!(transport.connects(), 4);
    assert_eq!(link.snapshot().failed_manual_reconnects, 3);

    transport.refuse_connects(false);
    drive_until(&clock, &mut sched, &mut units, 3_750);
    assert_eq!(link.state(), LinkState::Connected);
}

#[test]
fn first_connect_is_retried_until_the_broker_answers() {
    let (transport, ctx) = node(test_config());
    transport.refuse_connects(true);
    let link = Arc::clone(&ctx.link);
    let (mut units, mut sched) = units(ctx);
    let clock = ManualClock::at(0);

    // Attempts at 100 ms and 1.1 s.
    drive_until(&clock, &mut sched, &mut units, 1_500);
    assert_eq!(transport.connects(), 2);
    assert_eq!(link.state(), LinkState::Disconnected);
    assert_eq!(units.0.last_outcome(), Some(CycleOutcome::Skipped(SkipReason::LinkDown)));

    transport.refuse_connects(false);
    drive_until(&clock, &mut sched, &mut units, 2_150);
    assert_eq!(link.state(), LinkState::Connected);
}

#[test]
fn status_led_follows_the_link() {
    let red = MockPwm::default();
    let green = MockPwm::default();
    let blue = MockPwm::default();
    let led = StatusLed::new(red.clone(), green.clone(), blue.clone());

    let (_transport, ctx) = node(test_config());
    let mut liveness = LivenessUnit::new(&ctx.config, Arc::clone(&ctx.link), Arc::clone(&ctx.metrics), led);
    let mut sched = liveness_scheduler(&ctx.config, 0);
    let clock = ManualClock::at(0);

    drive_until(&clock, &mut sched, &mut liveness, 200);
    assert_eq!((red.duty(), green.duty(), blue.duty()), (0, 255, 255));
}
