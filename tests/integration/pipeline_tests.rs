//! Publish cycle: sample → format → publish against a scripted broker.

use std::sync::Arc;
use std::time::Duration;

use smartmeter::app::events::{AppEvent, SkipReason};
use smartmeter::app::service::{CycleOutcome, Delivery, TelemetryService};
use smartmeter::config::{DeliveryMode, NodeConfig};
use smartmeter::diagnostics::Metrics;
use smartmeter::error::{Error, TransportError};
use smartmeter::link::{ConnectParams, Link, Qos};
use smartmeter::sensors::register::SharedBus;
use smartmeter::sensors::Sampler;
use time::macros::datetime;

use crate::mock_hw::{
    populated_bus, test_config, FixedWallClock, MockI2c, RecordingSink, ScriptedTransport,
};

struct Rig {
    transport: Arc<ScriptedTransport>,
    link: Link<Arc<ScriptedTransport>>,
    sampler: Sampler<MockI2c>,
    service: TelemetryService,
    metrics: Arc<Metrics>,
    wall: FixedWallClock,
    sink: RecordingSink,
}

impl Rig {
    fn new(config: NodeConfig) -> Self {
        let transport = ScriptedTransport::new();
        let link = Link::new(
            Arc::clone(&transport),
            ConnectParams::from_config(&config),
            config.reconnect,
        )
        .unwrap();
        let bus = SharedBus::new(populated_bus());
        let sampler = Sampler::bring_up(&bus, &config).unwrap();
        let metrics = Arc::new(Metrics::new());
        Self {
            transport,
            link,
            sampler,
            service: TelemetryService::new(&config, Arc::clone(&metrics)),
            metrics,
            wall: FixedWallClock(Some(datetime!(2025-03-01 14:05:09 +03:00))),
            sink: RecordingSink::default(),
        }
    }

    fn connected(config: NodeConfig) -> Self {
        let rig = Self::new(config);
        rig.link.connect(0).unwrap();
        rig
    }

    fn cycle(&mut self) -> CycleOutcome {
        self.service
            .cycle(&mut self.sampler, &self.link, &self.wall, &mut self.sink)
    }
}

#[test]
fn cycle_publishes_same_payload_on_both_classes() {
    let mut rig = Rig::connected(test_config());

    let CycleOutcome::Completed(report) = rig.cycle() else {
        panic!("cycle did not complete");
    };
    assert_eq!(report.best_effort, Delivery::Sent);
    assert_eq!(report.acknowledged, Delivery::Sent);

    let sent = rig.transport.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].qos, Qos::AtMostOnce);
    assert_eq!(sent[1].qos, Qos::AtLeastOnce);
    assert!(sent.iter().all(|m| m.topic == "smartmeter/data"));
    assert_eq!(sent[0].payload, sent[1].payload);
    assert_eq!(sent[0].payload.len(), report.bytes);
    assert_eq!(rig.service.last_payload(report.bytes), sent[0].payload.as_slice());

    let json: serde_json::Value = serde_json::from_slice(&sent[0].payload).unwrap();
    assert_eq!(json["timestamp"], "2025-03-01T14:05:09+03:00");
    assert_eq!(json["feeder"]["line_voltage"].as_f64(), Some(12.0));
    assert_eq!(json["feeder"]["current"].as_f64(), Some(123.4));
    assert_eq!(json["feeder"]["power"].as_f64(), Some(1000.0));
    assert_eq!(json["transformer3"]["current"].as_f64(), Some(40.0));
    assert!(json["transformer3"].get("power").is_none());

    let snap = rig.metrics.snapshot();
    assert_eq!(snap.cycles, 1);
    assert_eq!(snap.published, 2);
    assert!(!snap.last_cycle_failed);
}

#[test]
fn ack_timeout_is_tolerated() {
    let mut rig = Rig::connected(test_config());
    rig.transport.time_out_acks(true);

    let CycleOutcome::Completed(report) = rig.cycle() else {
        panic!("ack timeout must not fail the cycle");
    };
    assert_eq!(report.best_effort, Delivery::Sent);
    assert_eq!(report.acknowledged, Delivery::AckTimeout);
    assert_eq!(rig.sink.count(|e| *e == AppEvent::AckTimeoutTolerated), 1);
    assert_eq!(rig.metrics.snapshot().ack_timeouts, 1);

    // The next cycle carries on normally and nothing is retried.
    rig.transport.time_out_acks(false);
    assert!(matches!(rig.cycle(), CycleOutcome::Completed(_)));
    assert_eq!(rig.transport.sent().len(), 4);
}

#[test]
fn rejected_acknowledged_publish_is_fatal_for_the_cycle() {
    let mut rig = Rig::connected(test_config());
    rig.transport.reject_acknowledged(true);

    assert_eq!(
        rig.cycle(),
        CycleOutcome::Failed(Error::Transport(TransportError::Rejected))
    );
    // Best-effort went out first and stands.
    assert_eq!(rig.transport.sent().len(), 1);
    let snap = rig.metrics.snapshot();
    assert_eq!(snap.fatal_cycles, 1);
    assert!(snap.last_cycle_failed);
}

#[test]
fn best_effort_failure_does_not_stop_acknowledged() {
    let mut rig = Rig::connected(test_config());
    rig.transport.fail_best_effort(true);

    let CycleOutcome::Completed(report) = rig.cycle() else {
        panic!("best-effort failure must not fail the cycle");
    };
    assert_eq!(report.best_effort, Delivery::Failed);
    assert_eq!(report.acknowledged, Delivery::Sent);
    assert_eq!(rig.metrics.snapshot().best_effort_failures, 1);
}

#[test]
fn delivery_mode_selects_classes() {
    let mut rig = Rig::connected(NodeConfig {
        delivery: DeliveryMode::BestEffort,
        ..test_config()
    });
    let CycleOutcome::Completed(report) = rig.cycle() else {
        panic!("cycle did not complete");
    };
    assert_eq!(report.acknowledged, Delivery::NotAttempted);
    assert_eq!(rig.transport.sent().len(), 1);
    assert_eq!(rig.transport.sent()[0].qos, Qos::AtMostOnce);
}

#[test]
fn cycle_skips_while_reconnecting() {
    let mut rig = Rig::connected(test_config());
    rig.transport.refuse_connects(true);
    rig.transport.drop_session();
    rig.link.service(100, Duration::ZERO);

    assert_eq!(rig.cycle(), CycleOutcome::Skipped(SkipReason::LinkReconnecting));
    assert!(rig.transport.sent().is_empty());
    assert_eq!(
        rig.sink.count(|e| *e == AppEvent::CycleSkipped(SkipReason::LinkReconnecting)),
        1
    );
    assert_eq!(rig.metrics.snapshot().skipped_cycles, 1);
}

#[test]
fn cycle_skips_when_never_connected() {
    let mut rig = Rig::new(test_config());
    assert_eq!(rig.cycle(), CycleOutcome::Skipped(SkipReason::LinkDown));
    assert!(rig.transport.sent().is_empty());
}

#[test]
fn cycle_waits_for_clock_sync() {
    let mut rig = Rig::connected(test_config());
    rig.wall = FixedWallClock(None);
    assert_eq!(rig.cycle(), CycleOutcome::Skipped(SkipReason::ClockNotSynced));
    assert!(rig.transport.sent().is_empty());
}

#[test]
fn oversized_record_fails_before_publishing() {
    let mut rig = Rig::connected(NodeConfig {
        payload_capacity: 64,
        ..test_config()
    });

    match rig.cycle() {
        CycleOutcome::Failed(Error::PayloadTooLarge { required, capacity }) => {
            assert_eq!(capacity, 64);
            assert!(required > 64);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(rig.transport.sent().is_empty());
    assert!(rig.metrics.snapshot().last_cycle_failed);
}

#[test]
fn failed_source_reaches_the_wire_as_null() {
    let mock = populated_bus();
    mock.fail_reads(crate::mock_hw::INA219, 0x02);

    let config = test_config();
    let mut rig = Rig::connected(config.clone());
    rig.sampler = Sampler::bring_up(&SharedBus::new(mock), &config).unwrap();

    assert!(matches!(rig.cycle(), CycleOutcome::Completed(_)));
    assert_eq!(
        rig.sink
            .count(|e| matches!(e, AppEvent::SampleFailed { label, .. } if label == "feeder")),
        1
    );
    let json: serde_json::Value = serde_json::from_slice(&rig.transport.sent()[0].payload).unwrap();
    assert!(json["feeder"].is_null());
    assert!(json["transformer1"].is_object());
    assert_eq!(rig.metrics.snapshot().sample_failures, 1);
}
