//! Sampler bring-up and polling against the mock register file.

use smartmeter::config::{DeviceConfig, NodeConfig, SourceConfig};
use smartmeter::error::{BusError, Error};
use smartmeter::sensors::calibration::Verification;
use smartmeter::sensors::ina219::{self, Ina219};
use smartmeter::sensors::register::SharedBus;
use smartmeter::sensors::{Label, Monitor, Sampler};
use smartmeter::telemetry::{format_into, TelemetryRecord};
use time::macros::datetime;

use crate::mock_hw::{populated_bus, CapturedLog, MockI2c, INA219, INA3221};

fn close(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-4
}

#[test]
fn bring_up_programs_calibration_and_reads_every_source() {
    let mock = populated_bus();
    let bus = SharedBus::new(mock.clone());
    let sampler = Sampler::bring_up(&bus, &NodeConfig::default()).unwrap();

    // 3.2 A full scale over 0.1 Ω: lsb 0.1 mA, cal = 0.04096 / (1e-4 × 0.1).
    assert_eq!(mock.register(INA219, ina219::reg::CALIBRATION), Some(4096));
    assert_eq!(sampler.source_count(), 4);

    let set = sampler.sample_all();
    let labels: Vec<&str> = set.iter().map(|s| s.label.as_str()).collect();
    assert_eq!(labels, ["feeder", "transformer1", "transformer2", "transformer3"]);

    let feeder = set[0].reading.unwrap();
    assert!(close(feeder.bus_voltage, 12.0));
    assert!(close(feeder.shunt_voltage, 0.012_34));
    assert!(close(feeder.current.unwrap(), 0.1234));
    assert!(close(feeder.power.unwrap(), 1.0));

    for (ch, source) in set[1..].iter().enumerate() {
        let r = source.reading.unwrap();
        assert_eq!(r.channel_id, ch as u8);
        assert!(close(r.bus_voltage, 5.0));
        assert!(close(r.shunt_voltage, 0.004));
        assert!(close(r.current.unwrap(), 0.04));
        assert_eq!(r.power, None);
    }
}

#[test]
fn warning_alert_is_programmed_at_bring_up() {
    let mock = populated_bus();
    let bus = SharedBus::new(mock.clone());
    Sampler::bring_up(&bus, &NodeConfig::default()).unwrap();

    // 40 mA × 0.1 Ω = 4 mV = 800 × 5 µV on the channel 1 warning limit.
    assert_eq!(mock.writes_to(INA3221, 0x08), vec![800]);
}

#[test]
fn calibration_mismatch_is_reported_but_not_fatal() {
    CapturedLog::install();
    let mock = populated_bus();
    mock.stick_register(INA219, ina219::reg::CALIBRATION, 1);
    let bus = SharedBus::new(mock.clone());

    let mut m = Ina219::new(bus.attach(INA219).unwrap()).unwrap();
    let v = m.calibrate(0.1, Some(3.2)).unwrap();
    assert_eq!(
        v,
        Verification::Mismatch {
            written: 4096,
            read_back: 1
        }
    );
    assert!(CapturedLog::contains(
        log::Level::Warn,
        "Calibration 0x41: wrote 4096 but read back 1"
    ));
    // The computed profile is still used for conversions.
    assert!(m.profile().is_some());
    assert!(close(m.current().unwrap(), 0.1234));
    drop(m);

    // Full bring-up also proceeds.
    assert!(Sampler::bring_up(&bus, &NodeConfig::default()).is_ok());
}

#[test]
fn current_before_calibration_is_rejected() {
    let mock = populated_bus();
    let bus = SharedBus::new(mock);
    let m = Ina219::new(bus.attach(INA219).unwrap()).unwrap();

    assert!(close(m.bus_voltage().unwrap(), 12.0));
    assert_eq!(m.current(), Err(Error::NotCalibrated));
    assert_eq!(m.power(), Err(Error::NotCalibrated));
    assert_eq!(m.read(), Err(Error::NotCalibrated));
}

#[test]
fn failed_source_is_carried_as_error_and_serialised_as_null() {
    let mock = populated_bus();
    let bus = SharedBus::new(mock.clone());
    let sampler = Sampler::bring_up(&bus, &NodeConfig::default()).unwrap();

    // Channel 2 shunt register.
    mock.fail_reads(INA3221, 0x03);
    let set = sampler.sample_all();
    assert_eq!(set[2].reading, Err(Error::Bus(BusError::Bus)));
    assert!(set[0].reading.is_ok());
    assert!(set[1].reading.is_ok());
    assert!(set[3].reading.is_ok());

    let record = TelemetryRecord {
        timestamp: datetime!(2025-03-01 14:05:09 +03:00),
        sources: &set,
    };
    let mut buf = [0u8; 1024];
    let n = format_into(&record, &mut buf).unwrap();
    let json: serde_json::Value = serde_json::from_slice(&buf[..n]).unwrap();
    assert!(json["transformer2"].is_null());
    assert!(json["transformer1"].is_object());

    // Recovery on the next poll once the bus heals.
    mock.heal();
    assert!(sampler.sample_all().iter().all(|s| s.reading.is_ok()));
}

#[test]
fn missing_monitor_fails_bring_up() {
    let mock = populated_bus();
    mock.remove_device(INA3221);
    let bus = SharedBus::new(mock);
    assert!(matches!(
        Sampler::bring_up(&bus, &NodeConfig::default()),
        Err(Error::Bus(BusError::NoAcknowledge))
    ));
}

#[test]
fn scan_finds_both_monitors() {
    let bus = SharedBus::new(MockI2c::with_devices(&[INA219, INA3221]));
    let found = bus.scan(0x08..=0x77);
    assert_eq!(found.as_slice(), &[INA3221, INA219]);
}

#[test]
fn sampler_monitors_keep_declared_order() {
    let bus = SharedBus::new(populated_bus());
    let sampler = Sampler::bring_up(&bus, &NodeConfig::default()).unwrap();
    assert!(matches!(sampler.monitor(0), Some(Monitor::Ina219(_))));
    assert!(matches!(sampler.monitor(1), Some(Monitor::Ina3221(_))));
    assert_eq!(sampler.monitor(1).map(|m| m.channel_count()), Some(3));
    assert_eq!(sampler.monitor(0).map(|m| m.address()), Some(INA219));
}

#[test]
fn channel_without_shunt_reports_voltages_only() {
    let mut config = NodeConfig::default();
    if let Some(DeviceConfig::Ina3221 { shunt_ohms, .. }) = config.devices.get_mut(1) {
        shunt_ohms[1] = None;
    }
    config.validate().unwrap();

    let bus = SharedBus::new(populated_bus());
    let sampler = Sampler::bring_up(&bus, &config).unwrap();
    let set = sampler.sample_all();

    let r = set[2].reading.unwrap();
    assert!(close(r.bus_voltage, 5.0));
    assert!(close(r.shunt_voltage, 0.004));
    assert_eq!(r.current, None);
    assert!(set[1].reading.unwrap().current.is_some());

    // Asked directly, the channel still refuses current.
    let Some(Monitor::Ina3221(m)) = sampler.monitor(1) else {
        panic!("second monitor is the INA3221");
    };
    assert_eq!(m.current(1), Err(Error::NotCalibrated));

    let record = TelemetryRecord {
        timestamp: datetime!(2025-03-01 14:05:09 +03:00),
        sources: &set,
    };
    let mut buf = [0u8; 1024];
    let n = format_into(&record, &mut buf).unwrap();
    let json: serde_json::Value = serde_json::from_slice(&buf[..n]).unwrap();
    let t2 = json["transformer2"].as_object().unwrap();
    assert_eq!(t2["line_voltage"].as_f64(), Some(5.0));
    assert_eq!(t2["shunt_voltage"].as_f64(), Some(4.0));
    assert!(!t2.contains_key("current"));
}

fn source(label: &str, device: u8, channel: u8) -> SourceConfig {
    let mut l = Label::new();
    l.push_str(label).unwrap();
    SourceConfig {
        label: l,
        device,
        channel,
    }
}

#[test]
fn added_sources_must_have_json_safe_unique_labels() {
    let bus = SharedBus::new(populated_bus());
    let mut sampler = Sampler::bring_up(&bus, &NodeConfig::default()).unwrap();

    for bad in ["a\"b", "", "x y", "feeder"] {
        assert!(
            matches!(sampler.add_source(&source(bad, 1, 0)), Err(Error::InvalidArgument(_))),
            "{bad:?} accepted"
        );
    }
    assert_eq!(sampler.source_count(), 4);
    sampler.add_source(&source("spare-1", 1, 2)).unwrap();
    assert_eq!(sampler.source_count(), 5);
}
