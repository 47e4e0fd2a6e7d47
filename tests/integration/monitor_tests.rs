//! Alert, summation and trigger registers of the two monitor families.

use smartmeter::error::Error;
use smartmeter::sensors::ina219::{self, Ina219, Ina219Config, Mode};
use smartmeter::sensors::ina3221::{self, Ina3221, PVF_BIT, SF_BIT};
use smartmeter::sensors::register::SharedBus;

use crate::mock_hw::{populated_bus, MockI2c, INA219, INA3221};

fn ina3221(mock: &MockI2c) -> Ina3221<MockI2c> {
    let bus = SharedBus::new(mock.clone());
    let mut m = Ina3221::new(bus.attach(INA3221).unwrap()).unwrap();
    for ch in 0..3 {
        m.set_shunt_resistance(ch, Some(0.1)).unwrap();
    }
    m
}

#[test]
fn trigger_is_refused_in_continuous_mode() {
    let mock = populated_bus();
    let bus = SharedBus::new(mock.clone());
    let mut m = Ina219::new(bus.attach(INA219).unwrap()).unwrap();

    assert_eq!(m.mode(), Mode::ContinuousShuntBus);
    assert!(matches!(m.trigger(), Err(Error::InvalidArgument(_))));
    assert!(mock.writes_to(INA219, ina219::reg::CONFIG).is_empty());

    m.configure(Ina219Config {
        mode: Mode::TriggeredShuntBus,
        ..Ina219Config::default()
    })
    .unwrap();
    m.trigger().unwrap();
    // Configure, then the same word again to start the conversion.
    assert_eq!(mock.writes_to(INA219, ina219::reg::CONFIG), vec![0x399B, 0x399B]);
}

#[test]
fn critical_limits_land_in_per_channel_registers() {
    let mock = populated_bus();
    let mut m = ina3221(&mock);

    // 12.3 mA × 0.1 Ω = 246 counts; the low three bits are reserved.
    m.set_critical_alert(0, 0.0123).unwrap();
    m.set_critical_alert(1, 0.5).unwrap();
    m.set_critical_alert(2, 0.0013).unwrap();

    assert_eq!(mock.writes_to(INA3221, 0x07), vec![240]);
    assert_eq!(mock.writes_to(INA3221, 0x09), vec![10_000]);
    assert_eq!(mock.writes_to(INA3221, 0x0B), vec![24]);
}

#[test]
fn limits_need_a_shunt_and_a_representable_value() {
    let mock = populated_bus();
    let mut m = ina3221(&mock);
    m.set_shunt_resistance(2, None).unwrap();

    assert_eq!(m.set_critical_alert(2, 0.01), Err(Error::NotCalibrated));
    assert!(matches!(m.set_critical_alert(0, 100.0), Err(Error::InvalidArgument(_))));
    assert!(matches!(m.set_critical_alert(3, 0.01), Err(Error::InvalidArgument(_))));
}

#[test]
fn shunt_sum_limit_clears_reserved_bit() {
    let mock = populated_bus();
    let mut m = ina3221(&mock);

    // 2.46 mV / 20 µV = 123 counts, bit 0 reserved.
    m.set_shunt_sum_limit(0.002_46).unwrap();
    assert_eq!(mock.writes_to(INA3221, ina3221::reg::SHUNT_SUM_LIMIT), vec![122]);

    mock.set_register(INA3221, ina3221::reg::SHUNT_SUM, 500);
    assert!((m.shunt_sum().unwrap() - 0.01).abs() < 1e-6);
}

#[test]
fn power_valid_limits_require_bus_measurement() {
    let mock = populated_bus();
    let mut m = ina3221(&mock);

    // 10.005 V rounds to 10005 mV and loses its reserved bits.
    m.set_power_valid_limits(10.005, 9.0).unwrap();
    assert_eq!(mock.writes_to(INA3221, ina3221::reg::POWER_VALID_UPPER), vec![10_000]);
    assert_eq!(mock.writes_to(INA3221, ina3221::reg::POWER_VALID_LOWER), vec![9_000]);

    assert!(matches!(
        m.set_power_valid_limits(9.0, 10.0),
        Err(Error::InvalidArgument(_))
    ));

    m.set_options(true, false, true).unwrap();
    assert!(matches!(
        m.set_power_valid_limits(12.0, 10.0),
        Err(Error::InvalidArgument(_))
    ));
    assert_eq!(mock.writes_to(INA3221, ina3221::reg::POWER_VALID_UPPER).len(), 1);
}

#[test]
fn summation_and_latches_share_the_mask_register() {
    let mock = populated_bus();
    let mut m = ina3221(&mock);

    m.set_summation_channels([true, false, true]).unwrap();
    m.set_alert_latches(true, false).unwrap();
    assert_eq!(
        mock.writes_to(INA3221, ina3221::reg::MASK_ENABLE),
        vec![0x5000, 0x5800]
    );
    assert_eq!(m.alert_mask().summation, [true, false, true]);
    assert!(m.alert_mask().warning_latch);
    assert!(!m.alert_mask().critical_latch);
}

#[test]
fn alert_status_decodes_flags() {
    let mock = populated_bus();
    let m = ina3221(&mock);

    // Critical on CH1 (bit 9), warning on CH2 (bit 4), sum and power-valid.
    mock.set_register(
        INA3221,
        ina3221::reg::MASK_ENABLE,
        (1 << 9) | (1 << 4) | SF_BIT | PVF_BIT,
    );
    let s = m.alert_status().unwrap();
    assert_eq!(s.critical, [true, false, false]);
    assert_eq!(s.warning, [false, true, false]);
    assert!(s.summation);
    assert!(s.power_valid);
    assert!(!s.conversion_ready);
}
