//! Mock hardware for integration tests.
//!
//! Every mock records what it was asked to do so tests can assert on the
//! full history without touching real I2C, GPIO or PWM peripherals.  The
//! handles are cheap clones over shared state: hand one to the code under
//! test, keep the other for assertions.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{self, OutputPin};
use embedded_hal::i2c::{self, ErrorKind, I2c, NoAcknowledgeSource, Operation};
use embedded_hal::pwm::{self, SetDutyCycle};
use smartmeter::app::events::AppEvent;
use smartmeter::app::ports::{Clock, EventSink, IndicatorPort, WallClock};
use smartmeter::config::NodeConfig;
use smartmeter::drivers::led_patterns::Rgb;
use smartmeter::error::{Result, TransportError};
use smartmeter::link::{ConnectParams, Qos, SessionStatus, Transport};
use time::OffsetDateTime;

// ── I2C register file ─────────────────────────────────────────

#[derive(Default)]
struct BusState {
    regs: HashMap<(u8, u8), u16>,
    present: HashSet<u8>,
    /// Registers that ignore writes and always read this value.
    stuck: HashMap<(u8, u8), u16>,
    /// Registers whose reads fail with a bus fault.
    failing: HashSet<(u8, u8)>,
    writes: Vec<(u8, u8, u16)>,
}

#[derive(Debug)]
pub struct MockI2cError(ErrorKind);

impl i2c::Error for MockI2cError {
    fn kind(&self) -> ErrorKind {
        self.0
    }
}

/// INA2xx-style bus: 16-bit big-endian registers behind a pointer byte.
#[derive(Clone, Default)]
pub struct MockI2c {
    state: Arc<Mutex<BusState>>,
}

impl MockI2c {
    pub fn with_devices(addresses: &[u8]) -> Self {
        let bus = Self::default();
        bus.state.lock().unwrap().present.extend(addresses.iter().copied());
        bus
    }

    pub fn set_register(&self, address: u8, register: u8, value: u16) {
        self.state.lock().unwrap().regs.insert((address, register), value);
    }

    pub fn register(&self, address: u8, register: u8) -> Option<u16> {
        self.state.lock().unwrap().regs.get(&(address, register)).copied()
    }

    pub fn stick_register(&self, address: u8, register: u8, value: u16) {
        self.state.lock().unwrap().stuck.insert((address, register), value);
    }

    pub fn fail_reads(&self, address: u8, register: u8) {
        self.state.lock().unwrap().failing.insert((address, register));
    }

    pub fn heal(&self) {
        self.state.lock().unwrap().failing.clear();
    }

    pub fn remove_device(&self, address: u8) {
        self.state.lock().unwrap().present.remove(&address);
    }

    pub fn writes_to(&self, address: u8, register: u8) -> Vec<u16> {
        self.state
            .lock()
            .unwrap()
            .writes
            .iter()
            .filter(|(a, r, _)| *a == address && *r == register)
            .map(|(_, _, v)| *v)
            .collect()
    }
}

impl i2c::ErrorType for MockI2c {
    type Error = MockI2cError;
}

impl I2c for MockI2c {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> core::result::Result<(), Self::Error> {
        let mut state = self.state.lock().unwrap();
        if !state.present.contains(&address) {
            return Err(MockI2cError(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)));
        }
        let mut pointer = 0u8;
        for op in operations {
            match op {
                Operation::Write(bytes) => {
                    if let Some(p) = bytes.first() {
                        pointer = *p;
                    }
                    if bytes.len() == 3 {
                        let value = u16::from_be_bytes([bytes[1], bytes[2]]);
                        state.writes.push((address, pointer, value));
                        state.regs.insert((address, pointer), value);
                    }
                }
                Operation::Read(buf) => {
                    if state.failing.contains(&(address, pointer)) {
                        return Err(MockI2cError(ErrorKind::Bus));
                    }
                    let value = state
                        .stuck
                        .get(&(address, pointer))
                        .or_else(|| state.regs.get(&(address, pointer)))
                        .copied()
                        .unwrap_or(0);
                    let be = value.to_be_bytes();
                    for (i, b) in buf.iter_mut().enumerate() {
                        *b = be.get(i).copied().unwrap_or(0);
                    }
                }
            }
        }
        Ok(())
    }
}

// ── Scripted transport ────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: Qos,
}

/// Broker session whose behaviour is switched by the test.
pub struct ScriptedTransport {
    connect_ok: AtomicBool,
    /// One-shot: the next `service` reports a lost session.
    drop_session: AtomicBool,
    ack_timeout: AtomicBool,
    best_effort_fails: AtomicBool,
    acknowledged_rejected: AtomicBool,
    pub connects: AtomicU32,
    pub disconnects: AtomicU32,
    pub services: AtomicU32,
    sent: Mutex<Vec<SentMessage>>,
    last_params: Mutex<Option<ConnectParams>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connect_ok: AtomicBool::new(true),
            drop_session: AtomicBool::new(false),
            ack_timeout: AtomicBool::new(false),
            best_effort_fails: AtomicBool::new(false),
            acknowledged_rejected: AtomicBool::new(false),
            connects: AtomicU32::new(0),
            disconnects: AtomicU32::new(0),
            services: AtomicU32::new(0),
            sent: Mutex::new(Vec::new()),
            last_params: Mutex::new(None),
        })
    }

    pub fn refuse_connects(&self, refuse: bool) {
        self.connect_ok.store(!refuse, Ordering::SeqCst);
    }

    pub fn drop_session(&self) {
        self.drop_session.store(true, Ordering::SeqCst);
    }

    pub fn time_out_acks(&self, on: bool) {
        self.ack_timeout.store(on, Ordering::SeqCst);
    }

    pub fn fail_best_effort(&self, on: bool) {
        self.best_effort_fails.store(on, Ordering::SeqCst);
    }

    pub fn reject_acknowledged(&self, on: bool) {
        self.acknowledged_rejected.store(on, Ordering::SeqCst);
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn last_params(&self) -> Option<ConnectParams> {
        self.last_params.lock().unwrap().clone()
    }
}

impl Transport for ScriptedTransport {
    fn connect(&self, params: &ConnectParams) -> core::result::Result<(), TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        *self.last_params.lock().unwrap() = Some(params.clone());
        if self.connect_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::ConnectFailed)
        }
    }

    fn publish(&self, topic: &str, payload: &[u8], qos: Qos) -> core::result::Result<(), TransportError> {
        match qos {
            Qos::AtMostOnce if self.best_effort_fails.load(Ordering::SeqCst) => {
                return Err(TransportError::PublishFailed);
            }
            Qos::AtLeastOnce if self.acknowledged_rejected.load(Ordering::SeqCst) => {
                return Err(TransportError::Rejected);
            }
            _ => {}
        }
        self.sent.lock().unwrap().push(SentMessage {
            topic: topic.to_owned(),
            payload: payload.to_vec(),
            qos,
        });
        if qos == Qos::AtLeastOnce && self.ack_timeout.load(Ordering::SeqCst) {
            return Err(TransportError::AckTimeout);
        }
        Ok(())
    }

    fn service(&self, _max_wait: Duration) -> SessionStatus {
        self.services.fetch_add(1, Ordering::SeqCst);
        if self.drop_session.swap(false, Ordering::SeqCst) {
            SessionStatus::Lost
        } else {
            SessionStatus::Alive
        }
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

// ── GPIO / delay / PWM ────────────────────────────────────────

/// Output pin that logs every level written.
#[derive(Clone, Default)]
pub struct RecordingPin {
    levels: Arc<Mutex<Vec<bool>>>,
}

impl RecordingPin {
    pub fn levels(&self) -> Vec<bool> {
        self.levels.lock().unwrap().clone()
    }

    pub fn is_high(&self) -> bool {
        self.levels().last().copied().unwrap_or(false)
    }
}

impl digital::ErrorType for RecordingPin {
    type Error = Infallible;
}

impl OutputPin for RecordingPin {
    fn set_low(&mut self) -> core::result::Result<(), Self::Error> {
        self.levels.lock().unwrap().push(false);
        Ok(())
    }

    fn set_high(&mut self) -> core::result::Result<(), Self::Error> {
        self.levels.lock().unwrap().push(true);
        Ok(())
    }
}

/// Delay that only accumulates the requested time.
#[derive(Clone, Default)]
pub struct MockDelay {
    total_ns: Arc<AtomicU64>,
}

impl MockDelay {
    pub fn total_ms(&self) -> u64 {
        self.total_ns.load(Ordering::SeqCst) / 1_000_000
    }
}

impl DelayNs for MockDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns.fetch_add(u64::from(ns), Ordering::SeqCst);
    }
}

/// PWM channel remembering its last duty.
#[derive(Clone, Default)]
pub struct MockPwm {
    duty: Arc<Mutex<u16>>,
}

impl MockPwm {
    pub fn duty(&self) -> u16 {
        *self.duty.lock().unwrap()
    }
}

impl pwm::ErrorType for MockPwm {
    type Error = Infallible;
}

impl SetDutyCycle for MockPwm {
    fn max_duty_cycle(&self) -> u16 {
        255
    }

    fn set_duty_cycle(&mut self, duty: u16) -> core::result::Result<(), Self::Error> {
        *self.duty.lock().unwrap() = duty;
        Ok(())
    }
}

// ── Clocks ────────────────────────────────────────────────────

/// Virtual monotonic clock.  Sleeping jumps straight to the deadline.
#[derive(Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn at(ms: u64) -> Self {
        Self { now: AtomicU64::new(ms) }
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn sleep_until_ms(&self, deadline_ms: u64) {
        self.now.fetch_max(deadline_ms, Ordering::SeqCst);
    }
}

/// Wall clock frozen at one instant, or never synced.
pub struct FixedWallClock(pub Option<OffsetDateTime>);

impl WallClock for FixedWallClock {
    fn now(&self) -> Option<OffsetDateTime> {
        self.0
    }
}

// ── Sinks ─────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<AppEvent>,
}

impl RecordingSink {
    pub fn count(&self, pred: impl Fn(&AppEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &AppEvent) {
        self.events.push(event.clone());
    }
}

#[derive(Default)]
pub struct RecordingIndicator {
    pub shown: Vec<Rgb>,
}

impl IndicatorPort for RecordingIndicator {
    fn show(&mut self, colour: Rgb) -> Result<()> {
        self.shown.push(colour);
        Ok(())
    }
}

// ── Log capture ───────────────────────────────────────────────

/// Process-wide `log` backend keeping every record for inspection.
///
/// Tests share one process, so assertions look for a specific message
/// rather than counting records.
pub struct CapturedLog;

static CAPTURED: CapturedLog = CapturedLog;
static RECORDS: Mutex<Vec<(log::Level, String)>> = Mutex::new(Vec::new());

impl CapturedLog {
    pub fn install() {
        if log::set_logger(&CAPTURED).is_ok() {
            log::set_max_level(log::LevelFilter::Trace);
        }
    }

    pub fn contains(level: log::Level, needle: &str) -> bool {
        RECORDS
            .lock()
            .unwrap()
            .iter()
            .any(|(l, msg)| *l == level && msg.contains(needle))
    }
}

impl log::Log for CapturedLog {
    fn enabled(&self, _metadata: &log::Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &log::Record<'_>) {
        RECORDS
            .lock()
            .unwrap()
            .push((record.level(), record.args().to_string()));
    }

    fn flush(&self) {}
}

// ── Fixtures ──────────────────────────────────────────────────

pub const INA219: u8 = 0x41;
pub const INA3221: u8 = 0x40;

/// A bus populated with both monitors of the default node, holding
/// plausible live measurements.
pub fn populated_bus() -> MockI2c {
    let bus = MockI2c::with_devices(&[INA219, INA3221]);
    // INA219 power-on config, then measurements.
    bus.set_register(INA219, 0x00, 0x399F);
    bus.set_register(INA219, 0x01, 1234); // 12.34 mV shunt
    bus.set_register(INA219, 0x02, 3000 << 3); // 12.000 V bus
    bus.set_register(INA219, 0x03, 500); // 500 x 2 mW
    bus.set_register(INA219, 0x04, 1234); // 1234 x 0.1 mA
    // INA3221 power-on config and each channel's shunt/bus pair.
    bus.set_register(INA3221, 0x00, 0x7127);
    for ch in 0..3u8 {
        bus.set_register(INA3221, 0x01 + 2 * ch, 800); // 4 mV
        bus.set_register(INA3221, 0x02 + 2 * ch, 5000); // 5 V
    }
    bus
}

/// Default configuration with fast timings for tests.
pub fn test_config() -> NodeConfig {
    NodeConfig {
        publish_period_ms: 1_000,
        liveness_period_ms: 100,
        diagnostics_period_ms: 10_000,
        ..NodeConfig::default()
    }
}
