//! Node configuration parameters
//!
//! Everything the node needs at bring-up: devices on the bus, the
//! telemetry sources built from them, broker session parameters,
//! reconnect policy, loop periods and the actuation pattern.
//! Loaded once before the units start and treated as immutable.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::link::ReconnectPolicy;
use crate::sensors::calibration::Gain;
use crate::sensors::ina219::{BusVoltageRange, Resolution};
use crate::sensors::ina3221::{Averaging, ConversionTime};
use crate::sensors::{check_label, Label, MAX_MONITORS, MAX_SOURCES};

pub const MAX_ALERT_LABELS: usize = 8;

/// Largest payload buffer the publish loop will allocate.
pub const MAX_PAYLOAD_CAPACITY: usize = 16 * 1024;

/// Warning threshold on a single INA3221 channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertLimit {
    /// Zero-based channel index.
    pub channel: u8,
    pub current_a: f64,
}

/// One power monitor on the I2C bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceConfig {
    Ina219 {
        address: u8,
        shunt_ohms: f64,
        /// Explicit full-scale current; `None` derives it from `gain`.
        max_current_a: Option<f64>,
        gain: Gain,
        bus_range: BusVoltageRange,
        resolution: Resolution,
    },
    Ina3221 {
        address: u8,
        /// Per-channel shunt; `None` leaves the channel voltage-only.
        shunt_ohms: [Option<f64>; 3],
        averaging: Averaging,
        conversion_time: ConversionTime,
        warning_alert: Option<AlertLimit>,
    },
}

impl DeviceConfig {
    pub fn address(&self) -> u8 {
        match self {
            Self::Ina219 { address, .. } | Self::Ina3221 { address, .. } => *address,
        }
    }

    fn channel_count(&self) -> u8 {
        match self {
            Self::Ina219 { .. } => 1,
            Self::Ina3221 { .. } => crate::sensors::ina3221::CHANNELS,
        }
    }
}

/// A named telemetry source: one channel of one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub label: Label,
    /// Index into [`NodeConfig::devices`].
    pub device: u8,
    pub channel: u8,
}

/// Which delivery classes each publish cycle uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    BestEffort,
    Acknowledged,
    /// Best-effort first, then acknowledged.
    Both,
}

impl DeliveryMode {
    pub fn best_effort(self) -> bool {
        matches!(self, Self::BestEffort | Self::Both)
    }

    pub fn acknowledged(self) -> bool {
        matches!(self, Self::Acknowledged | Self::Both)
    }
}

/// Core node configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    // --- Bus ---
    pub i2c_frequency_hz: u32,

    // --- Sensors ---
    pub devices: heapless::Vec<DeviceConfig, MAX_MONITORS>,
    /// Serialised in this order.
    pub sources: heapless::Vec<SourceConfig, MAX_SOURCES>,

    // --- Broker session ---
    pub endpoint: heapless::String<128>,
    pub client_id: heapless::String<32>,
    pub data_topic: heapless::String<64>,
    pub prediction_topic: heapless::String<64>,
    pub keep_alive_secs: u16,
    pub command_timeout_ms: u32,
    pub tls_handshake_timeout_ms: u32,
    pub reconnect: ReconnectPolicy,
    pub delivery: DeliveryMode,

    // --- Timing ---
    /// Sample → format → publish period (milliseconds)
    pub publish_period_ms: u32,
    /// Link servicing period (milliseconds)
    pub liveness_period_ms: u32,
    /// Longest a single service call may block (milliseconds)
    pub service_wait_ms: u32,
    /// Diagnostics log interval (milliseconds)
    pub diagnostics_period_ms: u32,

    // --- Telemetry ---
    pub payload_capacity: usize,
    /// Offset applied to telemetry timestamps (minutes east of UTC)
    pub utc_offset_minutes: i16,

    // --- Actuation ---
    pub alert_labels: heapless::Vec<Label, MAX_ALERT_LABELS>,
    /// On/off cycles per alert
    pub alert_blink_cycles: u8,
    /// Duration of each on and each off phase (milliseconds)
    pub alert_blink_half_period_ms: u32,
}

fn label(s: &str) -> Label {
    let mut l = Label::new();
    let _ = l.push_str(s);
    l
}

fn string<const N: usize>(s: &str) -> heapless::String<N> {
    let mut out = heapless::String::new();
    let _ = out.push_str(s);
    out
}

impl Default for NodeConfig {
    fn default() -> Self {
        let mut devices = heapless::Vec::new();
        let _ = devices.push(DeviceConfig::Ina219 {
            address: crate::pins::INA219_ADDR,
            shunt_ohms: 0.1,
            max_current_a: Some(3.2),
            gain: Gain::Div8,
            bus_range: BusVoltageRange::V32,
            resolution: Resolution::Samples128,
        });
        let _ = devices.push(DeviceConfig::Ina3221 {
            address: crate::pins::INA3221_ADDR,
            shunt_ohms: [Some(0.1); 3],
            averaging: Averaging::Avg64,
            conversion_time: ConversionTime::Us1100,
            warning_alert: Some(AlertLimit {
                channel: 0,
                current_a: 0.040,
            }),
        });

        let mut sources = heapless::Vec::new();
        let _ = sources.push(SourceConfig { label: label("feeder"), device: 0, channel: 0 });
        for ch in 0..3u8 {
            let mut name = Label::new();
            let _ = core::fmt::Write::write_fmt(&mut name, format_args!("transformer{}", ch + 1));
            let _ = sources.push(SourceConfig { label: name, device: 1, channel: ch });
        }

        let mut alert_labels = heapless::Vec::new();
        for l in ["c1", "c2", "c3"] {
            let _ = alert_labels.push(label(l));
        }

        Self {
            // Bus
            i2c_frequency_hz: 100_000,

            // Sensors
            devices,
            sources,

            // Broker session
            endpoint: string("mqtts://broker.local:8883"),
            client_id: string("smartmeter-node"),
            data_topic: string("smartmeter/data"),
            prediction_topic: string("smartmeter/prediction"),
            keep_alive_secs: 10,
            command_timeout_ms: 20_000,
            tls_handshake_timeout_ms: 5_000,
            reconnect: ReconnectPolicy::default(),
            delivery: DeliveryMode::Both,

            // Timing
            publish_period_ms: 5_000,
            liveness_period_ms: 100,
            service_wait_ms: 100,
            diagnostics_period_ms: 30_000,

            // Telemetry
            payload_capacity: 1024,
            utc_offset_minutes: 180, // +03:00

            // Actuation
            alert_labels,
            alert_blink_cycles: 10,
            alert_blink_half_period_ms: 100,
        }
    }
}

impl NodeConfig {
    /// Parse a JSON document and validate it.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let config: Self =
            serde_json::from_slice(bytes).map_err(|_| Error::InvalidArgument("config is not valid JSON"))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the units cannot run with.  Never clamps.
    pub fn validate(&self) -> Result<()> {
        if self.i2c_frequency_hz == 0 || self.i2c_frequency_hz > 1_000_000 {
            return Err(Error::InvalidArgument("i2c_frequency_hz out of range"));
        }

        for (i, a) in self.devices.iter().enumerate() {
            if self.devices[..i].iter().any(|b| b.address() == a.address()) {
                return Err(Error::InvalidArgument("duplicate device address"));
            }
            if let DeviceConfig::Ina3221 { warning_alert: Some(alert), shunt_ohms, .. } = a {
                let has_shunt = shunt_ohms
                    .get(alert.channel as usize)
                    .is_some_and(Option::is_some);
                if !has_shunt {
                    return Err(Error::InvalidArgument("warning alert on channel without shunt"));
                }
            }
        }

        if self.sources.is_empty() {
            return Err(Error::InvalidArgument("no telemetry sources"));
        }
        for (i, s) in self.sources.iter().enumerate() {
            check_label(&s.label)?;
            if self.sources[..i].iter().any(|o| o.label == s.label) {
                return Err(Error::InvalidArgument("duplicate source label"));
            }
            let device = self
                .devices
                .get(s.device as usize)
                .ok_or(Error::InvalidArgument("source refers to unknown device"))?;
            if s.channel >= device.channel_count() {
                return Err(Error::InvalidArgument("source channel out of range"));
            }
        }

        if self.data_topic.is_empty() || self.prediction_topic.is_empty() {
            return Err(Error::InvalidArgument("topics must not be empty"));
        }
        self.reconnect.validate()?;

        if self.publish_period_ms == 0 || self.liveness_period_ms == 0 {
            return Err(Error::InvalidArgument("periods must be non-zero"));
        }
        if self.liveness_period_ms >= self.publish_period_ms {
            return Err(Error::InvalidArgument("liveness period must be shorter than publish period"));
        }
        if self.service_wait_ms > self.liveness_period_ms {
            return Err(Error::InvalidArgument("service wait exceeds liveness period"));
        }

        if self.payload_capacity == 0 || self.payload_capacity > MAX_PAYLOAD_CAPACITY {
            return Err(Error::InvalidArgument("payload_capacity out of range"));
        }
        if !(-720..=840).contains(&self.utc_offset_minutes) {
            return Err(Error::InvalidArgument("utc_offset_minutes out of range"));
        }

        if self.alert_blink_cycles == 0 || self.alert_blink_half_period_ms == 0 {
            return Err(Error::InvalidArgument("alert pattern must be non-empty"));
        }
        Ok(())
    }
}
