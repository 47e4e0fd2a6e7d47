//! Sensor subsystem: INA2xx drivers and the aggregating [`Sampler`].
//!
//! The sampler owns every monitor and produces one [`SourceReading`] per
//! configured telemetry source each poll.  A failing channel yields an
//! error in its slot; it is never reported as zero.

pub mod calibration;
pub mod ina219;
pub mod ina3221;
pub mod register;

use embedded_hal::i2c::I2c;
use log::{info, warn};

use crate::app::ports::SensorPort;
use crate::config::{DeviceConfig, NodeConfig, SourceConfig};
use crate::error::{Error, Result};
use ina219::{Ina219, Ina219Config};
use ina3221::Ina3221;
use register::SharedBus;

pub const MAX_MONITORS: usize = 4;
pub const MAX_SOURCES: usize = 8;
pub const LABEL_CAPACITY: usize = 16;

pub type Label = heapless::String<LABEL_CAPACITY>;

/// Labels become JSON keys verbatim, so only `[A-Za-z0-9_-]+` is accepted.
pub fn check_label(label: &str) -> Result<()> {
    let valid = !label.is_empty()
        && label
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidArgument("source label must be [A-Za-z0-9_-]+"))
    }
}

/// One channel's measurement in SI units (V, V, A, W).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelReading {
    pub channel_id: u8,
    pub bus_voltage: f32,
    pub shunt_voltage: f32,
    /// Absent on a channel without a shunt resistance.
    pub current: Option<f32>,
    /// Only monitors with a power register report this.
    pub power: Option<f32>,
}

/// A reading (or its failure) tagged with the source it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceReading {
    pub label: Label,
    pub reading: Result<ChannelReading>,
}

/// All source readings from one poll, in declared order.
pub type SampleSet = heapless::Vec<SourceReading, MAX_SOURCES>;

// ───────────────────────────────────────────────────────────────
// Monitor
// ───────────────────────────────────────────────────────────────

/// A power monitor of either family behind one reading shape.
pub enum Monitor<B: I2c> {
    Ina219(Ina219<B>),
    Ina3221(Ina3221<B>),
}

impl<B: I2c> Monitor<B> {
    pub fn channel_count(&self) -> u8 {
        match self {
            Self::Ina219(_) => 1,
            Self::Ina3221(_) => ina3221::CHANNELS,
        }
    }

    pub fn address(&self) -> u8 {
        match self {
            Self::Ina219(m) => m.address(),
            Self::Ina3221(m) => m.address(),
        }
    }

    pub fn read_channel(&self, channel: u8) -> Result<ChannelReading> {
        match self {
            Self::Ina219(m) if channel == 0 => m.read(),
            Self::Ina219(_) => Err(Error::InvalidArgument("INA219 has a single channel")),
            Self::Ina3221(m) => m.read(channel),
        }
    }
}

struct Source {
    label: Label,
    monitor: usize,
    channel: u8,
}

// ───────────────────────────────────────────────────────────────
// Sampler
// ───────────────────────────────────────────────────────────────

/// Owns the monitors and maps them onto telemetry sources.
pub struct Sampler<B: I2c> {
    monitors: heapless::Vec<Monitor<B>, MAX_MONITORS>,
    sources: heapless::Vec<Source, MAX_SOURCES>,
}

impl<B: I2c> Default for Sampler<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: I2c> Sampler<B> {
    pub fn new() -> Self {
        Self {
            monitors: heapless::Vec::new(),
            sources: heapless::Vec::new(),
        }
    }

    /// Attach, configure and calibrate every device in `config`, then map
    /// the declared sources onto them.
    pub fn bring_up(bus: &SharedBus<B>, config: &NodeConfig) -> Result<Self> {
        let mut sampler = Self::new();
        for device in &config.devices {
            let monitor = bring_up_device(bus, device)?;
            sampler.add_monitor(monitor)?;
        }
        for source in &config.sources {
            sampler.add_source(source)?;
        }
        info!(
            "Sampler: {} monitor(s), {} source(s)",
            sampler.monitors.len(),
            sampler.sources.len()
        );
        Ok(sampler)
    }

    /// Register a monitor and return its index.
    pub fn add_monitor(&mut self, monitor: Monitor<B>) -> Result<usize> {
        self.monitors
            .push(monitor)
            .map_err(|_| Error::InvalidArgument("too many monitors"))?;
        Ok(self.monitors.len() - 1)
    }

    /// Declare a source.  Sources are sampled in the order they are added.
    pub fn add_source(&mut self, source: &SourceConfig) -> Result<()> {
        check_label(&source.label)?;
        if self.sources.iter().any(|s| s.label == source.label) {
            return Err(Error::InvalidArgument("duplicate source label"));
        }
        let monitor = self
            .monitors
            .get(source.device as usize)
            .ok_or(Error::InvalidArgument("source refers to unknown device"))?;
        if source.channel >= monitor.channel_count() {
            return Err(Error::InvalidArgument("source channel out of range"));
        }
        self.sources
            .push(Source {
                label: source.label.clone(),
                monitor: source.device as usize,
                channel: source.channel,
            })
            .map_err(|_| Error::InvalidArgument("too many sources"))
    }

    pub fn monitor(&self, index: usize) -> Option<&Monitor<B>> {
        self.monitors.get(index)
    }

    pub fn monitor_mut(&mut self, index: usize) -> Option<&mut Monitor<B>> {
        self.monitors.get_mut(index)
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Poll every source once.
    pub fn sample_all(&self) -> SampleSet {
        let mut set = SampleSet::new();
        for source in &self.sources {
            let reading = self
                .monitors
                .get(source.monitor)
                .ok_or(Error::InvalidArgument("source refers to unknown device"))
                .and_then(|m| m.read_channel(source.channel));
            if let Err(e) = &reading {
                warn!("Sampler: '{}' read failed: {}", source.label, e);
            }
            // Capacity matches MAX_SOURCES, so this cannot overflow.
            let _ = set.push(SourceReading {
                label: source.label.clone(),
                reading,
            });
        }
        set
    }
}

impl<B: I2c> SensorPort for Sampler<B> {
    fn sample(&mut self) -> SampleSet {
        self.sample_all()
    }
}

fn bring_up_device<B: I2c>(bus: &SharedBus<B>, device: &DeviceConfig) -> Result<Monitor<B>> {
    match device {
        DeviceConfig::Ina219 {
            address,
            shunt_ohms,
            max_current_a,
            gain,
            bus_range,
            resolution,
        } => {
            let mut m = Ina219::new(bus.attach(*address)?)?;
            m.configure(Ina219Config {
                range: *bus_range,
                gain: *gain,
                bus_resolution: *resolution,
                shunt_resolution: *resolution,
                mode: ina219::Mode::ContinuousShuntBus,
            })?;
            m.calibrate(*shunt_ohms, *max_current_a)?;
            Ok(Monitor::Ina219(m))
        }
        DeviceConfig::Ina3221 {
            address,
            shunt_ohms,
            averaging,
            conversion_time,
            warning_alert,
        } => {
            let mut m = Ina3221::new(bus.attach(*address)?)?;
            m.set_options(true, true, true)?;
            m.enable_channels([true, true, true])?;
            m.set_average(*averaging)?;
            m.set_bus_conversion_time(*conversion_time)?;
            m.set_shunt_conversion_time(*conversion_time)?;
            for (ch, ohms) in shunt_ohms.iter().enumerate() {
                m.set_shunt_resistance(ch as u8, *ohms)?;
            }
            if let Some(alert) = warning_alert {
                m.set_warning_alert(alert.channel, alert.current_a)?;
            }
            Ok(Monitor::Ina3221(m))
        }
    }
}
