//! INA219 single-channel current/power monitor (feeder line).
//!
//! ## Configuration register (0x00)
//!
//! ```text
//!  15   14   13    12 11   10  9  8  7   6  5  4  3   2  1  0
//! ┌───┬────┬──────┬───────┬───────────┬───────────┬────────┐
//! │RST│ -  │ BRNG │  PG   │   BADC    │   SADC    │  MODE  │
//! └───┴────┴──────┴───────┴───────────┴───────────┴────────┘
//! ```
//!
//! Bus voltage register holds the reading in bits 15..3 (4 mV/bit); the
//! shunt register is two's complement at 10 µV/bit.  Current and power
//! registers are only meaningful after calibration.

use std::ops::RangeInclusive;

use embedded_hal::i2c::I2c;
use log::info;
use serde::{Deserialize, Serialize};

use super::ChannelReading;
use super::calibration::{CalibrationProfile, Gain, Verification, write_verified};
use super::register::{DeviceHandle, get_field, set_field};
use crate::error::{Error, Result};

/// Address straps A0/A1 select one of these.
pub const ADDRESS_RANGE: RangeInclusive<u8> = 0x40..=0x4F;

pub mod reg {
    pub const CONFIG: u8 = 0x00;
    pub const SHUNT_VOLTAGE: u8 = 0x01;
    pub const BUS_VOLTAGE: u8 = 0x02;
    pub const POWER: u8 = 0x03;
    pub const CURRENT: u8 = 0x04;
    pub const CALIBRATION: u8 = 0x05;
}

// ── Config fields (masks are pre-shifted) ─────────────────────

pub const RST_BIT: u16 = 1 << 15;
pub const BRNG_SHIFT: u8 = 13;
pub const BRNG_MASK: u16 = 0x1 << BRNG_SHIFT;
pub const PG_SHIFT: u8 = 11;
pub const PG_MASK: u16 = 0x3 << PG_SHIFT;
pub const BADC_SHIFT: u8 = 7;
pub const BADC_MASK: u16 = 0xF << BADC_SHIFT;
pub const SADC_SHIFT: u8 = 3;
pub const SADC_MASK: u16 = 0xF << SADC_SHIFT;
pub const MODE_SHIFT: u8 = 0;
pub const MODE_MASK: u16 = 0x7 << MODE_SHIFT;

/// Power-on value: 32 V range, ÷8 gain, 12-bit ADCs, continuous shunt+bus.
pub const DEFAULT_CONFIG: u16 = 0x399F;

// ── Conversion constants ──────────────────────────────────────

pub const BUS_VOLTAGE_SHIFT: u8 = 3;
pub const BUS_VOLTAGE_LSB_V: f32 = 0.004;
pub const SHUNT_VOLTAGE_LSB_V: f32 = 0.000_01;

// ───────────────────────────────────────────────────────────────
// Field enums
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum BusVoltageRange {
    V16 = 0,
    V32 = 1,
}

/// ADC resolution / averaging (BADC and SADC fields).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Resolution {
    Bits9 = 0,
    Bits10 = 1,
    Bits11 = 2,
    Bits12 = 3,
    Samples2 = 9,
    Samples4 = 10,
    Samples8 = 11,
    Samples16 = 12,
    Samples32 = 13,
    Samples64 = 14,
    Samples128 = 15,
}

impl Resolution {
    pub const fn from_bits(bits: u16) -> Self {
        match bits & 0xF {
            // 0x00..0x07 encode resolution in the low two bits; 0x8 is 12-bit.
            b if b & 0x8 == 0 => match b & 0x3 {
                0 => Self::Bits9,
                1 => Self::Bits10,
                2 => Self::Bits11,
                _ => Self::Bits12,
            },
            8 => Self::Bits12,
            9 => Self::Samples2,
            10 => Self::Samples4,
            11 => Self::Samples8,
            12 => Self::Samples16,
            13 => Self::Samples32,
            14 => Self::Samples64,
            _ => Self::Samples128,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Mode {
    PowerDown = 0,
    TriggeredShunt = 1,
    TriggeredBus = 2,
    TriggeredShuntBus = 3,
    AdcOff = 4,
    ContinuousShunt = 5,
    ContinuousBus = 6,
    ContinuousShuntBus = 7,
}

impl Mode {
    pub const fn from_bits(bits: u16) -> Self {
        match bits & 0x7 {
            0 => Self::PowerDown,
            1 => Self::TriggeredShunt,
            2 => Self::TriggeredBus,
            3 => Self::TriggeredShuntBus,
            4 => Self::AdcOff,
            5 => Self::ContinuousShunt,
            6 => Self::ContinuousBus,
            _ => Self::ContinuousShuntBus,
        }
    }

    pub const fn is_triggered(self) -> bool {
        matches!(
            self,
            Self::TriggeredShunt | Self::TriggeredBus | Self::TriggeredShuntBus
        )
    }
}

// ───────────────────────────────────────────────────────────────
// Config word
// ───────────────────────────────────────────────────────────────

/// Decoded configuration register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ina219Config {
    pub range: BusVoltageRange,
    pub gain: Gain,
    pub bus_resolution: Resolution,
    pub shunt_resolution: Resolution,
    pub mode: Mode,
}

impl Ina219Config {
    pub fn encode(&self) -> u16 {
        let mut raw = 0;
        raw = set_field(raw, BRNG_MASK, BRNG_SHIFT, self.range as u16);
        raw = set_field(raw, PG_MASK, PG_SHIFT, self.gain.bits());
        raw = set_field(raw, BADC_MASK, BADC_SHIFT, self.bus_resolution as u16);
        raw = set_field(raw, SADC_MASK, SADC_SHIFT, self.shunt_resolution as u16);
        set_field(raw, MODE_MASK, MODE_SHIFT, self.mode as u16)
    }

    pub fn decode(raw: u16) -> Self {
        Self {
            range: if get_field(raw, BRNG_MASK, BRNG_SHIFT) == 0 {
                BusVoltageRange::V16
            } else {
                BusVoltageRange::V32
            },
            gain: Gain::from_bits(get_field(raw, PG_MASK, PG_SHIFT)),
            bus_resolution: Resolution::from_bits(get_field(raw, BADC_MASK, BADC_SHIFT)),
            shunt_resolution: Resolution::from_bits(get_field(raw, SADC_MASK, SADC_SHIFT)),
            mode: Mode::from_bits(get_field(raw, MODE_MASK, MODE_SHIFT)),
        }
    }
}

impl Default for Ina219Config {
    fn default() -> Self {
        Self::decode(DEFAULT_CONFIG)
    }
}

// ───────────────────────────────────────────────────────────────
// Driver
// ───────────────────────────────────────────────────────────────

pub struct Ina219<B: I2c> {
    dev: DeviceHandle<B>,
    config: Ina219Config,
    profile: Option<CalibrationProfile>,
}

impl<B: I2c> Ina219<B> {
    /// Bind to an attached device and load its current configuration.
    pub fn new(dev: DeviceHandle<B>) -> Result<Self> {
        if !ADDRESS_RANGE.contains(&dev.address()) {
            return Err(Error::InvalidArgument("INA219 address outside 0x40..=0x4F"));
        }
        let config = Ina219Config::decode(dev.read_register(reg::CONFIG)?);
        info!("INA219 0x{:02x}: config {:?}", dev.address(), config);
        Ok(Self {
            dev,
            config,
            profile: None,
        })
    }

    pub fn address(&self) -> u8 {
        self.dev.address()
    }

    /// Software reset.  Restores the power-on config and clears calibration.
    pub fn reset(&mut self) -> Result<()> {
        self.dev.write_register(reg::CONFIG, RST_BIT)?;
        self.config = Ina219Config::default();
        self.profile = None;
        info!("INA219 0x{:02x}: reset", self.dev.address());
        Ok(())
    }

    pub fn configure(&mut self, config: Ina219Config) -> Result<()> {
        self.dev.write_register(reg::CONFIG, config.encode())?;
        self.config = config;
        Ok(())
    }

    pub fn config(&self) -> Ina219Config {
        self.config
    }

    pub fn gain(&self) -> Gain {
        self.config.gain
    }

    pub fn range(&self) -> BusVoltageRange {
        self.config.range
    }

    pub fn mode(&self) -> Mode {
        self.config.mode
    }

    pub fn profile(&self) -> Option<&CalibrationProfile> {
        self.profile.as_ref()
    }

    /// Compute and program the calibration register for `shunt_ohms`.
    ///
    /// The profile is kept even when the read-back disagrees.
    pub fn calibrate(&mut self, shunt_ohms: f64, full_scale_current: Option<f64>) -> Result<Verification> {
        let profile = CalibrationProfile::compute(self.config.gain, shunt_ohms, full_scale_current)?;
        let verification = write_verified(&self.dev, reg::CALIBRATION, profile.register_value())?;
        self.profile = Some(profile);
        Ok(verification)
    }

    /// Start a single conversion.  Only valid in the triggered modes.
    pub fn trigger(&mut self) -> Result<()> {
        if !self.config.mode.is_triggered() {
            return Err(Error::InvalidArgument("trigger requires a triggered mode"));
        }
        // Rewriting the config word starts a new conversion.
        self.dev.write_register(reg::CONFIG, self.config.encode())
    }

    /// Bus voltage in volts.
    pub fn bus_voltage(&self) -> Result<f32> {
        let raw = self.dev.read_register(reg::BUS_VOLTAGE)?;
        Ok((raw >> BUS_VOLTAGE_SHIFT) as f32 * BUS_VOLTAGE_LSB_V)
    }

    /// Shunt voltage in volts.
    pub fn shunt_voltage(&self) -> Result<f32> {
        let raw = self.dev.read_signed(reg::SHUNT_VOLTAGE)?;
        Ok(raw as f32 * SHUNT_VOLTAGE_LSB_V)
    }

    /// Current in amps.
    pub fn current(&self) -> Result<f32> {
        let profile = self.profile.ok_or(Error::NotCalibrated)?;
        let raw = self.dev.read_signed(reg::CURRENT)?;
        Ok((f64::from(raw) * profile.current_lsb()) as f32)
    }

    /// Power in watts.
    pub fn power(&self) -> Result<f32> {
        let profile = self.profile.ok_or(Error::NotCalibrated)?;
        let raw = self.dev.read_register(reg::POWER)?;
        Ok((f64::from(raw) * profile.power_lsb()) as f32)
    }

    /// One full reading of the single channel.
    pub fn read(&self) -> Result<ChannelReading> {
        Ok(ChannelReading {
            channel_id: 0,
            bus_voltage: self.bus_voltage()?,
            shunt_voltage: self.shunt_voltage()?,
            current: Some(self.current()?),
            power: Some(self.power()?),
        })
    }
}
