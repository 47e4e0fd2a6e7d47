//! INA3221 triple-channel shunt/bus monitor (transformer branches).
//!
//! The INA3221 has no calibration register: current is derived from the
//! shunt voltage and the resistance configured per channel.  A channel
//! without a resistance still reports voltages but refuses current.
//!
//! ## Configuration register (0x00)
//!
//! ```text
//!  15   14  13  12   11 10 9   8 7 6    5 4 3    2     1     0
//! ┌───┬───┬───┬───┬────────┬────────┬────────┬─────┬─────┬──────┐
//! │RST│CH1│CH2│CH3│  AVG   │ VBUSCT │ VSHCT  │CONT │ BUS │SHUNT │
//! └───┴───┴───┴───┴────────┴────────┴────────┴─────┴─────┴──────┘
//! ```
//!
//! ## Mask/Enable register (0x0F)
//!
//! ```text
//!  14 13 12   11   10   9 8 7   6    5 4 3   2    1    0
//! ┌─────────┬─────┬─────┬──────┬────┬──────┬────┬────┬──────┐
//! │ SCC1..3 │ WEN │ CEN │CF1..3│ SF │WF1..3│ PVF│ TCF│ CVRF │
//! └─────────┴─────┴─────┴──────┴────┴──────┴────┴────┴──────┘
//! ```

use embedded_hal::i2c::I2c;
use log::info;
use serde::{Deserialize, Serialize};

use super::ChannelReading;
use super::register::{DeviceHandle, get_field, set_field};
use crate::error::{Error, Result};

pub const CHANNELS: u8 = 3;

pub mod reg {
    pub const CONFIG: u8 = 0x00;
    /// Channel N shunt voltage is at `SHUNT_VOLTAGE_1 + 2 × N`.
    pub const SHUNT_VOLTAGE_1: u8 = 0x01;
    /// Channel N bus voltage is at `BUS_VOLTAGE_1 + 2 × N`.
    pub const BUS_VOLTAGE_1: u8 = 0x02;
    pub const CRITICAL_LIMIT_1: u8 = 0x07;
    pub const WARNING_LIMIT_1: u8 = 0x08;
    pub const SHUNT_SUM: u8 = 0x0D;
    pub const SHUNT_SUM_LIMIT: u8 = 0x0E;
    pub const MASK_ENABLE: u8 = 0x0F;
    pub const POWER_VALID_UPPER: u8 = 0x10;
    pub const POWER_VALID_LOWER: u8 = 0x11;
    pub const MANUFACTURER_ID: u8 = 0xFE;
    pub const DIE_ID: u8 = 0xFF;
}

// ── Config fields ─────────────────────────────────────────────

pub const RST_BIT: u16 = 1 << 15;
/// Channel enables; channel 1 is bit 14, channel 3 bit 12.
pub const CH_EN_SHIFT: u8 = 12;
pub const CH_EN_MASK: u16 = 0x7 << CH_EN_SHIFT;
pub const AVG_SHIFT: u8 = 9;
pub const AVG_MASK: u16 = 0x7 << AVG_SHIFT;
pub const VBUS_CT_SHIFT: u8 = 6;
pub const VBUS_CT_MASK: u16 = 0x7 << VBUS_CT_SHIFT;
pub const VSHT_CT_SHIFT: u8 = 3;
pub const VSHT_CT_MASK: u16 = 0x7 << VSHT_CT_SHIFT;
pub const MODE_CONTINUOUS_BIT: u16 = 1 << 2;
pub const MODE_BUS_BIT: u16 = 1 << 1;
pub const MODE_SHUNT_BIT: u16 = 1 << 0;

/// Power-on value: all channels, 1 sample, 1.1 ms conversions, continuous.
pub const DEFAULT_CONFIG: u16 = 0x7127;

// ── Mask/Enable fields ────────────────────────────────────────

pub const CVRF_BIT: u16 = 1 << 0;
pub const TCF_BIT: u16 = 1 << 1;
pub const PVF_BIT: u16 = 1 << 2;
/// Warning flags; channel 1 is bit 5.
pub const WF_SHIFT: u8 = 3;
pub const WF_MASK: u16 = 0x7 << WF_SHIFT;
pub const SF_BIT: u16 = 1 << 6;
/// Critical flags; channel 1 is bit 9.
pub const CF_SHIFT: u8 = 7;
pub const CF_MASK: u16 = 0x7 << CF_SHIFT;
pub const CEN_BIT: u16 = 1 << 10;
pub const WEN_BIT: u16 = 1 << 11;
/// Summation enables; channel 1 is bit 14.
pub const SCC_SHIFT: u8 = 12;
pub const SCC_MASK: u16 = 0x7 << SCC_SHIFT;

/// Alert latches on, all channels summed.
pub const ALERT_MASK_CONFIG: u16 = 0x7C00;

// ── Conversion constants ──────────────────────────────────────

/// Bus voltage: bits 15..3 at 8 mV, i.e. 1 mV per raw count.
pub const BUS_VOLTAGE_LSB_V: f32 = 0.001;
/// Shunt voltage: bits 15..3 at 40 µV, i.e. 5 µV per raw count.
pub const SHUNT_VOLTAGE_LSB_V: f64 = 0.000_005;
/// Shunt sum: bits 15..1 at 40 µV, i.e. 20 µV per raw count.
pub const SHUNT_SUM_LSB_V: f64 = 0.000_02;
/// Limit registers ignore the three low bits.
const LIMIT_RESERVED_BITS: u16 = 0x7;

// ───────────────────────────────────────────────────────────────
// Field enums
// ───────────────────────────────────────────────────────────────

/// Samples averaged per conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Averaging {
    Avg1 = 0,
    Avg4 = 1,
    Avg16 = 2,
    Avg64 = 3,
    Avg128 = 4,
    Avg256 = 5,
    Avg512 = 6,
    Avg1024 = 7,
}

impl Averaging {
    pub const fn from_bits(bits: u16) -> Self {
        match bits & 0x7 {
            0 => Self::Avg1,
            1 => Self::Avg4,
            2 => Self::Avg16,
            3 => Self::Avg64,
            4 => Self::Avg128,
            5 => Self::Avg256,
            6 => Self::Avg512,
            _ => Self::Avg1024,
        }
    }
}

/// ADC conversion time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ConversionTime {
    Us140 = 0,
    Us204 = 1,
    Us332 = 2,
    Us588 = 3,
    Us1100 = 4,
    Us2116 = 5,
    Us4156 = 6,
    Us8244 = 7,
}

impl ConversionTime {
    pub const fn from_bits(bits: u16) -> Self {
        match bits & 0x7 {
            0 => Self::Us140,
            1 => Self::Us204,
            2 => Self::Us332,
            3 => Self::Us588,
            4 => Self::Us1100,
            5 => Self::Us2116,
            6 => Self::Us4156,
            _ => Self::Us8244,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Register words
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ina3221Config {
    /// Enable flags for channels 1..3.
    pub channels: [bool; 3],
    pub averaging: Averaging,
    pub bus_conversion: ConversionTime,
    pub shunt_conversion: ConversionTime,
    pub continuous: bool,
    pub bus_enabled: bool,
    pub shunt_enabled: bool,
}

const fn channel_bit(shift: u8, channel: usize) -> u16 {
    // Channel 1 sits in the highest bit of each three-bit group.
    1 << (shift as usize + 2 - channel)
}

fn pack_channels(shift: u8, flags: [bool; 3]) -> u16 {
    flags
        .iter()
        .enumerate()
        .filter(|(_, on)| **on)
        .fold(0, |acc, (ch, _)| acc | channel_bit(shift, ch))
}

fn unpack_channels(raw: u16, shift: u8) -> [bool; 3] {
    [0, 1, 2].map(|ch| raw & channel_bit(shift, ch) != 0)
}

impl Ina3221Config {
    pub fn encode(&self) -> u16 {
        let mut raw = pack_channels(CH_EN_SHIFT, self.channels);
        raw = set_field(raw, AVG_MASK, AVG_SHIFT, self.averaging as u16);
        raw = set_field(raw, VBUS_CT_MASK, VBUS_CT_SHIFT, self.bus_conversion as u16);
        raw = set_field(raw, VSHT_CT_MASK, VSHT_CT_SHIFT, self.shunt_conversion as u16);
        if self.continuous {
            raw |= MODE_CONTINUOUS_BIT;
        }
        if self.bus_enabled {
            raw |= MODE_BUS_BIT;
        }
        if self.shunt_enabled {
            raw |= MODE_SHUNT_BIT;
        }
        raw
    }

    pub fn decode(raw: u16) -> Self {
        Self {
            channels: unpack_channels(raw, CH_EN_SHIFT),
            averaging: Averaging::from_bits(get_field(raw, AVG_MASK, AVG_SHIFT)),
            bus_conversion: ConversionTime::from_bits(get_field(raw, VBUS_CT_MASK, VBUS_CT_SHIFT)),
            shunt_conversion: ConversionTime::from_bits(get_field(raw, VSHT_CT_MASK, VSHT_CT_SHIFT)),
            continuous: raw & MODE_CONTINUOUS_BIT != 0,
            bus_enabled: raw & MODE_BUS_BIT != 0,
            shunt_enabled: raw & MODE_SHUNT_BIT != 0,
        }
    }
}

impl Default for Ina3221Config {
    fn default() -> Self {
        Self::decode(DEFAULT_CONFIG)
    }
}

/// Writable half of the Mask/Enable register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AlertMask {
    /// Channels included in the shunt-voltage sum.
    pub summation: [bool; 3],
    pub warning_latch: bool,
    pub critical_latch: bool,
}

impl AlertMask {
    pub fn encode(&self) -> u16 {
        let mut raw = pack_channels(SCC_SHIFT, self.summation);
        if self.warning_latch {
            raw |= WEN_BIT;
        }
        if self.critical_latch {
            raw |= CEN_BIT;
        }
        raw
    }

    pub fn decode(raw: u16) -> Self {
        Self {
            summation: unpack_channels(raw, SCC_SHIFT),
            warning_latch: raw & WEN_BIT != 0,
            critical_latch: raw & CEN_BIT != 0,
        }
    }
}

/// Read-only flags of the Mask/Enable register.  Reading clears them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AlertStatus {
    pub critical: [bool; 3],
    pub warning: [bool; 3],
    pub summation: bool,
    pub power_valid: bool,
    pub timing_control: bool,
    pub conversion_ready: bool,
}

impl AlertStatus {
    pub fn decode(raw: u16) -> Self {
        Self {
            critical: unpack_channels(raw, CF_SHIFT),
            warning: unpack_channels(raw, WF_SHIFT),
            summation: raw & SF_BIT != 0,
            power_valid: raw & PVF_BIT != 0,
            timing_control: raw & TCF_BIT != 0,
            conversion_ready: raw & CVRF_BIT != 0,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Driver
// ───────────────────────────────────────────────────────────────

pub struct Ina3221<B: I2c> {
    dev: DeviceHandle<B>,
    config: Ina3221Config,
    mask: AlertMask,
    shunt_ohms: [Option<f64>; 3],
}

fn check_channel(channel: u8) -> Result<usize> {
    if channel < CHANNELS {
        Ok(channel as usize)
    } else {
        Err(Error::InvalidArgument("INA3221 channel out of range"))
    }
}

/// Scale `value` by `lsb` into a limit register word.
fn limit_word(value: f64, lsb: f64) -> Result<u16> {
    let raw = (value / lsb).round();
    if !raw.is_finite() || raw < f64::from(i16::MIN) || raw > f64::from(i16::MAX) {
        return Err(Error::InvalidArgument("alert limit out of range"));
    }
    Ok((raw as i16 as u16) & !LIMIT_RESERVED_BITS)
}

impl<B: I2c> Ina3221<B> {
    /// Bind to an attached device and read back its config and mask.
    pub fn new(dev: DeviceHandle<B>) -> Result<Self> {
        let mut monitor = Self {
            dev,
            config: Ina3221Config::default(),
            mask: AlertMask::default(),
            shunt_ohms: [None; 3],
        };
        monitor.sync()?;
        info!(
            "INA3221 0x{:02x}: config {:?}",
            monitor.dev.address(),
            monitor.config
        );
        Ok(monitor)
    }

    pub fn address(&self) -> u8 {
        self.dev.address()
    }

    /// Reload the cached config and mask from the device.
    pub fn sync(&mut self) -> Result<()> {
        self.config = Ina3221Config::decode(self.dev.read_register(reg::CONFIG)?);
        self.mask = AlertMask::decode(self.dev.read_register(reg::MASK_ENABLE)?);
        Ok(())
    }

    pub fn reset(&mut self) -> Result<()> {
        self.dev.write_register(reg::CONFIG, RST_BIT)?;
        self.config = Ina3221Config::default();
        self.mask = AlertMask::default();
        info!("INA3221 0x{:02x}: reset", self.dev.address());
        Ok(())
    }

    pub fn config(&self) -> Ina3221Config {
        self.config
    }

    pub fn alert_mask(&self) -> AlertMask {
        self.mask
    }

    fn write_config(&mut self, config: Ina3221Config) -> Result<()> {
        self.dev.write_register(reg::CONFIG, config.encode())?;
        self.config = config;
        Ok(())
    }

    fn write_mask(&mut self, mask: AlertMask) -> Result<()> {
        self.dev.write_register(reg::MASK_ENABLE, mask.encode())?;
        self.mask = mask;
        Ok(())
    }

    /// Operating mode: continuous vs triggered, and which quantities convert.
    pub fn set_options(&mut self, continuous: bool, bus: bool, shunt: bool) -> Result<()> {
        let config = Ina3221Config {
            continuous,
            bus_enabled: bus,
            shunt_enabled: shunt,
            ..self.config
        };
        self.write_config(config)
    }

    pub fn enable_channels(&mut self, channels: [bool; 3]) -> Result<()> {
        self.write_config(Ina3221Config {
            channels,
            ..self.config
        })
    }

    pub fn set_average(&mut self, averaging: Averaging) -> Result<()> {
        self.write_config(Ina3221Config {
            averaging,
            ..self.config
        })
    }

    pub fn set_bus_conversion_time(&mut self, time: ConversionTime) -> Result<()> {
        self.write_config(Ina3221Config {
            bus_conversion: time,
            ..self.config
        })
    }

    pub fn set_shunt_conversion_time(&mut self, time: ConversionTime) -> Result<()> {
        self.write_config(Ina3221Config {
            shunt_conversion: time,
            ..self.config
        })
    }

    /// Choose which channels contribute to the shunt-voltage sum.
    pub fn set_summation_channels(&mut self, channels: [bool; 3]) -> Result<()> {
        self.write_mask(AlertMask {
            summation: channels,
            ..self.mask
        })
    }

    pub fn set_alert_latches(&mut self, warning: bool, critical: bool) -> Result<()> {
        self.write_mask(AlertMask {
            warning_latch: warning,
            critical_latch: critical,
            ..self.mask
        })
    }

    /// Set or clear a channel's shunt resistance.  Current queries on a
    /// channel without one fail with [`Error::NotCalibrated`].
    pub fn set_shunt_resistance(&mut self, channel: u8, ohms: Option<f64>) -> Result<()> {
        let ch = check_channel(channel)?;
        if ohms.is_some_and(|r| !r.is_finite() || r <= 0.0) {
            return Err(Error::InvalidArgument("shunt resistance must be positive"));
        }
        self.shunt_ohms[ch] = ohms;
        Ok(())
    }

    pub fn shunt_resistance(&self, channel: u8) -> Option<f64> {
        check_channel(channel).ok().and_then(|ch| self.shunt_ohms[ch])
    }

    fn calibrated_shunt(&self, channel: u8) -> Result<f64> {
        let ch = check_channel(channel)?;
        self.shunt_ohms[ch].ok_or(Error::NotCalibrated)
    }

    /// Bus voltage of `channel` in volts.
    pub fn bus_voltage(&self, channel: u8) -> Result<f32> {
        let ch = check_channel(channel)? as u8;
        let raw = self.dev.read_signed(reg::BUS_VOLTAGE_1 + 2 * ch)?;
        Ok(raw as f32 * BUS_VOLTAGE_LSB_V)
    }

    /// Shunt voltage of `channel` in volts.
    pub fn shunt_voltage(&self, channel: u8) -> Result<f32> {
        let ch = check_channel(channel)? as u8;
        let raw = self.dev.read_signed(reg::SHUNT_VOLTAGE_1 + 2 * ch)?;
        Ok((f64::from(raw) * SHUNT_VOLTAGE_LSB_V) as f32)
    }

    /// Current through `channel` in amps.
    pub fn current(&self, channel: u8) -> Result<f32> {
        let ohms = self.calibrated_shunt(channel)?;
        let volts = self.shunt_voltage(channel)?;
        Ok((f64::from(volts) / ohms) as f32)
    }

    /// Critical alert fires per conversion when the current exceeds `amps`.
    pub fn set_critical_alert(&mut self, channel: u8, amps: f64) -> Result<()> {
        let ohms = self.calibrated_shunt(channel)?;
        let word = limit_word(amps * ohms, SHUNT_VOLTAGE_LSB_V)?;
        self.dev.write_register(reg::CRITICAL_LIMIT_1 + 2 * channel, word)
    }

    /// Warning alert fires when the averaged current exceeds `amps`.
    pub fn set_warning_alert(&mut self, channel: u8, amps: f64) -> Result<()> {
        let ohms = self.calibrated_shunt(channel)?;
        let word = limit_word(amps * ohms, SHUNT_VOLTAGE_LSB_V)?;
        info!(
            "INA3221 0x{:02x}: CH{} warning at {:.1} mA",
            self.dev.address(),
            channel + 1,
            amps * 1000.0
        );
        self.dev.write_register(reg::WARNING_LIMIT_1 + 2 * channel, word)
    }

    /// Sum of the selected shunt voltages in volts.
    pub fn shunt_sum(&self) -> Result<f32> {
        let raw = self.dev.read_signed(reg::SHUNT_SUM)?;
        Ok((f64::from(raw) * SHUNT_SUM_LSB_V) as f32)
    }

    pub fn set_shunt_sum_limit(&mut self, volts: f64) -> Result<()> {
        let raw = (volts / SHUNT_SUM_LSB_V).round();
        if !raw.is_finite() || raw < f64::from(i16::MIN) || raw > f64::from(i16::MAX) {
            return Err(Error::InvalidArgument("sum limit out of range"));
        }
        // Bit 0 is reserved.
        self.dev.write_register(reg::SHUNT_SUM_LIMIT, (raw as i16 as u16) & !1)
    }

    /// Power-valid window on the bus voltages.  Requires bus conversions.
    pub fn set_power_valid_limits(&mut self, upper_volts: f64, lower_volts: f64) -> Result<()> {
        if !self.config.bus_enabled {
            return Err(Error::InvalidArgument("power-valid needs bus measurement enabled"));
        }
        if lower_volts > upper_volts {
            return Err(Error::InvalidArgument("power-valid lower limit above upper"));
        }
        let lsb = f64::from(BUS_VOLTAGE_LSB_V);
        self.dev
            .write_register(reg::POWER_VALID_UPPER, limit_word(upper_volts, lsb)?)?;
        self.dev
            .write_register(reg::POWER_VALID_LOWER, limit_word(lower_volts, lsb)?)
    }

    /// Read (and thereby clear) the alert flags.
    pub fn alert_status(&self) -> Result<AlertStatus> {
        self.dev.read_register(reg::MASK_ENABLE).map(AlertStatus::decode)
    }

    /// One reading of `channel`.  INA3221 has no power register, and a
    /// channel without a shunt resistance reports voltages only.
    pub fn read(&self, channel: u8) -> Result<ChannelReading> {
        let ch = check_channel(channel)?;
        let shunt_voltage = self.shunt_voltage(channel)?;
        let current = self.shunt_ohms[ch].map(|ohms| (f64::from(shunt_voltage) / ohms) as f32);
        Ok(ChannelReading {
            channel_id: channel,
            bus_voltage: self.bus_voltage(channel)?,
            shunt_voltage,
            current,
            power: None,
        })
    }
}
