//! Shunt calibration for the INA219 current/power registers.
//!
//! ```text
//!   current_lsb = full_scale / 32767          (explicit full scale)
//!               | Vshunt_max(gain) / R / 32767 (derived from the PGA range)
//!   current_lsb = ceil(current_lsb, 0.0001)
//!   power_lsb   = 20 × current_lsb
//!   cal         = floor(0.04096 / (current_lsb × R))
//! ```
//!
//! Rounding `current_lsb` up means the device never under-reports current;
//! the price is some register resolution.

use embedded_hal::i2c::I2c;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::register::DeviceHandle;
use crate::error::{Error, Result};

/// Positive full-scale count of the signed current register.
pub const FULL_SCALE_COUNTS: f64 = 32767.0;

/// Decimal step `current_lsb` is rounded up to.
pub const CURRENT_LSB_STEP: f64 = 0.0001;

/// Fixed internal scaling constant of the calibration equation.
pub const CALIBRATION_SCALE: f64 = 0.04096;

/// `power_lsb / current_lsb`, fixed by the device.
pub const POWER_LSB_RATIO: f64 = 20.0;

/// Absorbs binary representation error before ceil/floor so exact decimal
/// inputs (e.g. 0.0001 × 0.1) do not land on the wrong side of a step.
const ROUNDING_EPSILON: f64 = 1e-9;

/// Maximum shunt voltage per PGA setting, in volts.
const MAX_SHUNT_VOLTAGE: [f64; 4] = [0.04, 0.08, 0.16, 0.32];

// ───────────────────────────────────────────────────────────────
// PGA gain
// ───────────────────────────────────────────────────────────────

/// Shunt programmable-gain setting (the PG field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Gain {
    /// ±40 mV
    Div1 = 0,
    /// ±80 mV
    Div2 = 1,
    /// ±160 mV
    Div4 = 2,
    /// ±320 mV
    Div8 = 3,
}

impl Gain {
    /// Decode the two-bit PG field.
    pub const fn from_bits(bits: u16) -> Self {
        match bits & 0x3 {
            0 => Self::Div1,
            1 => Self::Div2,
            2 => Self::Div4,
            _ => Self::Div8,
        }
    }

    pub const fn bits(self) -> u16 {
        self as u16
    }

    /// Largest shunt voltage measurable at this gain, in volts.
    pub const fn max_shunt_voltage(self) -> f64 {
        MAX_SHUNT_VOLTAGE[self as usize]
    }
}

impl TryFrom<u8> for Gain {
    type Error = Error;

    fn try_from(index: u8) -> Result<Self> {
        match index {
            0..=3 => Ok(Self::from_bits(index as u16)),
            _ => Err(Error::InvalidArgument("gain index out of range")),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Profile
// ───────────────────────────────────────────────────────────────

/// Scale factors derived from one calibration.  Immutable once computed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationProfile {
    current_lsb: f64,
    power_lsb: f64,
    register_value: u16,
}

impl CalibrationProfile {
    /// Derive the profile for a shunt of `shunt_ohms` at `gain`.
    ///
    /// `full_scale_current`, when given, overrides the gain-derived range.
    pub fn compute(gain: Gain, shunt_ohms: f64, full_scale_current: Option<f64>) -> Result<Self> {
        if !shunt_ohms.is_finite() || shunt_ohms <= 0.0 {
            return Err(Error::InvalidArgument("shunt resistance must be positive"));
        }

        let raw_lsb = match full_scale_current {
            Some(amps) if !amps.is_finite() || amps <= 0.0 => {
                return Err(Error::InvalidArgument("full-scale current must be positive"));
            }
            Some(amps) => amps / FULL_SCALE_COUNTS,
            None => gain.max_shunt_voltage() / shunt_ohms / FULL_SCALE_COUNTS,
        };

        let current_lsb = ceil_to_step(raw_lsb);
        let power_lsb = current_lsb * POWER_LSB_RATIO;

        let cal = (CALIBRATION_SCALE / (current_lsb * shunt_ohms) + ROUNDING_EPSILON).floor();
        if cal < 1.0 {
            return Err(Error::InvalidArgument("calibration register underflow"));
        }
        if cal > f64::from(u16::MAX) {
            return Err(Error::InvalidArgument("calibration register overflow"));
        }

        Ok(Self {
            current_lsb,
            power_lsb,
            register_value: cal as u16,
        })
    }

    /// Amps per bit of the current register.
    pub fn current_lsb(&self) -> f64 {
        self.current_lsb
    }

    /// Watts per bit of the power register.
    pub fn power_lsb(&self) -> f64 {
        self.power_lsb
    }

    /// Value programmed into the calibration register.
    pub fn register_value(&self) -> u16 {
        self.register_value
    }
}

fn ceil_to_step(value: f64) -> f64 {
    (value / CURRENT_LSB_STEP - ROUNDING_EPSILON).ceil() * CURRENT_LSB_STEP
}

// ───────────────────────────────────────────────────────────────
// Verified write
// ───────────────────────────────────────────────────────────────

/// Result of reading a calibration register back after writing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Matched,
    /// The device holds a different value.  Calibration proceeds anyway.
    Mismatch { written: u16, read_back: u16 },
}

/// Write `value` to `register` and confirm it stuck.
///
/// A mismatch is logged at warn level and reported, never raised: the
/// device may still measure within tolerance.  Bus failures propagate.
pub fn write_verified<B: I2c>(dev: &DeviceHandle<B>, register: u8, value: u16) -> Result<Verification> {
    dev.write_register(register, value)?;
    let read_back = dev.read_register(register)?;
    if read_back == value {
        info!("Calibration 0x{:02x}: register = {}", dev.address(), value);
        Ok(Verification::Matched)
    } else {
        warn!(
            "Calibration 0x{:02x}: wrote {} but read back {}",
            dev.address(),
            value,
            read_back
        );
        Ok(Verification::Mismatch {
            written: value,
            read_back,
        })
    }
}
