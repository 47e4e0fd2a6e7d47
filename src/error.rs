//! Unified error types for the SmartMeter firmware.
//!
//! A single `Error` enum that every subsystem converts into, so the unit
//! loops in [`runtime`](crate::runtime) handle failures uniformly.  All
//! variants are `Copy` so they can be stored in readings and events
//! without allocation.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible operation in the firmware funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A register transaction on the I2C bus failed.
    Bus(BusError),
    /// The device handle is not (or no longer) attached to its bus.
    InvalidHandle(u8),
    /// Calibration, configuration or decode input was rejected.
    InvalidArgument(&'static str),
    /// Current or power was requested from a channel without calibration.
    NotCalibrated,
    /// The serialised payload does not fit the caller's buffer.
    PayloadTooLarge { required: usize, capacity: usize },
    /// Connect or publish failed at the transport layer.
    Transport(TransportError),
    /// A manual reconnect attempt could not re-establish the session.
    ReconnectFailed,
    /// An acknowledged publish timed out waiting for its ack.
    AckTimeout,
    /// An output pin could not be driven.
    Actuator(ActuatorError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bus(e) => write!(f, "bus: {e}"),
            Self::InvalidHandle(addr) => write!(f, "device 0x{addr:02x} is not attached"),
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::NotCalibrated => write!(f, "channel not calibrated"),
            Self::PayloadTooLarge { required, capacity } => {
                write!(f, "payload needs {required} bytes, buffer holds {capacity}")
            }
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::ReconnectFailed => write!(f, "reconnect failed"),
            Self::AckTimeout => write!(f, "acknowledgement timed out"),
            Self::Actuator(e) => write!(f, "actuator: {e}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Bus errors
// ---------------------------------------------------------------------------

/// Failure classes of a single I2C transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    /// The device did not acknowledge its address or a data byte.
    NoAcknowledge,
    /// Another master won arbitration.
    ArbitrationLoss,
    /// Misplaced START/STOP or other bus-level fault.
    Bus,
    /// The peripheral could not keep up with the data rate.
    Overrun,
    /// Driver-specific failure (timeouts land here on ESP-IDF).
    Other,
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoAcknowledge => write!(f, "no acknowledge"),
            Self::ArbitrationLoss => write!(f, "arbitration lost"),
            Self::Bus => write!(f, "bus fault"),
            Self::Overrun => write!(f, "overrun"),
            Self::Other => write!(f, "transaction failed"),
        }
    }
}

impl From<embedded_hal::i2c::ErrorKind> for BusError {
    fn from(kind: embedded_hal::i2c::ErrorKind) -> Self {
        use embedded_hal::i2c::ErrorKind;
        match kind {
            ErrorKind::NoAcknowledge(_) => Self::NoAcknowledge,
            ErrorKind::ArbitrationLoss => Self::ArbitrationLoss,
            ErrorKind::Bus => Self::Bus,
            ErrorKind::Overrun => Self::Overrun,
            _ => Self::Other,
        }
    }
}

impl From<BusError> for Error {
    fn from(e: BusError) -> Self {
        Self::Bus(e)
    }
}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

/// Failures reported by a [`Transport`](crate::link::transport::Transport).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// TCP/TLS session could not be opened.
    ConnectFailed,
    /// The broker refused the session (bad credentials, client id in use).
    Rejected,
    /// No session is open.
    NotConnected,
    /// The publish could not be written to the session.
    PublishFailed,
    /// The publish was written but its acknowledgement never arrived.
    AckTimeout,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectFailed => write!(f, "connect failed"),
            Self::Rejected => write!(f, "session rejected"),
            Self::NotConnected => write!(f, "not connected"),
            Self::PublishFailed => write!(f, "publish failed"),
            Self::AckTimeout => write!(f, "ack timeout"),
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::AckTimeout => Self::AckTimeout,
            other => Self::Transport(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Actuator errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorError {
    /// GPIO set failed.
    GpioWriteFailed,
    /// PWM duty-cycle write failed.
    PwmWriteFailed,
}

impl fmt::Display for ActuatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GpioWriteFailed => write!(f, "GPIO write failed"),
            Self::PwmWriteFailed => write!(f, "PWM write failed"),
        }
    }
}

impl From<ActuatorError> for Error {
    fn from(e: ActuatorError) -> Self {
        Self::Actuator(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
