//! Register codec and the shared I2C bus.
//!
//! Every INA2xx register is a big-endian 16-bit word.  A read writes the
//! register pointer then reads two bytes high-byte-first; a write sends
//! `[pointer, high, low]` in one transaction.
//!
//! ```text
//!   Ina219 ─┐
//!           ├─▶ DeviceHandle ──▶ SharedBus (Mutex) ──▶ embedded_hal::i2c::I2c
//!   Ina3221 ┘
//! ```
//!
//! The bus lock is scoped to the bus, not the device, so two monitors on
//! the same wires never interleave transactions.  No retries happen here.

use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use embedded_hal::i2c::{Error as _, I2c};
use log::{debug, info};

use crate::error::{BusError, Error, Result};

/// Maximum number of devices attached to one bus.
pub const MAX_ATTACHED: usize = 8;

/// Valid 7-bit addresses (0x00-0x07 and 0x78-0x7F are reserved).
pub const VALID_ADDRESSES: RangeInclusive<u8> = 0x08..=0x77;

// ───────────────────────────────────────────────────────────────
// Codec
// ───────────────────────────────────────────────────────────────

/// Frame a register write: pointer byte, then the value high byte first.
pub const fn encode_write(register: u8, value: u16) -> [u8; 3] {
    let [hi, lo] = value.to_be_bytes();
    [register, hi, lo]
}

/// Compose a register value from the two bytes read off the wire.
pub const fn decode_value(bytes: [u8; 2]) -> u16 {
    u16::from_be_bytes(bytes)
}

/// Extract a field from a register word.  `mask` is already shifted.
pub const fn get_field(raw: u16, mask: u16, shift: u8) -> u16 {
    (raw & mask) >> shift
}

/// Replace a field in a register word, leaving the other bits intact.
pub const fn set_field(raw: u16, mask: u16, shift: u8, value: u16) -> u16 {
    (raw & !mask) | ((value << shift) & mask)
}

// ───────────────────────────────────────────────────────────────
// Shared bus
// ───────────────────────────────────────────────────────────────

struct BusState<B> {
    driver: B,
    /// `(address, generation)` for every live handle.
    attached: heapless::Vec<(u8, u32), MAX_ATTACHED>,
    next_generation: u32,
}

/// An I2C bus shared between every device (and unit) that talks on it.
pub struct SharedBus<B> {
    inner: Arc<Mutex<BusState<B>>>,
}

impl<B> Clone for SharedBus<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: I2c> SharedBus<B> {
    pub fn new(driver: B) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusState {
                driver,
                attached: heapless::Vec::new(),
                next_generation: 1,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BusState<B>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind a device address to this bus and hand out its handle.
    pub fn attach(&self, address: u8) -> Result<DeviceHandle<B>> {
        if !VALID_ADDRESSES.contains(&address) {
            return Err(Error::InvalidArgument("I2C address outside 7-bit range"));
        }
        let mut state = self.lock();
        if state.attached.iter().any(|(a, _)| *a == address) {
            return Err(Error::InvalidArgument("I2C address already attached"));
        }
        let generation = state.next_generation;
        state
            .attached
            .push((address, generation))
            .map_err(|_| Error::InvalidArgument("too many devices on bus"))?;
        state.next_generation = generation.wrapping_add(1);
        info!("Bus: attached device 0x{:02x}", address);
        Ok(DeviceHandle {
            bus: self.clone(),
            address,
            generation,
        })
    }

    /// Unbind an address.  Any handle still holding it fails with
    /// [`Error::InvalidHandle`] from then on.
    pub fn detach(&self, address: u8) {
        let mut state = self.lock();
        if let Some(pos) = state.attached.iter().position(|(a, _)| *a == address) {
            state.attached.swap_remove(pos);
            info!("Bus: detached device 0x{:02x}", address);
        }
    }

    /// Whether `address` currently has a live handle.
    pub fn is_attached(&self, address: u8) -> bool {
        self.lock().attached.iter().any(|(a, _)| *a == address)
    }

    /// Scan every address in `range` with a one-byte read.
    pub fn scan(&self, range: RangeInclusive<u8>) -> heapless::Vec<u8, 16> {
        let mut found = heapless::Vec::new();
        let mut state = self.lock();
        for address in range {
            let mut byte = [0u8; 1];
            if state.driver.read(address, &mut byte).is_ok() {
                debug!("Bus: device responded at 0x{:02x}", address);
                if found.push(address).is_err() {
                    break;
                }
            }
        }
        info!("Bus: scan found {} device(s)", found.len());
        found
    }

    /// Run `op` against the driver if `(address, generation)` is still bound.
    fn transact<T>(
        &self,
        address: u8,
        generation: u32,
        op: impl FnOnce(&mut B) -> core::result::Result<T, B::Error>,
    ) -> Result<T> {
        let mut state = self.lock();
        if !state.attached.contains(&(address, generation)) {
            return Err(Error::InvalidHandle(address));
        }
        op(&mut state.driver).map_err(|e| Error::Bus(BusError::from(e.kind())))
    }
}

// ───────────────────────────────────────────────────────────────
// Device handle
// ───────────────────────────────────────────────────────────────

/// One attached device.  Dropping the handle detaches the address.
pub struct DeviceHandle<B: I2c> {
    bus: SharedBus<B>,
    address: u8,
    generation: u32,
}

impl<B: I2c> DeviceHandle<B> {
    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn bus(&self) -> &SharedBus<B> {
        &self.bus
    }

    /// Read one 16-bit register.
    pub fn read_register(&self, register: u8) -> Result<u16> {
        let mut bytes = [0u8; 2];
        self.bus.transact(self.address, self.generation, |drv| {
            drv.write_read(self.address, &[register], &mut bytes)
        })?;
        Ok(decode_value(bytes))
    }

    /// Write one 16-bit register.
    pub fn write_register(&self, register: u8, value: u16) -> Result<()> {
        let frame = encode_write(register, value);
        self.bus
            .transact(self.address, self.generation, |drv| drv.write(self.address, &frame))
    }

    /// Read a register and reinterpret it as two's complement.
    pub fn read_signed(&self, register: u8) -> Result<i16> {
        self.read_register(register).map(|raw| raw as i16)
    }
}

impl<B: I2c> Drop for DeviceHandle<B> {
    fn drop(&mut self) {
        let mut state = self.bus.lock();
        if let Some(pos) = state
            .attached
            .iter()
            .position(|entry| *entry == (self.address, self.generation))
        {
            state.attached.swap_remove(pos);
        }
    }
}
