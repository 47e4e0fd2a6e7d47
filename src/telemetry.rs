//! Telemetry record serialisation.
//!
//! ```text
//! {"timestamp":"2025-03-01T14:05:09+03:00",
//!  "feeder":{"line_voltage":229.84,"shunt_voltage":12.340,"current":123.400,"power":28362.000},
//!  "transformer1":{"line_voltage":230.01,"shunt_voltage":4.105,"current":41.050},
//!  "transformer2":null, ...}
//! ```
//!
//! Keys are emitted in a fixed order: timestamp, then sources as declared,
//! then voltage fields before current/power within a source.  A source
//! whose read failed serialises as `null`; a voltage-only channel omits
//! `current`.  Units on the wire are V for
//! `line_voltage`, mV for `shunt_voltage`, mA for `current` and mW for
//! `power`.
//!
//! The record is rendered twice: once into a byte counter to learn the
//! exact size, then into the caller's buffer.  An oversized record is
//! rejected before a single byte is written.

use core::fmt::{self, Write};

use time::OffsetDateTime;
use time::macros::format_description;

use crate::error::{Error, Result};
use crate::sensors::{ChannelReading, SourceReading};

/// One publish cycle's worth of measurements.
#[derive(Debug, Clone, Copy)]
pub struct TelemetryRecord<'a> {
    /// Local time of the poll, second resolution.
    pub timestamp: OffsetDateTime,
    pub sources: &'a [SourceReading],
}

/// `YYYY-MM-DDTHH:MM:SS±HH:MM`
pub fn format_timestamp(ts: OffsetDateTime) -> Result<heapless::String<32>> {
    let fmt = format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second][offset_hour sign:mandatory]:[offset_minute]"
    );
    let text = ts
        .format(fmt)
        .map_err(|_| Error::InvalidArgument("timestamp not representable"))?;
    let mut out = heapless::String::new();
    out.push_str(&text)
        .map_err(|_| Error::InvalidArgument("timestamp not representable"))?;
    Ok(out)
}

/// Exact number of bytes [`format_into`] would write for `record`.
pub fn required_size(record: &TelemetryRecord<'_>) -> Result<usize> {
    let timestamp = format_timestamp(record.timestamp)?;
    let mut counter = SizeCounter(0);
    write_record(&mut counter, &timestamp, record.sources)
        .map_err(|_| Error::InvalidArgument("record not serialisable"))?;
    Ok(counter.0)
}

/// Serialise `record` into `buf` and return the payload length.
///
/// Fails with [`Error::PayloadTooLarge`] when the payload would not fit;
/// `buf` is untouched in that case.
pub fn format_into(record: &TelemetryRecord<'_>, buf: &mut [u8]) -> Result<usize> {
    let timestamp = format_timestamp(record.timestamp)?;

    let mut counter = SizeCounter(0);
    write_record(&mut counter, &timestamp, record.sources)
        .map_err(|_| Error::InvalidArgument("record not serialisable"))?;
    let required = counter.0;
    if required > buf.len() {
        return Err(Error::PayloadTooLarge {
            required,
            capacity: buf.len(),
        });
    }

    let mut writer = SliceWriter { buf, len: 0 };
    write_record(&mut writer, &timestamp, record.sources)
        .map_err(|_| Error::InvalidArgument("record changed while serialising"))?;
    Ok(writer.len)
}

// ───────────────────────────────────────────────────────────────
// Rendering
// ───────────────────────────────────────────────────────────────

fn write_record(w: &mut impl Write, timestamp: &str, sources: &[SourceReading]) -> fmt::Result {
    write!(w, "{{\"timestamp\":\"{}\"", timestamp)?;
    for source in sources {
        // Sampler::add_source admits only [A-Za-z0-9_-] labels.
        write!(w, ",\"{}\":", source.label)?;
        match &source.reading {
            Ok(reading) => write_reading(w, reading)?,
            Err(_) => w.write_str("null")?,
        }
    }
    w.write_char('}')
}

fn write_reading(w: &mut impl Write, r: &ChannelReading) -> fmt::Result {
    w.write_str("{\"line_voltage\":")?;
    write_number(w, r.bus_voltage, 1.0, 2)?;
    w.write_str(",\"shunt_voltage\":")?;
    write_number(w, r.shunt_voltage, 1000.0, 3)?;
    if let Some(current) = r.current {
        w.write_str(",\"current\":")?;
        write_number(w, current, 1000.0, 3)?;
    }
    if let Some(power) = r.power {
        w.write_str(",\"power\":")?;
        write_number(w, power, 1000.0, 3)?;
    }
    w.write_char('}')
}

/// Fixed-precision number; non-finite values become `null`.
fn write_number(w: &mut impl Write, value: f32, scale: f32, precision: usize) -> fmt::Result {
    let scaled = value * scale;
    if scaled.is_finite() {
        write!(w, "{:.*}", precision, scaled)
    } else {
        w.write_str("null")
    }
}

struct SizeCounter(usize);

impl Write for SizeCounter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0 += s.len();
        Ok(())
    }
}

struct SliceWriter<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl Write for SliceWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let end = self.len + s.len();
        let dst = self.buf.get_mut(self.len..end).ok_or(fmt::Error)?;
        dst.copy_from_slice(s.as_bytes());
        self.len = end;
        Ok(())
    }
}
