//! Fuzz target: `telemetry::format_into`
//!
//! Builds a record from arbitrary measurement bits (NaN and infinities
//! included) and an arbitrary buffer size.  The formatter must either
//! write exactly `required_size` bytes of valid UTF-8 or reject the
//! record without touching the buffer.
//!
//! cargo fuzz run fuzz_telemetry_format

#![no_main]

use libfuzzer_sys::fuzz_target;
use smartmeter::error::Error;
use smartmeter::sensors::{ChannelReading, Label, SourceReading};
use smartmeter::telemetry::{format_into, required_size, TelemetryRecord};
use time::OffsetDateTime;

fn f32_at(data: &[u8], at: usize) -> f32 {
    let mut bytes = [0u8; 4];
    for (i, b) in bytes.iter_mut().enumerate() {
        *b = data.get(at + i).copied().unwrap_or(0);
    }
    f32::from_le_bytes(bytes)
}

fuzz_target!(|data: &[u8]| {
    let Some((&head, body)) = data.split_first() else {
        return;
    };
    let capacity = usize::from(head) * 8;

    let mut sources = Vec::new();
    for (i, chunk) in body.chunks(17).take(8).enumerate() {
        let mut label = Label::new();
        let _ = label.push_str(["feeder", "t1", "t2", "t3"][i % 4]);
        let reading = if chunk[0] & 1 == 0 {
            Ok(ChannelReading {
                channel_id: chunk[0] >> 1,
                bus_voltage: f32_at(chunk, 1),
                shunt_voltage: f32_at(chunk, 5),
                current: (chunk[0] & 4 != 0).then(|| f32_at(chunk, 9)),
                power: (chunk[0] & 2 != 0).then(|| f32_at(chunk, 13)),
            })
        } else {
            Err(Error::NotCalibrated)
        };
        sources.push(SourceReading { label, reading });
    }

    let Ok(timestamp) = OffsetDateTime::from_unix_timestamp(1_735_689_600) else {
        return;
    };
    let record = TelemetryRecord {
        timestamp,
        sources: &sources,
    };
    let required = required_size(&record).expect("size of a finite record");

    let mut buf = vec![0x5Au8; capacity];
    match format_into(&record, &mut buf) {
        Ok(n) => {
            assert_eq!(n, required);
            assert!(std::str::from_utf8(&buf[..n]).is_ok());
        }
        Err(Error::PayloadTooLarge { required: r, capacity: c }) => {
            assert_eq!((r, c), (required, capacity));
            assert!(buf.iter().all(|&b| b == 0x5A));
        }
        Err(e) => panic!("unexpected error {e}"),
    }
});
