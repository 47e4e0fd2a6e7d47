//! Fuzz target: `commands::decode`
//!
//! Feeds arbitrary payloads as if they arrived on the prediction topic.
//! Decoding must never panic, and an accepted label is always non-empty,
//! trimmed and within capacity.
//!
//! cargo fuzz run fuzz_classification_decode

#![no_main]

use libfuzzer_sys::fuzz_target;
use smartmeter::app::commands::{self, Inbox};

fuzz_target!(|data: &[u8]| {
    if let Ok(c) = commands::decode(data) {
        assert!(!c.label.is_empty());
        assert_eq!(c.label.trim(), c.label.as_str());
        assert!(c.label.len() <= 32);
    }

    // Delivery never blocks, even past the inbox depth.
    let inbox = Inbox::new();
    for _ in 0..8 {
        let _ = commands::deliver(&inbox, data);
    }
});
