//! Fuzz target: `NodeConfig::from_json`
//!
//! Arbitrary documents must be parsed or rejected without panicking, and
//! anything accepted must still validate.
//!
//! cargo fuzz run fuzz_config_json

#![no_main]

use libfuzzer_sys::fuzz_target;
use smartmeter::config::NodeConfig;

fuzz_target!(|data: &[u8]| {
    if let Ok(config) = NodeConfig::from_json(data) {
        assert!(config.validate().is_ok());
    }
});
