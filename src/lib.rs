//! SmartMeter node library.
//!
//! Exposes the pure-logic modules for integration testing and external
//! inspection. All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod app;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod link;
pub mod pins;
pub mod runtime;
pub mod scheduler;
pub mod telemetry;

// The ESP-IDF adapters are guarded inside; host builds get the
// simulation fallbacks.
pub mod adapters;
pub mod drivers;
pub mod sensors;
