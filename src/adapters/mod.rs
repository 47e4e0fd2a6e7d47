//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter    | Implements        | Connects to                  |
//! |------------|-------------------|------------------------------|
//! | `log_sink` | EventSink         | Serial log output            |
//! | `time`     | Clock, WallClock  | esp_timer / SNTP system time |
//! | `mqtt`     | Transport         | ESP-IDF MQTT client over TLS |
//!
//! The sensor side needs no adapter of its own: the
//! [`Sampler`](crate::sensors::Sampler) implements `SensorPort` over any
//! `embedded_hal::i2c::I2c` bus.

pub mod log_sink;
#[cfg(target_os = "espidf")]
pub mod mqtt;
pub mod time;
