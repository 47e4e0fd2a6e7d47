//! Actuation reactor: theft alert output.
//!
//! A classification in the alert set blinks the alert output for a fixed
//! number of on/off cycles, then leaves it low.  The sequence blocks only
//! the reactor unit and always runs to completion.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use log::{info, warn};

use crate::config::{MAX_ALERT_LABELS, NodeConfig};
use crate::error::{ActuatorError, Error, Result};
use crate::sensors::Label;

use super::commands::Classification;
use super::events::AppEvent;
use super::ports::EventSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    /// The output was driven; `toggles` counts level changes.
    Alert { toggles: u32 },
    Normal,
}

pub struct Reactor<P: OutputPin, D: DelayNs> {
    pin: P,
    delay: D,
    alert_labels: heapless::Vec<Label, MAX_ALERT_LABELS>,
    cycles: u8,
    half_period_ms: u32,
}

impl<P: OutputPin, D: DelayNs> Reactor<P, D> {
    pub fn new(pin: P, delay: D, config: &NodeConfig) -> Self {
        Self {
            pin,
            delay,
            alert_labels: config.alert_labels.clone(),
            cycles: config.alert_blink_cycles,
            half_period_ms: config.alert_blink_half_period_ms,
        }
    }

    pub fn is_alert(&self, label: &str) -> bool {
        self.alert_labels.iter().any(|l| l.as_str() == label)
    }

    /// Act on one classification.
    pub fn react(&mut self, c: &Classification, sink: &mut impl EventSink) -> Result<Reaction> {
        if !self.is_alert(&c.label) {
            info!("No theft detected (normal): {}", c.label);
            sink.emit(&AppEvent::Normal { label: c.label.clone() });
            return Ok(Reaction::Normal);
        }

        warn!("Theft alert: {}", c.label);
        let toggles = match self.blink() {
            Ok(n) => n,
            Err(e) => {
                // Never leave the output latched high.
                let _ = self.pin.set_low();
                return Err(e);
            }
        };
        sink.emit(&AppEvent::Alert {
            label: c.label.clone(),
            toggles,
        });
        Ok(Reaction::Alert { toggles })
    }

    fn blink(&mut self) -> Result<u32> {
        let mut toggles = 0;
        for _ in 0..self.cycles {
            self.pin
                .set_high()
                .map_err(|_| Error::Actuator(ActuatorError::GpioWriteFailed))?;
            toggles += 1;
            self.delay.delay_ms(self.half_period_ms);
            self.pin
                .set_low()
                .map_err(|_| Error::Actuator(ActuatorError::GpioWriteFailed))?;
            toggles += 1;
            self.delay.delay_ms(self.half_period_ms);
        }
        Ok(toggles)
    }

    pub fn release(self) -> (P, D) {
        (self.pin, self.delay)
    }
}
