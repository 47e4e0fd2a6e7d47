//! RGB link status LED driver.
//!
//! Three PWM channels (LEDC on target) drive a common-cathode RGB LED.
//! Any `embedded_hal::pwm::SetDutyCycle` channel works, so the host tests
//! use recording mocks.

use embedded_hal::pwm::SetDutyCycle;

use crate::app::ports::IndicatorPort;
use crate::drivers::led_patterns::Rgb;
use crate::error::{ActuatorError, Error, Result};

pub struct StatusLed<R, G, B> {
    red: R,
    green: G,
    blue: B,
    current: Rgb,
}

impl<R: SetDutyCycle, G: SetDutyCycle, B: SetDutyCycle> StatusLed<R, G, B> {
    pub fn new(red: R, green: G, blue: B) -> Self {
        Self {
            red,
            green,
            blue,
            current: (0, 0, 0),
        }
    }

    pub fn set_colour(&mut self, (r, g, b): Rgb) -> Result<()> {
        self.red.set_duty_cycle_fraction(u16::from(r), 255).map_err(pwm_failed)?;
        self.green.set_duty_cycle_fraction(u16::from(g), 255).map_err(pwm_failed)?;
        self.blue.set_duty_cycle_fraction(u16::from(b), 255).map_err(pwm_failed)?;
        self.current = (r, g, b);
        Ok(())
    }

    pub fn off(&mut self) -> Result<()> {
        self.set_colour((0, 0, 0))
    }

    pub fn current_colour(&self) -> Rgb {
        self.current
    }
}

fn pwm_failed<E>(_: E) -> Error {
    Error::Actuator(ActuatorError::PwmWriteFailed)
}

impl<R: SetDutyCycle, G: SetDutyCycle, B: SetDutyCycle> IndicatorPort for StatusLed<R, G, B> {
    fn show(&mut self, colour: Rgb) -> Result<()> {
        if colour == self.current {
            return Ok(());
        }
        self.set_colour(colour)
    }
}
