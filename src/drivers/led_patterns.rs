//! Link status LED pattern engine with priority-based selection.
//!
//! The liveness unit calls `tick()` every service period and feeds the
//! resulting colour to the [`IndicatorPort`](crate::app::ports::IndicatorPort).
//!
//! ## Priority hierarchy (highest first)
//!
//! 1. **Fault**: rapid red flash while the last publish cycle failed
//! 2. **Link**: one pattern per link state
//!
//! ## Link patterns
//!
//! | State                | Colour | Pattern   |
//! |----------------------|--------|-----------|
//! | Connected            | cyan   | Solid     |
//! | Connecting           | blue   | FastBlink |
//! | Attempting reconnect | amber  | SlowPulse |
//! | Disconnected         | red    | Solid     |

use crate::link::LinkState;

/// Colour as (R, G, B) tuple, each 0–255.
pub type Rgb = (u8, u8, u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternId {
    Solid,
    /// Triangular fade, 1 Hz.
    SlowPulse,
    /// Square wave, 4 Hz.
    FastBlink,
    /// Square wave, 8 Hz.
    RapidFlash,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternRequest {
    pub colour: Rgb,
    pub pattern: PatternId,
    pub priority: u8,
}

pub const COLOUR_CONNECTED: Rgb = (0, 255, 255);
pub const COLOUR_CONNECTING: Rgb = (0, 100, 255);
pub const COLOUR_RECONNECTING: Rgb = (255, 160, 0);
pub const COLOUR_DISCONNECTED: Rgb = (255, 0, 0);
pub const COLOUR_FAULT: Rgb = (255, 0, 0);

/// Pattern shown for each link state.
pub fn link_pattern(state: LinkState) -> (Rgb, PatternId) {
    match state {
        LinkState::Connected => (COLOUR_CONNECTED, PatternId::Solid),
        LinkState::Connecting => (COLOUR_CONNECTING, PatternId::FastBlink),
        LinkState::AttemptingReconnect => (COLOUR_RECONNECTING, PatternId::SlowPulse),
        LinkState::Disconnected => (COLOUR_DISCONNECTED, PatternId::Solid),
    }
}

/// LED pattern engine. Stack-allocated, no heap.
#[derive(Default)]
pub struct LedPatternEngine {
    phase_ms: u32,
    active: Option<PatternRequest>,
    link_request: Option<PatternRequest>,
    fault_request: Option<PatternRequest>,
}

impl LedPatternEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the link-layer pattern (priority 2).
    pub fn set_link_state(&mut self, state: LinkState) {
        let (colour, pattern) = link_pattern(state);
        self.link_request = Some(PatternRequest {
            colour,
            pattern,
            priority: 2,
        });
    }

    /// Set or clear the fault pattern (priority 1: highest).
    pub fn set_fault(&mut self, active: bool) {
        self.fault_request = active.then_some(PatternRequest {
            colour: COLOUR_FAULT,
            pattern: PatternId::RapidFlash,
            priority: 1,
        });
    }

    pub fn clear_all(&mut self) {
        self.link_request = None;
        self.fault_request = None;
        self.active = None;
        self.phase_ms = 0;
    }

    /// Advance the pattern phase by `delta_ms` and return the output colour.
    pub fn tick(&mut self, delta_ms: u32) -> Rgb {
        self.phase_ms = self.phase_ms.wrapping_add(delta_ms);

        let selected = self.fault_request.or(self.link_request);
        let reset_phase = match (&self.active, &selected) {
            (Some(prev), Some(next)) => {
                prev.priority != next.priority || prev.pattern != next.pattern
            }
            (None, Some(_)) => true,
            _ => false,
        };
        if reset_phase {
            self.phase_ms = 0;
        }
        self.active = selected;

        match &self.active {
            Some(req) => self.generate(req.colour, req.pattern),
            None => (0, 0, 0),
        }
    }

    fn generate(&self, colour: Rgb, pattern: PatternId) -> Rgb {
        match pattern {
            PatternId::Solid => colour,
            PatternId::Off => (0, 0, 0),
            PatternId::SlowPulse => scale(colour, triangle(self.phase_ms, 1000)),
            PatternId::FastBlink => {
                if self.phase_ms % 250 < 125 { colour } else { (0, 0, 0) }
            }
            PatternId::RapidFlash => {
                if self.phase_ms % 125 < 63 { colour } else { (0, 0, 0) }
            }
        }
    }
}

/// Triangular ramp 0→255→0 over `period_ms`, no libm.
fn triangle(phase_ms: u32, period_ms: u32) -> u8 {
    let pos = u64::from(phase_ms % period_ms);
    let period = u64::from(period_ms);
    let half = period / 2;
    if pos < half {
        ((pos * 255) / half) as u8
    } else {
        (((period - pos) * 255) / half) as u8
    }
}

fn scale((r, g, b): Rgb, brightness: u8) -> Rgb {
    let br = u16::from(brightness);
    (
        ((u16::from(r) * br) / 255) as u8,
        ((u16::from(g) * br) / 255) as u8,
        ((u16::from(b) * br) / 255) as u8,
    )
}
