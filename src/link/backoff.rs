//! Reconnect policy and exponential backoff.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How the link recovers after losing its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Retry in the background with backoff.  When off, a loss triggers a
    /// single manual attempt and the owner retries.
    pub auto_reconnect: bool,
    pub min_backoff_ms: u32,
    pub max_backoff_ms: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            min_backoff_ms: 1_000,
            max_backoff_ms: 128_000,
        }
    }
}

impl ReconnectPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.min_backoff_ms == 0 {
            return Err(Error::InvalidArgument("min_backoff_ms must be non-zero"));
        }
        if self.min_backoff_ms > self.max_backoff_ms {
            return Err(Error::InvalidArgument("min_backoff_ms exceeds max_backoff_ms"));
        }
        Ok(())
    }
}

/// Doubling delay clamped to `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    min_ms: u64,
    max_ms: u64,
    current_ms: u64,
}

impl Backoff {
    pub fn new(policy: &ReconnectPolicy) -> Self {
        let min_ms = u64::from(policy.min_backoff_ms);
        Self {
            min_ms,
            max_ms: u64::from(policy.max_backoff_ms).max(min_ms),
            current_ms: min_ms,
        }
    }

    /// Delay before the next attempt; doubles the one after it.
    pub fn next_delay(&mut self) -> u64 {
        let delay = self.current_ms;
        self.current_ms = self.current_ms.saturating_mul(2).min(self.max_ms);
        delay
    }

    /// Delay the next call to [`next_delay`](Self::next_delay) will return.
    pub fn peek(&self) -> u64 {
        self.current_ms
    }

    pub fn reset(&mut self) {
        self.current_ms = self.min_ms;
    }
}
