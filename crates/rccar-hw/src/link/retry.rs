//! Reconnect timing.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the delay between connection attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// Same delay before every attempt.
    #[default]
    Fixed,
    /// Delay doubles after each failure, up to `max_delay`.
    Exponential,
}

/// Retry policy for opening the serial port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt.
    pub delay: Duration,
    /// Growth of the delay between attempts.
    pub backoff: Backoff,
    /// Upper bound for exponential growth.
    pub max_delay: Duration,
    /// Attempts before giving up; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(3000),
            backoff: Backoff::Fixed,
            max_delay: Duration::from_millis(30000),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// Fixed delay, unlimited attempts.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential => {
                let shift = attempt.saturating_sub(1).min(30);
                self.delay
                    .checked_mul(1u32 << shift)
                    .unwrap_or(self.max_delay)
                    .min(self.max_delay)
            }
        }
    }

    /// Whether another attempt is allowed after `attempts` failures.
    pub fn allows(&self, attempts: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempts < max)
    }
}
