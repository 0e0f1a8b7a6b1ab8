//! Backoff policy for merge-mutex waiters.
//!
//! Defines the delay schedule applied between stake retries while another
//! agent holds the trunk lock. Jitter decorrelates waiters so a burst of
//! agents losing the same race does not retry in lockstep.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Backoff configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffConfig {
    /// Fixed delay between retries.
    Fixed {
        /// Delay duration.
        #[serde(with = "humantime_serde")]
        delay: Duration,
    },

    /// Exponential backoff.
    Exponential {
        /// Initial delay.
        #[serde(with = "humantime_serde")]
        initial_delay: Duration,

        /// Maximum delay.
        #[serde(with = "humantime_serde")]
        max_delay: Duration,

        /// Multiplier for each retry (default: 2.0).
        #[serde(default = "default_multiplier")]
        multiplier: f64,
    },
}

const fn default_multiplier() -> f64 {
    2.0
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::Exponential {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(15),
            multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    /// Calculate the delay for a given attempt number (1-based), without
    /// jitter.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => *delay,
            Self::Exponential {
                initial_delay,
                max_delay,
                multiplier,
            } => {
                #[allow(clippy::cast_possible_wrap)] // attempt count won't exceed i32
                let delay_secs =
                    initial_delay.as_secs_f64() * multiplier.powi(attempt.saturating_sub(1) as i32);
                let delay = Duration::from_secs_f64(delay_secs);
                delay.min(*max_delay)
            },
        }
    }

    /// Calculate the delay for a given attempt with a symmetric jitter
    /// fraction applied (e.g. `0.3` for ±30%).
    #[must_use]
    pub fn jittered_delay_for_attempt(&self, attempt: u32, jitter: f64) -> Duration {
        let base = self.delay_for_attempt(attempt);
        if jitter <= 0.0 {
            return base;
        }
        let jitter = jitter.min(1.0);
        let factor = rand::thread_rng().gen_range(1.0 - jitter..=1.0 + jitter);
        Duration::from_secs_f64(base.as_secs_f64() * factor)
    }
}
