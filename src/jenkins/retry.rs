//! Exponential backoff for script console round trips.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::duration::{deserialize_duration, serialize_duration};

/// Fraction of the computed delay used as the jitter range (±10%).
const JITTER_RATIO: f64 = 0.1;

fn default_base_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

/// Retry settings for a single logical operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryBudget {
    /// Retries after the first attempt.
    pub max_retries: u32,

    #[serde(
        default = "default_base_delay",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub base_delay: Duration,

    #[serde(
        default = "default_max_delay",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub max_delay: Duration,

    pub exponential_base: f64,

    /// Multiplier applied after capping at `max_delay`.
    pub backoff_factor: f64,

    pub jitter: bool,
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            exponential_base: 2.0,
            backoff_factor: 1.0,
            jitter: true,
        }
    }
}

impl RetryBudget {
    /// Budget that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Total attempts including the first one.
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Delay to wait before retry number `attempt` (0-based).
///
/// `min(max_delay, base_delay * exponential_base^attempt) * backoff_factor`,
/// then ±10% uniform jitter when enabled, never negative.
pub fn calculate_delay(attempt: u32, budget: &RetryBudget) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let raw = budget.base_delay.as_secs_f64() * budget.exponential_base.powi(exponent);
    let capped = if raw.is_finite() {
        raw.min(budget.max_delay.as_secs_f64())
    } else {
        budget.max_delay.as_secs_f64()
    };
    let mut delay = capped * budget.backoff_factor;

    if budget.jitter && delay > 0.0 {
        let range = delay * JITTER_RATIO;
        delay += rand::thread_rng().gen_range(-range..=range);
    }

    if delay.is_nan() || delay <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(delay).unwrap_or(budget.max_delay)
}
