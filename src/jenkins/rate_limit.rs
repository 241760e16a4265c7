use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Spaces outbound script submissions at least `1 / requests_per_second`
/// apart.
///
/// Each caller reserves the next free slot under a short lock and sleeps
/// after releasing it, so concurrent callers queue up without holding the
/// lock across the wait.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(requests_per_second: f64) -> Self {
        let interval = if requests_per_second.is_finite() && requests_per_second > 0.0 {
            Duration::from_secs_f64(1.0 / requests_per_second)
        } else {
            Duration::ZERO
        };
        Self::with_interval(interval)
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until this caller's slot comes up.
    pub async fn wait(&self) {
        let slot = {
            let mut next = self.next_slot.lock().expect("rate limiter lock poisoned");
            let now = Instant::now();
            let slot = match *next {
                Some(at) if at > now => at,
                _ => now,
            };
            *next = Some(slot + self.interval);
            slot
        };
        tokio::time::sleep_until(slot).await;
    }
}
