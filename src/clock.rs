use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// Wall-clock source for session and cache expiry.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// True once `deadline` has been reached.
    fn has_passed(&self, deadline: DateTime<Utc>) -> bool {
        self.now() >= deadline
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn at_timestamp(secs: i64) -> Self {
        Self::new(DateTime::from_timestamp(secs, 0).unwrap_or_default())
    }

    pub fn advance(&self, by: std::time::Duration) {
        let by = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
        let mut now = self.now.lock().expect("clock lock poisoned");
        *now = now.checked_add_signed(by).unwrap_or(DateTime::<Utc>::MAX_UTC);
    }
}

impl Clone for FixedClock {
    fn clone(&self) -> Self {
        Self::new(self.now())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn fixed_clock_moves_only_when_advanced() {
        let clock = FixedClock::at_timestamp(1_700_000_000);
        let start = clock.now();
        assert_eq!(clock.now(), start);

        clock.advance(Duration::from_secs(90));
        assert_eq!((clock.now() - start).num_seconds(), 90);
        assert!(clock.has_passed(start));
        assert!(!clock.has_passed(clock.now() + chrono::Duration::seconds(1)));
    }
}
