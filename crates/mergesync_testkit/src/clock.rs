//! A clock tests can drive by hand.

use mergesync_model::{Clock, Timestamp};
use std::sync::atomic::{AtomicI64, Ordering};

/// A clock that advances by one millisecond on every read, or by hand.
///
/// Every call to `now` returns a distinct, increasing timestamp, so stamps
/// written by the engine in one test never collide.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    /// Creates a clock whose first reading is `millis`.
    pub fn starting_at(millis: i64) -> Self {
        Self {
            millis: AtomicI64::new(millis),
        }
    }

    /// Returns the next timestamp without going through the `Clock` trait.
    pub fn tick(&self) -> Timestamp {
        Timestamp::from_millis(self.millis.fetch_add(1, Ordering::SeqCst))
    }

    /// Moves the clock forward.
    pub fn advance(&self, millis: i64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }

    /// Returns the next reading without consuming it.
    pub fn peek(&self) -> Timestamp {
        Timestamp::from_millis(self.millis.load(Ordering::SeqCst))
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::starting_at(1_700_000_000_000)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.tick()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readings_strictly_increase() {
        let clock = ManualClock::starting_at(10);
        let a = clock.now();
        let b = clock.now();
        assert!(b > a);
        clock.advance(100);
        assert!(clock.peek().as_millis() >= 112);
    }
}
