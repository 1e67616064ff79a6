// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Monotonic timestamps with microsecond resolution.
//!
//! All liveness tracking, timers, and latency measurements use this clock so
//! that wall-clock adjustments cannot move a deadline. Wall-clock time is only
//! used for log formatting.

use std::fmt;
use std::ops::Add;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

static CLOCK_EPOCH: OnceLock<Instant> = OnceLock::new();

fn clock_epoch() -> Instant {
    *CLOCK_EPOCH.get_or_init(Instant::now)
}

/// An instant on the process-local monotonic clock, stored as microseconds
/// since an unspecified epoch. Zero is reserved as the invalid sentinel.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    micros: u64,
}

impl Timestamp {
    /// The invalid sentinel. Compares less than every valid timestamp.
    pub const INVALID: Timestamp = Timestamp { micros: 0 };

    /// The current reading of the monotonic clock.
    pub fn now() -> Self {
        // offset by one so the very first reading is distinct from the
        // invalid sentinel
        Self {
            micros: clock_epoch().elapsed().as_micros() as u64 + 1,
        }
    }

    pub fn from_micros(micros: u64) -> Self {
        Self { micros }
    }

    pub fn as_micros(&self) -> u64 {
        self.micros
    }

    pub fn is_valid(&self) -> bool {
        self.micros > 0
    }

    /// Time elapsed between `earlier` and `self`, saturating to zero if
    /// `earlier` is the later of the two.
    pub fn duration_since(&self, earlier: Timestamp) -> Duration {
        Duration::from_micros(self.micros.saturating_sub(earlier.micros))
    }

    /// Time elapsed since this timestamp was taken.
    pub fn elapsed(&self) -> Duration {
        Timestamp::now().duration_since(*self)
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        Timestamp {
            micros: self.micros.saturating_add(rhs.as_micros() as u64),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.micros / 1_000_000, self.micros % 1_000_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_and_validity() {
        assert!(!Timestamp::INVALID.is_valid());

        let a = Timestamp::now();
        assert!(a.is_valid());
        std::thread::sleep(Duration::from_millis(1));
        let b = Timestamp::now();
        assert!(b > a);
        assert!(b.duration_since(a) >= Duration::from_millis(1));

        // saturating: earlier.duration_since(later) is zero, not underflow
        assert_eq!(a.duration_since(b), Duration::from_micros(0));
    }

    #[test]
    fn add_interval() {
        let t = Timestamp::from_micros(1_500_000);
        let u = t + Duration::from_millis(250);
        assert_eq!(u.as_micros(), 1_750_000);
        assert!(u > t);
    }

    #[test]
    fn display_format() {
        let t = Timestamp::from_micros(12_000_034);
        assert_eq!(t.to_string(), "12.000034");
    }
}
