//! Emission interval for the GCRA algorithm

use std::time::Duration;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Time between two token emissions, e.g. "100 per minute" is one every 600ms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rate {
    period: Duration,
}

impl Rate {
    pub fn new(period: Duration) -> Self {
        Rate { period }
    }

    pub fn per_second(n: u32) -> Self {
        Rate {
            period: Duration::from_secs(1) / n.max(1),
        }
    }

    pub fn per_minute(n: u32) -> Self {
        Rate {
            period: Duration::from_secs(60) / n.max(1),
        }
    }

    /// `count` tokens every `period_seconds`
    ///
    /// Returns `None` unless both are positive.
    pub fn from_count_and_period(count: i64, period_seconds: i64) -> Option<Self> {
        if count <= 0 || period_seconds <= 0 {
            return None;
        }

        let interval_ns = period_seconds as u128 * NANOS_PER_SEC / count as u128;
        let interval_ns = u64::try_from(interval_ns).ok()?;
        Some(Rate {
            period: Duration::from_nanos(interval_ns),
        })
    }

    /// The emission interval
    pub fn period(&self) -> Duration {
        self.period
    }
}
