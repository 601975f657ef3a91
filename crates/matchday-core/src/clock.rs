//! Wall-clock view anchored to the tokio clock.
//!
//! Every component measures time with [`tokio::time::Instant`]. Persisted values
//! and reported timestamps need epoch milliseconds, so the clock captures one
//! `(wall, instant)` pair at construction and derives wall time from tokio's
//! elapsed time. Both views therefore move together, including under paused time.

use time::OffsetDateTime;
use tokio::time::Instant;

use crate::UtcDateTime;

#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin_ms: i64,
    origin: Instant,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    pub fn new() -> Self {
        Self::anchored_at(
            (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64,
        )
    }

    /// Clock whose current instant maps to `origin_ms`.
    pub fn anchored_at(origin_ms: i64) -> Self {
        Self {
            origin_ms,
            origin: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> i64 {
        self.ms_at(Instant::now())
    }

    pub fn ms_at(&self, instant: Instant) -> i64 {
        if instant >= self.origin {
            let elapsed = instant.duration_since(self.origin).as_millis();
            self.origin_ms
                .saturating_add(i64::try_from(elapsed).unwrap_or(i64::MAX))
        } else {
            let before = self.origin.duration_since(instant).as_millis();
            self.origin_ms
                .saturating_sub(i64::try_from(before).unwrap_or(i64::MAX))
        }
    }

    pub fn now_utc(&self) -> UtcDateTime {
        self.utc_at(Instant::now())
    }

    pub fn utc_at(&self, instant: Instant) -> UtcDateTime {
        UtcDateTime::from_unix_ms(self.ms_at(instant)).unwrap_or_else(|_| UtcDateTime::now())
    }
}
