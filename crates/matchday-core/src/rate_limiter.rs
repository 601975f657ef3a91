//! Fixed-window quota tracking per upstream source.
//!
//! Each source has two independent windows: a per-minute burst guard and a
//! per-day hard quota. A call is admitted only when both have headroom.
//! Windows roll over lazily when touched; there is no background timer.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use crate::ProviderId;

const MINUTE: Duration = Duration::from_secs(60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Windows roll only once `now - window_start` strictly exceeds the size, so the
/// first admitting instant is one tick past the nominal reset.
const ROLLOVER_TICK: Duration = Duration::from_millis(1);

/// Quota for one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub per_minute: u32,
    pub per_day: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindow {
    count: u32,
    window_start: Instant,
    window_size: Duration,
    max_count: u32,
}

impl RateWindow {
    pub fn new(window_size: Duration, max_count: u32, now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
            window_size,
            max_count,
        }
    }

    fn roll(&mut self, now: Instant) {
        if now.saturating_duration_since(self.window_start) > self.window_size {
            self.window_start = now;
            self.count = 0;
        }
    }

    pub fn has_headroom(&mut self, now: Instant) -> bool {
        self.roll(now);
        self.count < self.max_count
    }

    pub fn record(&mut self, now: Instant) {
        self.roll(now);
        self.count = self.count.saturating_add(1);
    }

    pub fn remaining(&mut self, now: Instant) -> u32 {
        self.roll(now);
        self.max_count.saturating_sub(self.count)
    }

    pub fn resets_at(&self) -> Instant {
        self.window_start + self.window_size
    }

    /// Earliest instant this window admits a call.
    fn next_permit_at(&mut self, now: Instant) -> Instant {
        if self.has_headroom(now) {
            now
        } else {
            self.resets_at() + ROLLOVER_TICK
        }
    }
}

/// Quota state surfaced for back-pressure reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitSnapshot {
    pub minute_limit: u32,
    pub minute_remaining: u32,
    pub minute_resets_in_ms: u64,
    pub day_limit: u32,
    pub day_remaining: u32,
    pub day_resets_in_ms: u64,
    /// Remaining deferral imposed by an upstream 429.
    pub deferred_for_ms: u64,
}

#[derive(Debug)]
struct LimiterInner {
    minute: RateWindow,
    day: RateWindow,
    deferred_until: Option<Instant>,
}

impl LimiterInner {
    fn deferral(&mut self, now: Instant) -> Option<Instant> {
        match self.deferred_until {
            Some(until) if until > now => Some(until),
            Some(_) => {
                self.deferred_until = None;
                None
            }
            None => None,
        }
    }

    fn next_permit_at(&mut self, now: Instant) -> Instant {
        let windows = self
            .minute
            .next_permit_at(now)
            .max(self.day.next_permit_at(now));
        match self.deferral(now) {
            Some(until) => windows.max(until),
            None => windows,
        }
    }
}

/// Thread-safe two-window limiter for a single source.
#[derive(Debug)]
pub struct RateLimiter {
    provider: ProviderId,
    config: RateLimitConfig,
    inner: Mutex<LimiterInner>,
}

impl RateLimiter {
    pub fn new(provider: ProviderId, config: RateLimitConfig, now: Instant) -> Self {
        Self {
            provider,
            config,
            inner: Mutex::new(LimiterInner {
                minute: RateWindow::new(MINUTE, config.per_minute, now),
                day: RateWindow::new(DAY, config.per_day, now),
                deferred_until: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LimiterInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub const fn provider(&self) -> ProviderId {
        self.provider
    }

    pub const fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// True when both windows have headroom and no upstream deferral is active.
    pub fn admit(&self, now: Instant) -> bool {
        self.lock().next_permit_at(now) <= now
    }

    /// Count one outbound call against both windows.
    pub fn record(&self, now: Instant) {
        let mut inner = self.lock();
        inner.minute.record(now);
        inner.day.record(now);
    }

    /// Admit and record atomically; on refusal returns the next permitted instant.
    pub fn try_acquire(&self, now: Instant) -> Result<(), Instant> {
        let mut inner = self.lock();
        let permit_at = inner.next_permit_at(now);
        if permit_at > now {
            debug!(source = %self.provider, wait_ms = permit_at.duration_since(now).as_millis() as u64, "rate limit deferred call");
            return Err(permit_at);
        }

        inner.minute.record(now);
        inner.day.record(now);
        Ok(())
    }

    /// Earliest instant a call would be admitted; `now` when it would be admitted now.
    pub fn next_permit_at(&self, now: Instant) -> Instant {
        self.lock().next_permit_at(now)
    }

    /// Hold all calls until `until`, e.g. after an upstream 429.
    pub fn defer_until(&self, until: Instant) {
        let mut inner = self.lock();
        let current = inner.deferred_until.unwrap_or(until);
        inner.deferred_until = Some(current.max(until));
    }

    pub fn snapshot(&self, now: Instant) -> RateLimitSnapshot {
        let mut inner = self.lock();
        let deferred_for = inner
            .deferral(now)
            .map(|until| until.duration_since(now))
            .unwrap_or_default();
        let minute_remaining = inner.minute.remaining(now);
        let day_remaining = inner.day.remaining(now);

        RateLimitSnapshot {
            minute_limit: self.config.per_minute,
            minute_remaining,
            minute_resets_in_ms: millis(inner.minute.resets_at().saturating_duration_since(now)),
            day_limit: self.config.per_day,
            day_remaining,
            day_resets_in_ms: millis(inner.day.resets_at().saturating_duration_since(now)),
            deferred_for_ms: millis(deferred_for),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(per_minute: u32, per_day: u32) -> RateLimiter {
        RateLimiter::new(
            ProviderId::Fpl,
            RateLimitConfig {
                per_minute,
                per_day,
            },
            Instant::now(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn minute_window_caps_burst_and_rolls_lazily() {
        let limiter = limiter(5, 1_000);
        let start = Instant::now();

        for _ in 0..5 {
            assert!(limiter.try_acquire(start).is_ok());
        }
        let permit_at = limiter
            .try_acquire(start + Duration::from_millis(900))
            .expect_err("sixth call in the same minute");
        assert!(permit_at > start + MINUTE);

        tokio::time::advance(MINUTE + Duration::from_secs(1)).await;
        assert!(limiter.admit(Instant::now()));
        assert_eq!(limiter.snapshot(Instant::now()).minute_remaining, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn both_windows_must_have_headroom() {
        let limiter = limiter(10, 3);
        let now = Instant::now();

        for _ in 0..3 {
            limiter.record(now);
        }

        assert!(!limiter.admit(now));
        let snapshot = limiter.snapshot(now);
        assert_eq!(snapshot.minute_remaining, 7);
        assert_eq!(snapshot.day_remaining, 0);

        let later = now + MINUTE + Duration::from_secs(5);
        assert!(!limiter.admit(later), "day quota still exhausted");
        assert!(limiter.next_permit_at(later) > now + DAY);
    }

    #[tokio::test(start_paused = true)]
    async fn upstream_deferral_blocks_until_elapsed() {
        let limiter = limiter(10, 100);
        let now = Instant::now();

        limiter.defer_until(now + Duration::from_secs(30));
        assert!(!limiter.admit(now + Duration::from_secs(29)));
        assert_eq!(
            limiter.next_permit_at(now),
            now + Duration::from_secs(30)
        );
        assert!(limiter.admit(now + Duration::from_secs(30)));
        assert_eq!(limiter.snapshot(now + Duration::from_secs(31)).deferred_for_ms, 0);
    }

    #[test]
    fn window_boundary_is_exclusive() {
        let start = Instant::now();
        let mut window = RateWindow::new(MINUTE, 1, start);
        window.record(start);

        assert!(!window.has_headroom(start + MINUTE));
        assert!(window.has_headroom(start + MINUTE + ROLLOVER_TICK));
    }
}
