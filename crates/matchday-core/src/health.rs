//! Per-source availability derived from call outcomes.
//!
//! Recovery timers depend on the cause: a rate-limited source becomes available
//! again when its quota resets, an open circuit when its cooldown ends, and any
//! other failure after a short fixed cooldown. Availability is re-evaluated
//! lazily against the current time.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::data_source::{SourceError, SourceErrorKind};
use crate::{ProviderId, UtcDateTime};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceStatus {
    pub provider: ProviderId,
    pub available: bool,
    pub last_success_at: Option<UtcDateTime>,
    pub last_error_at: Option<UtcDateTime>,
    pub last_error_code: Option<&'static str>,
    pub error_count: u32,
    pub rate_limited: bool,
    pub next_available_at: Option<UtcDateTime>,
}

/// Availability change caused by recording an outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthTransition {
    Unchanged,
    BecameUnavailable { reason: String },
    Recovered,
}

#[derive(Debug, Clone)]
struct HealthEntry {
    available: bool,
    last_success_at: Option<Instant>,
    last_error_at: Option<Instant>,
    last_error_code: Option<&'static str>,
    error_count: u32,
    rate_limited: bool,
    next_available_at: Option<Instant>,
}

impl Default for HealthEntry {
    fn default() -> Self {
        Self {
            available: true,
            last_success_at: None,
            last_error_at: None,
            last_error_code: None,
            error_count: 0,
            rate_limited: false,
            next_available_at: None,
        }
    }
}

impl HealthEntry {
    fn is_available(&self, now: Instant) -> bool {
        self.available || self.next_available_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug)]
pub struct SourceHealthBoard {
    clock: Clock,
    error_cooldown: Duration,
    entries: Mutex<BTreeMap<ProviderId, HealthEntry>>,
}

impl SourceHealthBoard {
    pub fn new(clock: Clock, error_cooldown: Duration, providers: &[ProviderId]) -> Self {
        Self {
            clock,
            error_cooldown,
            entries: Mutex::new(
                providers
                    .iter()
                    .map(|provider| (*provider, HealthEntry::default()))
                    .collect(),
            ),
        }
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<ProviderId, HealthEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record_success(&self, provider: ProviderId, now: Instant) -> HealthTransition {
        let mut entries = self.entries();
        let entry = entries.entry(provider).or_default();
        let was_available = entry.available;

        entry.available = true;
        entry.last_success_at = Some(now);
        entry.error_count = 0;
        entry.rate_limited = false;
        entry.next_available_at = None;

        if was_available {
            HealthTransition::Unchanged
        } else {
            info!(source = %provider, "source recovered");
            HealthTransition::Recovered
        }
    }

    pub fn record_error(
        &self,
        provider: ProviderId,
        error: &SourceError,
        now: Instant,
    ) -> HealthTransition {
        let mut entries = self.entries();
        let entry = entries.entry(provider).or_default();
        entry.last_error_at = Some(now);
        entry.last_error_code = Some(error.code());

        let recover_in = match error.kind() {
            // Not a health signal: the operation or request was wrong, not the source.
            SourceErrorKind::UnsupportedOperation | SourceErrorKind::InvalidRequest => {
                return HealthTransition::Unchanged;
            }
            SourceErrorKind::RateLimited => {
                entry.rate_limited = true;
                error.retry_after().unwrap_or(self.error_cooldown)
            }
            SourceErrorKind::CircuitOpen => error.retry_after().unwrap_or(self.error_cooldown),
            SourceErrorKind::Transient
            | SourceErrorKind::UpstreamServer
            | SourceErrorKind::SchemaMismatch => {
                entry.rate_limited = false;
                self.error_cooldown
            }
        };

        let was_available = entry.is_available(now);
        entry.available = false;
        entry.error_count = entry.error_count.saturating_add(1);
        let next = now + recover_in;
        entry.next_available_at = Some(entry.next_available_at.map_or(next, |at| at.max(next)));

        if was_available {
            warn!(
                source = %provider,
                code = error.code(),
                recover_in_ms = recover_in.as_millis() as u64,
                "source marked unavailable"
            );
            HealthTransition::BecameUnavailable {
                reason: error.to_string(),
            }
        } else {
            HealthTransition::Unchanged
        }
    }

    pub fn is_available(&self, provider: ProviderId, now: Instant) -> bool {
        self.entries()
            .get(&provider)
            .map_or(true, |entry| entry.is_available(now))
    }

    pub fn status(&self, provider: ProviderId, now: Instant) -> SourceStatus {
        let entry = self.entries().get(&provider).cloned().unwrap_or_default();
        let available = entry.is_available(now);
        SourceStatus {
            provider,
            available,
            last_success_at: entry.last_success_at.map(|at| self.clock.utc_at(at)),
            last_error_at: entry.last_error_at.map(|at| self.clock.utc_at(at)),
            last_error_code: entry.last_error_code,
            error_count: entry.error_count,
            rate_limited: entry.rate_limited && !available,
            next_available_at: entry
                .next_available_at
                .filter(|_| !available)
                .map(|at| self.clock.utc_at(at)),
        }
    }

    pub fn statuses(&self, now: Instant) -> Vec<SourceStatus> {
        let providers = self.entries().keys().copied().collect::<Vec<_>>();
        providers
            .into_iter()
            .map(|provider| self.status(provider, now))
            .collect()
    }
}
