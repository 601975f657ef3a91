//! Point-in-time view of the feed for operational surfaces.
//!
//! Computed on demand by [`crate::FeedService::snapshot`]; nothing here is
//! persisted or rendered.

use serde::Serialize;

use crate::cache::CacheStats;
use crate::circuit_breaker::{BreakerSnapshot, CircuitState};
use crate::coordinator::RouteStats;
use crate::data_source::Operation;
use crate::health::SourceStatus;
use crate::rate_limiter::RateLimitSnapshot;
use crate::scheduler::QueueDepth;
use crate::{ProviderId, UtcDateTime};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceSnapshot {
    pub provider: ProviderId,
    pub status: SourceStatus,
    pub rate_limit: RateLimitSnapshot,
    pub breaker: BreakerSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedSnapshot {
    pub generated_at: UtcDateTime,
    pub cache: CacheStats,
    pub sources: Vec<SourceSnapshot>,
    pub queue: QueueDepth,
    /// Distinct resources with an upstream call in flight.
    pub in_flight: usize,
    pub routes: Vec<RouteStats>,
}

impl FeedSnapshot {
    pub fn source(&self, provider: ProviderId) -> Option<&SourceSnapshot> {
        self.sources.iter().find(|source| source.provider == provider)
    }

    pub fn route(&self, operation: Operation) -> Option<&RouteStats> {
        self.routes.iter().find(|route| route.operation == operation)
    }

    /// Sources whose breaker is not closed.
    pub fn tripped_sources(&self) -> Vec<ProviderId> {
        self.sources
            .iter()
            .filter(|source| source.breaker.state != CircuitState::Closed)
            .map(|source| source.provider)
            .collect()
    }

    /// Fallback serves across all operations.
    pub fn total_fallbacks(&self) -> u64 {
        self.routes.iter().map(|route| route.fallbacks).sum()
    }
}
