//! # Matchday Core
//!
//! External data acquisition layer for a fantasy football platform.
//!
//! ## Overview
//!
//! This crate fetches reference and live football data from two rate-limited
//! upstream providers and serves it in one provider-neutral shape:
//!
//! - **Fantasy Premier League** (`fpl`): reference data, fixtures, live player stats, clubs, players
//! - **football-data.org v4** (`football_data`): fixtures, live match scores, clubs, squads
//!
//! Every call goes through a per-source pipeline that deduplicates concurrent
//! demand, serves from a two-tier cache, fails fast on open circuits or spent
//! quota, and queues the upstream request behind a priority scheduler. A
//! coordinator routes each operation to a primary source with fallback.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Provider request builders and payload normalizers (FPL, football-data.org) |
//! | [`cache`] | Memory + warm tier cache with TTL classes, LRU bounds and revalidation |
//! | [`circuit_breaker`] | Per-source closed/open/half-open breaker |
//! | [`config`] | Feed configuration and `MATCHDAY_*` environment overrides |
//! | [`coordinator`] | Per-operation routing, fallback, overrides and feed events |
//! | [`data_source`] | Operation set and the per-source contract |
//! | [`dedup`] | Single-flight collapsing of identical in-flight fetches |
//! | [`domain`] | Domain models (Fixture, Player, Team, LiveRound, Round) |
//! | [`health`] | Per-source availability with cause-specific recovery |
//! | [`http_client`] | HTTP client abstraction |
//! | [`match_window`] | Kickoff spans per round for live TTL selection |
//! | [`monitoring`] | Snapshot types for operational surfaces |
//! | [`rate_limiter`] | Minute and day quota windows |
//! | [`scheduler`] | Priority queue and the single dispatching worker |
//! | [`service`] | `FeedService` facade |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use matchday_core::{FeedConfig, FeedService, Round};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = FeedService::builder(FeedConfig::from_env()?).build()?;
//!
//!     let round = service.get_current_round().await?.unwrap_or(Round::new(1)?);
//!     let fixtures = service.get_fixtures(Some(round)).await?;
//!     println!("{} fixtures in round {round}", fixtures.len());
//!
//!     service.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  FeedService    │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │  Coordinator    │────▶│ Health Board     │
//! └────────┬────────┘     └──────────────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ Source Adapter  │────▶│ Dedup / Cache    │
//! │ (per provider)  │     └──────────────────┘
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ Scheduler       │────▶│ Rate Limiter +   │
//! │ (one worker)    │     │ Circuit Breaker  │
//! └────────┬────────┘     └──────────────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ HTTP Client     │
//! └─────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! Per-source failures are [`SourceError`]s and stay inside the feed. Only
//! [`FeedError`] crosses into callers:
//!
//! ```rust
//! use matchday_core::FeedError;
//!
//! fn describe(error: &FeedError) -> &'static str {
//!     match error {
//!         FeedError::SourcesExhausted { .. } => "no source and no cached copy could serve the call",
//!         FeedError::SchemaMismatch { .. } => "an upstream payload changed shape",
//!         FeedError::InvalidRequest(_) => "bad input",
//!         FeedError::Shutdown => "service stopped",
//!     }
//! }
//! ```
//!
//! ## Security
//!
//! - The football-data.org token is read from the environment only and never logged
//! - All HTTP requests use TLS via reqwest

pub mod adapters;
pub mod cache;
pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod data_source;
pub mod dedup;
pub mod domain;
pub mod error;
pub mod health;
pub mod http_client;
pub mod match_window;
pub mod monitoring;
pub mod rate_limiter;
pub mod retry;
pub mod scheduler;
pub mod service;
pub mod source;
pub mod source_adapter;

// Provider APIs
pub use adapters::{FootballDataApi, FplApi, ProviderApi};

// Caching
pub use cache::{
    CacheLimits, CacheMode, CacheStats, MemoryPersistentTier, PersistentTier, ResourceClass,
    ResourceKey, TieredCache, TtlPolicy,
};

// Circuit breaker
pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitState};

pub use clock::Clock;

// Configuration
pub use config::{FeedConfig, SourcePolicy};

// Routing
pub use coordinator::{FeedEvent, RoutePolicy, RouteStats, Routed, RoutingTable, SourceCoordinator};

// Data source trait and types
pub use data_source::{
    CapabilitySet, DataSource, Operation, Resource, SourceError, SourceErrorKind,
};

pub use dedup::Deduplicator;

// Domain models
pub use domain::{
    Fixture, FixtureStatus, LiveRound, Payload, PayloadKind, Player, PlayerLiveStats, Position,
    ReferenceData, Round, RoundInfo, Team, TeamRef, UtcDateTime,
};

// Error types
pub use error::{ConfigError, FeedError, SourceAttempt, ValidationError};

pub use health::{SourceHealthBoard, SourceStatus};

// HTTP client types
pub use http_client::{
    HttpAuth, HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse, ReqwestHttpClient,
};

pub use match_window::{MatchCalendar, MatchWindowConfig};

pub use monitoring::{FeedSnapshot, SourceSnapshot};

pub use rate_limiter::{RateLimitConfig, RateLimitSnapshot, RateLimiter};

// Retry logic
pub use retry::{Backoff, RetryConfig};

pub use scheduler::{Priority, QueueDepth, Scheduler, SchedulerConfig, SourceLane};

pub use service::{FeedService, FeedServiceBuilder};

// Source identifiers
pub use source::ProviderId;

pub use source_adapter::{Document, PipelineContext, SourceAdapter};

// Warehouse (re-exported from matchday-warehouse)
pub use matchday_warehouse::{Warehouse, WarehouseConfig, WarehouseError};
