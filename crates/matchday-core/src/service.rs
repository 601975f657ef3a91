//! The feed facade: one explicit instance per process, injected into callers.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::adapters::{FootballDataApi, FplApi, ProviderApi};
use crate::cache::{CacheMode, PersistentTier, TieredCache};
use crate::circuit_breaker::CircuitBreaker;
use crate::clock::Clock;
use crate::config::{FeedConfig, SourcePolicy};
use crate::coordinator::{FeedEvent, Routed, SourceCoordinator};
use crate::data_source::{DataSource, Operation, Resource};
use crate::dedup::Deduplicator;
use crate::error::{ConfigError, FeedError};
use crate::health::SourceHealthBoard;
use crate::http_client::{HttpClient, ReqwestHttpClient};
use crate::match_window::MatchCalendar;
use crate::monitoring::{FeedSnapshot, SourceSnapshot};
use crate::rate_limiter::RateLimiter;
use crate::scheduler::{Scheduler, SourceLane};
use crate::source_adapter::{PipelineContext, SourceAdapter};
use crate::{Fixture, LiveRound, Payload, Player, ProviderId, ReferenceData, Round, Team};

pub struct FeedServiceBuilder {
    config: FeedConfig,
    default_client: Option<Arc<dyn HttpClient>>,
    clients: BTreeMap<ProviderId, Arc<dyn HttpClient>>,
    persistent: Option<Arc<dyn PersistentTier>>,
    clock: Option<Clock>,
}

impl FeedServiceBuilder {
    pub fn new(config: FeedConfig) -> Self {
        Self {
            config,
            default_client: None,
            clients: BTreeMap::new(),
            persistent: None,
            clock: None,
        }
    }

    /// HTTP client for every source without a dedicated one.
    pub fn with_http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.default_client = Some(client);
        self
    }

    pub fn with_source_client(mut self, provider: ProviderId, client: Arc<dyn HttpClient>) -> Self {
        self.clients.insert(provider, client);
        self
    }

    /// Enable the warm tier.
    pub fn with_persistent_tier(mut self, tier: Arc<dyn PersistentTier>) -> Self {
        self.persistent = Some(tier);
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate the configuration, wire every component and start the
    /// background tasks. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for invalid settings or routes.
    pub fn build(self) -> Result<FeedService, ConfigError> {
        let config = self.config;
        config.validate()?;

        let clock = self.clock.unwrap_or_default();
        let warm_tier = self.persistent.is_some();
        let mut cache = TieredCache::new(config.ttl, config.cache_limits, clock);
        if let Some(tier) = self.persistent {
            cache = cache.with_persistent_tier(tier);
        }
        let context = PipelineContext {
            cache: Arc::new(cache),
            scheduler: Scheduler::new(config.scheduler.clone()),
            dedup: Deduplicator::new(),
            calendar: Arc::new(MatchCalendar::new(config.match_window)),
            clock,
        };

        let default_client = self
            .default_client
            .unwrap_or_else(|| Arc::new(ReqwestHttpClient::new()) as Arc<dyn HttpClient>);
        let now = Instant::now();
        let mut adapters = BTreeMap::new();
        for provider in ProviderId::ALL {
            let policy = config.source(provider)?;
            let client = self
                .clients
                .get(&provider)
                .cloned()
                .unwrap_or_else(|| Arc::clone(&default_client));
            let lane = Arc::new(SourceLane {
                provider,
                limiter: Arc::new(RateLimiter::new(provider, policy.rate_limit, now)),
                breaker: Arc::new(CircuitBreaker::new(provider, policy.breaker)),
                client,
            });
            adapters.insert(
                provider,
                SourceAdapter::new(provider_api(policy), lane, context.clone()),
            );
        }

        let health = Arc::new(SourceHealthBoard::new(
            clock,
            config.error_cooldown,
            &ProviderId::ALL,
        ));
        let sources = adapters
            .values()
            .map(|adapter| Arc::new(adapter.clone()) as Arc<dyn DataSource>)
            .collect();
        let coordinator = Arc::new(SourceCoordinator::new(
            sources,
            config.routing.clone(),
            health,
        )?);

        let tasks = vec![
            context.scheduler.spawn_worker(),
            spawn_sweep(Arc::clone(&context.cache), config.sweep_interval),
            spawn_health_check(Arc::clone(&coordinator), config.health_check_interval),
        ];
        info!(
            sources = adapters.len(),
            warm_tier,
            "feed service started"
        );

        Ok(FeedService {
            config,
            context,
            adapters,
            coordinator,
            tasks: Mutex::new(tasks),
            shut_down: AtomicBool::new(false),
        })
    }
}

fn provider_api(policy: &SourcePolicy) -> Arc<dyn ProviderApi> {
    match policy.provider {
        ProviderId::Fpl => {
            Arc::new(FplApi::new(policy.base_url.as_str()).with_timeout(policy.request_timeout))
        }
        ProviderId::FootballData => {
            let api = FootballDataApi::new(policy.base_url.as_str(), policy.auth_token.clone())
                .with_timeout(policy.request_timeout);
            if !api.has_token() {
                warn!("no football-data.org token configured; its requests will be refused upstream");
            }
            Arc::new(api)
        }
    }
}

fn spawn_sweep(cache: Arc<TieredCache>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let report = cache.sweep().await;
            debug!(
                memory_expired = report.memory_expired,
                warm_expired = report.warm_expired,
                warm_evicted = report.warm_evicted,
                "cache sweep finished"
            );
        }
    })
}

fn spawn_health_check(coordinator: Arc<SourceCoordinator>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            coordinator.probe_sources().await;
        }
    })
}

/// Rate-limited, cached, dual-source football data feed.
///
/// Dropping the service stops its background tasks.
pub struct FeedService {
    config: FeedConfig,
    context: PipelineContext,
    adapters: BTreeMap<ProviderId, SourceAdapter>,
    coordinator: Arc<SourceCoordinator>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl FeedService {
    pub fn builder(config: FeedConfig) -> FeedServiceBuilder {
        FeedServiceBuilder::new(config)
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    /// Route one resource and return the payload with where it came from.
    pub async fn fetch(&self, resource: Resource, mode: CacheMode) -> Result<Routed, FeedError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(FeedError::Shutdown);
        }
        self.coordinator.route(resource, mode).await
    }

    pub async fn get_reference_data(&self) -> Result<ReferenceData, FeedError> {
        self.get_reference_data_with(CacheMode::Use).await
    }

    pub async fn get_reference_data_with(&self, mode: CacheMode) -> Result<ReferenceData, FeedError> {
        let routed = self.fetch(Resource::ReferenceData, mode).await?;
        match routed.payload {
            Payload::ReferenceData(reference) => Ok(reference),
            other => Err(unexpected(routed.served_by, Operation::ReferenceData, &other)),
        }
    }

    /// The round flagged current by reference data, else the next one.
    /// `None` before the season's rounds are published.
    pub async fn get_current_round(&self) -> Result<Option<Round>, FeedError> {
        self.get_current_round_with(CacheMode::Use).await
    }

    pub async fn get_current_round_with(&self, mode: CacheMode) -> Result<Option<Round>, FeedError> {
        Ok(self.get_reference_data_with(mode).await?.current_round())
    }

    pub async fn get_fixtures(&self, round: Option<Round>) -> Result<Vec<Fixture>, FeedError> {
        self.get_fixtures_with(round, CacheMode::Use).await
    }

    pub async fn get_fixtures_with(
        &self,
        round: Option<Round>,
        mode: CacheMode,
    ) -> Result<Vec<Fixture>, FeedError> {
        let routed = self.fetch(Resource::Fixtures { round }, mode).await?;
        match routed.payload {
            Payload::Fixtures(fixtures) => Ok(fixtures),
            other => Err(unexpected(routed.served_by, Operation::Fixtures, &other)),
        }
    }

    pub async fn get_live_scores(&self, round: Round) -> Result<LiveRound, FeedError> {
        self.get_live_scores_with(round, CacheMode::Use).await
    }

    pub async fn get_live_scores_with(
        &self,
        round: Round,
        mode: CacheMode,
    ) -> Result<LiveRound, FeedError> {
        let routed = self.fetch(Resource::LiveScores { round }, mode).await?;
        match routed.payload {
            Payload::LiveScores(live) => Ok(live),
            other => Err(unexpected(routed.served_by, Operation::LiveScores, &other)),
        }
    }

    pub async fn get_teams(&self) -> Result<Vec<Team>, FeedError> {
        self.get_teams_with(CacheMode::Use).await
    }

    pub async fn get_teams_with(&self, mode: CacheMode) -> Result<Vec<Team>, FeedError> {
        let routed = self.fetch(Resource::Teams, mode).await?;
        match routed.payload {
            Payload::Teams(teams) => Ok(teams),
            other => Err(unexpected(routed.served_by, Operation::Teams, &other)),
        }
    }

    pub async fn get_players(&self) -> Result<Vec<Player>, FeedError> {
        self.get_players_with(CacheMode::Use).await
    }

    pub async fn get_players_with(&self, mode: CacheMode) -> Result<Vec<Player>, FeedError> {
        let routed = self.fetch(Resource::Players, mode).await?;
        match routed.payload {
            Payload::Players(players) => Ok(players),
            other => Err(unexpected(routed.served_by, Operation::Players, &other)),
        }
    }

    pub async fn snapshot(&self) -> FeedSnapshot {
        let cache = self.context.cache.stats().await;
        let now = Instant::now();
        let health = self.coordinator.health();
        let sources = self
            .adapters
            .iter()
            .map(|(provider, adapter)| SourceSnapshot {
                provider: *provider,
                status: health.status(*provider, now),
                rate_limit: adapter.limiter().snapshot(now),
                breaker: adapter.breaker().snapshot(now),
            })
            .collect();

        FeedSnapshot {
            generated_at: self.context.clock.utc_at(now),
            cache,
            sources,
            queue: self.context.scheduler.depth(),
            in_flight: self.context.dedup.in_flight(),
            routes: self.coordinator.route_stats(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.coordinator.subscribe()
    }

    /// Pin `operation` to `provider`, bypassing the routing table until cleared.
    pub fn set_override(&self, operation: Operation, provider: ProviderId) -> Result<(), FeedError> {
        self.coordinator.set_override(operation, provider)
    }

    pub fn clear_override(&self, operation: Operation) {
        self.coordinator.clear_override(operation);
    }

    /// Run one health check against every source now.
    pub async fn check_sources(&self) {
        self.coordinator.probe_sources().await;
    }

    /// Purge expired cache entries now.
    pub async fn sweep_cache(&self) {
        self.context.cache.sweep().await;
    }

    /// Stop background tasks and fail queued requests. Later calls return
    /// [`FeedError::Shutdown`].
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.context.scheduler.close();
        let tasks = std::mem::take(
            &mut *self
                .tasks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for task in tasks {
            task.abort();
        }
        info!("feed service shut down");
    }
}

impl Drop for FeedService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn unexpected(provider: ProviderId, operation: Operation, payload: &Payload) -> FeedError {
    FeedError::SchemaMismatch {
        provider,
        operation,
        detail: format!(
            "expected '{}' payload, found '{}'",
            operation.payload_kind(),
            payload.kind()
        ),
    }
}
