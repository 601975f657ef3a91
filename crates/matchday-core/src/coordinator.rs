//! Static per-operation routing with fallback, overrides and stale serving.
//!
//! Every operation has a [`RoutePolicy`]: pinned to one source for consistency,
//! or a preferred source with a fallback. Sources currently marked unavailable
//! are tried after available ones. When every routed source fails, the last
//! cached value from any of them is served before giving up.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::CacheMode;
use crate::data_source::{
    CapabilitySet, DataSource, Operation, Resource, SourceError, SourceErrorKind,
};
use crate::error::{ConfigError, FeedError, SourceAttempt};
use crate::health::{HealthTransition, SourceHealthBoard};
use crate::{Payload, ProviderId};

/// Source selection for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum RoutePolicy {
    /// Always this source; no fallback.
    Pinned { source: ProviderId },
    Prefer {
        primary: ProviderId,
        fallback: ProviderId,
    },
}

impl RoutePolicy {
    pub const fn pinned(source: ProviderId) -> Self {
        Self::Pinned { source }
    }

    pub const fn prefer(primary: ProviderId, fallback: ProviderId) -> Self {
        Self::Prefer { primary, fallback }
    }

    pub const fn primary(self) -> ProviderId {
        match self {
            Self::Pinned { source } => source,
            Self::Prefer { primary, .. } => primary,
        }
    }

    pub fn chain(self) -> Vec<ProviderId> {
        match self {
            Self::Pinned { source } => vec![source],
            Self::Prefer { primary, fallback } => vec![primary, fallback],
        }
    }
}

/// Policy per operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingTable {
    routes: BTreeMap<Operation, RoutePolicy>,
}

impl Default for RoutingTable {
    /// Scoring-critical data (reference, players, live) is pinned to FPL so
    /// points and prices always come from one source. Fixtures prefer
    /// football-data.org; clubs prefer FPL.
    fn default() -> Self {
        let mut routes = BTreeMap::new();
        routes.insert(Operation::ReferenceData, RoutePolicy::pinned(ProviderId::Fpl));
        routes.insert(Operation::Players, RoutePolicy::pinned(ProviderId::Fpl));
        routes.insert(Operation::LiveScores, RoutePolicy::pinned(ProviderId::Fpl));
        routes.insert(
            Operation::Fixtures,
            RoutePolicy::prefer(ProviderId::FootballData, ProviderId::Fpl),
        );
        routes.insert(
            Operation::Teams,
            RoutePolicy::prefer(ProviderId::Fpl, ProviderId::FootballData),
        );
        Self { routes }
    }
}

impl RoutingTable {
    pub fn policy(&self, operation: Operation) -> Option<RoutePolicy> {
        self.routes.get(&operation).copied()
    }

    pub fn set(&mut self, operation: Operation, policy: RoutePolicy) {
        self.routes.insert(operation, policy);
    }

    pub fn with_route(mut self, operation: Operation, policy: RoutePolicy) -> Self {
        self.set(operation, policy);
        self
    }

    pub fn routes(&self) -> impl Iterator<Item = (Operation, RoutePolicy)> + '_ {
        self.routes.iter().map(|(operation, policy)| (*operation, *policy))
    }

    /// Every operation must be routed to registered sources that support it.
    pub fn validate(
        &self,
        capabilities: &BTreeMap<ProviderId, CapabilitySet>,
    ) -> Result<(), ConfigError> {
        for operation in Operation::ALL {
            let policy = self.policy(operation).ok_or_else(|| ConfigError::InvalidRoute {
                operation,
                reason: String::from("no route configured"),
            })?;

            if let RoutePolicy::Prefer { primary, fallback } = policy {
                if primary == fallback {
                    return Err(ConfigError::InvalidRoute {
                        operation,
                        reason: format!("fallback '{fallback}' is the same as the primary"),
                    });
                }
            }

            for provider in policy.chain() {
                match capabilities.get(&provider) {
                    None => return Err(ConfigError::MissingSource { provider }),
                    Some(capabilities) if !capabilities.supports(operation) => {
                        return Err(ConfigError::InvalidRoute {
                            operation,
                            reason: format!("'{provider}' does not support this operation"),
                        });
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }
}

/// Observable feed events, broadcast to every subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FeedEvent {
    SourceSwitched {
        operation: Operation,
        from: ProviderId,
        to: ProviderId,
    },
    SourceUnavailable {
        provider: ProviderId,
        reason: String,
    },
    SourceRecovered {
        provider: ProviderId,
    },
    SchemaMismatch {
        provider: ProviderId,
        operation: Operation,
        detail: String,
    },
    StaleServed {
        operation: Operation,
        provider: ProviderId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteStats {
    pub operation: Operation,
    pub policy: RoutePolicy,
    pub last_served_by: Option<ProviderId>,
    pub served: u64,
    /// Calls served by a source other than the configured primary.
    pub fallbacks: u64,
    pub stale_serves: u64,
    pub override_source: Option<ProviderId>,
}

#[derive(Debug, Clone, Copy, Default)]
struct RouteCounters {
    last_served_by: Option<ProviderId>,
    served: u64,
    fallbacks: u64,
    stale_serves: u64,
}

/// Result of a routed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routed {
    pub payload: Payload,
    pub served_by: ProviderId,
    /// Served from an expired cache entry after every source failed.
    pub stale: bool,
    /// Failed attempts before the serving source.
    pub attempts: Vec<SourceAttempt>,
}

const EVENT_CAPACITY: usize = 256;

pub struct SourceCoordinator {
    sources: BTreeMap<ProviderId, Arc<dyn DataSource>>,
    routes: RoutingTable,
    overrides: Mutex<BTreeMap<Operation, ProviderId>>,
    counters: Mutex<BTreeMap<Operation, RouteCounters>>,
    health: Arc<SourceHealthBoard>,
    events: broadcast::Sender<FeedEvent>,
}

impl SourceCoordinator {
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the routing table references a source that is
    /// not registered or cannot serve the routed operation.
    pub fn new(
        sources: Vec<Arc<dyn DataSource>>,
        routes: RoutingTable,
        health: Arc<SourceHealthBoard>,
    ) -> Result<Self, ConfigError> {
        let sources = sources
            .into_iter()
            .map(|source| (source.id(), source))
            .collect::<BTreeMap<_, _>>();
        let capabilities = sources
            .iter()
            .map(|(provider, source)| (*provider, source.capabilities()))
            .collect::<BTreeMap<_, _>>();
        routes.validate(&capabilities)?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            sources,
            routes,
            overrides: Mutex::new(BTreeMap::new()),
            counters: Mutex::new(BTreeMap::new()),
            health,
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.events.subscribe()
    }

    pub fn health(&self) -> &SourceHealthBoard {
        &self.health
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.routes
    }

    pub fn source(&self, provider: ProviderId) -> Option<&Arc<dyn DataSource>> {
        self.sources.get(&provider)
    }

    pub fn providers(&self) -> impl Iterator<Item = ProviderId> + '_ {
        self.sources.keys().copied()
    }

    /// Route `operation` to exactly `provider` until cleared. No fallback applies
    /// while an override is set.
    pub fn set_override(&self, operation: Operation, provider: ProviderId) -> Result<(), FeedError> {
        let Some(source) = self.sources.get(&provider) else {
            return Err(FeedError::InvalidRequest(format!(
                "source '{provider}' is not registered"
            )));
        };
        if !source.capabilities().supports(operation) {
            return Err(FeedError::InvalidRequest(format!(
                "source '{provider}' does not support '{operation}'"
            )));
        }

        lock(&self.overrides).insert(operation, provider);
        info!(%operation, source = %provider, "routing override set");
        Ok(())
    }

    pub fn clear_override(&self, operation: Operation) {
        if lock(&self.overrides).remove(&operation).is_some() {
            info!(%operation, "routing override cleared");
        }
    }

    pub fn override_for(&self, operation: Operation) -> Option<ProviderId> {
        lock(&self.overrides).get(&operation).copied()
    }

    /// Configured primary for the call: the override if set, else the policy primary.
    fn primary_for(&self, operation: Operation) -> Option<ProviderId> {
        self.override_for(operation)
            .or_else(|| self.routes.policy(operation).map(RoutePolicy::primary))
    }

    /// Sources to try, in order. Available sources keep their configured order
    /// and go before unavailable ones.
    pub fn chain_for(&self, operation: Operation) -> Vec<ProviderId> {
        if let Some(provider) = self.override_for(operation) {
            return vec![provider];
        }
        let Some(policy) = self.routes.policy(operation) else {
            return Vec::new();
        };

        let now = Instant::now();
        let (mut available, unavailable): (Vec<_>, Vec<_>) = policy
            .chain()
            .into_iter()
            .partition(|provider| self.health.is_available(*provider, now));
        available.extend(unavailable);
        available
    }

    pub async fn route(&self, resource: Resource, mode: CacheMode) -> Result<Routed, FeedError> {
        let operation = resource.operation();
        let chain = self.chain_for(operation);
        let Some(primary) = self.primary_for(operation) else {
            return Err(FeedError::InvalidRequest(format!(
                "no route configured for '{operation}'"
            )));
        };

        let mut attempts = Vec::new();
        let mut schema_mismatch: Option<(ProviderId, String)> = None;

        for provider in &chain {
            let Some(source) = self.sources.get(provider) else {
                continue;
            };

            match source.fetch(resource, mode).await {
                Ok(payload) => {
                    self.note_success(*provider);
                    if *provider != primary {
                        info!(%operation, from = %primary, to = %provider, "served by fallback source");
                        self.emit(FeedEvent::SourceSwitched {
                            operation,
                            from: primary,
                            to: *provider,
                        });
                    }
                    self.count(operation, *provider, *provider != primary, false);
                    debug!(%operation, source = %provider, %resource, "routed call served");
                    return Ok(Routed {
                        payload,
                        served_by: *provider,
                        stale: false,
                        attempts,
                    });
                }
                Err(error) => {
                    warn!(
                        %operation,
                        source = %provider,
                        code = error.code(),
                        error = error.message(),
                        "source attempt failed"
                    );
                    self.note_error(*provider, &error);
                    if error.kind() == SourceErrorKind::SchemaMismatch {
                        self.emit(FeedEvent::SchemaMismatch {
                            provider: *provider,
                            operation,
                            detail: error.message().to_owned(),
                        });
                        schema_mismatch.get_or_insert((*provider, error.message().to_owned()));
                    }
                    attempts.push(SourceAttempt::from_error(*provider, &error));
                }
            }
        }

        if mode != CacheMode::Bypass {
            for provider in &chain {
                let Some(source) = self.sources.get(provider) else {
                    continue;
                };
                if let Some(payload) = source.stale(resource).await {
                    warn!(%operation, source = %provider, "all sources failed; serving stale cache entry");
                    self.emit(FeedEvent::StaleServed {
                        operation,
                        provider: *provider,
                    });
                    self.count(operation, *provider, *provider != primary, true);
                    return Ok(Routed {
                        payload,
                        served_by: *provider,
                        stale: true,
                        attempts,
                    });
                }
            }
        }

        match schema_mismatch {
            Some((provider, detail)) => Err(FeedError::SchemaMismatch {
                provider,
                operation,
                detail,
            }),
            None => Err(FeedError::SourcesExhausted {
                operation,
                attempts,
            }),
        }
    }

    /// Health-check every source and fold the outcomes into source status.
    /// Probes skipped locally (open circuit, no quota) are not health signals.
    pub async fn probe_sources(&self) {
        for (provider, source) in &self.sources {
            match source.probe().await {
                Ok(()) => self.note_success(*provider),
                Err(error)
                    if matches!(
                        error.kind(),
                        SourceErrorKind::CircuitOpen | SourceErrorKind::RateLimited
                    ) =>
                {
                    debug!(source = %provider, code = error.code(), "probe skipped");
                }
                Err(error) => {
                    debug!(source = %provider, code = error.code(), "probe failed");
                    self.note_error(*provider, &error);
                }
            }
        }
    }

    pub fn route_stats(&self) -> Vec<RouteStats> {
        let counters = lock(&self.counters);
        let overrides = lock(&self.overrides);
        self.routes
            .routes()
            .map(|(operation, policy)| {
                let counters = counters.get(&operation).copied().unwrap_or_default();
                RouteStats {
                    operation,
                    policy,
                    last_served_by: counters.last_served_by,
                    served: counters.served,
                    fallbacks: counters.fallbacks,
                    stale_serves: counters.stale_serves,
                    override_source: overrides.get(&operation).copied(),
                }
            })
            .collect()
    }

    fn note_success(&self, provider: ProviderId) {
        if self.health.record_success(provider, Instant::now()) == HealthTransition::Recovered {
            self.emit(FeedEvent::SourceRecovered { provider });
        }
    }

    fn note_error(&self, provider: ProviderId, error: &SourceError) {
        if let HealthTransition::BecameUnavailable { reason } =
            self.health.record_error(provider, error, Instant::now())
        {
            self.emit(FeedEvent::SourceUnavailable { provider, reason });
        }
    }

    fn count(&self, operation: Operation, provider: ProviderId, fallback: bool, stale: bool) {
        let mut counters = lock(&self.counters);
        let entry = counters.entry(operation).or_default();
        entry.last_served_by = Some(provider);
        entry.served += 1;
        if fallback {
            entry.fallbacks += 1;
        }
        if stale {
            entry.stale_serves += 1;
        }
    }

    fn emit(&self, event: FeedEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::clock::Clock;
    use crate::data_source::SourceFuture;
    use crate::domain::{FixtureStatus, TeamRef};
    use crate::Fixture;

    struct FakeSource {
        id: ProviderId,
        capabilities: CapabilitySet,
        script: Mutex<VecDeque<Result<Payload, SourceError>>>,
        stale: Option<Payload>,
        calls: AtomicUsize,
    }

    impl FakeSource {
        fn new(id: ProviderId, script: Vec<Result<Payload, SourceError>>) -> Self {
            Self {
                id,
                capabilities: CapabilitySet::full(),
                script: Mutex::new(script.into()),
                stale: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl DataSource for FakeSource {
        fn id(&self) -> ProviderId {
            self.id
        }

        fn capabilities(&self) -> CapabilitySet {
            self.capabilities
        }

        fn fetch<'a>(
            &'a self,
            _resource: Resource,
            _mode: CacheMode,
        ) -> SourceFuture<'a, Result<Payload, SourceError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = lock(&self.script)
                .pop_front()
                .unwrap_or_else(|| Err(SourceError::transient("script exhausted")));
            Box::pin(async move { next })
        }

        fn stale<'a>(&'a self, _resource: Resource) -> SourceFuture<'a, Option<Payload>> {
            Box::pin(async move { self.stale.clone() })
        }

        fn probe<'a>(&'a self) -> SourceFuture<'a, Result<(), SourceError>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn fixtures(id: u32) -> Payload {
        let team = |id| TeamRef {
            id,
            code: None,
            name: None,
        };
        Payload::Fixtures(vec![Fixture {
            id,
            round: None,
            kickoff: None,
            home: team(1),
            away: team(2),
            home_score: None,
            away_score: None,
            status: FixtureStatus::Postponed,
        }])
    }

    fn coordinator(fpl: Arc<FakeSource>, football_data: Arc<FakeSource>) -> SourceCoordinator {
        let health = Arc::new(SourceHealthBoard::new(
            Clock::anchored_at(0),
            Duration::from_secs(60),
            &ProviderId::ALL,
        ));
        SourceCoordinator::new(vec![fpl, football_data], RoutingTable::default(), health)
            .expect("valid routing")
    }

    const FIXTURES: Resource = Resource::Fixtures { round: None };

    #[tokio::test]
    async fn fixtures_fall_back_and_announce_the_switch() {
        let fpl = Arc::new(FakeSource::new(ProviderId::Fpl, vec![Ok(fixtures(7))]));
        let football_data = Arc::new(FakeSource::new(
            ProviderId::FootballData,
            vec![Err(SourceError::circuit_open(ProviderId::FootballData))],
        ));
        let coordinator = coordinator(Arc::clone(&fpl), Arc::clone(&football_data));
        let mut events = coordinator.subscribe();

        let routed = coordinator
            .route(FIXTURES, CacheMode::Use)
            .await
            .expect("fallback serves");

        assert_eq!(routed.served_by, ProviderId::Fpl);
        assert_eq!(routed.attempts.len(), 1);
        assert_eq!(routed.attempts[0].code, "source.circuit_open");

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(seen.contains(&FeedEvent::SourceSwitched {
            operation: Operation::Fixtures,
            from: ProviderId::FootballData,
            to: ProviderId::Fpl,
        }));

        let stats = coordinator
            .route_stats()
            .into_iter()
            .find(|stats| stats.operation == Operation::Fixtures)
            .expect("fixtures route");
        assert_eq!(stats.fallbacks, 1);
        assert_eq!(stats.last_served_by, Some(ProviderId::Fpl));
    }

    #[tokio::test]
    async fn unavailable_primary_is_tried_last() {
        let fpl = Arc::new(FakeSource::new(
            ProviderId::Fpl,
            vec![Ok(fixtures(1)), Ok(fixtures(2))],
        ));
        let football_data = Arc::new(FakeSource::new(
            ProviderId::FootballData,
            vec![Err(SourceError::upstream_server(503))],
        ));
        let coordinator = coordinator(Arc::clone(&fpl), Arc::clone(&football_data));

        coordinator.route(FIXTURES, CacheMode::Use).await.expect("first");
        assert_eq!(
            coordinator.chain_for(Operation::Fixtures),
            vec![ProviderId::Fpl, ProviderId::FootballData]
        );
        coordinator.route(FIXTURES, CacheMode::Use).await.expect("second");

        assert_eq!(football_data.calls(), 1);
        assert_eq!(fpl.calls(), 2);
    }

    #[tokio::test]
    async fn schema_mismatch_surfaces_when_nothing_is_cached() {
        let fpl = Arc::new(FakeSource::new(
            ProviderId::Fpl,
            vec![Err(SourceError::schema_mismatch("element_type 9"))],
        ));
        let football_data = Arc::new(FakeSource::new(ProviderId::FootballData, Vec::new()));
        let coordinator = coordinator(fpl, football_data);
        let mut events = coordinator.subscribe();

        let error = coordinator
            .route(Resource::Players, CacheMode::Use)
            .await
            .expect_err("pinned source broke");

        assert!(matches!(
            error,
            FeedError::SchemaMismatch {
                provider: ProviderId::Fpl,
                operation: Operation::Players,
                ..
            }
        ));
        assert!(matches!(
            events.try_recv(),
            Ok(FeedEvent::SourceUnavailable { .. } | FeedEvent::SchemaMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn stale_entry_is_the_last_resort() {
        let fpl = Arc::new(FakeSource {
            stale: Some(fixtures(3)),
            ..FakeSource::new(ProviderId::Fpl, vec![Err(SourceError::transient("reset"))])
        });
        let football_data = Arc::new(FakeSource::new(
            ProviderId::FootballData,
            vec![Err(SourceError::transient("reset"))],
        ));
        let coordinator = coordinator(fpl, football_data);

        let routed = coordinator
            .route(FIXTURES, CacheMode::Use)
            .await
            .expect("stale serve");
        assert!(routed.stale);
        assert_eq!(routed.payload, fixtures(3));
        assert_eq!(routed.attempts.len(), 2);

        let bypass = coordinator.route(FIXTURES, CacheMode::Bypass).await;
        assert!(matches!(bypass, Err(FeedError::SourcesExhausted { .. })));
    }

    #[tokio::test]
    async fn override_is_strict() {
        let fpl = Arc::new(FakeSource::new(
            ProviderId::Fpl,
            vec![Err(SourceError::transient("reset"))],
        ));
        let football_data = Arc::new(FakeSource::new(ProviderId::FootballData, vec![Ok(fixtures(1))]));
        let coordinator = coordinator(Arc::clone(&fpl), Arc::clone(&football_data));

        coordinator
            .set_override(Operation::Fixtures, ProviderId::Fpl)
            .expect("override");
        let result = coordinator.route(FIXTURES, CacheMode::Use).await;

        assert!(matches!(result, Err(FeedError::SourcesExhausted { .. })));
        assert_eq!(football_data.calls(), 0);
        coordinator.clear_override(Operation::Fixtures);
        assert_eq!(coordinator.override_for(Operation::Fixtures), None);
    }

    #[test]
    fn routing_table_rejects_unsupported_routes() {
        let mut capabilities = BTreeMap::new();
        capabilities.insert(ProviderId::Fpl, CapabilitySet::full());
        capabilities.insert(
            ProviderId::FootballData,
            CapabilitySet {
                reference_data: false,
                ..CapabilitySet::full()
            },
        );
        assert!(RoutingTable::default().validate(&capabilities).is_ok());

        let broken = RoutingTable::default().with_route(
            Operation::ReferenceData,
            RoutePolicy::prefer(ProviderId::FootballData, ProviderId::Fpl),
        );
        assert!(matches!(
            broken.validate(&capabilities),
            Err(ConfigError::InvalidRoute {
                operation: Operation::ReferenceData,
                ..
            })
        ));

        let same = RoutingTable::default().with_route(
            Operation::Teams,
            RoutePolicy::prefer(ProviderId::Fpl, ProviderId::Fpl),
        );
        assert!(same.validate(&capabilities).is_err());
    }
}
