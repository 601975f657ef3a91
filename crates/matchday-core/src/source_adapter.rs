//! Per-provider fetch pipeline behind the [`DataSource`] contract.
//!
//! cache → dedup (per upstream document) → breaker fail-fast → quota fail-fast →
//! queue admission → rate-limit gate → conditional fetch → cache write for every
//! resource the document serves → normalized result.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::adapters::ProviderApi;
use crate::cache::{CacheMode, ResourceKey, TieredCache};
use crate::circuit_breaker::CircuitBreaker;
use crate::clock::Clock;
use crate::data_source::{
    CapabilitySet, DataSource, Resource, SourceError, SourceErrorKind, SourceFuture,
};
use crate::dedup::Deduplicator;
use crate::http_client::HttpResponse;
use crate::match_window::MatchCalendar;
use crate::rate_limiter::RateLimiter;
use crate::scheduler::{Priority, Scheduler, SourceLane};
use crate::{Payload, ProviderId};

pub type FetchResult = Result<Payload, SourceError>;

/// Every resource normalized from one upstream response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    parts: Vec<(Resource, FetchResult)>,
}

impl Document {
    pub fn payload_for(&self, resource: Resource) -> FetchResult {
        self.parts
            .iter()
            .find(|(member, _)| *member == resource)
            .map(|(_, result)| result.clone())
            .unwrap_or_else(|| {
                Err(SourceError::transient(format!(
                    "shared response did not include {resource}"
                )))
            })
    }
}

pub type DocumentResult = Result<Arc<Document>, SourceError>;

/// State shared by every source adapter in one feed.
#[derive(Clone)]
pub struct PipelineContext {
    pub cache: Arc<TieredCache>,
    pub scheduler: Scheduler,
    pub dedup: Deduplicator<ResourceKey, DocumentResult>,
    pub calendar: Arc<MatchCalendar>,
    pub clock: Clock,
}

/// Queue tier for a resource: live data first, near-static data last.
pub const fn priority_for(resource: Resource) -> Priority {
    match resource {
        Resource::LiveScores { .. } => Priority::High,
        Resource::Fixtures { .. } | Resource::Players => Priority::Medium,
        Resource::ReferenceData | Resource::Teams => Priority::Low,
    }
}

struct AdapterInner {
    api: Arc<dyn ProviderApi>,
    lane: Arc<SourceLane>,
    context: PipelineContext,
}

/// One upstream provider wired into the shared cache, queue and dedup map.
#[derive(Clone)]
pub struct SourceAdapter {
    inner: Arc<AdapterInner>,
}

impl SourceAdapter {
    pub fn new(api: Arc<dyn ProviderApi>, lane: Arc<SourceLane>, context: PipelineContext) -> Self {
        Self {
            inner: Arc::new(AdapterInner { api, lane, context }),
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.inner.lane.limiter
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.inner.lane.breaker
    }
}

impl AdapterInner {
    fn id(&self) -> ProviderId {
        self.api.id()
    }

    fn key(&self, resource: Resource) -> ResourceKey {
        ResourceKey::new(self.id(), resource)
    }

    fn match_active(&self, resource: Resource) -> bool {
        resource.round().is_some_and(|round| {
            self.context
                .calendar
                .is_active(round, self.context.clock.now_ms())
        })
    }

    /// Fail fast when the breaker is open or quota will not free up within the
    /// queue's wait budget.
    fn precheck(&self, now: Instant) -> Result<(), SourceError> {
        if let Some(retry_at) = self.lane.breaker.next_attempt_at().filter(|at| *at > now) {
            return Err(SourceError::circuit_open(self.id())
                .with_retry_after(retry_at.duration_since(now)));
        }

        let permit_at = self.lane.limiter.next_permit_at(now);
        let max_wait = self.context.scheduler.config().max_queue_wait;
        if permit_at > now + max_wait {
            return Err(SourceError::rate_limited(format!(
                "'{}' quota is exhausted",
                self.id()
            ))
            .with_retry_after(permit_at.duration_since(now)));
        }
        Ok(())
    }

    /// Cache, then the shared in-flight fetch of the resource's document.
    fn fetch<'a>(self: &'a Arc<Self>, resource: Resource, mode: CacheMode) -> SourceFuture<'a, FetchResult> {
        Box::pin(async move {
            if !self.api.capabilities().supports(resource.operation()) {
                return Err(SourceError::unsupported_operation(
                    self.id(),
                    resource.operation(),
                ));
            }

            if mode == CacheMode::Use {
                if let Some(hit) = self.context.cache.get_fresh(&self.key(resource)).await {
                    return Ok(hit.payload);
                }
            }

            let document = self.api.document_of(&resource);
            let document_key = self.key(document.first().copied().unwrap_or(resource));
            let leader = Arc::clone(self);
            self.context
                .dedup
                .run(document_key, async move {
                    leader.fetch_document(resource, mode).await
                })
                .await
                .unwrap_or_else(|abandoned| Err(SourceError::transient(abandoned.to_string())))?
                .payload_for(resource)
        })
    }

    /// Every member of the document, when all are fresh in memory. A caller
    /// that missed just before the previous leader settled lands here.
    async fn cached_document(&self, members: &[Resource]) -> Option<Document> {
        let now_ms = self.context.clock.now_ms();
        let mut parts = Vec::with_capacity(members.len());
        for member in members {
            let entry = self
                .context
                .cache
                .peek(&self.key(*member))
                .await
                .filter(|entry| entry.is_fresh_at(now_ms))?;
            parts.push((*member, Ok(entry.payload)));
        }
        Some(Document { parts })
    }

    async fn fetch_document(self: Arc<Self>, resource: Resource, mode: CacheMode) -> DocumentResult {
        let members = self.api.document_of(&resource);
        if mode == CacheMode::Use {
            if let Some(document) = self.cached_document(&members).await {
                debug!(key = %self.key(resource), "settled from cache written by the previous leader");
                return Ok(Arc::new(document));
            }
        }

        if let Some(dependency) = self.api.depends_on(&resource) {
            let lookup = self.fetch(dependency, CacheMode::Use).await?;
            self.api.observe(&lookup);
        }

        self.precheck(Instant::now())?;

        let key = self.key(resource);
        let request = self.api.request_for(&resource)?;
        let validators = match mode {
            CacheMode::Bypass => None,
            CacheMode::Use | CacheMode::Refresh => self.context.cache.validators(&key).await,
        };
        let conditional = match &validators {
            Some(validators) => request
                .clone()
                .with_conditional(validators.etag.as_deref(), validators.last_modified.as_deref()),
            None => request.clone(),
        };
        let priority = priority_for(resource);

        let mut response = self
            .context
            .scheduler
            .submit(key, Arc::clone(&self.lane), conditional, priority)
            .await?;

        if response.is_not_modified() {
            if let Some(document) = self.revalidate(&members, &response).await {
                return Ok(Arc::new(document));
            }

            debug!(key = %key, "304 for an entry no longer cached; refetching unconditionally");
            response = self
                .context
                .scheduler
                .submit(key, Arc::clone(&self.lane), request, priority)
                .await?;
            if response.is_not_modified() {
                return Err(SourceError::transient(format!(
                    "'{}' answered 304 to an unconditional request",
                    self.id()
                )));
            }
        }

        let mut parts = Vec::with_capacity(members.len());
        for member in members {
            let result = self.normalize(member, &response.body);
            match &result {
                Ok(payload) => self.store(member, payload, &response, mode).await,
                Err(failure) if member != resource => {
                    warn!(key = %self.key(member), detail = failure.message(), "shared response member did not normalize");
                }
                Err(_) => {}
            }
            parts.push((member, result));
        }
        Ok(Arc::new(Document { parts }))
    }

    /// Apply a `304` to every member; `None` when any of them is no longer cached.
    async fn revalidate(&self, members: &[Resource], response: &HttpResponse) -> Option<Document> {
        let mut parts = Vec::with_capacity(members.len());
        for member in members {
            let ttl = self.context.cache.ttl_for(*member, self.match_active(*member));
            let refreshed = self
                .context
                .cache
                .revalidate(
                    &self.key(*member),
                    ttl,
                    response.etag().map(str::to_owned),
                    response.last_modified().map(str::to_owned),
                )
                .await?;
            parts.push((*member, Ok(refreshed.payload)));
        }
        Some(Document { parts })
    }

    fn normalize(&self, resource: Resource, body: &str) -> FetchResult {
        let payload = self.api.normalize(&resource, body).inspect_err(|failure| {
            if failure.kind() == SourceErrorKind::SchemaMismatch {
                error!(
                    target: "matchday::schema",
                    source = %self.id(),
                    operation = %resource.operation(),
                    detail = failure.message(),
                    "upstream payload no longer matches the expected schema"
                );
            }
        })?;

        if payload.kind() != resource.operation().payload_kind() {
            return Err(crate::data_source::unexpected_payload(
                resource.operation().payload_kind(),
                &payload,
            ));
        }
        Ok(payload)
    }

    async fn store(&self, resource: Resource, payload: &Payload, response: &HttpResponse, mode: CacheMode) {
        let fixtures = payload.fixtures();
        if matches!(payload, Payload::Fixtures(_)) || !fixtures.is_empty() {
            self.context.calendar.record_fixtures(resource.round(), fixtures);
        }
        if mode == CacheMode::Bypass {
            return;
        }

        let ttl = self.context.cache.ttl_for(resource, self.match_active(resource));
        self.context
            .cache
            .put(
                &self.key(resource),
                payload.clone(),
                ttl,
                response.etag().map(str::to_owned),
                response.last_modified().map(str::to_owned),
            )
            .await;
    }
}

impl DataSource for SourceAdapter {
    fn id(&self) -> ProviderId {
        self.inner.id()
    }

    fn capabilities(&self) -> CapabilitySet {
        self.inner.api.capabilities()
    }

    fn fetch<'a>(&'a self, resource: Resource, mode: CacheMode) -> SourceFuture<'a, FetchResult> {
        self.inner.fetch(resource, mode)
    }

    fn stale<'a>(&'a self, resource: Resource) -> SourceFuture<'a, Option<Payload>> {
        Box::pin(async move {
            if !self.capabilities().supports(resource.operation()) {
                return None;
            }
            let key = ResourceKey::new(self.id(), resource);
            self.inner
                .context
                .cache
                .get_any(&key)
                .await
                .map(|entry| entry.payload)
        })
    }

    fn probe<'a>(&'a self) -> SourceFuture<'a, Result<(), SourceError>> {
        Box::pin(async move {
            let inner = &self.inner;
            inner.precheck(Instant::now())?;
            if !inner.lane.limiter.admit(Instant::now()) {
                return Err(SourceError::rate_limited(format!(
                    "'{}' has no quota headroom for a probe",
                    inner.id()
                )));
            }

            inner
                .context
                .scheduler
                .submit(
                    format!("{}:probe", inner.id()),
                    Arc::clone(&inner.lane),
                    inner.api.probe_request(),
                    Priority::Low,
                )
                .await
                .map(|_| ())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::adapters::FplApi;
    use crate::cache::{CacheLimits, TtlPolicy};
    use crate::circuit_breaker::CircuitBreakerConfig;
    use crate::http_client::{HttpClient, HttpError, HttpRequest, HttpResponse};
    use crate::rate_limiter::RateLimitConfig;
    use crate::retry::RetryConfig;
    use crate::scheduler::SchedulerConfig;

    const BOOTSTRAP: &str = r#"{"events": [], "teams": [{"id": 1, "name": "Arsenal", "short_name": "ARS"}],
        "elements": [{"id": 10, "first_name": "Bukayo", "second_name": "Saka", "web_name": "Saka",
        "team": 1, "element_type": 3, "now_cost": 100, "total_points": 12, "status": "a"}]}"#;

    #[derive(Default)]
    struct RecordingClient {
        calls: AtomicUsize,
        script: Mutex<VecDeque<HttpResponse>>,
        conditional: Mutex<Vec<bool>>,
    }

    impl RecordingClient {
        fn scripted(responses: Vec<HttpResponse>) -> Self {
            Self {
                script: Mutex::new(responses.into()),
                ..Self::default()
            }
        }
    }

    impl HttpClient for RecordingClient {
        fn execute<'a>(
            &'a self,
            request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.conditional
                .lock()
                .expect("conditional")
                .push(request.is_conditional());
            let response = self
                .script
                .lock()
                .expect("script")
                .pop_front()
                .unwrap_or_else(|| HttpResponse::ok_json(BOOTSTRAP));
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(response)
            })
        }
    }

    fn adapter(client: Arc<RecordingClient>) -> (SourceAdapter, Arc<TieredCache>, Scheduler) {
        let clock = Clock::anchored_at(1_750_000_000_000);
        let cache = Arc::new(TieredCache::new(TtlPolicy::default(), CacheLimits::default(), clock));
        let scheduler = Scheduler::new(SchedulerConfig {
            retry: RetryConfig::no_retry(),
            ..SchedulerConfig::default()
        });
        let lane = Arc::new(SourceLane {
            provider: ProviderId::Fpl,
            limiter: Arc::new(RateLimiter::new(
                ProviderId::Fpl,
                RateLimitConfig {
                    per_minute: 60,
                    per_day: 1_000,
                },
                Instant::now(),
            )),
            breaker: Arc::new(CircuitBreaker::new(ProviderId::Fpl, CircuitBreakerConfig::default())),
            client,
        });
        let context = PipelineContext {
            cache: Arc::clone(&cache),
            scheduler: scheduler.clone(),
            dedup: Deduplicator::new(),
            calendar: Arc::new(MatchCalendar::default()),
            clock,
        };
        (
            SourceAdapter::new(Arc::new(FplApi::new("https://fpl.test/api")), lane, context),
            cache,
            scheduler,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_misses_share_one_upstream_call() {
        let client = Arc::new(RecordingClient::default());
        let (adapter, _, scheduler) = adapter(Arc::clone(&client));
        let worker = scheduler.spawn_worker();

        let results = futures_join(&adapter, 5).await;

        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
        worker.abort();
    }

    async fn futures_join(adapter: &SourceAdapter, callers: usize) -> Vec<Payload> {
        let handles = (0..callers)
            .map(|_| {
                let adapter = adapter.clone();
                tokio::spawn(async move { adapter.fetch(Resource::Players, CacheMode::Use).await })
            })
            .collect::<Vec<_>>();
        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.expect("task").expect("players"));
        }
        results
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_sends_conditional_request_and_honours_304() {
        let client = Arc::new(RecordingClient::scripted(vec![
            HttpResponse::ok_json(BOOTSTRAP).with_header("ETag", "\"v1\""),
            HttpResponse::not_modified(),
        ]));
        let (adapter, cache, scheduler) = adapter(Arc::clone(&client));
        let worker = scheduler.spawn_worker();

        let first = adapter.fetch(Resource::Teams, CacheMode::Use).await.expect("teams");
        let second = adapter
            .fetch(Resource::Teams, CacheMode::Refresh)
            .await
            .expect("revalidated");

        assert_eq!(first, second);
        assert_eq!(*client.conditional.lock().expect("conditional"), vec![false, true]);
        let entry = cache
            .peek(&ResourceKey::new(ProviderId::Fpl, Resource::Teams))
            .await
            .expect("cached");
        assert_eq!(entry.hit_count, 1);
        worker.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn bypass_skips_cache_entirely() {
        let client = Arc::new(RecordingClient::default());
        let (adapter, cache, scheduler) = adapter(Arc::clone(&client));
        let worker = scheduler.spawn_worker();

        adapter
            .fetch(Resource::Players, CacheMode::Bypass)
            .await
            .expect("players");
        adapter
            .fetch(Resource::Players, CacheMode::Bypass)
            .await
            .expect("players");

        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().await.memory.entries, 0);
        assert!(adapter.stale(Resource::Players).await.is_none());
        worker.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_fails_fast_without_queueing() {
        let client = Arc::new(RecordingClient::default());
        let (adapter, _, scheduler) = adapter(Arc::clone(&client));
        for _ in 0..5 {
            adapter.breaker().record_failure(Instant::now());
        }

        let error = adapter
            .fetch(Resource::Players, CacheMode::Use)
            .await
            .expect_err("circuit open");

        assert_eq!(error.kind(), SourceErrorKind::CircuitOpen);
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.depth().queued(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn one_response_fills_every_resource_it_serves() {
        let client = Arc::new(RecordingClient::default());
        let (adapter, cache, scheduler) = adapter(Arc::clone(&client));
        let worker = scheduler.spawn_worker();

        adapter.fetch(Resource::Players, CacheMode::Use).await.expect("players");
        let teams = adapter.fetch(Resource::Teams, CacheMode::Use).await.expect("teams");
        adapter
            .fetch(Resource::ReferenceData, CacheMode::Use)
            .await
            .expect("reference data");

        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert_eq!(teams.kind(), crate::PayloadKind::Teams);
        assert_eq!(cache.stats().await.memory.entries, 3);
        worker.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn leader_settles_from_cache_written_by_the_previous_leader() {
        let client = Arc::new(RecordingClient::default());
        let (adapter, _, scheduler) = adapter(Arc::clone(&client));
        let worker = scheduler.spawn_worker();
        adapter.fetch(Resource::Players, CacheMode::Use).await.expect("players");

        let document = Arc::clone(&adapter.inner)
            .fetch_document(Resource::Teams, CacheMode::Use)
            .await
            .expect("cached document");

        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert!(document.payload_for(Resource::Teams).is_ok());
        assert!(document.payload_for(Resource::Players).is_ok());
        worker.abort();
    }

    #[test]
    fn live_data_is_queued_ahead_of_reference_data() {
        let round = crate::Round::new(1).expect("valid round");
        assert_eq!(priority_for(Resource::LiveScores { round }), Priority::High);
        assert_eq!(priority_for(Resource::Players), Priority::Medium);
        assert_eq!(priority_for(Resource::Teams), Priority::Low);
    }
}
