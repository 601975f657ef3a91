//! Priority queue and the single worker loop that admits outbound calls.
//!
//! Entries are scanned high → low and FIFO within a tier. An entry is
//! dispatched only when its source's breaker and rate limiter both permit a
//! call; a source without quota headroom is skipped for the rest of the pass so
//! it never blocks another source. When nothing is ready the worker sleeps until
//! the earliest instant something could become ready (limiter reset, retry
//! backoff, queue deadline), capped at the poll interval.
//!
//! Retries re-enter at the front of their tier. An upstream `429` defers the
//! whole source and requeues without spending the retry budget; the queue
//! deadline (`max_queue_wait`) bounds how long that can go on.

use std::collections::{HashSet, VecDeque};
use std::fmt::Display;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::circuit_breaker::{CircuitBreaker, Permit};
use crate::data_source::SourceError;
use crate::http_client::{HttpClient, HttpError, HttpRequest, HttpResponse};
use crate::rate_limiter::RateLimiter;
use crate::retry::RetryConfig;
use crate::ProviderId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    const fn tier(self) -> usize {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
        }
    }
}

/// Everything the worker needs to gate and perform calls for one source.
pub struct SourceLane {
    pub provider: ProviderId,
    pub limiter: Arc<RateLimiter>,
    pub breaker: Arc<CircuitBreaker>,
    pub client: Arc<dyn HttpClient>,
}

impl std::fmt::Debug for SourceLane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceLane")
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    /// Longest an entry may wait in the queue before settling with `RateLimited`.
    pub max_queue_wait: Duration,
    pub retry: RetryConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            max_queue_wait: Duration::from_secs(90),
            retry: RetryConfig::default(),
        }
    }
}

pub type FetchOutcome = Result<HttpResponse, SourceError>;

struct QueuedRequest {
    resource_key: String,
    lane: Arc<SourceLane>,
    request: HttpRequest,
    priority: Priority,
    enqueued_at: Instant,
    ready_at: Instant,
    deadline: Instant,
    retry_count: u32,
    last_error: Option<SourceError>,
    result: oneshot::Sender<FetchOutcome>,
}

impl QueuedRequest {
    fn settle(self, outcome: FetchOutcome) {
        let waited_ms = Instant::now()
            .saturating_duration_since(self.enqueued_at)
            .as_millis() as u64;
        match &outcome {
            Ok(response) => debug!(
                key = %self.resource_key,
                status = response.status,
                retries = self.retry_count,
                waited_ms,
                "request settled"
            ),
            Err(error) => debug!(
                key = %self.resource_key,
                code = error.code(),
                retries = self.retry_count,
                waited_ms,
                "request settled with error"
            ),
        }
        let _ = self.result.send(outcome);
    }
}

/// Per-tier queue depth plus calls currently on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepth {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub dispatching: usize,
}

impl QueueDepth {
    pub const fn queued(&self) -> usize {
        self.high + self.medium + self.low
    }
}

#[derive(Default)]
struct Queues {
    tiers: [VecDeque<QueuedRequest>; 3],
    dispatching: usize,
    closed: bool,
}

impl Queues {
    fn is_empty(&self) -> bool {
        self.tiers.iter().all(VecDeque::is_empty)
    }
}

struct SchedulerInner {
    config: SchedulerConfig,
    queues: Mutex<Queues>,
    notify: Notify,
}

/// Shared handle to the request queue.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                queues: Mutex::new(Queues::default()),
                notify: Notify::new(),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Queue a request and wait for it to settle.
    pub async fn submit(
        &self,
        resource_key: impl Display,
        lane: Arc<SourceLane>,
        request: HttpRequest,
        priority: Priority,
    ) -> FetchOutcome {
        let (tx, rx) = oneshot::channel();
        let now = Instant::now();
        let resource_key = resource_key.to_string();
        debug!(key = %resource_key, ?priority, "request queued");
        {
            let mut queues = self.inner.lock();
            if queues.closed {
                return Err(SourceError::transient("scheduler is shut down"));
            }
            queues.tiers[priority.tier()].push_back(QueuedRequest {
                resource_key,
                lane,
                request,
                priority,
                enqueued_at: now,
                ready_at: now,
                deadline: now + self.inner.config.max_queue_wait,
                retry_count: 0,
                last_error: None,
                result: tx,
            });
        }
        self.inner.notify.notify_one();

        rx.await
            .unwrap_or_else(|_| Err(SourceError::transient("scheduler dropped the request")))
    }

    pub fn depth(&self) -> QueueDepth {
        let queues = self.inner.lock();
        QueueDepth {
            high: queues.tiers[0].len(),
            medium: queues.tiers[1].len(),
            low: queues.tiers[2].len(),
            dispatching: queues.dispatching,
        }
    }

    /// Start the worker loop. Exactly one worker should run per scheduler.
    pub fn spawn_worker(&self) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.run().await })
    }

    /// Stop admitting work and settle everything still queued.
    pub fn close(&self) {
        let drained = {
            let mut queues = self.inner.lock();
            queues.closed = true;
            queues
                .tiers
                .iter_mut()
                .flat_map(|tier| tier.drain(..))
                .collect::<Vec<_>>()
        };
        for entry in drained {
            entry.settle(Err(SourceError::transient("scheduler is shut down")));
        }
        self.inner.notify.notify_one();
    }
}

enum Scan {
    Closed,
    Idle,
    WakeAt(Instant),
}

impl SchedulerInner {
    fn lock(&self) -> MutexGuard<'_, Queues> {
        self.queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn run(self: Arc<Self>) {
        debug!("scheduler worker started");
        loop {
            let now = Instant::now();
            let wake_at = match self.scan(now) {
                Scan::Closed => break,
                Scan::Idle => {
                    self.notify.notified().await;
                    continue;
                }
                Scan::WakeAt(at) => at.min(now + self.config.poll_interval),
            };

            tokio::select! {
                () = tokio::time::sleep_until(wake_at) => {}
                () = self.notify.notified() => {}
            }
        }
        debug!("scheduler worker stopped");
    }

    /// One pass over the queue: settle expired entries, dispatch admissible ones
    /// and compute when the next pass is worth running.
    fn scan(self: &Arc<Self>, now: Instant) -> Scan {
        let mut queues = self.lock();
        if queues.closed {
            return Scan::Closed;
        }

        let mut blocked: HashSet<ProviderId> = HashSet::new();
        let mut wake: Option<Instant> = None;
        let mut wake_at = |at: Instant| wake = Some(wake.map_or(at, |current: Instant| current.min(at)));
        let mut dispatch = Vec::new();

        for tier in 0..queues.tiers.len() {
            let mut index = 0;
            while index < queues.tiers[tier].len() {
                let entry = &queues.tiers[tier][index];

                if now >= entry.deadline {
                    if let Some(entry) = queues.tiers[tier].remove(index) {
                        let error = entry.last_error.clone().unwrap_or_else(|| {
                            let permit_at = entry.lane.limiter.next_permit_at(now);
                            SourceError::rate_limited(format!(
                                "'{}' could not be admitted within {}ms",
                                entry.lane.provider,
                                self.config.max_queue_wait.as_millis()
                            ))
                            .with_retry_after(permit_at.saturating_duration_since(now))
                        });
                        warn!(key = %entry.resource_key, "queued request expired before admission");
                        entry.settle(Err(error));
                    }
                    continue;
                }

                wake_at(entry.deadline);
                if entry.ready_at > now {
                    wake_at(entry.ready_at);
                    index += 1;
                    continue;
                }

                let provider = entry.lane.provider;
                if blocked.contains(&provider) {
                    index += 1;
                    continue;
                }

                if let Some(retry_at) = entry.lane.breaker.next_attempt_at().filter(|at| *at > now) {
                    if let Some(entry) = queues.tiers[tier].remove(index) {
                        entry.settle(Err(SourceError::circuit_open(provider)
                            .with_retry_after(retry_at.duration_since(now))));
                    }
                    continue;
                }

                let permit_at = entry.lane.limiter.next_permit_at(now);
                if permit_at > now {
                    debug!(source = %provider, wait_ms = permit_at.duration_since(now).as_millis() as u64, "source has no quota headroom");
                    blocked.insert(provider);
                    wake_at(permit_at);
                    index += 1;
                    continue;
                }

                match entry.lane.breaker.try_acquire(now) {
                    Permit::Rejected { retry_at: Some(retry_at) } => {
                        if let Some(entry) = queues.tiers[tier].remove(index) {
                            entry.settle(Err(SourceError::circuit_open(provider)
                                .with_retry_after(retry_at.saturating_duration_since(now))));
                        }
                    }
                    Permit::Rejected { retry_at: None } => {
                        // Half-open probe in flight; wait for its outcome.
                        blocked.insert(provider);
                        wake_at(now + self.config.poll_interval);
                        index += 1;
                    }
                    permit @ (Permit::Granted | Permit::Probe) => {
                        entry.lane.limiter.record(now);
                        if let Some(entry) = queues.tiers[tier].remove(index) {
                            dispatch.push((entry, permit));
                        }
                    }
                }
            }
        }

        queues.dispatching += dispatch.len();
        let idle = queues.is_empty();
        drop(queues);

        for (entry, permit) in dispatch {
            self.dispatch(entry, permit);
        }

        if idle {
            Scan::Idle
        } else {
            Scan::WakeAt(wake.unwrap_or(now + self.config.poll_interval))
        }
    }

    fn dispatch(self: &Arc<Self>, entry: QueuedRequest, permit: Permit) {
        let inner = Arc::clone(self);
        debug!(
            key = %entry.resource_key,
            url = %entry.request.url,
            probe = matches!(permit, Permit::Probe),
            attempt = entry.retry_count + 1,
            "dispatching upstream call"
        );
        tokio::spawn(async move {
            let lane = Arc::clone(&entry.lane);
            let timeout = entry.request.timeout();
            let outcome =
                tokio::time::timeout(timeout, lane.client.execute(entry.request.clone())).await;
            let outcome = outcome.unwrap_or_else(|_| {
                Err(HttpError::new(format!("request timed out after {}ms", timeout.as_millis())))
            });
            inner.complete(entry, outcome);
        });
    }

    fn complete(&self, mut entry: QueuedRequest, outcome: Result<HttpResponse, HttpError>) {
        let now = Instant::now();
        let lane = Arc::clone(&entry.lane);

        match outcome {
            Ok(response) if response.is_success() || response.is_not_modified() => {
                lane.breaker.record_success(now);
                self.finish(entry, Ok(response));
            }
            Ok(response) if response.status == 429 => {
                let delay = response
                    .retry_after()
                    .unwrap_or_else(|| self.config.retry.delay_for_attempt(entry.retry_count));
                lane.limiter.defer_until(now + delay);
                lane.breaker.release_probe();
                info!(
                    source = %lane.provider,
                    defer_ms = delay.as_millis() as u64,
                    "upstream rate limited; deferring source"
                );
                entry.last_error = Some(
                    SourceError::rate_limited(format!("'{}' returned 429", lane.provider))
                        .with_retry_after(delay),
                );
                entry.ready_at = now + delay;
                self.requeue(entry);
            }
            Ok(response) if response.status >= 500 || response.status == 408 => {
                lane.breaker.record_failure(now);
                self.retry_or_finish(entry, SourceError::upstream_server(response.status), now);
            }
            Ok(response) => {
                lane.breaker.release_probe();
                let error = SourceError::invalid_request(format!(
                    "'{}' rejected {} with status {}",
                    lane.provider, entry.request.url, response.status
                ));
                self.finish(entry, Err(error));
            }
            Err(error) if error.retryable() => {
                lane.breaker.record_failure(now);
                self.retry_or_finish(entry, SourceError::transient(error.message()), now);
            }
            Err(error) => {
                lane.breaker.release_probe();
                self.finish(entry, Err(SourceError::invalid_request(error.message())));
            }
        }
    }

    fn retry_or_finish(&self, mut entry: QueuedRequest, error: SourceError, now: Instant) {
        if !self.config.retry.allows_retry(entry.retry_count) {
            warn!(key = %entry.resource_key, code = error.code(), "retry budget exhausted");
            self.finish(entry, Err(error));
            return;
        }

        let delay = self.config.retry.delay_for_attempt(entry.retry_count);
        entry.retry_count += 1;
        entry.ready_at = now + delay;
        debug!(
            key = %entry.resource_key,
            retry = entry.retry_count,
            delay_ms = delay.as_millis() as u64,
            code = error.code(),
            "scheduling retry"
        );
        entry.last_error = Some(error);
        self.requeue(entry);
    }

    /// Put a dispatched entry back at the front of its tier.
    fn requeue(&self, entry: QueuedRequest) {
        let mut queues = self.lock();
        queues.dispatching = queues.dispatching.saturating_sub(1);
        if queues.closed {
            drop(queues);
            entry.settle(Err(SourceError::transient("scheduler is shut down")));
            return;
        }
        queues.tiers[entry.priority.tier()].push_front(entry);
        drop(queues);
        self.notify.notify_one();
    }

    fn finish(&self, entry: QueuedRequest, outcome: FetchOutcome) {
        {
            let mut queues = self.lock();
            queues.dispatching = queues.dispatching.saturating_sub(1);
        }
        entry.settle(outcome);
        self.notify.notify_one();
    }
}
