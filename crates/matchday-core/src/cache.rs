//! Two-tier response cache.
//!
//! Lookups check the memory tier first, then the persistent (warm) tier,
//! promoting warm hits into memory. Entries carry the provider's validators so
//! the next fetch can be conditional; a `304` refreshes `fetched_at` and
//! `hit_count` without touching the payload.
//!
//! Freshness is `now - fetched_at <= ttl`, measured in epoch milliseconds from
//! the shared [`Clock`] for both tiers. The memory tier is bounded by entry count
//! and payload bytes with least-recently-used eviction; the warm tier enforces its
//! own row cap.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use matchday_warehouse::{PurgeReport, ResponseRecord, Warehouse, WarehouseError};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::data_source::Resource;
use crate::error::ConfigError;
use crate::{Payload, ProviderId};

/// Per-call cache behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Serve a fresh cached entry if present, otherwise fetch and store. (Default)
    #[default]
    Use,
    /// Always fetch (conditionally, when validators exist) and store the result.
    Refresh,
    /// Always fetch unconditionally; never read or write the cache.
    Bypass,
}

/// Normalized cache identity: source plus resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub source: ProviderId,
    pub resource: Resource,
}

impl ResourceKey {
    pub const fn new(source: ProviderId, resource: Resource) -> Self {
        Self { source, resource }
    }
}

impl Display for ResourceKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.source, self.resource)
    }
}

/// TTL class of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceClass {
    /// Near-static data: rounds, clubs, squads.
    Reference,
    Fixtures,
    /// In-match data.
    Live,
}

impl ResourceClass {
    pub const fn of(resource: Resource) -> Self {
        match resource {
            Resource::ReferenceData | Resource::Teams | Resource::Players => Self::Reference,
            Resource::Fixtures { .. } => Self::Fixtures,
            Resource::LiveScores { .. } => Self::Live,
        }
    }
}

/// TTL table keyed by resource class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    pub reference: Duration,
    pub fixtures: Duration,
    pub live: Duration,
    /// Live TTL while a match window is active for the round.
    pub live_active: Duration,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            reference: Duration::from_secs(6 * 60 * 60),
            fixtures: Duration::from_secs(30 * 60),
            live: Duration::from_secs(2 * 60),
            live_active: Duration::from_secs(30),
        }
    }
}

impl TtlPolicy {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let table = [
            ("reference", self.reference),
            ("fixtures", self.fixtures),
            ("live", self.live),
            ("live_active", self.live_active),
        ];
        if let Some((name, _)) = table.iter().find(|(_, ttl)| ttl.is_zero()) {
            return Err(ConfigError::InvalidTtl {
                reason: format!("'{name}' must be non-zero"),
            });
        }
        if !(self.live_active <= self.live
            && self.live <= self.fixtures
            && self.fixtures <= self.reference)
        {
            return Err(ConfigError::InvalidTtl {
                reason: String::from("expected live_active <= live <= fixtures <= reference"),
            });
        }
        Ok(())
    }

    pub const fn ttl_for(&self, class: ResourceClass, match_active: bool) -> Duration {
        match (class, match_active) {
            (ResourceClass::Reference, _) => self.reference,
            (ResourceClass::Fixtures, false) => self.fixtures,
            (ResourceClass::Fixtures, true) => self.live,
            (ResourceClass::Live, false) => self.live,
            (ResourceClass::Live, true) => self.live_active,
        }
    }
}

/// Memory tier bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLimits {
    pub max_entries: usize,
    pub max_bytes: usize,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            max_entries: 512,
            max_bytes: 64 * 1024 * 1024,
        }
    }
}

impl CacheLimits {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entries == 0 {
            return Err(ConfigError::NonPositive {
                field: String::from("cache.max_entries"),
            });
        }
        if self.max_bytes == 0 {
            return Err(ConfigError::NonPositive {
                field: String::from("cache.max_bytes"),
            });
        }
        Ok(())
    }
}

/// Durable tier behind the memory cache.
///
/// Calls block; the cache runs them on tokio's blocking pool and never while
/// holding the memory tier's lock.
pub trait PersistentTier: Send + Sync {
    fn load(&self, key: &str, accessed_at_ms: i64)
        -> Result<Option<ResponseRecord>, WarehouseError>;

    /// Returns the number of rows evicted to honour the tier's cap.
    fn store(&self, record: &ResponseRecord, accessed_at_ms: i64) -> Result<usize, WarehouseError>;

    fn touch(&self, key: &str, fetched_at_ms: i64, hit_count: u64) -> Result<bool, WarehouseError>;

    fn purge_expired(&self, now_ms: i64) -> Result<PurgeReport, WarehouseError>;

    fn len(&self) -> Result<usize, WarehouseError>;
}

impl PersistentTier for Warehouse {
    fn load(
        &self,
        key: &str,
        accessed_at_ms: i64,
    ) -> Result<Option<ResponseRecord>, WarehouseError> {
        self.load_response(key, accessed_at_ms)
    }

    fn store(&self, record: &ResponseRecord, accessed_at_ms: i64) -> Result<usize, WarehouseError> {
        self.store_response(record, accessed_at_ms)
    }

    fn touch(&self, key: &str, fetched_at_ms: i64, hit_count: u64) -> Result<bool, WarehouseError> {
        self.touch_response(key, fetched_at_ms, hit_count)
    }

    fn purge_expired(&self, now_ms: i64) -> Result<PurgeReport, WarehouseError> {
        Warehouse::purge_expired(self, now_ms)
    }

    fn len(&self) -> Result<usize, WarehouseError> {
        self.response_count()
    }
}

/// In-process stand-in for the warehouse, with the same cap semantics.
#[derive(Debug)]
pub struct MemoryPersistentTier {
    max_entries: usize,
    rows: Mutex<HashMap<String, (ResponseRecord, i64)>>,
}

impl MemoryPersistentTier {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            rows: Mutex::new(HashMap::new()),
        }
    }

    fn rows(&self) -> std::sync::MutexGuard<'_, HashMap<String, (ResponseRecord, i64)>> {
        self.rows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn evict_over_capacity(&self, rows: &mut HashMap<String, (ResponseRecord, i64)>) -> usize {
        let mut evicted = 0;
        while rows.len() > self.max_entries {
            let victim = rows
                .iter()
                .min_by(|(left_key, (_, left_access)), (right_key, (_, right_access))| {
                    left_access
                        .cmp(right_access)
                        .then_with(|| left_key.cmp(right_key))
                })
                .map(|(key, _)| key.clone());
            let Some(victim) = victim else { break };
            rows.remove(&victim);
            evicted += 1;
        }
        evicted
    }
}

impl Default for MemoryPersistentTier {
    fn default() -> Self {
        Self::new(2_048)
    }
}

impl PersistentTier for MemoryPersistentTier {
    fn load(
        &self,
        key: &str,
        accessed_at_ms: i64,
    ) -> Result<Option<ResponseRecord>, WarehouseError> {
        let mut rows = self.rows();
        Ok(rows.get_mut(key).map(|(record, last_access)| {
            *last_access = accessed_at_ms;
            record.clone()
        }))
    }

    fn store(&self, record: &ResponseRecord, accessed_at_ms: i64) -> Result<usize, WarehouseError> {
        if record.ttl_ms <= 0 {
            return Err(WarehouseError::InvalidRecord(format!(
                "ttl_ms must be positive for '{}'",
                record.resource_key
            )));
        }
        let mut rows = self.rows();
        rows.insert(
            record.resource_key.clone(),
            (record.clone(), accessed_at_ms),
        );
        Ok(self.evict_over_capacity(&mut rows))
    }

    fn touch(&self, key: &str, fetched_at_ms: i64, hit_count: u64) -> Result<bool, WarehouseError> {
        let mut rows = self.rows();
        Ok(match rows.get_mut(key) {
            Some((record, last_access)) => {
                record.fetched_at_ms = fetched_at_ms;
                record.hit_count = hit_count;
                *last_access = fetched_at_ms;
                true
            }
            None => false,
        })
    }

    fn purge_expired(&self, now_ms: i64) -> Result<PurgeReport, WarehouseError> {
        let mut rows = self.rows();
        let before = rows.len();
        rows.retain(|_, (record, _)| !record.is_expired_at(now_ms));
        let expired = before - rows.len();
        let evicted = self.evict_over_capacity(&mut rows);
        Ok(PurgeReport { expired, evicted })
    }

    fn len(&self) -> Result<usize, WarehouseError> {
        Ok(self.rows().len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    Memory,
    Warm,
}

/// A cached value as served to a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub payload: Payload,
    pub fetched_at_ms: i64,
    pub ttl: Duration,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub hit_count: u64,
    pub tier: CacheTier,
}

impl CachedResponse {
    pub fn is_fresh_at(&self, now_ms: i64) -> bool {
        is_fresh(self.fetched_at_ms, self.ttl, now_ms)
    }
}

/// Revalidation headers remembered from the last successful fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validators {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl Validators {
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub memory_expired: usize,
    pub warm_expired: usize,
    pub warm_evicted: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryTierStats {
    pub entries: usize,
    pub bytes: usize,
    pub max_entries: usize,
    pub max_bytes: usize,
    pub hits: u64,
    /// Sum of `hit_count` over resident entries.
    pub entry_hit_total: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WarmTierStats {
    pub enabled: bool,
    pub entries: Option<usize>,
    pub hits: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub memory: MemoryTierStats,
    pub warm: WarmTierStats,
    pub misses: u64,
    pub stale_serves: u64,
    pub revalidations: u64,
    pub evictions: u64,
    pub expired_swept: u64,
}

fn ttl_ms(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

fn is_fresh(fetched_at_ms: i64, ttl: Duration, now_ms: i64) -> bool {
    now_ms.saturating_sub(fetched_at_ms) <= ttl_ms(ttl)
}

#[derive(Debug)]
struct MemoryEntry {
    payload: Payload,
    fetched_at_ms: i64,
    ttl: Duration,
    etag: Option<String>,
    last_modified: Option<String>,
    hit_count: u64,
    size_bytes: usize,
    last_access: u64,
}

impl MemoryEntry {
    fn to_response(&self, tier: CacheTier) -> CachedResponse {
        CachedResponse {
            payload: self.payload.clone(),
            fetched_at_ms: self.fetched_at_ms,
            ttl: self.ttl,
            etag: self.etag.clone(),
            last_modified: self.last_modified.clone(),
            hit_count: self.hit_count,
            tier,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    memory_hits: u64,
    warm_hits: u64,
    warm_errors: u64,
    misses: u64,
    stale_serves: u64,
    revalidations: u64,
    evictions: u64,
    expired_swept: u64,
}

#[derive(Debug, Default)]
struct MemoryTier {
    entries: HashMap<ResourceKey, MemoryEntry>,
    bytes: usize,
    tick: u64,
    counters: Counters,
}

impl MemoryTier {
    fn next_tick(&mut self) -> u64 {
        self.tick = self.tick.wrapping_add(1);
        self.tick
    }

    fn remove(&mut self, key: &ResourceKey) -> Option<MemoryEntry> {
        let entry = self.entries.remove(key)?;
        self.bytes = self.bytes.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    /// Insert and evict least-recently-used entries until within limits.
    fn insert(&mut self, key: ResourceKey, mut entry: MemoryEntry, limits: CacheLimits) {
        entry.last_access = self.next_tick();
        self.bytes = self.bytes.saturating_add(entry.size_bytes);
        if let Some(previous) = self.entries.insert(key, entry) {
            self.bytes = self.bytes.saturating_sub(previous.size_bytes);
        }

        while self.entries.len() > limits.max_entries || self.bytes > limits.max_bytes {
            let victim = self
                .entries
                .iter()
                .filter(|(candidate, _)| **candidate != key)
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(candidate, _)| *candidate);

            // Only the new entry is left and it alone exceeds the byte budget.
            let victim = victim.unwrap_or(key);
            if self.remove(&victim).is_some() {
                self.counters.evictions += 1;
                debug!(key = %victim, "evicted memory cache entry");
            }
            if victim == key {
                break;
            }
        }
    }
}

/// Memory + persistent response cache shared by all source adapters.
pub struct TieredCache {
    ttl: TtlPolicy,
    limits: CacheLimits,
    clock: Clock,
    memory: RwLock<MemoryTier>,
    warm: Option<Arc<dyn PersistentTier>>,
}

impl TieredCache {
    pub fn new(ttl: TtlPolicy, limits: CacheLimits, clock: Clock) -> Self {
        Self {
            ttl,
            limits,
            clock,
            memory: RwLock::new(MemoryTier::default()),
            warm: None,
        }
    }

    pub fn with_persistent_tier(mut self, tier: Arc<dyn PersistentTier>) -> Self {
        self.warm = Some(tier);
        self
    }

    pub const fn clock(&self) -> Clock {
        self.clock
    }

    pub const fn ttl_policy(&self) -> TtlPolicy {
        self.ttl
    }

    pub fn ttl_for(&self, resource: Resource, match_active: bool) -> Duration {
        self.ttl.ttl_for(ResourceClass::of(resource), match_active)
    }

    /// Fresh entry from memory, else from the warm tier (promoted into memory).
    /// Increments the entry's `hit_count` when served.
    pub async fn get_fresh(&self, key: &ResourceKey) -> Option<CachedResponse> {
        let now_ms = self.clock.now_ms();

        {
            let mut guard = self.memory.write().await;
            let memory = &mut *guard;
            let tick = memory.next_tick();
            let hit = memory
                .entries
                .get_mut(key)
                .filter(|entry| is_fresh(entry.fetched_at_ms, entry.ttl, now_ms))
                .map(|entry| {
                    entry.hit_count += 1;
                    entry.last_access = tick;
                    entry.to_response(CacheTier::Memory)
                });
            if let Some(hit) = hit {
                memory.counters.memory_hits += 1;
                debug!(key = %key, hit_count = hit.hit_count, "memory cache hit");
                return Some(hit);
            }
        }

        let promoted = self
            .load_warm(key, now_ms)
            .await
            .filter(|record| !record.is_expired_at(now_ms))
            .and_then(|record| self.decode(key, record));

        let Some((mut response, size_bytes)) = promoted else {
            self.memory.write().await.counters.misses += 1;
            debug!(key = %key, "cache miss");
            return None;
        };
        response.hit_count += 1;
        self.touch_warm(key, response.fetched_at_ms, response.hit_count).await;

        let mut memory = self.memory.write().await;
        memory.counters.warm_hits += 1;
        memory.insert(
            *key,
            MemoryEntry {
                payload: response.payload.clone(),
                fetched_at_ms: response.fetched_at_ms,
                ttl: response.ttl,
                etag: response.etag.clone(),
                last_modified: response.last_modified.clone(),
                hit_count: response.hit_count,
                size_bytes,
                last_access: 0,
            },
            self.limits,
        );
        debug!(key = %key, "warm cache hit promoted to memory");
        Some(response)
    }

    /// Any entry regardless of age, for last-resort serving. Counts as a served read.
    pub async fn get_any(&self, key: &ResourceKey) -> Option<CachedResponse> {
        let now_ms = self.clock.now_ms();
        {
            let mut guard = self.memory.write().await;
            let memory = &mut *guard;
            let tick = memory.next_tick();
            let hit = memory.entries.get_mut(key).map(|entry| {
                entry.hit_count += 1;
                entry.last_access = tick;
                entry.to_response(CacheTier::Memory)
            });
            if let Some(hit) = hit {
                memory.counters.stale_serves += 1;
                return Some(hit);
            }
        }

        let (mut response, _) = self
            .load_warm(key, now_ms)
            .await
            .and_then(|record| self.decode(key, record))?;
        response.hit_count += 1;
        self.touch_warm(key, response.fetched_at_ms, response.hit_count).await;

        self.memory.write().await.counters.stale_serves += 1;
        Some(response)
    }

    /// Entry metadata without counting a read.
    pub async fn peek(&self, key: &ResourceKey) -> Option<CachedResponse> {
        let memory = self.memory.read().await;
        memory
            .entries
            .get(key)
            .map(|entry| entry.to_response(CacheTier::Memory))
    }

    /// Validators for a conditional request, from either tier.
    pub async fn validators(&self, key: &ResourceKey) -> Option<Validators> {
        let from_memory = {
            let memory = self.memory.read().await;
            memory.entries.get(key).map(|entry| Validators {
                etag: entry.etag.clone(),
                last_modified: entry.last_modified.clone(),
            })
        };

        let validators = match from_memory {
            Some(validators) => validators,
            None => {
                let record = self.load_warm(key, self.clock.now_ms()).await?;
                Validators {
                    etag: record.etag,
                    last_modified: record.last_modified,
                }
            }
        };

        (!validators.is_empty()).then_some(validators)
    }

    /// Store a freshly fetched payload in both tiers. An existing entry's
    /// `hit_count` carries over; writes never increment it.
    pub async fn put(
        &self,
        key: &ResourceKey,
        payload: Payload,
        ttl: Duration,
        etag: Option<String>,
        last_modified: Option<String>,
    ) {
        let now_ms = self.clock.now_ms();
        let encoded = match serde_json::to_string(&payload) {
            Ok(encoded) => Some(encoded),
            Err(error) => {
                warn!(key = %key, %error, "failed to encode payload for the warm tier");
                None
            }
        };
        let size_bytes = encoded.as_ref().map_or(0, String::len);

        let record = encoded.map(|encoded| ResponseRecord {
            resource_key: key.to_string(),
            source: key.source.as_str().to_owned(),
            payload: encoded,
            fetched_at_ms: now_ms,
            ttl_ms: ttl_ms(ttl),
            etag: etag.clone(),
            last_modified: last_modified.clone(),
            hit_count: 0,
        });

        let hit_count = {
            let mut memory = self.memory.write().await;
            let hit_count = memory.entries.get(key).map_or(0, |entry| entry.hit_count);
            memory.insert(
                *key,
                MemoryEntry {
                    payload,
                    fetched_at_ms: now_ms,
                    ttl,
                    etag,
                    last_modified,
                    hit_count,
                    size_bytes,
                    last_access: 0,
                },
                self.limits,
            );
            hit_count
        };
        debug!(key = %key, ttl_ms = ttl_ms(ttl), "cached response");

        let Some(mut record) = record else { return };
        record.hit_count = hit_count;
        let evicted = self
            .on_warm_tier("write", key, move |warm| warm.store(&record, now_ms))
            .await;
        if let Some(evicted) = evicted.filter(|evicted| *evicted > 0) {
            debug!(key = %key, evicted, "warm tier evicted rows over capacity");
        }
    }

    /// Apply a `304 Not Modified`: refresh `fetched_at`, bump `hit_count`.
    /// Returns `None` when neither tier holds the entry any more.
    pub async fn revalidate(
        &self,
        key: &ResourceKey,
        ttl: Duration,
        etag: Option<String>,
        last_modified: Option<String>,
    ) -> Option<CachedResponse> {
        let now_ms = self.clock.now_ms();

        {
            let mut guard = self.memory.write().await;
            let memory = &mut *guard;
            let tick = memory.next_tick();
            let refreshed = memory.entries.get_mut(key).map(|entry| {
                entry.fetched_at_ms = now_ms;
                entry.ttl = ttl;
                entry.hit_count += 1;
                entry.last_access = tick;
                if etag.is_some() {
                    entry.etag = etag.clone();
                }
                if last_modified.is_some() {
                    entry.last_modified = last_modified.clone();
                }
                entry.to_response(CacheTier::Memory)
            });
            if let Some(refreshed) = refreshed {
                memory.counters.revalidations += 1;
                drop(guard);
                self.touch_warm(key, now_ms, refreshed.hit_count).await;
                debug!(key = %key, "revalidated cached response");
                return Some(refreshed);
            }
        }

        let (mut response, size_bytes) = self
            .load_warm(key, now_ms)
            .await
            .and_then(|record| self.decode(key, record))?;
        response.fetched_at_ms = now_ms;
        response.ttl = ttl;
        response.hit_count += 1;
        if etag.is_some() {
            response.etag = etag;
        }
        if last_modified.is_some() {
            response.last_modified = last_modified;
        }

        self.touch_warm(key, now_ms, response.hit_count).await;

        let mut memory = self.memory.write().await;
        memory.counters.revalidations += 1;
        memory.insert(
            *key,
            MemoryEntry {
                payload: response.payload.clone(),
                fetched_at_ms: now_ms,
                ttl,
                etag: response.etag.clone(),
                last_modified: response.last_modified.clone(),
                hit_count: response.hit_count,
                size_bytes,
                last_access: 0,
            },
            self.limits,
        );
        Some(response)
    }

    /// Purge entries past TTL from both tiers.
    pub async fn sweep(&self) -> SweepReport {
        let now_ms = self.clock.now_ms();
        let memory_expired = {
            let mut guard = self.memory.write().await;
            let memory = &mut *guard;
            let expired = memory
                .entries
                .iter()
                .filter(|(_, entry)| !is_fresh(entry.fetched_at_ms, entry.ttl, now_ms))
                .map(|(key, _)| *key)
                .collect::<Vec<_>>();
            for key in &expired {
                memory.remove(key);
            }
            memory.counters.expired_swept += expired.len() as u64;
            expired.len()
        };

        let mut report = SweepReport {
            memory_expired,
            ..SweepReport::default()
        };
        let purged = self
            .on_warm_tier("sweep", "*", move |warm| warm.purge_expired(now_ms))
            .await;
        if let Some(purged) = purged {
            report.warm_expired = purged.expired;
            report.warm_evicted = purged.evicted;
        }

        if report != SweepReport::default() {
            debug!(
                memory_expired = report.memory_expired,
                warm_expired = report.warm_expired,
                warm_evicted = report.warm_evicted,
                "cache sweep"
            );
        }
        report
    }

    pub async fn stats(&self) -> CacheStats {
        let warm_entries = self.on_warm_tier("count", "*", |warm| warm.len()).await;
        let memory = self.memory.read().await;

        CacheStats {
            memory: MemoryTierStats {
                entries: memory.entries.len(),
                bytes: memory.bytes,
                max_entries: self.limits.max_entries,
                max_bytes: self.limits.max_bytes,
                hits: memory.counters.memory_hits,
                entry_hit_total: memory.entries.values().map(|entry| entry.hit_count).sum(),
            },
            warm: WarmTierStats {
                enabled: self.warm.is_some(),
                entries: warm_entries,
                hits: memory.counters.warm_hits,
                errors: memory.counters.warm_errors,
            },
            misses: memory.counters.misses,
            stale_serves: memory.counters.stale_serves,
            revalidations: memory.counters.revalidations,
            evictions: memory.counters.evictions,
            expired_swept: memory.counters.expired_swept,
        }
    }

    /// Run one warm-tier call on the blocking pool. Failures are counted and
    /// logged, then read as `None`.
    async fn on_warm_tier<T, F>(&self, action: &'static str, key: impl Display, call: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn PersistentTier) -> Result<T, WarehouseError> + Send + 'static,
    {
        let warm = Arc::clone(self.warm.as_ref()?);
        let error = match tokio::task::spawn_blocking(move || call(warm.as_ref())).await {
            Ok(Ok(value)) => return Some(value),
            Ok(Err(error)) => error.to_string(),
            Err(join_error) => join_error.to_string(),
        };
        self.memory.write().await.counters.warm_errors += 1;
        warn!(key = %key, action, %error, "warm tier call failed");
        None
    }

    async fn load_warm(&self, key: &ResourceKey, now_ms: i64) -> Option<ResponseRecord> {
        let row = key.to_string();
        self.on_warm_tier("read", key, move |warm| warm.load(&row, now_ms))
            .await
            .flatten()
    }

    async fn touch_warm(&self, key: &ResourceKey, fetched_at_ms: i64, hit_count: u64) {
        let row = key.to_string();
        self.on_warm_tier("touch", key, move |warm| warm.touch(&row, fetched_at_ms, hit_count))
            .await;
    }

    fn decode(&self, key: &ResourceKey, record: ResponseRecord) -> Option<(CachedResponse, usize)> {
        let size_bytes = record.payload.len();
        match serde_json::from_str::<Payload>(&record.payload) {
            Ok(payload) => Some((
                CachedResponse {
                    payload,
                    fetched_at_ms: record.fetched_at_ms,
                    ttl: Duration::from_millis(u64::try_from(record.ttl_ms).unwrap_or_default()),
                    etag: record.etag,
                    last_modified: record.last_modified,
                    hit_count: record.hit_count,
                    tier: CacheTier::Warm,
                },
                size_bytes,
            )),
            Err(error) => {
                warn!(key = %key, %error, "discarding undecodable warm cache row");
                None
            }
        }
    }
}
