//! # Matchday Warehouse
//!
//! DuckDB-backed persistent (warm) tier for the matchday response cache.
//!
//! ## Overview
//!
//! Normalized upstream responses are stored one row per resource key so that a
//! restarted process can serve reference data without spending provider quota.
//!
//! ### Features
//!
//! - **Parameterized SQL**: every key and payload is bound, never interpolated
//! - **Connection Pooling**: one database instance, cloned connections
//! - **Bounded Tenancy**: least-recently-accessed rows are evicted past a row cap
//! - **Versioned Migrations**: applied once per database file
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use matchday_warehouse::{ResponseRecord, Warehouse};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let warehouse = Warehouse::open_default()?;
//!
//!     if let Some(record) = warehouse.load_response("fpl:players", 1_700_000_000_000)? {
//!         println!("cached {} bytes from {}", record.payload.len(), record.source);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod duckdb;
pub mod migrations;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use ::duckdb::ToSql;
use serde::Serialize;
use thiserror::Error;

pub use duckdb::{DuckDbConnectionManager, PooledConnection};

#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid cache record: {0}")]
    InvalidRecord(String),
}

#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    pub matchday_home: PathBuf,
    pub db_path: PathBuf,
    pub max_pool_size: usize,
    /// Upper bound on stored responses; older rows are evicted by last access.
    pub max_responses: usize,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        let matchday_home = resolve_matchday_home();
        let db_path = matchday_home.join("cache").join("responses.duckdb");
        Self {
            matchday_home,
            db_path,
            max_pool_size: 4,
            max_responses: 2_048,
        }
    }
}

impl WarehouseConfig {
    /// Config rooted at an explicit directory.
    pub fn at(matchday_home: impl Into<PathBuf>) -> Self {
        let matchday_home = matchday_home.into();
        let db_path = matchday_home.join("cache").join("responses.duckdb");
        Self {
            matchday_home,
            db_path,
            ..Self::default()
        }
    }
}

/// One persisted upstream response, already normalized to domain JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseRecord {
    pub resource_key: String,
    pub source: String,
    pub payload: String,
    pub fetched_at_ms: i64,
    pub ttl_ms: i64,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub hit_count: u64,
}

impl ResponseRecord {
    pub fn expires_at_ms(&self) -> i64 {
        self.fetched_at_ms.saturating_add(self.ttl_ms)
    }

    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        now_ms > self.expires_at_ms()
    }

    fn validate(&self) -> Result<(), WarehouseError> {
        if self.resource_key.trim().is_empty() {
            return Err(WarehouseError::InvalidRecord(String::from(
                "resource_key must not be empty",
            )));
        }
        if self.ttl_ms <= 0 {
            return Err(WarehouseError::InvalidRecord(format!(
                "ttl_ms must be positive for '{}'",
                self.resource_key
            )));
        }
        Ok(())
    }
}

/// Rows removed by a purge pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub expired: usize,
    pub evicted: usize,
}

#[derive(Clone)]
pub struct Warehouse {
    config: WarehouseConfig,
    manager: DuckDbConnectionManager,
}

impl Warehouse {
    pub fn open_default() -> Result<Self, WarehouseError> {
        Self::open(WarehouseConfig::default())
    }

    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let manager = DuckDbConnectionManager::open(config.db_path.clone(), config.max_pool_size)?;
        let warehouse = Self { config, manager };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    pub fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        migrations::apply_migrations(&connection)?;
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        self.manager.db_path()
    }

    pub fn max_responses(&self) -> usize {
        self.config.max_responses
    }

    /// Load a response by key and stamp its last access time.
    ///
    /// Expired rows are still returned; freshness is the caller's decision.
    pub fn load_response(
        &self,
        resource_key: &str,
        accessed_at_ms: i64,
    ) -> Result<Option<ResponseRecord>, WarehouseError> {
        let connection = self.manager.acquire()?;
        let params: [&dyn ToSql; 1] = [&resource_key];
        let mut statement = connection.prepare(
            "SELECT resource_key, source, payload, fetched_at_ms, ttl_ms, etag, last_modified, hit_count \
             FROM response_cache WHERE resource_key = ?",
        )?;
        let mut rows = statement.query(params.as_slice())?;

        let Some(row) = rows.next()? else {
            return Ok(None);
        };

        let hit_count: i64 = row.get(7)?;
        let record = ResponseRecord {
            resource_key: row.get(0)?,
            source: row.get(1)?,
            payload: row.get(2)?,
            fetched_at_ms: row.get(3)?,
            ttl_ms: row.get(4)?,
            etag: row.get(5)?,
            last_modified: row.get(6)?,
            hit_count: u64::try_from(hit_count).unwrap_or_default(),
        };
        drop(rows);
        drop(statement);

        let params: [&dyn ToSql; 2] = [&accessed_at_ms, &resource_key];
        connection.execute(
            "UPDATE response_cache SET last_access_ms = ? WHERE resource_key = ?",
            params.as_slice(),
        )?;

        Ok(Some(record))
    }

    /// Insert or replace a response, then evict least-recently-accessed rows
    /// beyond the configured cap. Returns how many rows were evicted.
    pub fn store_response(
        &self,
        record: &ResponseRecord,
        accessed_at_ms: i64,
    ) -> Result<usize, WarehouseError> {
        record.validate()?;
        let hit_count = i64::try_from(record.hit_count).unwrap_or(i64::MAX);

        let connection = self.manager.acquire()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<usize, WarehouseError> {
            let params: [&dyn ToSql; 9] = [
                &record.resource_key,
                &record.source,
                &record.payload,
                &record.fetched_at_ms,
                &record.ttl_ms,
                &record.etag,
                &record.last_modified,
                &hit_count,
                &accessed_at_ms,
            ];
            connection.execute(
                "INSERT OR REPLACE INTO response_cache \
                 (resource_key, source, payload, fetched_at_ms, ttl_ms, etag, last_modified, hit_count, last_access_ms) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params.as_slice(),
            )?;

            evict_over_capacity(&connection, self.config.max_responses)
        })();

        finalize_transaction(&connection, result)
    }

    /// Refresh `fetched_at_ms` and `hit_count` after a successful revalidation.
    /// Returns `false` when the key is not stored.
    pub fn touch_response(
        &self,
        resource_key: &str,
        fetched_at_ms: i64,
        hit_count: u64,
    ) -> Result<bool, WarehouseError> {
        let hit_count = i64::try_from(hit_count).unwrap_or(i64::MAX);
        let connection = self.manager.acquire()?;
        let params: [&dyn ToSql; 4] = [&fetched_at_ms, &hit_count, &fetched_at_ms, &resource_key];
        let updated = connection.execute(
            "UPDATE response_cache SET fetched_at_ms = ?, hit_count = ?, last_access_ms = ? \
             WHERE resource_key = ?",
            params.as_slice(),
        )?;
        Ok(updated > 0)
    }

    /// Delete rows whose TTL has elapsed, then enforce the row cap.
    pub fn purge_expired(&self, now_ms: i64) -> Result<PurgeReport, WarehouseError> {
        let connection = self.manager.acquire()?;
        let params: [&dyn ToSql; 1] = [&now_ms];
        let expired = connection.execute(
            "DELETE FROM response_cache WHERE fetched_at_ms + ttl_ms < ?",
            params.as_slice(),
        )?;
        let evicted = evict_over_capacity(&connection, self.config.max_responses)?;

        Ok(PurgeReport { expired, evicted })
    }

    pub fn response_count(&self) -> Result<usize, WarehouseError> {
        let connection = self.manager.acquire()?;
        let count: i64 =
            connection.query_row("SELECT COUNT(*) FROM response_cache", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

fn evict_over_capacity(
    connection: &::duckdb::Connection,
    max_responses: usize,
) -> Result<usize, WarehouseError> {
    let count: i64 =
        connection.query_row("SELECT COUNT(*) FROM response_cache", [], |row| row.get(0))?;
    let cap = i64::try_from(max_responses).unwrap_or(i64::MAX);
    let overflow = count.saturating_sub(cap);
    if overflow <= 0 {
        return Ok(0);
    }

    let params: [&dyn ToSql; 1] = [&overflow];
    let evicted = connection.execute(
        "DELETE FROM response_cache WHERE resource_key IN \
         (SELECT resource_key FROM response_cache ORDER BY last_access_ms ASC, resource_key ASC LIMIT ?)",
        params.as_slice(),
    )?;
    Ok(evicted)
}

/// Finalize a transaction, committing on success or rolling back on failure.
fn finalize_transaction<T>(
    connection: &::duckdb::Connection,
    result: Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

/// Resolve the matchday home directory from environment or default.
fn resolve_matchday_home() -> PathBuf {
    if let Some(path) = env::var_os("MATCHDAY_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".matchday");
    }

    PathBuf::from(".matchday")
}
