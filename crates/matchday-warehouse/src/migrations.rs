use ::duckdb::{Connection, ToSql};

struct Migration {
    version: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_response_cache",
        sql: r#"
CREATE TABLE IF NOT EXISTS response_cache (
    resource_key TEXT PRIMARY KEY,
    source TEXT NOT NULL,
    payload TEXT NOT NULL,
    fetched_at_ms BIGINT NOT NULL,
    ttl_ms BIGINT NOT NULL,
    etag TEXT,
    last_modified TEXT,
    hit_count BIGINT NOT NULL DEFAULT 0,
    last_access_ms BIGINT NOT NULL
);
"#,
    },
    Migration {
        version: "0002_response_cache_indexes",
        sql: r#"
CREATE INDEX IF NOT EXISTS idx_response_cache_source ON response_cache(source);
CREATE INDEX IF NOT EXISTS idx_response_cache_last_access ON response_cache(last_access_ms);
"#,
    },
];

pub fn apply_migrations(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    for migration in MIGRATIONS {
        let params: [&dyn ToSql; 1] = [&migration.version];
        let applied_count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            params.as_slice(),
            |row| row.get(0),
        )?;

        if applied_count == 0 {
            connection.execute_batch(migration.sql)?;
            connection.execute(
                "INSERT INTO schema_migrations (version) VALUES (?)",
                params.as_slice(),
            )?;
        }
    }

    Ok(())
}
