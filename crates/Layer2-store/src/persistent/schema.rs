//! SQLite schema for the Persistent tier
//!
//! ## Migration System
//!
//! The schema is versioned and migrations run automatically on open.
//! - Version 1: `cache_entries` with indexes on timestamp, last_accessed_at,
//!   expires_at and agent_id
//! - Version 2: `codec` and `tags` columns, sync_status index
//!
//! All instants are stored as epoch milliseconds so the indexes order
//! numerically.

use rusqlite::{params, Connection};
use sessioncache_foundation::{Error, Result};
use tracing::{debug, info, warn};

/// Current schema version
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Columns read back into a `CacheEntry`, in `StoredRow` order
pub(crate) const ENTRY_COLUMNS: &str = "key, value, codec, created_at, last_accessed_at, \
     access_count, temperature, expires_at, size_bytes, owning_tier, sync_status, \
     title, agent_id, timestamp, tags";

pub(crate) fn configure(conn: &Connection, on_disk: bool) -> Result<()> {
    let pragmas = if on_disk {
        "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;"
    } else {
        "PRAGMA synchronous=OFF;"
    };
    conn.execute_batch(pragmas)
        .map_err(|e| Error::Storage(format!("Failed to set pragmas: {}", e)))
}

/// Create base tables (version 1)
pub(crate) fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Schema version tracking
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS cache_entries (
            key TEXT PRIMARY KEY,
            value BLOB NOT NULL,
            created_at INTEGER NOT NULL,
            last_accessed_at INTEGER NOT NULL,
            access_count INTEGER NOT NULL DEFAULT 1,
            temperature TEXT NOT NULL CHECK(temperature IN ('HOT', 'WARM', 'COLD')),
            expires_at INTEGER,
            size_bytes INTEGER NOT NULL,
            owning_tier TEXT NOT NULL,
            sync_status TEXT NOT NULL CHECK(sync_status IN ('SYNCED', 'PENDING', 'CONFLICT')),
            title TEXT,
            agent_id TEXT,
            timestamp INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_cache_timestamp
            ON cache_entries(timestamp);
        CREATE INDEX IF NOT EXISTS idx_cache_last_accessed
            ON cache_entries(last_accessed_at);
        CREATE INDEX IF NOT EXISTS idx_cache_expires
            ON cache_entries(expires_at);
        CREATE INDEX IF NOT EXISTS idx_cache_agent
            ON cache_entries(agent_id);

        -- Insert initial schema version if not exists
        INSERT OR IGNORE INTO schema_version (version) VALUES (1);
        "#,
    )
    .map_err(|e| Error::Storage(format!("Failed to initialize schema: {}", e)))
}

pub(crate) fn schema_version(conn: &Connection) -> Result<i32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .map_err(|e| Error::Storage(format!("Failed to get schema version: {}", e)))
}

/// Run all pending migrations
pub(crate) fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version = schema_version(conn)?;

    if current_version >= CURRENT_SCHEMA_VERSION {
        debug!("Cache schema is up to date (version {})", current_version);
        return Ok(());
    }

    info!(
        "Running cache migrations from version {} to {}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    for version in (current_version + 1)..=CURRENT_SCHEMA_VERSION {
        match version {
            2 => migrate_v2(conn)?,
            _ => {
                warn!("Unknown migration version: {}", version);
            }
        }

        conn.execute(
            "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
            params![version],
        )
        .map_err(|e| Error::Storage(format!("Failed to record migration: {}", e)))?;

        info!("Applied cache migration to version {}", version);
    }

    Ok(())
}

/// Version 2: pluggable codec name, tags, and the sync collaborator's index
fn migrate_v2(conn: &Connection) -> Result<()> {
    // ALTERs fail harmlessly when a column already exists
    let _ = conn.execute(
        "ALTER TABLE cache_entries ADD COLUMN codec TEXT NOT NULL DEFAULT 'json'",
        [],
    );
    let _ = conn.execute("ALTER TABLE cache_entries ADD COLUMN tags TEXT", []);

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_cache_sync ON cache_entries(sync_status)",
        [],
    )
    .map_err(|e| Error::Storage(format!("Failed to create sync index: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_database_reaches_current_version() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);

        // Every column the store selects exists
        let sql = format!("SELECT {} FROM cache_entries", ENTRY_COLUMNS);
        conn.prepare(&sql).unwrap();
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        run_migrations(&conn).unwrap();
        initialize_schema(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
    }
}
