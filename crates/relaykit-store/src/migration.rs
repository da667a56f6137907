//! Database schema migrations for SQLite.
//!
//! We use a simple versioned migration system. Each migration is a SQL string
//! that transforms the schema from version N to N+1.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    // Create migrations table if it doesn't exist
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    // Get current version
    let current: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    // Apply migrations
    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }

        tx.commit()?;
    }

    Ok(())
}

/// Apply a specific migration version.
fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Packet storage. Counters are fixed-width hex TEXT so that the
        -- default string collation orders and range-scans them numerically.
        CREATE TABLE packets (
            src TEXT NOT NULL,                -- source endpoint name
            dst TEXT NOT NULL,                -- destination endpoint name
            seq TEXT NOT NULL,                -- sequence counter, hex
            label INTEGER NOT NULL,           -- application message type
            payload BLOB NOT NULL,            -- raw payload bytes

            PRIMARY KEY (src, dst, seq)
        );

        -- One watermark per (src, dst) pair, monotonically non-decreasing.
        CREATE TABLE lower_bounds (
            src TEXT NOT NULL,
            dst TEXT NOT NULL,
            lower_bound TEXT NOT NULL,        -- sequence counter, hex

            PRIMARY KEY (src, dst)
        );

        -- Fragment groups awaiting reassembly at this store.
        CREATE TABLE fragment_groups (
            src TEXT NOT NULL,
            dst TEXT NOT NULL,
            group_seq TEXT NOT NULL,          -- first packet's counter
            last_seq TEXT NOT NULL,           -- highest fragment counter seen
            updated_at INTEGER NOT NULL,      -- Unix ms of last arrival

            PRIMARY KEY (src, dst, group_seq)
        );

        -- Indexes for common queries
        CREATE INDEX idx_packets_label ON packets(src, dst, label, seq);
        CREATE INDEX idx_fragment_groups_age ON fragment_groups(updated_at);
        "#,
    )?;

    Ok(())
}

/// Get current time in milliseconds.
fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_millis() as i64
}
