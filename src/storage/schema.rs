//! Database schema and migrations.

use rusqlite::Connection;

/// Current schema version, recorded in `schema_version`.
pub const SCHEMA_VERSION: i64 = 1;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS support_bundles (
            uid TEXT PRIMARY KEY,
            state TEXT NOT NULL DEFAULT 'pending',
            creator TEXT NOT NULL,
            collectors_json TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL,
            archive BLOB,
            error TEXT,
            collector_errors_json TEXT NOT NULL DEFAULT '[]',
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_support_bundles_expires ON support_bundles(expires_at);
        CREATE INDEX IF NOT EXISTS idx_support_bundles_created ON support_bundles(created_at);",
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [SCHEMA_VERSION],
    )?;

    Ok(())
}
