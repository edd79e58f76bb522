//! Database migrations

use crate::error::Result;
use rusqlite::{params, Connection};

/// Current schema version
const CURRENT_VERSION: i32 = 1;

/// Run all pending migrations
pub fn run(conn: &mut Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }

    tracing::debug!("Database schema at version {CURRENT_VERSION}");
    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

/// Migration to version 1: document and settings tables
fn migrate_v1(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );
        -- One row per document; body is the JSON document without its id
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            rev INTEGER NOT NULL,
            body TEXT NOT NULL
        );
        -- Local key-value settings (never replicated)
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )?;
    tx.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?)",
        params![1],
    )?;

    tx.commit()?;
    Ok(())
}
