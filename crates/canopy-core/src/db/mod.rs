//! SQLite storage for hierarchical entity types.
//!
//! Runtime defaults:
//! - `journal_mode = WAL` so traversals can read while a mutation commits
//! - `busy_timeout = 5s` to ride out short write-lock contention
//! - `foreign_keys = ON`

pub mod schema;
pub mod store;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::{path::Path, time::Duration};

use crate::registry::EntityTypeRegistry;

/// Busy timeout used for store connections.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (or create) the database, apply runtime pragmas, and ensure the
/// tables of every registered entity type.
///
/// # Errors
///
/// Returns an error if opening, configuring or creating tables fails.
pub fn open_store(path: &Path, registry: &EntityTypeRegistry) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create database directory {}", parent.display()))?;
    }

    let conn = Connection::open(path)
        .with_context(|| format!("open hierarchy database {}", path.display()))?;

    configure_connection(&conn).context("configure sqlite pragmas")?;
    ensure_registered_tables(&conn, registry)?;

    Ok(conn)
}

/// In-memory variant of [`open_store`].
///
/// # Errors
///
/// Returns an error if configuring or creating tables fails.
pub fn open_in_memory(registry: &EntityTypeRegistry) -> Result<Connection> {
    let conn = Connection::open_in_memory().context("open in-memory database")?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .context("configure sqlite pragmas")?;
    ensure_registered_tables(&conn, registry)?;
    Ok(conn)
}

fn ensure_registered_tables(conn: &Connection, registry: &EntityTypeRegistry) -> Result<()> {
    for spec in registry.specs() {
        schema::ensure_tables(conn, spec)
            .with_context(|| format!("create tables for {}", spec.entity_type))?;
    }
    Ok(())
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(())
}
