//! Table layout for one hierarchical entity type.
//!
//! - the entity table keeps `id`, `name`, the root-level `sort_order`,
//!   `is_archived`, the soft-delete flag, and one column per declared
//!   storable field
//! - `<table>_hierarchy` holds the parent/child edges with their own
//!   `hierarchy_sort_order`; edges are only ever soft-deleted
//!
//! All DDL uses `IF NOT EXISTS`, so [`ensure_tables`] is idempotent.

#![allow(clippy::must_use_candidate)]

use std::fmt::Write as _;

use rusqlite::Connection;

use crate::config::FieldConfig;
use crate::registry::EntityTypeSpec;

/// SQLite column type for a declared field.
fn column_type(field: &FieldConfig) -> &'static str {
    match field.field_type.as_str() {
        "int" | "bool" => "INTEGER",
        "float" => "REAL",
        _ => "TEXT",
    }
}

/// DDL for the entity table, the relation table and their indexes.
pub fn ddl(spec: &EntityTypeSpec) -> String {
    let table = &spec.table;
    let hierarchy = &spec.hierarchy_table;

    let mut extra = String::new();
    for (column, field) in spec.storable_columns() {
        let _ = write!(extra, "\n    {column} {},", column_type(field));
    }

    format!(
        r#"
CREATE TABLE IF NOT EXISTS {table} (
    id TEXT PRIMARY KEY,
    name TEXT,
    sort_order INTEGER,
    is_archived INTEGER NOT NULL DEFAULT 0 CHECK (is_archived IN (0, 1)),{extra}
    deleted INTEGER NOT NULL DEFAULT 0 CHECK (deleted IN (0, 1))
);

CREATE TABLE IF NOT EXISTS {hierarchy} (
    id TEXT PRIMARY KEY,
    entity_id TEXT NOT NULL,
    parent_id TEXT NOT NULL,
    hierarchy_sort_order INTEGER,
    deleted INTEGER NOT NULL DEFAULT 0 CHECK (deleted IN (0, 1)),
    CHECK (entity_id <> parent_id)
);

CREATE INDEX IF NOT EXISTS idx_{table}_deleted_sort
    ON {table}(deleted, sort_order);

CREATE INDEX IF NOT EXISTS idx_{hierarchy}_entity
    ON {hierarchy}(entity_id, deleted);

CREATE INDEX IF NOT EXISTS idx_{hierarchy}_parent
    ON {hierarchy}(parent_id, deleted, hierarchy_sort_order);

CREATE UNIQUE INDEX IF NOT EXISTS uq_{hierarchy}_active_edge
    ON {hierarchy}(entity_id, parent_id) WHERE deleted = 0;
"#
    )
}

/// Create the tables for `spec` if they do not exist.
///
/// # Errors
///
/// Returns an error if any DDL statement fails.
pub fn ensure_tables(conn: &Connection, spec: &EntityTypeSpec) -> rusqlite::Result<()> {
    conn.execute_batch(&ddl(spec))
}
