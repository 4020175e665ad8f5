//! Read/write access to an entity table and its relation table.
//!
//! Every statement is scoped to live rows (`deleted = 0` on both the edge
//! and the entity it points at). Nothing here issues a hard `DELETE`:
//! detaching marks edges deleted so the history stays queryable through
//! [`RelationStore::edges_for`].
//!
//! Sibling groups are ordered by their order key, then the configured
//! secondary column, then `id`. The root group (entities without an active
//! edge) uses the entity table's `sort_order`; every other group uses the
//! edge's `hierarchy_sort_order`.

#![allow(
    clippy::must_use_candidate,
    clippy::module_name_repetitions,
    clippy::doc_markdown,
)]

use anyhow::{Context, Result};
use rusqlite::types::ToSql;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use std::fmt::Write as _;

use crate::model::{EntityRow, HierarchyEdge, TreeNode};
use crate::registry::EntityTypeSpec;

/// Filter and paging for child listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChildrenQuery {
    /// Only children with this archive state.
    pub archived: Option<bool>,
    /// Substring match on `name`. `%` and `_` match literally. Case folding
    /// is SQLite `LIKE` folding, which only covers ASCII letters.
    pub search: Option<String>,
    pub offset: Option<u32>,
    pub limit: Option<u32>,
    /// Fill [`TreeNode::children_count`], applying the same filter to the
    /// grandchildren.
    pub with_children_count: bool,
}

/// Accessor over one entity type's tables.
#[derive(Debug, Clone, Copy)]
pub struct RelationStore<'a> {
    conn: &'a Connection,
    spec: &'a EntityTypeSpec,
}

/// `FROM ... WHERE ...` plus `ORDER BY` for one sibling group, with the
/// positional parameters they reference.
struct GroupSql {
    from_where: String,
    order_by: String,
    params: Vec<Box<dyn ToSql>>,
}

impl<'a> RelationStore<'a> {
    pub const fn new(conn: &'a Connection, spec: &'a EntityTypeSpec) -> Self {
        Self { conn, spec }
    }

    pub const fn spec(&self) -> &'a EntityTypeSpec {
        self.spec
    }

    // -----------------------------------------------------------------------
    // Entities
    // -----------------------------------------------------------------------

    /// Fetch a live entity row.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn fetch_by_id(&self, id: &str) -> Result<Option<EntityRow>> {
        let sql = format!(
            "SELECT id, name, sort_order, is_archived FROM {} WHERE id = ?1 AND deleted = ?2",
            self.spec.table
        );
        self.conn
            .query_row(&sql, params![id, false], row_to_entity)
            .optional()
            .with_context(|| format!("fetch {} '{id}'", self.spec.entity_type))
    }

    /// `true` iff no active edge has `entity_id = id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn is_root(&self, id: &str) -> Result<bool> {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE entity_id = ?1 AND deleted = ?2)",
            self.spec.hierarchy_table
        );
        let has_edge: bool = self
            .conn
            .query_row(&sql, params![id, false], |row| row.get(0))
            .with_context(|| format!("is_root '{id}'"))?;
        Ok(!has_edge)
    }

    /// The live parent row of `id`. With several parents, the one attached
    /// first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn parent_of(&self, id: &str) -> Result<Option<EntityRow>> {
        let sql = format!(
            "SELECT t.id, t.name, t.sort_order, t.is_archived \
             FROM {h} h JOIN {t} t ON t.id = h.parent_id \
             WHERE h.entity_id = ?1 AND h.deleted = ?2 AND t.deleted = ?2 \
             ORDER BY h.rowid LIMIT 1",
            h = self.spec.hierarchy_table,
            t = self.spec.table,
        );
        self.conn
            .query_row(&sql, params![id, false], row_to_entity)
            .optional()
            .with_context(|| format!("parent_of '{id}'"))
    }

    /// Ids of the live parents of `id`, in attach order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn parent_ids(&self, id: &str) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT h.parent_id FROM {h} h JOIN {t} t ON t.id = h.parent_id \
             WHERE h.entity_id = ?1 AND h.deleted = ?2 AND t.deleted = ?2 \
             ORDER BY h.rowid",
            h = self.spec.hierarchy_table,
            t = self.spec.table,
        );
        self.query_strings(&sql, params![id, false])
            .with_context(|| format!("parent_ids '{id}'"))
    }

    /// Ids of the live children of `id`, in attach order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn child_ids(&self, id: &str) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT h.entity_id FROM {h} h JOIN {t} t ON t.id = h.entity_id \
             WHERE h.parent_id = ?1 AND h.deleted = ?2 AND t.deleted = ?2 \
             ORDER BY h.rowid",
            h = self.spec.hierarchy_table,
            t = self.spec.table,
        );
        self.query_strings(&sql, params![id, false])
            .with_context(|| format!("child_ids '{id}'"))
    }

    // -----------------------------------------------------------------------
    // Sibling groups
    // -----------------------------------------------------------------------

    /// Ids of a whole sibling group in its current order. `None` selects
    /// the root group.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn sibling_ids(&self, parent_id: Option<&str>) -> Result<Vec<String>> {
        let group = self.group_sql(parent_id, &ChildrenQuery::default());
        let sql = format!("SELECT e.id {} {}", group.from_where, group.order_by);
        self.query_strings(&sql, params_from_iter(group.params.iter()))
            .with_context(|| format!("sibling_ids under {parent_id:?}"))
    }

    /// Children of `parent_id` (or the roots) in sibling order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn children_of(
        &self,
        parent_id: Option<&str>,
        query: &ChildrenQuery,
    ) -> Result<Vec<TreeNode>> {
        let group = self.group_sql(parent_id, query);

        let count_column = if query.with_children_count {
            format!(
                ", (SELECT COUNT(*) FROM {h} r JOIN {t} c ON c.id = r.entity_id \
                 WHERE r.parent_id = e.id AND r.deleted = ?1 AND c.deleted = ?1{filter})",
                h = self.spec.hierarchy_table,
                t = self.spec.table,
                filter = filter_clause("c", query, first_filter_index(parent_id)),
            )
        } else {
            String::new()
        };

        let limit_clause = match (query.limit, query.offset) {
            (Some(limit), Some(offset)) => format!(" LIMIT {limit} OFFSET {offset}"),
            (Some(limit), None) => format!(" LIMIT {limit}"),
            (None, Some(offset)) => format!(" LIMIT -1 OFFSET {offset}"),
            (None, None) => String::new(),
        };

        let sql = format!(
            "SELECT e.id, e.name, e.sort_order, e.is_archived{count_column} {} {}{limit_clause}",
            group.from_where, group.order_by
        );

        let mut stmt = self
            .conn
            .prepare(&sql)
            .with_context(|| format!("prepare children_of query: {sql}"))?;
        let with_count = query.with_children_count;
        let rows = stmt
            .query_map(params_from_iter(group.params.iter()), |row| {
                let children_count = if with_count {
                    let count: i64 = row.get(4)?;
                    Some(u64::try_from(count).unwrap_or(0))
                } else {
                    None
                };
                Ok(TreeNode {
                    entity: row_to_entity(row)?,
                    children_count,
                })
            })
            .context("execute children_of query")?;

        let mut nodes = Vec::new();
        for row in rows {
            nodes.push(row.context("read child row")?);
        }
        Ok(nodes)
    }

    /// Number of children matching `query` (paging fields are ignored).
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn children_count(&self, parent_id: Option<&str>, query: &ChildrenQuery) -> Result<u64> {
        let group = self.group_sql(parent_id, query);
        let sql = format!("SELECT COUNT(*) {}", group.from_where);
        let count: i64 = self
            .conn
            .query_row(&sql, params_from_iter(group.params.iter()), |row| row.get(0))
            .with_context(|| format!("children_count under {parent_id:?}"))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// 1-based rank of `entity_id` within the group of `parent_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn position_of(&self, entity_id: &str, parent_id: Option<&str>) -> Result<Option<u64>> {
        let mut group = self.group_sql(parent_id, &ChildrenQuery::default());
        group.params.push(Box::new(entity_id.to_string()));
        let sql = format!(
            "SELECT position FROM (SELECT e.id AS id, ROW_NUMBER() OVER ({}) AS position {}) \
             WHERE id = ?{}",
            group.order_by,
            group.from_where,
            group.params.len()
        );
        let position: Option<i64> = self
            .conn
            .query_row(&sql, params_from_iter(group.params.iter()), |row| row.get(0))
            .optional()
            .with_context(|| format!("position_of '{entity_id}'"))?;
        Ok(position.and_then(|p| u64::try_from(p).ok()))
    }

    /// Largest `sort_order` in the root group.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn max_root_order(&self) -> Result<Option<i64>> {
        let group = self.group_sql(None, &ChildrenQuery::default());
        let sql = format!("SELECT MAX(e.sort_order) {}", group.from_where);
        self.conn
            .query_row(&sql, params_from_iter(group.params.iter()), |row| row.get(0))
            .context("max_root_order")
    }

    /// `true` if any live entity has more than one active parent edge.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn has_multiple_parents(&self) -> Result<bool> {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {h} r JOIN {t} e ON e.id = r.entity_id \
             WHERE r.deleted = ?1 AND e.deleted = ?1 \
             GROUP BY r.entity_id HAVING COUNT(*) > 1)",
            h = self.spec.hierarchy_table,
            t = self.spec.table,
        );
        self.conn
            .query_row(&sql, params![false], |row| row.get(0))
            .context("has_multiple_parents")
    }

    // -----------------------------------------------------------------------
    // Edges
    // -----------------------------------------------------------------------

    /// Edges of `entity_id` in insertion order, optionally including the
    /// soft-deleted history.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn edges_for(&self, entity_id: &str, include_deleted: bool) -> Result<Vec<HierarchyEdge>> {
        let filter = if include_deleted { "" } else { " AND deleted = ?2" };
        let sql = format!(
            "SELECT id, entity_id, parent_id, hierarchy_sort_order, deleted \
             FROM {} WHERE entity_id = ?1{filter} ORDER BY rowid",
            self.spec.hierarchy_table
        );
        let mut stmt = self.conn.prepare(&sql).context("prepare edges_for")?;
        let map_edge = |row: &Row<'_>| -> rusqlite::Result<HierarchyEdge> {
            Ok(HierarchyEdge {
                id: row.get(0)?,
                entity_id: row.get(1)?,
                parent_id: row.get(2)?,
                sort_order: row.get(3)?,
                deleted: row.get(4)?,
            })
        };
        let rows = if include_deleted {
            stmt.query_map(params![entity_id], map_edge)
        } else {
            stmt.query_map(params![entity_id, false], map_edge)
        }
        .with_context(|| format!("execute edges_for '{entity_id}'"))?;

        let mut edges = Vec::new();
        for row in rows {
            edges.push(row.context("read edge row")?);
        }
        Ok(edges)
    }

    /// Ensure an active edge `entity_id → parent_id` exists. Returns its id
    /// and whether it was created by this call.
    ///
    /// # Errors
    ///
    /// Returns an error if the query or insert fails; a concurrent insert of
    /// the same edge fails on the unique active-edge index.
    pub fn upsert_edge(&self, entity_id: &str, parent_id: &str) -> Result<(String, bool)> {
        let select = format!(
            "SELECT id FROM {} WHERE entity_id = ?1 AND parent_id = ?2 AND deleted = ?3",
            self.spec.hierarchy_table
        );
        let existing: Option<String> = self
            .conn
            .query_row(&select, params![entity_id, parent_id, false], |row| row.get(0))
            .optional()
            .with_context(|| format!("look up edge '{entity_id}' -> '{parent_id}'"))?;
        if let Some(id) = existing {
            return Ok((id, false));
        }

        let id = uuid::Uuid::new_v4().simple().to_string();
        let insert = format!(
            "INSERT INTO {} (id, entity_id, parent_id, hierarchy_sort_order, deleted) \
             VALUES (?1, ?2, ?3, NULL, ?4)",
            self.spec.hierarchy_table
        );
        self.conn
            .execute(&insert, params![id, entity_id, parent_id, false])
            .with_context(|| format!("insert edge '{entity_id}' -> '{parent_id}'"))?;
        Ok((id, true))
    }

    /// Soft-delete every active parent edge of `entity_id`. Returns the
    /// parent ids that were detached.
    ///
    /// # Errors
    ///
    /// Returns an error if the query or update fails.
    pub fn delete_edges(&self, entity_id: &str) -> Result<Vec<String>> {
        let select = format!(
            "SELECT parent_id FROM {} WHERE entity_id = ?1 AND deleted = ?2 ORDER BY rowid",
            self.spec.hierarchy_table
        );
        let parents = self
            .query_strings(&select, params![entity_id, false])
            .with_context(|| format!("list edges of '{entity_id}'"))?;

        let update = format!(
            "UPDATE {} SET deleted = ?1 WHERE entity_id = ?2 AND deleted = ?3",
            self.spec.hierarchy_table
        );
        self.conn
            .execute(&update, params![true, entity_id, false])
            .with_context(|| format!("soft-delete edges of '{entity_id}'"))?;
        Ok(parents)
    }

    /// Soft-delete the active edge `entity_id → parent_id`. Returns `false`
    /// if there was none.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn delete_edge(&self, entity_id: &str, parent_id: &str) -> Result<bool> {
        let update = format!(
            "UPDATE {} SET deleted = ?1 WHERE entity_id = ?2 AND parent_id = ?3 AND deleted = ?4",
            self.spec.hierarchy_table
        );
        let changed = self
            .conn
            .execute(&update, params![true, entity_id, parent_id, false])
            .with_context(|| format!("soft-delete edge '{entity_id}' -> '{parent_id}'"))?;
        Ok(changed > 0)
    }

    /// Set the order key of the active edge `entity_id → parent_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn set_edge_order(&self, parent_id: &str, entity_id: &str, order: i64) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET hierarchy_sort_order = ?1 \
             WHERE parent_id = ?2 AND entity_id = ?3 AND deleted = ?4",
            self.spec.hierarchy_table
        );
        self.conn
            .execute(&sql, params![order, parent_id, entity_id, false])
            .with_context(|| format!("set edge order '{entity_id}' under '{parent_id}'"))?;
        Ok(())
    }

    /// Set the root-level order key of `entity_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn set_root_order(&self, entity_id: &str, order: i64) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET sort_order = ?1 WHERE id = ?2 AND deleted = ?3",
            self.spec.table
        );
        self.conn
            .execute(&sql, params![order, entity_id, false])
            .with_context(|| format!("set root order '{entity_id}'"))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn group_sql(&self, parent_id: Option<&str>, query: &ChildrenQuery) -> GroupSql {
        let t = &self.spec.table;
        let h = &self.spec.hierarchy_table;
        let sort = format!("e.{} {}", self.spec.sort.column, self.spec.sort.direction());

        let mut params: Vec<Box<dyn ToSql>> = vec![Box::new(false)];
        let (mut from_where, order_by) = match parent_id {
            None => (
                format!(
                    "FROM {t} e WHERE e.deleted = ?1 \
                     AND e.id NOT IN (SELECT entity_id FROM {h} WHERE deleted = ?1)"
                ),
                format!("ORDER BY e.sort_order ASC, {sort}, e.id ASC"),
            ),
            Some(parent_id) => {
                params.push(Box::new(parent_id.to_string()));
                (
                    format!(
                        "FROM {h} h JOIN {t} e ON e.id = h.entity_id \
                         WHERE h.deleted = ?1 AND e.deleted = ?1 AND h.parent_id = ?2 \
                         AND EXISTS (SELECT 1 FROM {t} p \
                                     WHERE p.id = h.parent_id AND p.deleted = ?1)"
                    ),
                    format!("ORDER BY h.hierarchy_sort_order ASC, {sort}, e.id ASC"),
                )
            }
        };

        from_where.push_str(&filter_clause("e", query, params.len() + 1));
        if let Some(archived) = query.archived {
            params.push(Box::new(archived));
        }
        if let Some(ref search) = query.search {
            params.push(Box::new(like_pattern(search)));
        }

        GroupSql {
            from_where,
            order_by,
            params,
        }
    }

    fn query_strings<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .with_context(|| format!("prepare query: {sql}"))?;
        let rows = stmt.query_map(params, |row| row.get(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row.context("read id row")?);
        }
        Ok(ids)
    }
}

const fn first_filter_index(parent_id: Option<&str>) -> usize {
    if parent_id.is_some() { 3 } else { 2 }
}

/// `AND` conditions for `query` on table alias `alias`, numbering
/// parameters from `first`. Parameters are pushed by the caller in the same
/// order: `archived`, then `search`.
fn filter_clause(alias: &str, query: &ChildrenQuery, first: usize) -> String {
    let mut clause = String::new();
    let mut index = first;
    if query.archived.is_some() {
        let _ = write!(clause, " AND {alias}.is_archived = ?{index}");
        index += 1;
    }
    if query.search.is_some() {
        let _ = write!(clause, " AND {alias}.name LIKE ?{index} ESCAPE '\\'");
    }
    clause
}

fn like_pattern(search: &str) -> String {
    let escaped = search
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn row_to_entity(row: &Row<'_>) -> rusqlite::Result<EntityRow> {
    Ok(EntityRow {
        id: row.get(0)?,
        name: row.get(1)?,
        sort_order: row.get(2)?,
        is_archived: row.get(3)?,
    })
}
