//! Sibling order keys.
//!
//! Every sibling group is stored with keys `0, 10, 20, ...` in display
//! order. Any structural change rewrites the whole affected group, so keys
//! are dense and deterministic after every mutation. Concurrent rewrites of
//! the same group are not locked here: the last transaction to commit wins.

#![allow(
    clippy::must_use_candidate,
    clippy::module_name_repetitions,
)]

use anyhow::bail;
use std::fmt;
use std::str::FromStr;

use crate::db::store::RelationStore;
use crate::error::HierarchyError;

/// Distance between consecutive order keys.
pub const ORDER_STEP: i64 = 10;

/// Where an entity lands relative to the anchor sibling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Before,
    After,
    /// First child of the target parent; the anchor is ignored.
    Inside,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Before => f.write_str("before"),
            Self::After => f.write_str("after"),
            Self::Inside => f.write_str("inside"),
        }
    }
}

impl FromStr for Position {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "before" => Ok(Self::Before),
            "after" => Ok(Self::After),
            "inside" => Ok(Self::Inside),
            other => bail!("unknown position '{other}': expected one of before, after, inside"),
        }
    }
}

/// Insert `inserted` into `siblings` relative to `anchor`.
///
/// `inserted` is removed from `siblings` first. A missing or unknown anchor
/// appends for [`Position::Before`] and [`Position::After`].
pub fn splice(
    siblings: &[String],
    inserted: &str,
    anchor: Option<&str>,
    position: Position,
) -> Vec<String> {
    let mut ids: Vec<String> = siblings
        .iter()
        .filter(|id| id.as_str() != inserted)
        .cloned()
        .collect();

    let at = match position {
        Position::Inside => 0,
        Position::Before | Position::After => {
            match anchor.and_then(|a| ids.iter().position(|id| id == a)) {
                Some(i) if position == Position::Before => i,
                Some(i) => i + 1,
                None => ids.len(),
            }
        }
    };
    ids.insert(at, inserted.to_string());
    ids
}

/// Order key for the sibling at `index`.
pub fn order_key(index: usize) -> i64 {
    i64::try_from(index).map_or(i64::MAX, |i| i.saturating_mul(ORDER_STEP))
}

/// Rewrites order keys for one entity type.
#[derive(Debug, Clone, Copy)]
pub struct OrderManager<'a> {
    store: RelationStore<'a>,
}

impl<'a> OrderManager<'a> {
    pub const fn new(store: RelationStore<'a>) -> Self {
        Self { store }
    }

    /// Place `inserted` in the group of `parent_id` (root group for `None`)
    /// and rewrite the group. Returns the resulting sequence.
    ///
    /// For a non-root group the edge `inserted → parent_id` must already be
    /// active; for the root group `inserted` must have no active edge.
    ///
    /// # Errors
    ///
    /// Returns [`HierarchyError::Storage`] if a read or write fails.
    pub fn reorder(
        &self,
        parent_id: Option<&str>,
        inserted: &str,
        anchor: Option<&str>,
        position: Position,
    ) -> Result<Vec<String>, HierarchyError> {
        let siblings = self.store.sibling_ids(parent_id)?;
        let sequence = splice(&siblings, inserted, anchor, position);
        tracing::debug!(
            parent = ?parent_id,
            inserted,
            anchor = ?anchor,
            %position,
            size = sequence.len(),
            "reordering sibling group"
        );
        self.apply_sequence(parent_id, &sequence)?;
        Ok(sequence)
    }

    /// Rewrite the group of `parent_id` keeping its current order.
    ///
    /// # Errors
    ///
    /// Returns [`HierarchyError::Storage`] if a read or write fails.
    pub fn rebalance(&self, parent_id: Option<&str>) -> Result<Vec<String>, HierarchyError> {
        let sequence = self.store.sibling_ids(parent_id)?;
        self.apply_sequence(parent_id, &sequence)?;
        Ok(sequence)
    }

    /// Persist `ids` as the order of the group of `parent_id`. Ids outside
    /// the group are left untouched by the store's scoping.
    ///
    /// # Errors
    ///
    /// Returns [`HierarchyError::Storage`] if a write fails.
    pub fn apply_sequence(
        &self,
        parent_id: Option<&str>,
        ids: &[String],
    ) -> Result<(), HierarchyError> {
        for (index, id) in ids.iter().enumerate() {
            let key = order_key(index);
            match parent_id {
                Some(parent_id) => self.store.set_edge_order(parent_id, id, key)?,
                None => self.store.set_root_order(id, key)?,
            }
        }
        Ok(())
    }

    /// Key that appends to the end of the root group: the current maximum
    /// plus [`ORDER_STEP`], or `0` for an empty group.
    ///
    /// # Errors
    ///
    /// Returns [`HierarchyError::Storage`] if the read fails.
    pub fn next_root_order(&self) -> Result<i64, HierarchyError> {
        Ok(self
            .store
            .max_root_order()?
            .map_or(0, |max| max.saturating_add(ORDER_STEP)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;
    use crate::registry::EntityTypeSpec;
    use proptest::prelude::*;
    use rusqlite::{Connection, params};

    fn v(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| (*s).to_string()).collect()
    }

    // -----------------------------------------------------------------------
    // splice
    // -----------------------------------------------------------------------

    #[test]
    fn splice_after_anchor() {
        assert_eq!(
            splice(&v(&["a", "b", "c"]), "x", Some("a"), Position::After),
            v(&["a", "x", "b", "c"])
        );
        assert_eq!(
            splice(&v(&["a", "b", "c"]), "x", Some("c"), Position::After),
            v(&["a", "b", "c", "x"])
        );
    }

    #[test]
    fn splice_before_anchor() {
        assert_eq!(
            splice(&v(&["a", "b", "c"]), "x", Some("a"), Position::Before),
            v(&["x", "a", "b", "c"])
        );
        assert_eq!(
            splice(&v(&["a", "b", "c"]), "x", Some("c"), Position::Before),
            v(&["a", "b", "x", "c"])
        );
    }

    #[test]
    fn splice_inside_goes_first_and_ignores_anchor() {
        assert_eq!(splice(&v(&["a", "b"]), "x", Some("b"), Position::Inside), v(&["x", "a", "b"]));
        assert_eq!(splice(&[], "x", None, Position::Inside), v(&["x"]));
    }

    #[test]
    fn splice_moves_existing_member() {
        assert_eq!(
            splice(&v(&["a", "b", "c"]), "a", Some("c"), Position::After),
            v(&["b", "c", "a"])
        );
        assert_eq!(
            splice(&v(&["a", "b", "c"]), "c", Some("a"), Position::Before),
            v(&["c", "a", "b"])
        );
    }

    #[test]
    fn splice_unknown_anchor_appends() {
        assert_eq!(splice(&v(&["a", "b"]), "x", Some("zz"), Position::Before), v(&["a", "b", "x"]));
        assert_eq!(splice(&v(&["a", "b"]), "x", None, Position::After), v(&["a", "b", "x"]));
        // anchoring on itself behaves like an unknown anchor
        assert_eq!(splice(&v(&["a", "b"]), "a", Some("a"), Position::After), v(&["b", "a"]));
    }

    #[test]
    fn position_parses() {
        assert_eq!("after".parse::<Position>().unwrap(), Position::After);
        assert_eq!(" Before ".parse::<Position>().unwrap(), Position::Before);
        assert_eq!("INSIDE".parse::<Position>().unwrap(), Position::Inside);
        assert!("below".parse::<Position>().is_err());
        assert_eq!(Position::Inside.to_string(), "inside");
    }

    #[test]
    fn order_keys_step_by_ten() {
        assert_eq!(order_key(0), 0);
        assert_eq!(order_key(1), 10);
        assert_eq!(order_key(7), 70);
    }

    proptest! {
        #[test]
        fn prop_splice_is_a_permutation_plus_inserted(
            siblings in proptest::collection::hash_set("[a-f]{1,3}", 0..12),
            anchor_pick in 0usize..16,
            pos in 0u8..3,
        ) {
            let siblings: Vec<String> = siblings.into_iter().collect();
            let anchor = siblings.get(anchor_pick).map(String::as_str);
            let position = match pos {
                0 => Position::Before,
                1 => Position::After,
                _ => Position::Inside,
            };
            let out = splice(&siblings, "new", anchor, position);

            prop_assert_eq!(out.len(), siblings.len() + 1);
            prop_assert_eq!(out.iter().filter(|id| id.as_str() == "new").count(), 1);
            let rest: Vec<&String> = out.iter().filter(|id| id.as_str() != "new").collect();
            let original: Vec<&String> = siblings.iter().collect();
            prop_assert_eq!(rest, original);
        }
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    fn test_db(spec: &EntityTypeSpec) -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        schema::ensure_tables(&conn, spec).expect("create tables");
        conn
    }

    fn insert_entity(conn: &Connection, id: &str, sort_order: Option<i64>) {
        conn.execute(
            "INSERT INTO category (id, name, sort_order) VALUES (?1, ?1, ?2)",
            params![id, sort_order],
        )
        .expect("insert entity");
    }

    fn insert_edge(conn: &Connection, entity_id: &str, parent_id: &str, order: i64) {
        conn.execute(
            "INSERT INTO category_hierarchy (id, entity_id, parent_id, hierarchy_sort_order) \
             VALUES (?1, ?2, ?3, ?4)",
            params![format!("{entity_id}->{parent_id}"), entity_id, parent_id, order],
        )
        .expect("insert edge");
    }

    fn edge_keys(conn: &Connection, parent_id: &str) -> Vec<(String, i64)> {
        let mut stmt = conn
            .prepare(
                "SELECT entity_id, hierarchy_sort_order FROM category_hierarchy \
                 WHERE parent_id = ?1 AND deleted = 0 ORDER BY hierarchy_sort_order",
            )
            .unwrap();
        let keys = stmt
            .query_map(params![parent_id], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        keys
    }

    fn root_keys(conn: &Connection) -> Vec<(String, i64)> {
        let mut stmt = conn
            .prepare("SELECT id, sort_order FROM category WHERE id LIKE 'r%' ORDER BY sort_order")
            .unwrap();
        let keys = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        keys
    }

    fn keyed(ids: &[&str]) -> Vec<(String, i64)> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| ((*id).to_string(), order_key(i)))
            .collect()
    }

    #[test]
    fn reorder_child_group_rewrites_keys() {
        let spec = EntityTypeSpec::new("Category").unwrap();
        let conn = test_db(&spec);
        insert_entity(&conn, "p", None);
        for (id, key) in [("a", 3), ("b", 7), ("c", 500), ("x", 1000)] {
            insert_entity(&conn, id, None);
            insert_edge(&conn, id, "p", key);
        }
        let orders = OrderManager::new(RelationStore::new(&conn, &spec));

        let seq = orders.reorder(Some("p"), "x", Some("a"), Position::After).unwrap();
        assert_eq!(seq, v(&["a", "x", "b", "c"]));
        assert_eq!(edge_keys(&conn, "p"), keyed(&["a", "x", "b", "c"]));

        // same target sequence again: same keys
        orders.reorder(Some("p"), "x", Some("a"), Position::After).unwrap();
        assert_eq!(edge_keys(&conn, "p"), keyed(&["a", "x", "b", "c"]));
    }

    #[test]
    fn reorder_root_group_uses_entity_sort_order() {
        let spec = EntityTypeSpec::new("Category").unwrap();
        let conn = test_db(&spec);
        insert_entity(&conn, "r1", Some(5));
        insert_entity(&conn, "r2", Some(6));
        insert_entity(&conn, "r3", None);
        let orders = OrderManager::new(RelationStore::new(&conn, &spec));

        orders.reorder(None, "r3", Some("r1"), Position::Before).unwrap();
        assert_eq!(root_keys(&conn), keyed(&["r3", "r1", "r2"]));
    }

    #[test]
    fn rebalance_closes_gaps() {
        let spec = EntityTypeSpec::new("Category").unwrap();
        let conn = test_db(&spec);
        insert_entity(&conn, "p", None);
        for (id, key) in [("a", 0), ("b", 40), ("c", 45)] {
            insert_entity(&conn, id, None);
            insert_edge(&conn, id, "p", key);
        }
        let orders = OrderManager::new(RelationStore::new(&conn, &spec));

        assert_eq!(orders.rebalance(Some("p")).unwrap(), v(&["a", "b", "c"]));
        assert_eq!(edge_keys(&conn, "p"), keyed(&["a", "b", "c"]));
    }

    #[test]
    fn next_root_order_appends() {
        let spec = EntityTypeSpec::new("Category").unwrap();
        let conn = test_db(&spec);
        let orders = OrderManager::new(RelationStore::new(&conn, &spec));
        assert_eq!(orders.next_root_order().unwrap(), 0);

        insert_entity(&conn, "r1", Some(30));
        insert_entity(&conn, "r2", None);
        assert_eq!(orders.next_root_order().unwrap(), 40);
    }
}
