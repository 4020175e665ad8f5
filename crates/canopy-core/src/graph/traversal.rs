//! Recursive ancestor/descendant resolution over the relation table.
//!
//! All walks are breadth-first with one store round trip per visited node
//! and a visited set. The set is what guarantees termination when storage
//! holds a cycle that the cycle guard should have prevented: a revisit is
//! logged and not expanded again. The start node is never part of its own
//! ancestor or descendant set.

#![allow(
    clippy::must_use_candidate,
    clippy::module_name_repetitions,
    clippy::doc_markdown,
)]

use std::collections::{HashSet, VecDeque};

use crate::db::store::RelationStore;
use crate::error::HierarchyError;
use crate::model::RouteEntry;

/// Read-only graph walks for one entity type.
#[derive(Debug, Clone, Copy)]
pub struct GraphTraversal<'a> {
    store: RelationStore<'a>,
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Up,
    Down,
}

impl<'a> GraphTraversal<'a> {
    pub const fn new(store: RelationStore<'a>) -> Self {
        Self { store }
    }

    /// Every entity reachable by following active parent edges from `id`.
    ///
    /// # Errors
    ///
    /// Returns [`HierarchyError::Storage`] if a read fails.
    pub fn ancestors_of(&self, id: &str) -> Result<HashSet<String>, HierarchyError> {
        self.collect(id, Direction::Up)
    }

    /// Every entity reachable by following active child edges from `id`.
    ///
    /// # Errors
    ///
    /// Returns [`HierarchyError::Storage`] if a read fails.
    pub fn descendants_of(&self, id: &str) -> Result<HashSet<String>, HierarchyError> {
        self.collect(id, Direction::Down)
    }

    /// Breadcrumb from the root down to the immediate parent of `id`.
    /// Empty for a root. With several parents, follows the first one.
    ///
    /// # Errors
    ///
    /// Returns [`HierarchyError::Storage`] if a read fails.
    pub fn route_of(&self, id: &str) -> Result<Vec<RouteEntry>, HierarchyError> {
        let mut route = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(id.to_string());

        let mut current = id.to_string();
        while let Some(parent) = self.store.parent_of(&current)? {
            if !visited.insert(parent.id.clone()) {
                tracing::warn!(
                    entity_type = %self.store.spec().entity_type,
                    id,
                    repeated = %parent.id,
                    "corrupt hierarchy: route walk met a cycle, truncating"
                );
                break;
            }
            current.clone_from(&parent.id);
            route.push(RouteEntry {
                id: parent.id,
                label: parent.name,
            });
        }

        route.reverse();
        Ok(route)
    }

    fn collect(
        &self,
        start: &str,
        direction: Direction,
    ) -> Result<HashSet<String>, HierarchyError> {
        let mut found: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        queue.push_back(start.to_string());

        while let Some(current) = queue.pop_front() {
            let next = match direction {
                Direction::Up => self.store.parent_ids(&current)?,
                Direction::Down => self.store.child_ids(&current)?,
            };
            for id in next {
                if id == start {
                    tracing::warn!(
                        entity_type = %self.store.spec().entity_type,
                        start,
                        via = %current,
                        ?direction,
                        "corrupt hierarchy: entity reachable from itself"
                    );
                    continue;
                }
                if found.insert(id.clone()) {
                    queue.push_back(id);
                }
            }
        }

        tracing::debug!(start, ?direction, count = found.len(), "hierarchy walk finished");
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;
    use crate::registry::{EntityTypeSpec, HierarchyPolicy};
    use rusqlite::{Connection, params};

    fn spec() -> EntityTypeSpec {
        EntityTypeSpec::new("Category")
            .unwrap()
            .with_policy(HierarchyPolicy {
                multi_parents: true,
                has_archive: false,
            })
    }

    fn test_db(spec: &EntityTypeSpec) -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        schema::ensure_tables(&conn, spec).expect("create tables");
        conn
    }

    fn insert_entity(conn: &Connection, id: &str) {
        conn.execute(
            "INSERT INTO category (id, name) VALUES (?1, ?2)",
            params![id, format!("Name of {id}")],
        )
        .expect("insert entity");
    }

    /// Insert an edge directly, bypassing the cycle guard.
    fn insert_edge(conn: &Connection, entity_id: &str, parent_id: &str) {
        conn.execute(
            "INSERT INTO category_hierarchy (id, entity_id, parent_id) VALUES (?1, ?2, ?3)",
            params![format!("{entity_id}->{parent_id}"), entity_id, parent_id],
        )
        .expect("insert edge");
    }

    fn set(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| (*s).to_string()).collect()
    }

    /// A -> B -> C, plus A -> D.
    fn chain(conn: &Connection) {
        for id in ["a", "b", "c", "d"] {
            insert_entity(conn, id);
        }
        insert_edge(conn, "b", "a");
        insert_edge(conn, "c", "b");
        insert_edge(conn, "d", "a");
    }

    #[test]
    fn ancestors_of_leaf() {
        let spec = spec();
        let conn = test_db(&spec);
        chain(&conn);
        let walk = GraphTraversal::new(RelationStore::new(&conn, &spec));

        assert_eq!(walk.ancestors_of("c").unwrap(), set(&["a", "b"]));
        assert!(walk.ancestors_of("a").unwrap().is_empty());
    }

    #[test]
    fn descendants_of_root() {
        let spec = spec();
        let conn = test_db(&spec);
        chain(&conn);
        let walk = GraphTraversal::new(RelationStore::new(&conn, &spec));

        assert_eq!(walk.descendants_of("a").unwrap(), set(&["b", "c", "d"]));
        assert!(walk.descendants_of("c").unwrap().is_empty());
    }

    #[test]
    fn multi_parent_diamond_is_deduplicated() {
        // top -> left, top -> right, both -> bottom
        let spec = spec();
        let conn = test_db(&spec);
        for id in ["top", "left", "right", "bottom"] {
            insert_entity(&conn, id);
        }
        insert_edge(&conn, "left", "top");
        insert_edge(&conn, "right", "top");
        insert_edge(&conn, "bottom", "left");
        insert_edge(&conn, "bottom", "right");
        let walk = GraphTraversal::new(RelationStore::new(&conn, &spec));

        assert_eq!(walk.ancestors_of("bottom").unwrap(), set(&["left", "right", "top"]));
        assert_eq!(walk.descendants_of("top").unwrap(), set(&["left", "right", "bottom"]));
    }

    #[test]
    fn deleted_edges_and_entities_are_invisible() {
        let spec = spec();
        let conn = test_db(&spec);
        chain(&conn);
        conn.execute("UPDATE category_hierarchy SET deleted = 1 WHERE entity_id = 'c'", [])
            .unwrap();
        conn.execute("UPDATE category SET deleted = 1 WHERE id = 'd'", []).unwrap();
        let walk = GraphTraversal::new(RelationStore::new(&conn, &spec));

        assert_eq!(walk.descendants_of("a").unwrap(), set(&["b"]));
        assert!(walk.ancestors_of("c").unwrap().is_empty());
    }

    #[test]
    fn corrupt_cycle_terminates_and_excludes_start() {
        let spec = spec();
        let conn = test_db(&spec);
        for id in ["x", "y", "z"] {
            insert_entity(&conn, id);
        }
        insert_edge(&conn, "y", "x");
        insert_edge(&conn, "z", "y");
        insert_edge(&conn, "x", "z");
        let walk = GraphTraversal::new(RelationStore::new(&conn, &spec));

        assert_eq!(walk.ancestors_of("x").unwrap(), set(&["y", "z"]));
        assert_eq!(walk.descendants_of("x").unwrap(), set(&["y", "z"]));
        assert_eq!(walk.route_of("x").unwrap().len(), 2);
    }

    #[test]
    fn route_of_root_is_empty() {
        let spec = spec();
        let conn = test_db(&spec);
        chain(&conn);
        let walk = GraphTraversal::new(RelationStore::new(&conn, &spec));
        assert!(walk.route_of("a").unwrap().is_empty());
    }

    #[test]
    fn route_is_top_down_with_labels() {
        let spec = spec();
        let conn = test_db(&spec);
        chain(&conn);
        let walk = GraphTraversal::new(RelationStore::new(&conn, &spec));

        let route = walk.route_of("c").unwrap();
        let ids: Vec<&str> = route.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(route[1].label.as_deref(), Some("Name of b"));
    }
}
