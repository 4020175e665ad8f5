//! Per-type hierarchy operations: save/relate hooks, transactional
//! mutations, and the read surface.
//!
//! Mutations take `&mut Connection` and run inside one `IMMEDIATE`
//! transaction, so the cycle check and the edge write see the same graph.
//! Either every edge and order-key write of a mutation commits or none does.

#![allow(
    clippy::must_use_candidate,
    clippy::module_name_repetitions,
    clippy::doc_markdown,
)]

use anyhow::Context;
use rusqlite::{Connection, TransactionBehavior};
use serde_json::Value;
use std::collections::HashSet;

use crate::db::store::{ChildrenQuery, RelationStore};
use crate::error::HierarchyError;
use crate::graph::cycles::CycleGuard;
use crate::graph::order::{OrderManager, Position};
use crate::graph::traversal::GraphTraversal;
use crate::model::{
    CHILDREN_IDS, Entity, EntityRow, IS_ARCHIVED, PARENTS_IDS, ParentRef, RouteEntry, SORT_ORDER,
    TreeNode, id_list,
};
use crate::registry::EntityTypeSpec;

/// Which side of an edge a relate call names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// The foreign entity becomes a parent of the entity.
    Parents,
    /// The foreign entity becomes a child of the entity.
    Children,
}

/// A relate request that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRelation {
    pub child_id: String,
    pub parent_id: String,
    /// Sibling groups the child left while preparing (`None` is the root
    /// group). They need a rebalance once the edge is written.
    pub vacated: Vec<Option<String>>,
}

#[derive(Debug, Clone)]
pub struct HierarchyService {
    spec: EntityTypeSpec,
}

impl HierarchyService {
    pub const fn new(spec: EntityTypeSpec) -> Self {
        Self { spec }
    }

    pub const fn spec(&self) -> &EntityTypeSpec {
        &self.spec
    }

    fn store<'a>(&'a self, conn: &'a Connection) -> RelationStore<'a> {
        RelationStore::new(conn, &self.spec)
    }

    fn traversal<'a>(&'a self, conn: &'a Connection) -> GraphTraversal<'a> {
        GraphTraversal::new(self.store(conn))
    }

    fn guard<'a>(&'a self, conn: &'a Connection) -> CycleGuard<'a> {
        CycleGuard::new(self.traversal(conn))
    }

    fn orders<'a>(&'a self, conn: &'a Connection) -> OrderManager<'a> {
        OrderManager::new(self.store(conn))
    }

    // -----------------------------------------------------------------------
    // Hooks
    // -----------------------------------------------------------------------

    /// Validate an entity before the record layer persists it.
    ///
    /// Checks every proposed parent and child for cycles, applies the
    /// archive policy, and fills a missing `sortOrder` with the next root
    /// order key. Nothing is written to storage.
    ///
    /// # Errors
    ///
    /// Returns [`HierarchyError::CyclicRelation`],
    /// [`HierarchyError::ChildrenNotArchived`], or
    /// [`HierarchyError::Storage`] if a read fails.
    pub fn before_save<E: Entity>(
        &self,
        conn: &Connection,
        entity: &mut E,
    ) -> Result<(), HierarchyError> {
        let guard = self.guard(conn);
        for parent_id in id_list(entity, PARENTS_IDS) {
            guard.ensure_can_attach_parent(entity.id(), &parent_id)?;
        }
        for child_id in id_list(entity, CHILDREN_IDS) {
            guard.ensure_can_attach_child(entity.id(), &child_id)?;
        }

        if self.spec.policy.has_archive
            && entity.is_attribute_changed(IS_ARCHIVED)
            && entity.get(IS_ARCHIVED).is_some_and(is_truthy)
        {
            self.ensure_can_archive(conn, entity.id())?;
        }

        if entity.get(SORT_ORDER).is_none_or(Value::is_null) {
            let next = self.orders(conn).next_root_order()?;
            tracing::debug!(
                entity_type = %self.spec.entity_type,
                id = entity.id(),
                sort_order = next,
                "assigned root sort order"
            );
            entity.set(SORT_ORDER, Value::from(next));
        }
        Ok(())
    }

    /// Validate a relate request and clear the way for the new edge.
    ///
    /// `foreign` is the other side of the edge: a parent for
    /// [`Relation::Parents`], a child for [`Relation::Children`]. When the
    /// type does not allow multiple parents, the child's other parent edges
    /// are soft-deleted here, inside the caller's transaction. Call
    /// [`Self::attach`] or [`Self::attach_child`] to run the whole relate.
    ///
    /// # Errors
    ///
    /// Returns [`HierarchyError::AmbiguousParentSpecification`] for an
    /// unusable reference, [`HierarchyError::EntityNotFound`] if either side
    /// does not exist, [`HierarchyError::CyclicRelation`], or
    /// [`HierarchyError::Storage`].
    pub fn before_relate(
        &self,
        conn: &Connection,
        entity_id: &str,
        relation: Relation,
        foreign: &ParentRef,
    ) -> Result<PreparedRelation, HierarchyError> {
        let store = self.store(conn);
        self.require(store, entity_id)?;
        let foreign_id = self.resolve(store, foreign)?;

        let guard = self.guard(conn);
        let (child_id, parent_id) = match relation {
            Relation::Parents => {
                guard.ensure_can_attach_parent(entity_id, &foreign_id)?;
                (entity_id.to_string(), foreign_id)
            }
            Relation::Children => {
                guard.ensure_can_attach_child(entity_id, &foreign_id)?;
                (foreign_id, entity_id.to_string())
            }
        };

        let vacated = if self.spec.policy.multi_parents {
            if store.is_root(&child_id)? {
                vec![None]
            } else {
                Vec::new()
            }
        } else {
            self.detach_except(store, &child_id, Some(&parent_id))?
        };

        Ok(PreparedRelation {
            child_id,
            parent_id,
            vacated,
        })
    }

    /// Fail if `id` has a live child that is not archived.
    ///
    /// # Errors
    ///
    /// Returns [`HierarchyError::ChildrenNotArchived`] or
    /// [`HierarchyError::Storage`].
    pub fn ensure_can_archive(&self, conn: &Connection, id: &str) -> Result<(), HierarchyError> {
        let live = ChildrenQuery {
            archived: Some(false),
            ..ChildrenQuery::default()
        };
        if self.store(conn).children_count(Some(id), &live)? > 0 {
            return Err(HierarchyError::ChildrenNotArchived {
                entity_id: id.to_string(),
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Make `parent` a parent of `entity_id`. The entity lands at the end of
    /// the parent's children. Attaching to a current parent changes nothing.
    ///
    /// # Errors
    ///
    /// See [`Self::before_relate`]. On error nothing is written.
    pub fn attach(
        &self,
        conn: &mut Connection,
        entity_id: &str,
        parent: &ParentRef,
    ) -> Result<(), HierarchyError> {
        self.relate(conn, entity_id, Relation::Parents, parent)
    }

    /// Make `child` a child of `entity_id`.
    ///
    /// # Errors
    ///
    /// See [`Self::before_relate`]. On error nothing is written.
    pub fn attach_child(
        &self,
        conn: &mut Connection,
        entity_id: &str,
        child: &ParentRef,
    ) -> Result<(), HierarchyError> {
        self.relate(conn, entity_id, Relation::Children, child)
    }

    fn relate(
        &self,
        conn: &mut Connection,
        entity_id: &str,
        relation: Relation,
        foreign: &ParentRef,
    ) -> Result<(), HierarchyError> {
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("begin relate transaction")?;

        let prepared = self.before_relate(&tx, entity_id, relation, foreign)?;
        let created = self.write_relation(&tx, &prepared)?;

        tx.commit().context("commit relate transaction")?;
        if created {
            tracing::info!(
                entity_type = %self.spec.entity_type,
                child = %prepared.child_id,
                parent = %prepared.parent_id,
                vacated = prepared.vacated.len(),
                "attached entity"
            );
        } else {
            tracing::debug!(
                child = %prepared.child_id,
                parent = %prepared.parent_id,
                "edge already present"
            );
        }
        Ok(())
    }

    fn write_relation(
        &self,
        conn: &Connection,
        prepared: &PreparedRelation,
    ) -> Result<bool, HierarchyError> {
        let (_, created) = self
            .store(conn)
            .upsert_edge(&prepared.child_id, &prepared.parent_id)?;
        let orders = self.orders(conn);
        if created {
            orders.reorder(
                Some(&prepared.parent_id),
                &prepared.child_id,
                None,
                Position::After,
            )?;
        }
        for group in &prepared.vacated {
            orders.rebalance(group.as_deref())?;
        }
        Ok(created)
    }

    /// Remove the edge to `parent_id`, or every parent edge when `None`.
    /// An entity left without parents is appended to the root group.
    ///
    /// # Errors
    ///
    /// Returns [`HierarchyError::EntityNotFound`] or
    /// [`HierarchyError::Storage`]. On error nothing is written.
    pub fn detach(
        &self,
        conn: &mut Connection,
        entity_id: &str,
        parent_id: Option<&str>,
    ) -> Result<(), HierarchyError> {
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("begin detach transaction")?;

        let removed = {
            let store = self.store(&tx);
            self.require(store, entity_id)?;
            let removed = match parent_id {
                Some(parent_id) => {
                    if store.delete_edge(entity_id, parent_id)? {
                        vec![parent_id.to_string()]
                    } else {
                        Vec::new()
                    }
                }
                None => store.delete_edges(entity_id)?,
            };

            let orders = self.orders(&tx);
            for parent in &removed {
                orders.rebalance(Some(parent.as_str()))?;
            }
            if !removed.is_empty() && store.is_root(entity_id)? {
                orders.reorder(None, entity_id, None, Position::After)?;
            }
            removed
        };

        tx.commit().context("commit detach transaction")?;
        if removed.is_empty() {
            tracing::debug!(entity_id, parent = ?parent_id, "nothing to detach");
        } else {
            tracing::info!(
                entity_type = %self.spec.entity_type,
                entity_id,
                parents = ?removed,
                "detached entity"
            );
        }
        Ok(())
    }

    /// Move `entity_id` under `parent_id` (or to the root group) relative
    /// to `anchor_id`, and return the new order of the target group.
    ///
    /// Every other parent edge of the entity is removed, so a moved entity
    /// has at most one parent afterwards. A missing or unknown anchor
    /// appends the entity to the group.
    ///
    /// # Errors
    ///
    /// Returns [`HierarchyError::EntityNotFound`],
    /// [`HierarchyError::CyclicRelation`], or [`HierarchyError::Storage`].
    /// On error nothing is written.
    pub fn move_to(
        &self,
        conn: &mut Connection,
        entity_id: &str,
        position: Position,
        anchor_id: Option<&str>,
        parent_id: Option<&str>,
    ) -> Result<Vec<String>, HierarchyError> {
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("begin move transaction")?;

        let sequence = {
            let store = self.store(&tx);
            self.require(store, entity_id)?;
            if let Some(parent_id) = parent_id {
                self.require(store, parent_id)?;
                self.guard(&tx).ensure_can_attach_parent(entity_id, parent_id)?;
            }

            let vacated = self.detach_except(store, entity_id, parent_id)?;
            if let Some(parent_id) = parent_id {
                store.upsert_edge(entity_id, parent_id)?;
            }

            let orders = self.orders(&tx);
            let sequence = orders.reorder(parent_id, entity_id, anchor_id, position)?;
            for group in &vacated {
                orders.rebalance(group.as_deref())?;
            }
            sequence
        };

        tx.commit().context("commit move transaction")?;
        tracing::info!(
            entity_type = %self.spec.entity_type,
            entity_id,
            parent = ?parent_id,
            anchor = ?anchor_id,
            %position,
            "moved entity"
        );
        Ok(sequence)
    }

    /// Soft-delete every active parent edge of `entity_id` except the one to
    /// `keep`, and return the groups the entity left. Leaving the root group
    /// counts when `keep` is set and the entity had no parent.
    fn detach_except(
        &self,
        store: RelationStore<'_>,
        entity_id: &str,
        keep: Option<&str>,
    ) -> Result<Vec<Option<String>>, HierarchyError> {
        let edges = store.edges_for(entity_id, false)?;
        if edges.is_empty() {
            return Ok(if keep.is_some() { vec![None] } else { Vec::new() });
        }

        let mut vacated = Vec::new();
        for edge in edges {
            if Some(edge.parent_id.as_str()) == keep {
                continue;
            }
            if store.delete_edge(entity_id, &edge.parent_id)? {
                vacated.push(Some(edge.parent_id));
            }
        }
        Ok(vacated)
    }

    fn require(&self, store: RelationStore<'_>, id: &str) -> Result<EntityRow, HierarchyError> {
        store
            .fetch_by_id(id)?
            .ok_or_else(|| HierarchyError::EntityNotFound {
                entity_type: self.spec.entity_type.clone(),
                id: id.to_string(),
            })
    }

    fn resolve(
        &self,
        store: RelationStore<'_>,
        reference: &ParentRef,
    ) -> Result<String, HierarchyError> {
        match reference {
            ParentRef::Unspecified => Err(HierarchyError::AmbiguousParentSpecification {
                entity_type: self.spec.entity_type.clone(),
            }),
            ParentRef::Id(id) => self.require(store, id).map(|row| row.id),
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Breadcrumb from the topmost ancestor down to `id` itself.
    ///
    /// # Errors
    ///
    /// Returns [`HierarchyError::Storage`] if a read fails.
    pub fn route(&self, conn: &Connection, id: &str) -> Result<Vec<RouteEntry>, HierarchyError> {
        self.traversal(conn).route_of(id)
    }

    /// Every entity above `id`, excluding `id`.
    ///
    /// # Errors
    ///
    /// Returns [`HierarchyError::Storage`] if a read fails.
    pub fn ancestors(
        &self,
        conn: &Connection,
        id: &str,
    ) -> Result<HashSet<String>, HierarchyError> {
        self.traversal(conn).ancestors_of(id)
    }

    /// Every entity below `id`, excluding `id`.
    ///
    /// # Errors
    ///
    /// Returns [`HierarchyError::Storage`] if a read fails.
    pub fn descendants(
        &self,
        conn: &Connection,
        id: &str,
    ) -> Result<HashSet<String>, HierarchyError> {
        self.traversal(conn).descendants_of(id)
    }

    /// First live parent of `id`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`HierarchyError::Storage`] if a read fails.
    pub fn parent(&self, conn: &Connection, id: &str) -> Result<Option<EntityRow>, HierarchyError> {
        Ok(self.store(conn).parent_of(id)?)
    }

    /// Children of `parent_id`, or the roots for `None`, in sibling order.
    ///
    /// # Errors
    ///
    /// Returns [`HierarchyError::Storage`] if a read fails.
    pub fn children(
        &self,
        conn: &Connection,
        parent_id: Option<&str>,
        query: &ChildrenQuery,
    ) -> Result<Vec<TreeNode>, HierarchyError> {
        Ok(self.store(conn).children_of(parent_id, query)?)
    }

    /// Number of entries [`Self::children`] would return without paging.
    ///
    /// # Errors
    ///
    /// Returns [`HierarchyError::Storage`] if a read fails.
    pub fn children_count(
        &self,
        conn: &Connection,
        parent_id: Option<&str>,
        query: &ChildrenQuery,
    ) -> Result<u64, HierarchyError> {
        Ok(self.store(conn).children_count(parent_id, query)?)
    }

    /// 1-based index of `id` in the group of `parent_id`.
    ///
    /// # Errors
    ///
    /// Returns [`HierarchyError::Storage`] if a read fails.
    pub fn position(
        &self,
        conn: &Connection,
        id: &str,
        parent_id: Option<&str>,
    ) -> Result<Option<u64>, HierarchyError> {
        Ok(self.store(conn).position_of(id, parent_id)?)
    }

    /// True when `id` has no live parent edge.
    ///
    /// # Errors
    ///
    /// Returns [`HierarchyError::Storage`] if a read fails.
    pub fn is_root(&self, conn: &Connection, id: &str) -> Result<bool, HierarchyError> {
        Ok(self.store(conn).is_root(id)?)
    }

    /// Whether any live entity of this type currently has two or more
    /// parents.
    ///
    /// # Errors
    ///
    /// Returns [`HierarchyError::Storage`] if a read fails.
    pub fn has_multiple_parents(&self, conn: &Connection) -> Result<bool, HierarchyError> {
        Ok(self.store(conn).has_multiple_parents()?)
    }

    // -----------------------------------------------------------------------
    // Inheritance
    // -----------------------------------------------------------------------

    /// Declared storable fields a child copies from its parent.
    pub fn inheritable_fields(&self) -> Vec<String> {
        let excluded: HashSet<String> = self.un_inheritable_fields().into_iter().collect();
        self.spec
            .fields
            .iter()
            .filter(|(name, field)| !field.not_storable && !excluded.contains(*name))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Fields never copied from a parent: global, mandatory, and per-type
    /// exclusions plus every un-inheritable relation.
    pub fn un_inheritable_fields(&self) -> Vec<String> {
        let rules = &self.spec.inheritance;
        let relations = self.un_inheritable_relations();
        dedup(
            rules
                .global_fields
                .iter()
                .chain(&rules.mandatory_fields)
                .chain(&rules.fields)
                .chain(&relations),
        )
    }

    /// Relations never copied from a parent. `hasMany` links without a
    /// relation name are always included.
    pub fn un_inheritable_relations(&self) -> Vec<String> {
        let rules = &self.spec.inheritance;
        let has_many = self
            .spec
            .links
            .iter()
            .filter(|(_, link)| link.link_type == "hasMany" && link.relation_name.is_none())
            .map(|(name, _)| name);
        dedup(
            rules
                .global_relations
                .iter()
                .chain(&rules.mandatory_relations)
                .chain(&rules.relations)
                .chain(has_many),
        )
    }
}

/// First occurrence wins.
fn dedup<'a>(names: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    for name in names {
        if seen.insert(name.as_str()) {
            unique.push(name.clone());
        }
    }
    unique
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => matches!(s.as_str(), "1" | "true"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FieldConfig, LinkConfig};
    use crate::db::schema;
    use crate::model::Record;
    use crate::registry::HierarchyPolicy;
    use rusqlite::params;
    use serde_json::json;

    fn spec(policy: HierarchyPolicy) -> EntityTypeSpec {
        EntityTypeSpec::new("Category").unwrap().with_policy(policy)
    }

    fn service(policy: HierarchyPolicy) -> (HierarchyService, Connection) {
        let spec = spec(policy);
        let conn = Connection::open_in_memory().expect("open in-memory db");
        schema::ensure_tables(&conn, &spec).expect("create tables");
        (HierarchyService::new(spec), conn)
    }

    fn single() -> (HierarchyService, Connection) {
        service(HierarchyPolicy::default())
    }

    fn insert(conn: &Connection, id: &str) {
        conn.execute(
            "INSERT INTO category (id, name) VALUES (?1, ?1)",
            params![id],
        )
        .expect("insert entity");
    }

    fn insert_archived(conn: &Connection, id: &str, archived: bool) {
        conn.execute(
            "INSERT INTO category (id, name, is_archived) VALUES (?1, ?1, ?2)",
            params![id, archived],
        )
        .expect("insert entity");
    }

    fn children(svc: &HierarchyService, conn: &Connection, parent: Option<&str>) -> Vec<String> {
        svc.children(conn, parent, &ChildrenQuery::default())
            .unwrap()
            .into_iter()
            .map(|node| node.entity.id)
            .collect()
    }

    fn edge_count(conn: &Connection, deleted: bool) -> i64 {
        conn.query_row(
            "SELECT COUNT(*) FROM category_hierarchy WHERE deleted = ?1",
            params![deleted],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn attach_appends_to_parent_group() {
        let (svc, mut conn) = single();
        for id in ["p", "a", "b"] {
            insert(&conn, id);
        }
        svc.attach(&mut conn, "b", &"p".into()).unwrap();
        svc.attach(&mut conn, "a", &"p".into()).unwrap();

        assert_eq!(children(&svc, &conn, Some("p")), vec!["b", "a"]);
        assert_eq!(svc.position(&conn, "a", Some("p")).unwrap(), Some(2));
        assert!(!svc.is_root(&conn, "a").unwrap());
    }

    #[test]
    fn attach_to_current_parent_is_a_no_op() {
        let (svc, mut conn) = single();
        for id in ["p", "a"] {
            insert(&conn, id);
        }
        svc.attach(&mut conn, "a", &"p".into()).unwrap();
        svc.attach(&mut conn, "a", &"p".into()).unwrap();
        assert_eq!(edge_count(&conn, false), 1);
        assert_eq!(edge_count(&conn, true), 0);
    }

    #[test]
    fn attach_child_is_the_mirror_of_attach() {
        let (svc, mut conn) = single();
        for id in ["p", "c"] {
            insert(&conn, id);
        }
        svc.attach_child(&mut conn, "p", &"c".into()).unwrap();
        assert_eq!(svc.parent(&conn, "c").unwrap().map(|r| r.id), Some("p".to_string()));
    }

    #[test]
    fn unspecified_parent_is_ambiguous() {
        let (svc, mut conn) = single();
        insert(&conn, "a");
        let err = svc
            .attach(&mut conn, "a", &ParentRef::from_value(&json!(true)))
            .unwrap_err();
        assert!(matches!(err, HierarchyError::AmbiguousParentSpecification { .. }));
    }

    #[test]
    fn unknown_parent_is_not_found() {
        let (svc, mut conn) = single();
        insert(&conn, "a");
        let err = svc.attach(&mut conn, "a", &"ghost".into()).unwrap_err();
        assert!(matches!(err, HierarchyError::EntityNotFound { ref id, .. } if id == "ghost"));
    }

    #[test]
    fn cyclic_attach_writes_nothing() {
        let (svc, mut conn) = single();
        for id in ["a", "b", "c"] {
            insert(&conn, id);
        }
        svc.attach(&mut conn, "b", &"a".into()).unwrap();
        svc.attach(&mut conn, "c", &"b".into()).unwrap();

        let err = svc.attach(&mut conn, "a", &"c".into()).unwrap_err();
        assert!(matches!(err, HierarchyError::CyclicRelation { .. }));
        assert!(svc.is_root(&conn, "a").unwrap());
        assert_eq!(edge_count(&conn, false), 2);
        assert_eq!(edge_count(&conn, true), 0);
    }

    #[test]
    fn single_parent_policy_replaces_previous_parent() {
        let (svc, mut conn) = single();
        for id in ["p1", "p2", "x", "y"] {
            insert(&conn, id);
        }
        svc.attach(&mut conn, "x", &"p1".into()).unwrap();
        svc.attach(&mut conn, "y", &"p1".into()).unwrap();
        svc.attach(&mut conn, "x", &"p2".into()).unwrap();

        assert_eq!(children(&svc, &conn, Some("p1")), vec!["y"]);
        assert_eq!(children(&svc, &conn, Some("p2")), vec!["x"]);
        assert_eq!(edge_count(&conn, true), 1);
        assert_eq!(svc.position(&conn, "y", Some("p1")).unwrap(), Some(1));
    }

    #[test]
    fn multi_parent_policy_keeps_both_parents() {
        let (svc, mut conn) = service(HierarchyPolicy {
            multi_parents: true,
            has_archive: false,
        });
        for id in ["p1", "p2", "x"] {
            insert(&conn, id);
        }
        svc.attach(&mut conn, "x", &"p1".into()).unwrap();
        svc.attach(&mut conn, "x", &"p2".into()).unwrap();

        assert!(svc.has_multiple_parents(&conn).unwrap());
        assert_eq!(svc.ancestors(&conn, "x").unwrap().len(), 2);
    }

    #[test]
    fn detach_returns_entity_to_end_of_roots() {
        let (svc, mut conn) = single();
        for id in ["r1", "r2", "c"] {
            insert(&conn, id);
        }
        svc.attach(&mut conn, "c", &"r1".into()).unwrap();
        svc.move_to(&mut conn, "r2", Position::Before, Some("r1"), None)
            .unwrap();

        svc.detach(&mut conn, "c", Some("r1")).unwrap();
        assert!(svc.is_root(&conn, "c").unwrap());
        assert_eq!(children(&svc, &conn, None), vec!["r2", "r1", "c"]);
    }

    #[test]
    fn detach_unknown_edge_changes_nothing() {
        let (svc, mut conn) = single();
        for id in ["p", "c"] {
            insert(&conn, id);
        }
        svc.attach(&mut conn, "c", &"p".into()).unwrap();
        svc.detach(&mut conn, "c", Some("elsewhere")).unwrap();
        assert_eq!(edge_count(&conn, false), 1);
    }

    #[test]
    fn move_within_group_keeps_edge() {
        let (svc, mut conn) = single();
        for id in ["p", "a", "b", "c"] {
            insert(&conn, id);
        }
        for id in ["a", "b", "c"] {
            svc.attach(&mut conn, id, &"p".into()).unwrap();
        }

        let seq = svc
            .move_to(&mut conn, "c", Position::Before, Some("a"), Some("p"))
            .unwrap();
        assert_eq!(seq, vec!["c", "a", "b"]);
        assert_eq!(children(&svc, &conn, Some("p")), vec!["c", "a", "b"]);
        assert_eq!(edge_count(&conn, true), 0);
    }

    #[test]
    fn move_inside_puts_entity_first() {
        let (svc, mut conn) = single();
        for id in ["p", "a", "x"] {
            insert(&conn, id);
        }
        svc.attach(&mut conn, "a", &"p".into()).unwrap();

        let seq = svc
            .move_to(&mut conn, "x", Position::Inside, None, Some("p"))
            .unwrap();
        assert_eq!(seq, vec!["x", "a"]);
        assert_eq!(children(&svc, &conn, None), vec!["p"]);
    }

    #[test]
    fn move_into_own_subtree_is_rejected() {
        let (svc, mut conn) = single();
        for id in ["a", "b"] {
            insert(&conn, id);
        }
        svc.attach(&mut conn, "b", &"a".into()).unwrap();
        let err = svc
            .move_to(&mut conn, "a", Position::Inside, None, Some("b"))
            .unwrap_err();
        assert!(matches!(err, HierarchyError::CyclicRelation { .. }));
        assert!(svc.is_root(&conn, "a").unwrap());
    }

    #[test]
    fn before_save_assigns_next_root_order() {
        let (svc, conn) = single();
        conn.execute(
            "INSERT INTO category (id, name, sort_order) VALUES ('r', 'r', 20)",
            [],
        )
        .unwrap();

        let mut fresh = Record::new("new");
        svc.before_save(&conn, &mut fresh).unwrap();
        assert_eq!(fresh.get(SORT_ORDER), Some(&json!(30)));

        let mut placed = Record::new("placed").with(SORT_ORDER, 5);
        svc.before_save(&conn, &mut placed).unwrap();
        assert_eq!(placed.get(SORT_ORDER), Some(&json!(5)));
    }

    #[test]
    fn before_save_rejects_cyclic_proposals() {
        let (svc, mut conn) = single();
        for id in ["a", "b"] {
            insert(&conn, id);
        }
        svc.attach(&mut conn, "b", &"a".into()).unwrap();

        let mut a = Record::loaded("a", serde_json::Map::new()).with(PARENTS_IDS, json!(["b"]));
        assert!(matches!(
            svc.before_save(&conn, &mut a),
            Err(HierarchyError::CyclicRelation { .. })
        ));

        let mut b = Record::loaded("b", serde_json::Map::new()).with(CHILDREN_IDS, json!(["a"]));
        assert!(svc.before_save(&conn, &mut b).is_err());
    }

    #[test]
    fn archive_requires_archived_children() {
        let (svc, mut conn) = service(HierarchyPolicy {
            multi_parents: false,
            has_archive: true,
        });
        insert_archived(&conn, "p", false);
        insert_archived(&conn, "c", false);
        svc.attach(&mut conn, "c", &"p".into()).unwrap();

        let mut p = Record::loaded("p", serde_json::Map::new()).with(IS_ARCHIVED, true);
        let err = svc.before_save(&conn, &mut p).unwrap_err();
        assert!(
            matches!(err, HierarchyError::ChildrenNotArchived { ref entity_id } if entity_id == "p")
        );

        conn.execute("UPDATE category SET is_archived = ?1 WHERE id = 'c'", params![true])
            .unwrap();
        let mut p = Record::loaded("p", serde_json::Map::new()).with(IS_ARCHIVED, true);
        svc.before_save(&conn, &mut p).unwrap();
    }

    #[test]
    fn archive_policy_off_ignores_children() {
        let (svc, mut conn) = single();
        insert(&conn, "p");
        insert(&conn, "c");
        svc.attach(&mut conn, "c", &"p".into()).unwrap();
        let mut p = Record::loaded("p", serde_json::Map::new()).with(IS_ARCHIVED, true);
        svc.before_save(&conn, &mut p).unwrap();
    }

    #[test]
    fn inheritance_lists() {
        let mut spec = EntityTypeSpec::new("Category").unwrap();
        for (name, not_storable) in [("color", false), ("code", false), ("virtual", true)] {
            spec.fields.insert(
                name.to_string(),
                FieldConfig {
                    field_type: "varchar".to_string(),
                    not_storable,
                },
            );
        }
        spec.links.insert(
            "notes".to_string(),
            LinkConfig {
                link_type: "hasMany".to_string(),
                relation_name: None,
            },
        );
        spec.links.insert(
            "tags".to_string(),
            LinkConfig {
                link_type: "hasMany".to_string(),
                relation_name: Some("categoryTag".to_string()),
            },
        );
        spec.inheritance.global_fields = vec!["createdAt".to_string()];
        spec.inheritance.fields = vec!["code".to_string(), "createdAt".to_string()];
        spec.inheritance.relations = vec!["owner".to_string()];
        let svc = HierarchyService::new(spec);

        assert_eq!(svc.un_inheritable_relations(), vec!["owner", "notes"]);
        assert_eq!(
            svc.un_inheritable_fields(),
            vec!["createdAt", "code", "owner", "notes"]
        );
        assert_eq!(svc.inheritable_fields(), vec!["color"]);
    }
}
