//! Cycle prevention for proposed parent/child edges.
//!
//! An edge `child → parent` closes a loop exactly when `parent` is already
//! below `child` (or is `child` itself). The guard answers that question
//! in either direction, before anything is written:
//!
//! - choosing a **parent** for an entity: the candidate must not be in the
//!   entity's descendant set
//! - choosing a **child** for an entity: the candidate must not be in the
//!   entity's ancestor set

#![allow(clippy::must_use_candidate)]

use crate::error::{HierarchyError, Role};
use crate::graph::traversal::GraphTraversal;

#[derive(Debug, Clone, Copy)]
pub struct CycleGuard<'a> {
    traversal: GraphTraversal<'a>,
}

impl<'a> CycleGuard<'a> {
    pub const fn new(traversal: GraphTraversal<'a>) -> Self {
        Self { traversal }
    }

    /// Fail unless `candidate_parent_id` can become a parent of `entity_id`.
    ///
    /// # Errors
    ///
    /// Returns [`HierarchyError::CyclicRelation`] if the candidate is the
    /// entity itself or one of its descendants, or
    /// [`HierarchyError::Storage`] if a read fails.
    pub fn ensure_can_attach_parent(
        &self,
        entity_id: &str,
        candidate_parent_id: &str,
    ) -> Result<(), HierarchyError> {
        if entity_id == candidate_parent_id
            || self
                .traversal
                .descendants_of(entity_id)?
                .contains(candidate_parent_id)
        {
            return Err(HierarchyError::CyclicRelation {
                entity_id: entity_id.to_string(),
                related_id: candidate_parent_id.to_string(),
                role: Role::Parent,
            });
        }
        Ok(())
    }

    /// Fail unless `candidate_child_id` can become a child of `entity_id`.
    ///
    /// # Errors
    ///
    /// Returns [`HierarchyError::CyclicRelation`] if the candidate is the
    /// entity itself or one of its ancestors, or
    /// [`HierarchyError::Storage`] if a read fails.
    pub fn ensure_can_attach_child(
        &self,
        entity_id: &str,
        candidate_child_id: &str,
    ) -> Result<(), HierarchyError> {
        if entity_id == candidate_child_id
            || self
                .traversal
                .ancestors_of(entity_id)?
                .contains(candidate_child_id)
        {
            return Err(HierarchyError::CyclicRelation {
                entity_id: entity_id.to_string(),
                related_id: candidate_child_id.to_string(),
                role: Role::Child,
            });
        }
        Ok(())
    }

    /// Boolean form of [`Self::ensure_can_attach_parent`].
    ///
    /// # Errors
    ///
    /// Returns [`HierarchyError::Storage`] if a read fails.
    pub fn can_attach_as_parent(
        &self,
        entity_id: &str,
        candidate_parent_id: &str,
    ) -> Result<bool, HierarchyError> {
        swallow_cycle(self.ensure_can_attach_parent(entity_id, candidate_parent_id))
    }

    /// Boolean form: may `child_id` be attached under `parent_id`?
    ///
    /// # Errors
    ///
    /// Returns [`HierarchyError::Storage`] if a read fails.
    pub fn can_attach(&self, child_id: &str, parent_id: &str) -> Result<bool, HierarchyError> {
        swallow_cycle(self.ensure_can_attach_child(parent_id, child_id))
    }
}

fn swallow_cycle(result: Result<(), HierarchyError>) -> Result<bool, HierarchyError> {
    match result {
        Ok(()) => Ok(true),
        Err(HierarchyError::CyclicRelation { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}
