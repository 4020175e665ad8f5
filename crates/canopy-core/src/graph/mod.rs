//! Graph-level operations over one entity type's relation table.
//!
//! ## Submodules
//!
//! - [`traversal`]: ancestor/descendant sets and breadcrumb routes.
//! - [`cycles`]: rejects edges that would make an entity its own ancestor.
//! - [`order`]: dense sibling order keys and repositioning.

pub mod cycles;
pub mod order;
pub mod traversal;
