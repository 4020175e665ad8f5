//! canopy-core library.
//!
//! Parent/child hierarchies between entities of one type, stored in SQLite
//! next to the entity table. Edges are never hard-deleted, cycles are
//! rejected before anything is written, and every sibling group carries
//! dense order keys.
//!
//! Entry points: build an [`EntityTypeRegistry`] from a [`HierarchyConfig`],
//! open a connection with [`db::open_store`], then ask the registry for a
//! [`HierarchyService`] per entity type.
//!
//! # Conventions
//!
//! - **Errors**: storage code returns `anyhow::Result` with context; public
//!   operations return [`HierarchyError`], which wraps storage failures.
//! - **Logging**: `tracing` macros. `debug!` for walks and reorders,
//!   `info!` for committed mutations, `warn!` for corrupt stored graphs.

pub mod config;
pub mod db;
pub mod error;
pub mod graph;
pub mod model;
pub mod registry;
pub mod service;

pub use config::HierarchyConfig;
pub use db::store::ChildrenQuery;
pub use error::{ErrorCode, HierarchyError, Role};
pub use graph::order::Position;
pub use model::{Entity, EntityRow, ParentRef, Record, RouteEntry, TreeNode};
pub use registry::{EntityTypeRegistry, EntityTypeSpec, HierarchyPolicy};
pub use service::{HierarchyService, PreparedRelation, Relation};
