//! Error taxonomy for hierarchy operations.
//!
//! [`HierarchyError`] is what every public operation returns. Each variant
//! maps to a stable [`ErrorCode`] so a surrounding service layer can make
//! decisions without matching on message text.

#![allow(clippy::module_name_repetitions)]

use std::fmt;

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidConfig,
    UnknownEntityType,
    EntityNotFound,
    CyclicRelation,
    ChildrenNotArchived,
    AmbiguousParentSpecification,
    StorageConflict,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::InvalidConfig => "E1001",
            Self::UnknownEntityType => "E1002",
            Self::EntityNotFound => "E2001",
            Self::CyclicRelation => "E2002",
            Self::ChildrenNotArchived => "E2003",
            Self::AmbiguousParentSpecification => "E2004",
            Self::StorageConflict => "E5001",
        }
    }

    /// Short human-facing summary for logs.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::InvalidConfig => "Invalid hierarchy configuration",
            Self::UnknownEntityType => "Entity type is not registered",
            Self::EntityNotFound => "Entity not found",
            Self::CyclicRelation => "Relation would create a cycle",
            Self::ChildrenNotArchived => "Children must be archived first",
            Self::AmbiguousParentSpecification => "Parent or child not specified",
            Self::StorageConflict => "Storage operation failed",
        }
    }

    /// Optional remediation hint for operators and callers.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::InvalidConfig => Some("Fix the hierarchy configuration file and retry."),
            Self::UnknownEntityType => Some("Register the entity type under [entities.<Type>]."),
            Self::EntityNotFound => None,
            Self::CyclicRelation => {
                Some("Pick a parent outside the entity's subtree, or a child outside its ancestry.")
            }
            Self::ChildrenNotArchived => Some("Archive every child record before the parent."),
            Self::AmbiguousParentSpecification => Some("Pass the id of an existing record."),
            Self::StorageConflict => {
                Some("Retry the transaction once. If persistent, check the database.")
            }
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Which side of an edge a related record would take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Parent,
    Child,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parent => f.write_str("parent"),
            Self::Child => f.write_str("child"),
        }
    }
}

/// Errors surfaced by the hierarchy engine.
#[derive(Debug, thiserror::Error)]
pub enum HierarchyError {
    /// `related_id` cannot become a `role` of `entity_id` without closing a
    /// loop (or it is `entity_id` itself).
    #[error("'{related_id}' cannot be chosen as a {role} of '{entity_id}': the relation would create a cycle")]
    CyclicRelation {
        entity_id: String,
        related_id: String,
        role: Role,
    },

    /// Archiving was requested while at least one child is still live.
    #[error("'{entity_id}' cannot be archived while it has non-archived children")]
    ChildrenNotArchived { entity_id: String },

    /// The caller passed something that is not a record reference.
    #[error("action blocked: specify a {entity_type} record")]
    AmbiguousParentSpecification { entity_type: String },

    #[error("{entity_type} '{id}' not found")]
    EntityNotFound { entity_type: String, id: String },

    #[error("entity type '{0}' is not registered")]
    UnknownEntityType(String),

    #[error("invalid hierarchy configuration: {0}")]
    InvalidConfig(String),

    /// Any failure of the underlying store, including commit conflicts.
    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl HierarchyError {
    /// Machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::CyclicRelation { .. } => ErrorCode::CyclicRelation,
            Self::ChildrenNotArchived { .. } => ErrorCode::ChildrenNotArchived,
            Self::AmbiguousParentSpecification { .. } => ErrorCode::AmbiguousParentSpecification,
            Self::EntityNotFound { .. } => ErrorCode::EntityNotFound,
            Self::UnknownEntityType(_) => ErrorCode::UnknownEntityType,
            Self::InvalidConfig(_) => ErrorCode::InvalidConfig,
            Self::Storage(_) => ErrorCode::StorageConflict,
        }
    }

    /// Optional remediation hint for this error.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}
