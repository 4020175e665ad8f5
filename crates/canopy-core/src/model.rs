//! Row types and the entity collaborator contract.
//!
//! Entities belong to the surrounding record layer. The engine only sees
//! them through [`Entity`] (for hooks) or as [`EntityRow`]s read back from
//! the entity table.

#![allow(clippy::must_use_candidate)]

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Root-level sibling order key.
pub const SORT_ORDER: &str = "sortOrder";
/// Archive flag checked by the archive policy.
pub const IS_ARCHIVED: &str = "isArchived";
/// Proposed parent ids carried by an entity being saved.
pub const PARENTS_IDS: &str = "parentsIds";
/// Proposed child ids carried by an entity being saved.
pub const CHILDREN_IDS: &str = "childrenIds";

/// A record as exposed by the entity layer.
pub trait Entity {
    fn id(&self) -> &str;
    fn get(&self, attribute: &str) -> Option<&Value>;
    fn set(&mut self, attribute: &str, value: Value);
    fn is_new(&self) -> bool;
    fn is_attribute_changed(&self, attribute: &str) -> bool;
}

/// In-memory [`Entity`] that tracks which attributes were set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    id: String,
    #[serde(default)]
    attributes: Map<String, Value>,
    #[serde(skip)]
    changed: BTreeSet<String>,
    #[serde(skip)]
    is_new: bool,
}

impl Record {
    /// A record that does not exist in storage yet.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_new: true,
            ..Self::default()
        }
    }

    /// A record loaded from storage with the given attributes; nothing is
    /// marked as changed.
    pub fn loaded(id: impl Into<String>, attributes: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            attributes,
            ..Self::default()
        }
    }

    /// Builder form of [`Entity::set`].
    #[must_use]
    pub fn with(mut self, attribute: &str, value: impl Into<Value>) -> Self {
        self.set(attribute, value.into());
        self
    }
}

impl Entity for Record {
    fn id(&self) -> &str {
        &self.id
    }

    fn get(&self, attribute: &str) -> Option<&Value> {
        self.attributes.get(attribute)
    }

    fn set(&mut self, attribute: &str, value: Value) {
        if self.attributes.get(attribute) != Some(&value) {
            self.changed.insert(attribute.to_string());
        }
        self.attributes.insert(attribute.to_string(), value);
    }

    fn is_new(&self) -> bool {
        self.is_new
    }

    fn is_attribute_changed(&self, attribute: &str) -> bool {
        self.changed.contains(attribute)
    }
}

/// Read a string-list attribute such as [`PARENTS_IDS`]. Non-string
/// elements are ignored.
pub fn id_list(entity: &impl Entity, attribute: &str) -> Vec<String> {
    match entity.get(attribute) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// A live row of the entity table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRow {
    pub id: String,
    pub name: Option<String>,
    pub sort_order: Option<i64>,
    pub is_archived: bool,
}

/// A row of the `<table>_hierarchy` relation table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyEdge {
    pub id: String,
    pub entity_id: String,
    pub parent_id: String,
    pub sort_order: Option<i64>,
    pub deleted: bool,
}

/// A child listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub entity: EntityRow,
    /// Filled only when requested by the query.
    pub children_count: Option<u64>,
}

/// One breadcrumb step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    pub id: String,
    pub label: Option<String>,
}

/// How a caller names the other side of a relate operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentRef {
    Id(String),
    /// Anything that is not a usable reference.
    Unspecified,
}

impl ParentRef {
    /// Interpret a loosely typed value from the request layer: a non-empty
    /// string, or an object with a non-empty string `id`.
    pub fn from_value(value: &Value) -> Self {
        let id = match value {
            Value::String(s) => Some(s.as_str()),
            Value::Object(map) => map.get("id").and_then(Value::as_str),
            _ => None,
        };
        match id {
            Some(id) if !id.trim().is_empty() => Self::Id(id.to_string()),
            _ => Self::Unspecified,
        }
    }
}

impl From<&str> for ParentRef {
    fn from(id: &str) -> Self {
        Self::from_value(&Value::String(id.to_string()))
    }
}

impl From<String> for ParentRef {
    fn from(id: String) -> Self {
        Self::from_value(&Value::String(id))
    }
}

impl From<&EntityRow> for ParentRef {
    fn from(row: &EntityRow) -> Self {
        Self::Id(row.id.clone())
    }
}
