//! Per-entity-type hierarchy configuration.
//!
//! A config file looks like:
//!
//! ```toml
//! [app]
//! non_inherited_fields = ["id", "createdAt"]
//!
//! [entities.Category]
//! multi_parents = false
//! has_archive = true
//! sort_by = "name"
//!
//! [entities.Category.fields.code]
//! type = "varchar"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyConfig {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub entities: BTreeMap<String, EntityTypeConfig>,
}

/// Settings shared by every entity type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub non_inherited_fields: Vec<String>,
    #[serde(default)]
    pub non_inherited_relations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityTypeConfig {
    /// Entity table name. Defaults to the snake_case type name.
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub multi_parents: bool,
    #[serde(default)]
    pub has_archive: bool,
    /// Secondary sibling sort field, applied after the order key.
    #[serde(default = "default_sort_by")]
    pub sort_by: String,
    #[serde(default = "default_true")]
    pub asc: bool,
    #[serde(default)]
    pub un_inherited_fields: Vec<String>,
    #[serde(default)]
    pub mandatory_un_inherited_fields: Vec<String>,
    #[serde(default)]
    pub un_inherited_relations: Vec<String>,
    #[serde(default)]
    pub mandatory_un_inherited_relations: Vec<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldConfig>,
    #[serde(default)]
    pub links: BTreeMap<String, LinkConfig>,
}

impl Default for EntityTypeConfig {
    fn default() -> Self {
        Self {
            table: None,
            multi_parents: false,
            has_archive: false,
            sort_by: default_sort_by(),
            asc: default_true(),
            un_inherited_fields: Vec::new(),
            mandatory_un_inherited_fields: Vec::new(),
            un_inherited_relations: Vec::new(),
            mandatory_un_inherited_relations: Vec::new(),
            fields: BTreeMap::new(),
            links: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldConfig {
    #[serde(rename = "type", default = "default_field_type")]
    pub field_type: String,
    /// Computed fields have no column and are never inherited.
    #[serde(default)]
    pub not_storable: bool,
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            field_type: default_field_type(),
            not_storable: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    #[serde(rename = "type")]
    pub link_type: String,
    #[serde(default)]
    pub relation_name: Option<String>,
}

impl HierarchyConfig {
    /// Parse a TOML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid TOML or does not match
    /// the config shape.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content).context("Failed to parse hierarchy config")
    }

    /// Read and parse a config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        toml::from_str::<Self>(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }
}

fn default_true() -> bool {
    true
}

fn default_sort_by() -> String {
    "name".to_string()
}

fn default_field_type() -> String {
    "varchar".to_string()
}
