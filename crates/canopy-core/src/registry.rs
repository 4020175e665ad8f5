//! Typed registry of hierarchical entity types.
//!
//! Every entity type named in the config is resolved once into an
//! [`EntityTypeSpec`]: table names, sibling ordering, policy flags and the
//! inheritance lists. Identifiers are validated here because they are
//! spliced into SQL text by the store.

#![allow(
    clippy::must_use_candidate,
    clippy::module_name_repetitions,
)]

use std::collections::BTreeMap;

use crate::config::{AppConfig, FieldConfig, HierarchyConfig, LinkConfig};
use crate::error::HierarchyError;
use crate::service::HierarchyService;

/// Columns every entity table carries regardless of declared fields.
pub const CORE_COLUMNS: &[&str] = &["id", "name", "sort_order", "is_archived", "deleted"];

/// Policy flags for one entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HierarchyPolicy {
    /// An entity may keep several active parent edges.
    pub multi_parents: bool,
    /// Archived entities are terminal: a parent may only be archived once
    /// all of its children are.
    pub has_archive: bool,
}

/// Secondary sort applied inside a sibling group after the order key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiblingSort {
    /// Entity-table column.
    pub column: String,
    pub ascending: bool,
}

impl SiblingSort {
    pub(crate) const fn direction(&self) -> &'static str {
        if self.ascending { "ASC" } else { "DESC" }
    }
}

/// Field and relation lists driving inheritance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InheritanceRules {
    pub global_fields: Vec<String>,
    pub global_relations: Vec<String>,
    pub mandatory_fields: Vec<String>,
    pub fields: Vec<String>,
    pub mandatory_relations: Vec<String>,
    pub relations: Vec<String>,
}

/// One fully resolved entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityTypeSpec {
    pub entity_type: String,
    pub table: String,
    pub hierarchy_table: String,
    pub policy: HierarchyPolicy,
    pub sort: SiblingSort,
    pub fields: BTreeMap<String, FieldConfig>,
    pub links: BTreeMap<String, LinkConfig>,
    pub inheritance: InheritanceRules,
}

impl EntityTypeSpec {
    /// A spec with default policy and no declared fields, for a type whose
    /// table name is derived from `entity_type`.
    ///
    /// # Errors
    ///
    /// Returns [`HierarchyError::InvalidConfig`] if the derived table name is
    /// not a valid identifier.
    pub fn new(entity_type: &str) -> Result<Self, HierarchyError> {
        let table = to_snake_case(entity_type);
        validate_identifier(&table)?;
        Ok(Self {
            entity_type: entity_type.to_string(),
            hierarchy_table: format!("{table}_hierarchy"),
            table,
            policy: HierarchyPolicy::default(),
            sort: SiblingSort {
                column: "name".to_string(),
                ascending: true,
            },
            fields: BTreeMap::new(),
            links: BTreeMap::new(),
            inheritance: InheritanceRules::default(),
        })
    }

    #[must_use]
    pub const fn with_policy(mut self, policy: HierarchyPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Declared fields that have a column in the entity table, with their
    /// column names. Core columns are never redeclared.
    pub fn storable_columns(&self) -> impl Iterator<Item = (String, &FieldConfig)> + '_ {
        self.fields
            .iter()
            .filter(|(_, field)| !field.not_storable)
            .map(|(name, field)| (to_snake_case(name), field))
            .filter(|(column, _)| !CORE_COLUMNS.contains(&column.as_str()))
    }

    fn has_column(&self, column: &str) -> bool {
        CORE_COLUMNS.contains(&column) || self.storable_columns().any(|(c, _)| c == column)
    }

    fn resolve(
        entity_type: &str,
        config: &crate::config::EntityTypeConfig,
        app: &AppConfig,
    ) -> Result<Self, HierarchyError> {
        let table = config
            .table
            .clone()
            .unwrap_or_else(|| to_snake_case(entity_type));
        validate_identifier(&table)?;

        let spec = Self {
            entity_type: entity_type.to_string(),
            hierarchy_table: format!("{table}_hierarchy"),
            table,
            policy: HierarchyPolicy {
                multi_parents: config.multi_parents,
                has_archive: config.has_archive,
            },
            sort: SiblingSort {
                column: to_snake_case(&config.sort_by),
                ascending: config.asc,
            },
            fields: config.fields.clone(),
            links: config.links.clone(),
            inheritance: InheritanceRules {
                global_fields: app.non_inherited_fields.clone(),
                global_relations: app.non_inherited_relations.clone(),
                mandatory_fields: config.mandatory_un_inherited_fields.clone(),
                fields: config.un_inherited_fields.clone(),
                mandatory_relations: config.mandatory_un_inherited_relations.clone(),
                relations: config.un_inherited_relations.clone(),
            },
        };

        for (column, _) in spec.storable_columns() {
            validate_identifier(&column)?;
        }
        if !spec.has_column(&spec.sort.column) {
            return Err(HierarchyError::InvalidConfig(format!(
                "{entity_type}: sort_by '{}' is not a column of '{}'",
                config.sort_by, spec.table
            )));
        }

        Ok(spec)
    }
}

/// Entity type name → resolved spec.
#[derive(Debug, Clone, Default)]
pub struct EntityTypeRegistry {
    types: BTreeMap<String, EntityTypeSpec>,
}

impl EntityTypeRegistry {
    /// Resolve every `[entities.*]` block.
    ///
    /// # Errors
    ///
    /// Returns [`HierarchyError::InvalidConfig`] for invalid identifiers,
    /// an unknown `sort_by` column, or two types sharing a table.
    pub fn from_config(config: &HierarchyConfig) -> Result<Self, HierarchyError> {
        let mut registry = Self::default();
        for (entity_type, entity_config) in &config.entities {
            registry.register(EntityTypeSpec::resolve(entity_type, entity_config, &config.app)?)?;
        }
        Ok(registry)
    }

    /// Add one spec.
    ///
    /// # Errors
    ///
    /// Returns [`HierarchyError::InvalidConfig`] if the type or its table is
    /// already registered.
    pub fn register(&mut self, spec: EntityTypeSpec) -> Result<(), HierarchyError> {
        if let Some(existing) = self.types.values().find(|s| s.table == spec.table) {
            return Err(HierarchyError::InvalidConfig(format!(
                "{} and {} both map to table '{}'",
                existing.entity_type, spec.entity_type, spec.table
            )));
        }
        tracing::debug!(
            entity_type = %spec.entity_type,
            table = %spec.table,
            multi_parents = spec.policy.multi_parents,
            has_archive = spec.policy.has_archive,
            "registered hierarchy entity type"
        );
        self.types.insert(spec.entity_type.clone(), spec);
        Ok(())
    }

    /// Look up a resolved spec.
    ///
    /// # Errors
    ///
    /// Returns [`HierarchyError::UnknownEntityType`] if not registered.
    pub fn get(&self, entity_type: &str) -> Result<&EntityTypeSpec, HierarchyError> {
        self.types
            .get(entity_type)
            .ok_or_else(|| HierarchyError::UnknownEntityType(entity_type.to_string()))
    }

    /// Build the service for one entity type.
    ///
    /// # Errors
    ///
    /// Returns [`HierarchyError::UnknownEntityType`] if not registered.
    pub fn service(&self, entity_type: &str) -> Result<HierarchyService, HierarchyError> {
        Ok(HierarchyService::new(self.get(entity_type)?.clone()))
    }

    pub fn specs(&self) -> impl Iterator<Item = &EntityTypeSpec> {
        self.types.values()
    }
}

/// `AssetCategory` → `asset_category`, `sortOrder` → `sort_order`.
pub fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

fn validate_identifier(name: &str) -> Result<(), HierarchyError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(HierarchyError::InvalidConfig(format!(
            "'{name}' is not a valid SQL identifier"
        )))
    }
}
