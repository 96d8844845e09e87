//! Model definitions: attribute map, index list, and model-level options.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::attribute::{AttributeDef, DataType};

/// Attribute holding the row creation time on timestamped models.
pub const CREATED_AT: &str = "createdAt";

/// Attribute holding the last update time on timestamped models.
pub const UPDATED_AT: &str = "updatedAt";

/// Attribute holding the soft-delete time on paranoid models.
pub const DELETED_AT: &str = "deletedAt";

/// One index declared on a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDef {
    /// Indexed attributes, in index order.
    pub fields: Vec<String>,

    /// Unique index.
    #[serde(default)]
    pub unique: bool,

    /// Index type (`UNIQUE`, `FULLTEXT`, ...), if declared.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub index_type: Option<String>,

    /// Explicit index name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Every other index option (method, partial predicate, ...).
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl IndexDef {
    /// Create a non-unique index over the given fields.
    pub fn on(fields: &[&str]) -> Self {
        Self {
            fields: fields.iter().map(|f| (*f).to_owned()).collect(),
            unique: false,
            index_type: None,
            name: None,
            extra: BTreeMap::new(),
        }
    }

    /// Mark the index unique.
    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Whether the index enforces uniqueness, either by flag or by type.
    pub fn is_unique(&self) -> bool {
        self.unique
            || self
                .index_type
                .as_deref()
                .is_some_and(|t| t.eq_ignore_ascii_case("UNIQUE"))
    }
}

/// Model-level options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelOptions {
    /// Display name override for the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Backing table name; defaults to the model name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,

    /// Maintain `createdAt` / `updatedAt` automatically.
    #[serde(default = "default_true")]
    pub timestamps: bool,

    /// Soft-delete through `deletedAt` instead of removing rows.
    #[serde(default)]
    pub paranoid: bool,

    /// Declared indexes.
    #[serde(default)]
    pub indexes: Vec<IndexDef>,

    /// Named composite unique constraints.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub unique_keys: BTreeMap<String, Vec<String>>,

    /// Whether the model declares a primary key; filled in by the host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_primary_key: Option<bool>,

    /// Names of declaratively registered hooks.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hooks: Vec<String>,

    /// Named query scopes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scopes: BTreeMap<String, Value>,

    /// Scope applied to every query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_scope: Option<Value>,

    /// Names of instance methods attached to the model.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instance_methods: Vec<String>,

    /// Data-source (connection) the model is bound to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,

    /// Database schema (namespace) holding the table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Table comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    /// Every other option, carried through untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

const fn default_true() -> bool {
    true
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            name: None,
            table_name: None,
            timestamps: true,
            paranoid: false,
            indexes: Vec::new(),
            unique_keys: BTreeMap::new(),
            has_primary_key: None,
            hooks: Vec::new(),
            scopes: BTreeMap::new(),
            default_scope: None,
            instance_methods: Vec::new(),
            connection: None,
            schema: None,
            comment: None,
            extra: BTreeMap::new(),
        }
    }
}

/// A complete model definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDefinition {
    /// Logical model name.
    pub name: String,

    /// Attributes keyed by name.
    pub attributes: BTreeMap<String, AttributeDef>,

    /// Model-level options.
    #[serde(default)]
    pub options: ModelOptions,
}

impl ModelDefinition {
    /// Create an empty definition with default options.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            attributes: BTreeMap::new(),
            options: ModelOptions::default(),
        }
    }

    /// Add (or replace) an attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: &str, attribute: AttributeDef) -> Self {
        self.attributes.insert(name.to_owned(), attribute);
        self
    }

    /// Replace the model options.
    #[must_use]
    pub fn with_options(mut self, options: ModelOptions) -> Self {
        self.options = options;
        self
    }

    /// Add an index.
    #[must_use]
    pub fn with_index(mut self, index: IndexDef) -> Self {
        self.options.indexes.push(index);
        self
    }

    /// Backing table name.
    pub fn table_name(&self) -> &str {
        self.options.table_name.as_deref().unwrap_or(&self.name)
    }

    /// Look up an attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.get(name)
    }

    /// Names of the primary-key attributes.
    pub fn primary_keys(&self) -> Vec<&str> {
        self.attributes
            .iter()
            .filter(|(_, attr)| attr.primary_key)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Soft deletes only apply when timestamps are maintained.
    pub const fn is_paranoid(&self) -> bool {
        self.options.paranoid && self.options.timestamps
    }

    /// Complete the definition the way a host does at define time.
    ///
    /// Adds the `createdAt` / `updatedAt` attributes on timestamped models,
    /// `deletedAt` on paranoid ones, tags every attribute with its owning
    /// model, and records whether a primary key is present.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.options.timestamps {
            for name in [CREATED_AT, UPDATED_AT] {
                self.attributes
                    .entry(name.to_owned())
                    .or_insert_with(|| AttributeDef::new(DataType::Date).not_null());
            }
        }
        if self.is_paranoid() {
            self.attributes
                .entry(DELETED_AT.to_owned())
                .or_insert_with(|| AttributeDef::new(DataType::Date));
        }
        for attribute in self.attributes.values_mut() {
            if attribute.model.is_none() {
                attribute.model = Some(self.name.clone());
            }
        }
        self.options.has_primary_key = Some(self.attributes.values().any(|a| a.primary_key));
        self
    }
}
