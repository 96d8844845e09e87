//! The history derivation: live model definition in, history model
//! definition out.
//!
//! # Attribute rules
//!
//! | Live attribute | History attribute |
//! |----------------|-------------------|
//! | any | same type, default, and extra options |
//! | `primaryKey` / `unique` / `autoIncrement` | cleared |
//! | getter / setter / owning model / host marker | removed |
//! | `allowNull` | always `true` |
//! | `createdAt` / `updatedAt` | plain `DATE`, no default |
//!
//! Two attributes are added: `hid` (big-integer sequence, primary key) and
//! `archivedAt` (non-null, defaults to the insert time).
//!
//! # Index rules
//!
//! Unique indexes are dropped. Every surviving index is renamed
//! `{history}_{field}_{field}...` so it cannot collide with the live
//! model's index names.

use serde::{Deserialize, Serialize};
use tempora_types::{
    AttributeDef, CREATED_AT, DataType, DefaultValue, IndexDef, ModelDefinition, ModelOptions,
    UPDATED_AT,
};

/// Suffix appended to the live model name to name its history model.
pub const HISTORY_SUFFIX: &str = "History";

/// Sequence id attribute of every history model.
pub const HISTORY_ID: &str = "hid";

/// Archival timestamp attribute of every history model.
pub const ARCHIVED_AT: &str = "archivedAt";

/// Which lifecycle transitions produce history rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingMode {
    /// Snapshot the row after every create, update, destroy, and restore.
    Full,
    /// Snapshot the prior state before every update and destroy.
    #[default]
    Diff,
}

impl TrackingMode {
    /// Select the mode from a `full` flag.
    pub const fn from_full(full: bool) -> Self {
        if full { Self::Full } else { Self::Diff }
    }
}

/// A derived history model together with the live model it shadows.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryDefinition {
    /// Name of the live model.
    pub source: String,
    /// Tracking mode the history was derived for.
    pub mode: TrackingMode,
    /// The history model definition.
    pub definition: ModelDefinition,
}

impl HistoryDefinition {
    /// Name of the history model.
    pub fn name(&self) -> &str {
        &self.definition.name
    }
}

/// Name of the history model for a live model.
pub fn history_name(live: &str) -> String {
    format!("{live}{HISTORY_SUFFIX}")
}

/// Derive the history definition for a live model.
///
/// Deterministic and side-effect free: the same input always yields the
/// same output. The archival timestamp's default is evaluated by the
/// storage layer at insert time, not here.
pub fn derive_history(live: &ModelDefinition, mode: TrackingMode) -> HistoryDefinition {
    let name = history_name(&live.name);

    let mut attributes: std::collections::BTreeMap<String, AttributeDef> = live
        .attributes
        .iter()
        .map(|(attr_name, attr)| (attr_name.clone(), history_attribute(attr_name, attr)))
        .collect();

    for (own_name, own_attr) in history_own_attributes() {
        if attributes.insert(own_name.to_owned(), own_attr).is_some() {
            tracing::warn!(
                model = live.name.as_str(),
                attribute = own_name,
                "Live attribute shadowed by history attribute"
            );
        }
    }

    let mut options = history_options(&live.options);
    options.indexes = history_indexes(&name, &live.options.indexes);

    HistoryDefinition {
        source: live.name.clone(),
        mode,
        definition: ModelDefinition {
            name,
            attributes,
            options,
        },
    }
}

/// Strip identity and accessor metadata from one live attribute.
fn history_attribute(name: &str, attr: &AttributeDef) -> AttributeDef {
    let mut derived = attr.clone();
    derived.primary_key = false;
    derived.unique = false;
    derived.auto_increment = false;
    derived.getter = None;
    derived.setter = None;
    derived.model = None;
    derived.model_attribute = false;
    derived.allow_null = true;

    // Timestamps are copied from the live row, never regenerated.
    if name == CREATED_AT || name == UPDATED_AT {
        derived.data_type = DataType::Date;
        derived.default_value = None;
    }

    derived
}

/// The sequence id and archival timestamp every history model carries.
fn history_own_attributes() -> [(&'static str, AttributeDef); 2] {
    [
        (
            HISTORY_ID,
            AttributeDef::new(DataType::BigInt)
                .primary_key()
                .auto_increment()
                .unique(),
        ),
        (
            ARCHIVED_AT,
            AttributeDef::new(DataType::Date)
                .not_null()
                .with_default(DefaultValue::Now),
        ),
    ]
}

/// Drop unique indexes and rename the rest into the history namespace.
fn history_indexes(history: &str, indexes: &[IndexDef]) -> Vec<IndexDef> {
    indexes
        .iter()
        .filter(|idx| !idx.is_unique())
        .map(|idx| {
            let mut renamed = idx.clone();
            renamed.name = Some(
                std::iter::once(history)
                    .chain(idx.fields.iter().map(String::as_str))
                    .collect::<Vec<_>>()
                    .join("_"),
            );
            renamed
        })
        .collect()
}

/// Live options minus model identity, with timestamps turned off.
fn history_options(live: &ModelOptions) -> ModelOptions {
    ModelOptions {
        name: None,
        table_name: None,
        connection: None,
        unique_keys: std::collections::BTreeMap::new(),
        has_primary_key: None,
        hooks: Vec::new(),
        scopes: std::collections::BTreeMap::new(),
        instance_methods: Vec::new(),
        default_scope: None,
        timestamps: false,
        ..live.clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn user() -> ModelDefinition {
        ModelDefinition::new("User")
            .with_attribute(
                "id",
                AttributeDef::new(DataType::Integer)
                    .primary_key()
                    .auto_increment(),
            )
            .with_attribute("name", AttributeDef::new(DataType::Text).not_null())
            .with_attribute(
                "email",
                AttributeDef::new(DataType::String { length: Some(120) })
                    .not_null()
                    .unique(),
            )
            .with_index(IndexDef::on(&["email"]).unique())
            .with_index(IndexDef::on(&["name"]))
            .normalized()
    }

    #[test]
    fn history_name_appends_suffix() {
        assert_eq!(history_name("User"), "UserHistory");
        assert_eq!(derive_history(&user(), TrackingMode::Diff).name(), "UserHistory");
    }

    #[test]
    fn live_attributes_are_stripped_and_nullable() {
        let history = derive_history(&user(), TrackingMode::Diff);

        for (name, attr) in &history.definition.attributes {
            if name == HISTORY_ID || name == ARCHIVED_AT {
                continue;
            }
            assert!(!attr.primary_key, "{name} kept primaryKey");
            assert!(!attr.unique, "{name} kept unique");
            assert!(!attr.auto_increment, "{name} kept autoIncrement");
            assert!(attr.allow_null, "{name} is not nullable");
            assert!(attr.model.is_none(), "{name} kept its owner");
        }
    }

    #[test]
    fn synthesized_attributes_are_never_nullable() {
        let history = derive_history(&user(), TrackingMode::Full);
        let hid = history.definition.attribute(HISTORY_ID).unwrap();
        assert!(hid.primary_key && hid.auto_increment && hid.unique);
        assert!(!hid.allow_null);
        assert_eq!(hid.data_type, DataType::BigInt);

        let archived = history.definition.attribute(ARCHIVED_AT).unwrap();
        assert!(!archived.allow_null);
        assert_eq!(archived.default_value, Some(DefaultValue::Now));
    }

    #[test]
    fn every_history_attribute_has_a_live_counterpart() {
        let live = user();
        let history = derive_history(&live, TrackingMode::Diff);
        for name in history.definition.attributes.keys() {
            assert!(
                name == HISTORY_ID || name == ARCHIVED_AT || live.attributes.contains_key(name),
                "{name} has no live attribute"
            );
        }
        assert_eq!(
            history.definition.attributes.len(),
            live.attributes.len().saturating_add(2)
        );
    }

    #[test]
    fn timestamps_lose_their_defaults() {
        let live = user().with_attribute(
            CREATED_AT,
            AttributeDef::new(DataType::Other("TIMESTAMP(3)".to_owned()))
                .not_null()
                .with_default(DefaultValue::Now),
        );
        let history = derive_history(&live, TrackingMode::Diff);
        let created = history.definition.attribute(CREATED_AT).unwrap();
        assert_eq!(created.data_type, DataType::Date);
        assert_eq!(created.default_value, None);
        assert!(created.allow_null);
    }

    #[test]
    fn unique_indexes_are_dropped_and_the_rest_renamed() {
        let mut typed_unique = IndexDef::on(&["name", "email"]);
        typed_unique.index_type = Some("UNIQUE".to_owned());
        let live = user()
            .with_index(typed_unique)
            .with_index(IndexDef::on(&["createdAt", "name"]));

        let history = derive_history(&live, TrackingMode::Diff);
        let names: Vec<_> = history
            .definition
            .options
            .indexes
            .iter()
            .map(|idx| idx.name.clone().unwrap())
            .collect();

        assert_eq!(names, vec!["UserHistory_name", "UserHistory_createdAt_name"]);
        assert!(history.definition.options.indexes.iter().all(|i| !i.is_unique()));
    }

    #[test]
    fn zero_indexes_yield_zero_indexes() {
        let live = ModelDefinition::new("Tag")
            .with_attribute("label", AttributeDef::new(DataType::Text));
        let history = derive_history(&live, TrackingMode::Diff);
        assert!(history.definition.options.indexes.is_empty());
    }

    #[test]
    fn options_drop_identity_and_disable_timestamps() {
        let mut live = user();
        live.options.table_name = Some("users".to_owned());
        live.options.connection = Some("primary".to_owned());
        live.options.hooks = vec!["audit".to_owned()];
        live.options.instance_methods = vec!["fullName".to_owned()];
        live.options.default_scope = Some(serde_json::json!({ "active": true }));
        live.options.scopes = BTreeMap::from([("active".to_owned(), serde_json::json!({}))]);
        live.options.unique_keys =
            BTreeMap::from([("name_email".to_owned(), vec!["name".to_owned(), "email".to_owned()])]);
        live.options.schema = Some("app".to_owned());
        live.options.paranoid = true;
        live.options
            .extra
            .insert("charset".to_owned(), serde_json::json!("utf8mb4"));

        let options = derive_history(&live, TrackingMode::Diff).definition.options;
        assert_eq!(options.table_name, None);
        assert_eq!(options.connection, None);
        assert_eq!(options.has_primary_key, None);
        assert!(options.hooks.is_empty());
        assert!(options.instance_methods.is_empty());
        assert!(options.scopes.is_empty());
        assert!(options.unique_keys.is_empty());
        assert_eq!(options.default_scope, None);
        assert!(!options.timestamps);

        // Everything else carries over.
        assert_eq!(options.schema.as_deref(), Some("app"));
        assert!(options.paranoid);
        assert_eq!(options.extra.get("charset"), Some(&serde_json::json!("utf8mb4")));
    }

    #[test]
    fn unknown_storage_types_pass_through() {
        let mut geometry = AttributeDef::new(DataType::Other("GEOMETRY(POINT)".to_owned()));
        geometry
            .extra
            .insert("srid".to_owned(), serde_json::json!(4326));
        let live = ModelDefinition::new("Place").with_attribute("location", geometry);

        let history = derive_history(&live, TrackingMode::Diff);
        let derived = history.definition.attribute("location").unwrap();
        assert_eq!(derived.data_type, DataType::Other("GEOMETRY(POINT)".to_owned()));
        assert_eq!(derived.extra.get("srid"), Some(&serde_json::json!(4326)));
    }

    #[test]
    fn derivation_is_deterministic() {
        let live = user();
        assert_eq!(
            derive_history(&live, TrackingMode::Diff),
            derive_history(&live, TrackingMode::Diff)
        );
    }

    #[test]
    fn live_definition_is_not_mutated() {
        let live = user();
        let before = live.clone();
        let _ = derive_history(&live, TrackingMode::Full);
        assert_eq!(live, before);
    }

    #[test]
    fn shadowed_live_attribute_is_replaced() {
        let live = user().with_attribute(HISTORY_ID, AttributeDef::new(DataType::Text));
        let history = derive_history(&live, TrackingMode::Diff);
        let hid = history.definition.attribute(HISTORY_ID).unwrap();
        assert_eq!(hid.data_type, DataType::BigInt);
        assert!(hid.primary_key);
    }
}
