//! History schema derivation for Tempora.
//!
//! Given the definition of a mutable live model, [`derive_history`] produces
//! the definition of its append-only history model: the same attributes
//! with identity constraints removed and nullability relaxed, plus a
//! sequence id (`hid`) and an archival timestamp (`archivedAt`), the live
//! model's non-unique indexes renamed into the history namespace, and the
//! live options minus model identity.
//!
//! ```
//! use tempora_schema::{TrackingMode, derive_history};
//! use tempora_types::{AttributeDef, DataType, ModelDefinition};
//!
//! let live = ModelDefinition::new("User")
//!     .with_attribute("id", AttributeDef::new(DataType::Integer).primary_key())
//!     .with_attribute("name", AttributeDef::new(DataType::Text).not_null());
//!
//! let history = derive_history(&live, TrackingMode::Diff);
//! assert_eq!(history.name(), "UserHistory");
//! assert!(history.definition.attributes["name"].allow_null);
//! assert!(!history.definition.attributes["id"].primary_key);
//! ```

pub mod derive;

pub use derive::{
    ARCHIVED_AT, HISTORY_ID, HISTORY_SUFFIX, HistoryDefinition, TrackingMode, derive_history,
    history_name,
};
