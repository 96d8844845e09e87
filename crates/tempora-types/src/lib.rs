//! Shared type definitions for Tempora history tracking.
//!
//! Every crate in the workspace describes models with the types defined
//! here: the attribute map, the index list, and the model-level options of
//! a live model, and the same shapes for the history model derived from it.
//!
//! # Modules
//!
//! - [`attribute`] -- Attribute descriptions (storage type, defaults, key flags)
//! - [`model`] -- Model definitions, indexes, and model options
//! - [`enums`] -- Lifecycle hook phases
//! - [`ids`] -- Type-safe UUID wrappers

pub mod attribute;
pub mod enums;
pub mod ids;
pub mod model;

// Re-export all public types at crate root for convenience.
pub use attribute::{AttributeDef, DataType, DefaultValue};
pub use enums::HookPhase;
pub use ids::TransactionId;
pub use model::{CREATED_AT, DELETED_AT, IndexDef, ModelDefinition, ModelOptions, UPDATED_AT};

/// The data values of one row, keyed by attribute name.
pub type Row = serde_json::Map<String, serde_json::Value>;
