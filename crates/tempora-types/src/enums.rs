//! Lifecycle hook phases.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A named point in a mutation's lifecycle where observers may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HookPhase {
    /// Before a single row is inserted.
    BeforeCreate,
    /// After a single row is inserted.
    AfterCreate,
    /// Before a single row's changes are persisted.
    BeforeUpdate,
    /// After a single row's changes are persisted.
    AfterUpdate,
    /// Before a single row is deleted or soft-deleted.
    BeforeDestroy,
    /// After a single row is deleted or soft-deleted.
    AfterDestroy,
    /// Before a soft-deleted row is restored.
    BeforeRestore,
    /// After a soft-deleted row is restored.
    AfterRestore,
    /// Before a multi-row insert.
    BeforeBulkCreate,
    /// After a multi-row insert.
    AfterBulkCreate,
    /// Before a filtered multi-row update.
    BeforeBulkUpdate,
    /// After a filtered multi-row update.
    AfterBulkUpdate,
    /// Before a filtered multi-row delete.
    BeforeBulkDestroy,
    /// After a filtered multi-row delete.
    AfterBulkDestroy,
}

impl HookPhase {
    /// Conventional camel-case phase name (`beforeUpdate`, ...).
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BeforeCreate => "beforeCreate",
            Self::AfterCreate => "afterCreate",
            Self::BeforeUpdate => "beforeUpdate",
            Self::AfterUpdate => "afterUpdate",
            Self::BeforeDestroy => "beforeDestroy",
            Self::AfterDestroy => "afterDestroy",
            Self::BeforeRestore => "beforeRestore",
            Self::AfterRestore => "afterRestore",
            Self::BeforeBulkCreate => "beforeBulkCreate",
            Self::AfterBulkCreate => "afterBulkCreate",
            Self::BeforeBulkUpdate => "beforeBulkUpdate",
            Self::AfterBulkUpdate => "afterBulkUpdate",
            Self::BeforeBulkDestroy => "beforeBulkDestroy",
            Self::AfterBulkDestroy => "afterBulkDestroy",
        }
    }

    /// Whether the phase fires for filtered multi-row operations.
    pub const fn is_bulk(self) -> bool {
        matches!(
            self,
            Self::BeforeBulkCreate
                | Self::AfterBulkCreate
                | Self::BeforeBulkUpdate
                | Self::AfterBulkUpdate
                | Self::BeforeBulkDestroy
                | Self::AfterBulkDestroy
        )
    }
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
