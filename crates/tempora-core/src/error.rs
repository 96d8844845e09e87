//! Error types for history tracking and the host contract.
//!
//! A single [`TemporaError`] flows through hooks and model operations so
//! that a failure raised inside a hook (a rejected history write, a
//! read-only violation) reaches the caller of the triggering operation
//! unchanged.

use tempora_types::{HookPhase, TransactionId};

/// Errors raised by hosts, hooks, and the history protocol.
#[derive(Debug, thiserror::Error)]
pub enum TemporaError {
    /// A model with this name is already defined.
    #[error("model {name} is already defined")]
    DuplicateEntity {
        /// The conflicting model name.
        name: String,
    },

    /// An update or delete was attempted against a history model.
    #[error("{model} is a read-only history model; {phase} is not allowed")]
    ReadOnlyViolation {
        /// The history model.
        model: String,
        /// The rejected lifecycle phase.
        phase: HookPhase,
    },

    /// Writing history rows failed.
    #[error("history write to {history} failed: {source}")]
    HistoryWrite {
        /// The history model written to.
        history: String,
        /// The underlying failure.
        source: Box<TemporaError>,
    },

    /// Fetching the rows matched by a bulk operation failed.
    #[error("snapshot query on {model} failed: {source}")]
    BulkSnapshot {
        /// The live model queried.
        model: String,
        /// The underlying failure.
        source: Box<TemporaError>,
    },

    /// A non-nullable attribute received null.
    #[error("{model}.{attribute} cannot be null")]
    NotNullViolation {
        /// The model written to.
        model: String,
        /// The offending attribute.
        attribute: String,
    },

    /// A unique attribute received a value already present.
    #[error("{model}.{attribute} must be unique; {value} already exists")]
    UniqueViolation {
        /// The model written to.
        model: String,
        /// The offending attribute.
        attribute: String,
        /// The duplicated value, rendered as JSON.
        value: String,
    },

    /// Restore was called on a model without soft deletes.
    #[error("{model} is not paranoid; there is nothing to restore")]
    NotParanoid {
        /// The model.
        model: String,
    },

    /// An instance is missing a value for a primary-key attribute.
    #[error("{model} instance has no value for primary key {attribute}")]
    MissingPrimaryKey {
        /// The model.
        model: String,
        /// The primary-key attribute.
        attribute: String,
    },

    /// No model with this name is defined.
    #[error("model {0} is not defined")]
    UnknownModel(String),

    /// The transaction is unknown or already finished.
    #[error("transaction {0} is not open")]
    UnknownTransaction(TransactionId),

    /// The storage backend failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl TemporaError {
    /// Wrap a failure of a write into `history`.
    pub fn history_write(history: &str, source: Self) -> Self {
        Self::HistoryWrite {
            history: history.to_owned(),
            source: Box::new(source),
        }
    }

    /// Wrap a failure of the bulk snapshot query on `model`.
    pub fn bulk_snapshot(model: &str, source: Self) -> Self {
        Self::BulkSnapshot {
            model: model.to_owned(),
            source: Box::new(source),
        }
    }

    /// The innermost error, looking through history-write wrappers.
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::HistoryWrite { source, .. } | Self::BulkSnapshot { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }
}
