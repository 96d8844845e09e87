//! Error types for the `PostgreSQL` host.
//!
//! Host operations surface through the core contract as
//! [`TemporaError::Storage`], carrying the rendered [`DbError`].

use tempora_core::TemporaError;
use tempora_types::TransactionId;

/// Errors that can occur in the `PostgreSQL` host.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The transaction is unknown or already finished.
    #[error("Transaction {0} is not open")]
    UnknownTransaction(TransactionId),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<DbError> for TemporaError {
    fn from(error: DbError) -> Self {
        match error {
            DbError::UnknownTransaction(id) => Self::UnknownTransaction(id),
            other => Self::Storage(other.to_string()),
        }
    }
}
