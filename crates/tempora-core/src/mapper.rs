//! The host contract: models, data mappers, filters, and transactions.
//!
//! History tracking never talks to storage directly. It consumes a
//! [`DataMapper`] (the model registry of the host) and the [`Model`]s it
//! defines, and everything it needs from them is declared here.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tempora_types::{HookPhase, ModelDefinition, Row, TransactionId};

use crate::error::TemporaError;
use crate::hooks::{Hook, Instance};

/// Handle to a host transaction.
///
/// Cheap to clone; hosts keep the transaction state keyed by [`id`].
///
/// [`id`]: Transaction::id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Transaction {
    id: TransactionId,
}

impl Transaction {
    /// Create a handle with a fresh identifier.
    pub fn new() -> Self {
        Self {
            id: TransactionId::new(),
        }
    }

    /// The transaction identifier.
    pub const fn id(&self) -> TransactionId {
        self.id
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

/// Conjunction of attribute equality conditions.
///
/// The empty filter matches every row. A condition on `null` also matches
/// rows that carry no value for the attribute.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Row,
}

impl Filter {
    /// A filter matching every row.
    pub fn all() -> Self {
        Self::default()
    }

    /// A filter requiring every attribute of `row` to match.
    pub const fn from_row(row: Row) -> Self {
        Self { conditions: row }
    }

    /// Add an equality condition.
    #[must_use]
    pub fn with(mut self, attribute: &str, value: impl Into<Value>) -> Self {
        self.conditions.insert(attribute.to_owned(), value.into());
        self
    }

    /// The equality conditions.
    pub const fn conditions(&self) -> &Row {
        &self.conditions
    }

    /// Whether the filter has no conditions.
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Whether `row` satisfies every condition.
    pub fn matches(&self, row: &Row) -> bool {
        self.conditions
            .iter()
            .all(|(attribute, expected)| row.get(attribute).unwrap_or(&Value::Null) == expected)
    }
}

/// Options accepted by every model operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOptions {
    /// Run inside this host transaction.
    pub transaction: Option<Transaction>,
    /// Bulk update/destroy: run the per-row operation (and its hooks) for
    /// every matched row instead of one filtered write.
    pub individual_hooks: bool,
    /// Paranoid models: hide soft-deleted rows.
    pub paranoid: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            transaction: None,
            individual_hooks: false,
            paranoid: true,
        }
    }
}

impl QueryOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Options carrying only a transaction (or none).
    pub fn for_transaction(transaction: Option<Transaction>) -> Self {
        Self {
            transaction,
            ..Self::default()
        }
    }

    /// Run inside `transaction`.
    #[must_use]
    pub fn in_transaction(mut self, transaction: &Transaction) -> Self {
        self.transaction = Some(transaction.clone());
        self
    }

    /// Run per-row hooks for bulk operations.
    #[must_use]
    pub const fn with_individual_hooks(mut self) -> Self {
        self.individual_hooks = true;
        self
    }

    /// Include soft-deleted rows.
    #[must_use]
    pub const fn include_deleted(mut self) -> Self {
        self.paranoid = false;
        self
    }
}

/// A model defined with a host.
///
/// Every mutating operation dispatches the corresponding lifecycle hooks;
/// a hook failure aborts the operation and is returned to the caller.
pub trait Model: Send + Sync {
    /// Logical model name.
    fn name(&self) -> &str;

    /// The (normalized) model definition.
    fn definition(&self) -> &ModelDefinition;

    /// Register an additional handler for a lifecycle phase.
    fn add_hook(&self, phase: HookPhase, hook: Hook);

    /// Insert one row.
    fn create(&self, row: Row, options: QueryOptions) -> BoxFuture<'_, Result<Instance, TemporaError>>;

    /// Insert many rows in one storage write.
    fn bulk_create(
        &self,
        rows: Vec<Row>,
        options: QueryOptions,
    ) -> BoxFuture<'_, Result<Vec<Instance>, TemporaError>>;

    /// Load every row matching `filter`.
    fn find_all(
        &self,
        filter: Filter,
        options: QueryOptions,
    ) -> BoxFuture<'_, Result<Vec<Instance>, TemporaError>>;

    /// Count the rows matching `filter`.
    fn count(&self, filter: Filter, options: QueryOptions) -> BoxFuture<'_, Result<usize, TemporaError>>;

    /// Apply `changes` to one instance and persist them.
    fn update(
        &self,
        instance: Instance,
        changes: Row,
        options: QueryOptions,
    ) -> BoxFuture<'_, Result<Instance, TemporaError>>;

    /// Delete (or soft-delete) one instance.
    fn destroy(
        &self,
        instance: Instance,
        options: QueryOptions,
    ) -> BoxFuture<'_, Result<Instance, TemporaError>>;

    /// Undo a soft delete.
    fn restore(
        &self,
        instance: Instance,
        options: QueryOptions,
    ) -> BoxFuture<'_, Result<Instance, TemporaError>>;

    /// Apply `changes` to every row matching `filter`; returns the row count.
    fn bulk_update(
        &self,
        changes: Row,
        filter: Filter,
        options: QueryOptions,
    ) -> BoxFuture<'_, Result<usize, TemporaError>>;

    /// Delete (or soft-delete) every row matching `filter`; returns the row count.
    fn bulk_destroy(
        &self,
        filter: Filter,
        options: QueryOptions,
    ) -> BoxFuture<'_, Result<usize, TemporaError>>;
}

/// The host's model registry.
pub trait DataMapper: Send + Sync {
    /// Define a new model.
    ///
    /// Fails with [`TemporaError::DuplicateEntity`] if the name is taken.
    fn define(&self, definition: ModelDefinition) -> Result<Arc<dyn Model>, TemporaError>;

    /// Look up a defined model by name.
    fn model(&self, name: &str) -> Option<Arc<dyn Model>>;

    /// Open a transaction.
    fn begin(&self) -> BoxFuture<'_, Result<Transaction, TemporaError>>;

    /// Commit a transaction.
    fn commit(&self, transaction: Transaction) -> BoxFuture<'_, Result<(), TemporaError>>;

    /// Roll a transaction back, undoing every write made under it.
    fn rollback(&self, transaction: Transaction) -> BoxFuture<'_, Result<(), TemporaError>>;
}
