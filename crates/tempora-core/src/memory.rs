//! In-process host: a [`DataMapper`] whose tables live in memory.
//!
//! Tables apply attribute defaults and auto-increment sequences and enforce
//! not-null, unique, and primary-key constraints. Transactions keep an undo
//! journal that `rollback` replays in reverse; sequences are never rolled
//! back. Reads see uncommitted writes.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::BoxFuture;
use serde_json::Value;
use tempora_types::{DefaultValue, ModelDefinition, Row, TransactionId};
use tokio::sync::Mutex;

use crate::error::TemporaError;
use crate::lifecycle::{LifecycleModel, RowStore, timestamp_now};
use crate::mapper::{DataMapper, Filter, Model, Transaction};

/// Rows of one table plus its sequences.
#[derive(Debug, Default)]
struct TableState {
    rows: BTreeMap<u64, Row>,
    next_row: u64,
    sequences: BTreeMap<String, i64>,
}

impl TableState {
    fn allocate_row(&mut self) -> Result<u64, TemporaError> {
        let id = self.next_row;
        self.next_row = id
            .checked_add(1)
            .ok_or_else(|| TemporaError::Storage("row id space exhausted".to_owned()))?;
        Ok(id)
    }

    fn next_sequence(&mut self, attribute: &str) -> Result<i64, TemporaError> {
        let current = self.sequences.entry(attribute.to_owned()).or_insert(0);
        *current = current
            .checked_add(1)
            .ok_or_else(|| TemporaError::Storage(format!("sequence for {attribute} exhausted")))?;
        Ok(*current)
    }

    /// Keep a sequence ahead of explicitly supplied values.
    fn observe_sequence(&mut self, attribute: &str, value: i64) {
        let current = self.sequences.entry(attribute.to_owned()).or_insert(0);
        if value > *current {
            *current = value;
        }
    }

    fn matching(&self, filter: &Filter) -> Vec<u64> {
        self.rows
            .iter()
            .filter(|(_, row)| filter.matches(row))
            .map(|(id, _)| *id)
            .collect()
    }
}

type SharedState = Arc<Mutex<TableState>>;

/// One step of a transaction's undo journal.
#[derive(Debug)]
enum Undo {
    /// Remove a row that was inserted.
    Insert { state: SharedState, row_id: u64 },
    /// Put back a row as it was before an update or delete.
    Restore {
        state: SharedState,
        row_id: u64,
        row: Row,
    },
}

impl Undo {
    async fn revert(self) {
        match self {
            Self::Insert { state, row_id } => {
                state.lock().await.rows.remove(&row_id);
            }
            Self::Restore { state, row_id, row } => {
                state.lock().await.rows.insert(row_id, row);
            }
        }
    }
}

/// Open transactions and their undo entries, oldest first.
#[derive(Debug, Default)]
struct Journal {
    open: Mutex<BTreeMap<TransactionId, Vec<Undo>>>,
}

impl Journal {
    async fn ensure_open(&self, transaction: Option<&Transaction>) -> Result<(), TemporaError> {
        let Some(tx) = transaction else {
            return Ok(());
        };
        if self.open.lock().await.contains_key(&tx.id()) {
            Ok(())
        } else {
            Err(TemporaError::UnknownTransaction(tx.id()))
        }
    }

    async fn record(&self, transaction: Option<&Transaction>, entries: Vec<Undo>) {
        if let Some(tx) = transaction {
            if let Some(journal) = self.open.lock().await.get_mut(&tx.id()) {
                journal.extend(entries);
            }
        }
    }
}

/// A [`RowStore`] over an in-memory table.
#[derive(Debug, Clone)]
pub struct MemoryTable {
    definition: Arc<ModelDefinition>,
    state: SharedState,
    journal: Arc<Journal>,
}

impl MemoryTable {
    fn prepare_insert(&self, state: &mut TableState, row: Row) -> Result<Row, TemporaError> {
        let mut row = row;
        for (name, attribute) in &self.definition.attributes {
            // An explicit null is a value; only absent keys take a default.
            let absent = !row.contains_key(name);
            if attribute.auto_increment && row.get(name).is_none_or(Value::is_null) {
                let next = state.next_sequence(name)?;
                row.insert(name.clone(), Value::from(next));
            } else if absent {
                match &attribute.default_value {
                    Some(DefaultValue::Now) => {
                        row.insert(name.clone(), timestamp_now());
                    }
                    Some(DefaultValue::Literal(value)) => {
                        row.insert(name.clone(), value.clone());
                    }
                    None => {}
                }
            } else if attribute.auto_increment {
                if let Some(explicit) = row.get(name).and_then(Value::as_i64) {
                    state.observe_sequence(name, explicit);
                }
            }
        }
        Ok(row)
    }

    /// Check `candidate` against the not-null, unique, and primary-key
    /// constraints given every other row the table would hold.
    fn check<'r>(
        &self,
        candidate: &Row,
        others: impl Iterator<Item = &'r Row> + Clone,
    ) -> Result<(), TemporaError> {
        let model = &self.definition.name;
        for (name, attribute) in &self.definition.attributes {
            let value = candidate.get(name).unwrap_or(&Value::Null);
            if value.is_null() && (!attribute.allow_null || attribute.primary_key) {
                return Err(TemporaError::NotNullViolation {
                    model: model.clone(),
                    attribute: name.clone(),
                });
            }
            if attribute.unique
                && !value.is_null()
                && others.clone().any(|row| row.get(name) == Some(value))
            {
                return Err(TemporaError::UniqueViolation {
                    model: model.clone(),
                    attribute: name.clone(),
                    value: value.to_string(),
                });
            }
        }

        let keys = self.definition.primary_keys();
        if !keys.is_empty() {
            let duplicate = others
                .clone()
                .any(|row| keys.iter().all(|key| row.get(*key) == candidate.get(*key)));
            if duplicate {
                let value: Vec<Value> = keys
                    .iter()
                    .map(|key| candidate.get(*key).cloned().unwrap_or(Value::Null))
                    .collect();
                return Err(TemporaError::UniqueViolation {
                    model: model.clone(),
                    attribute: keys.join(","),
                    value: Value::from(value).to_string(),
                });
            }
        }
        Ok(())
    }

    async fn insert_rows(
        &self,
        rows: Vec<Row>,
        transaction: Option<&Transaction>,
    ) -> Result<Vec<Row>, TemporaError> {
        self.journal.ensure_open(transaction).await?;

        let (inserted, undo) = {
            let mut state = self.state.lock().await;
            let mut prepared: Vec<Row> = Vec::with_capacity(rows.len());
            for row in rows {
                let row = self.prepare_insert(&mut state, row)?;
                self.check(&row, state.rows.values().chain(prepared.iter()))?;
                prepared.push(row);
            }

            let mut undo = Vec::with_capacity(prepared.len());
            for row in &prepared {
                let row_id = state.allocate_row()?;
                state.rows.insert(row_id, row.clone());
                undo.push(Undo::Insert {
                    state: Arc::clone(&self.state),
                    row_id,
                });
            }
            (prepared, undo)
        };

        self.journal.record(transaction, undo).await;
        Ok(inserted)
    }

    async fn update_rows(
        &self,
        filter: &Filter,
        changes: &Row,
        transaction: Option<&Transaction>,
    ) -> Result<Vec<Row>, TemporaError> {
        self.journal.ensure_open(transaction).await?;

        let (updated, undo) = {
            let mut state = self.state.lock().await;
            let targets = state.matching(filter);

            let mut next: BTreeMap<u64, Row> = state.rows.clone();
            for id in &targets {
                if let Some(row) = next.get_mut(id) {
                    for (attribute, value) in changes {
                        if self.definition.attributes.contains_key(attribute) {
                            row.insert(attribute.clone(), value.clone());
                        }
                    }
                }
            }
            for id in &targets {
                if let Some(row) = next.get(id) {
                    self.check(
                        row,
                        next.iter()
                            .filter(|(other, _)| *other != id)
                            .map(|(_, row)| row),
                    )?;
                }
            }

            let mut updated = Vec::with_capacity(targets.len());
            let mut undo = Vec::with_capacity(targets.len());
            for id in targets {
                if let Some(row) = next.remove(&id) {
                    if let Some(before) = state.rows.insert(id, row.clone()) {
                        undo.push(Undo::Restore {
                            state: Arc::clone(&self.state),
                            row_id: id,
                            row: before,
                        });
                    }
                    updated.push(row);
                }
            }
            (updated, undo)
        };

        self.journal.record(transaction, undo).await;
        Ok(updated)
    }

    async fn delete_rows(
        &self,
        filter: &Filter,
        transaction: Option<&Transaction>,
    ) -> Result<Vec<Row>, TemporaError> {
        self.journal.ensure_open(transaction).await?;

        let (removed, undo) = {
            let mut state = self.state.lock().await;
            let mut removed = Vec::new();
            let mut undo = Vec::new();
            for id in state.matching(filter) {
                if let Some(row) = state.rows.remove(&id) {
                    undo.push(Undo::Restore {
                        state: Arc::clone(&self.state),
                        row_id: id,
                        row: row.clone(),
                    });
                    removed.push(row);
                }
            }
            (removed, undo)
        };

        self.journal.record(transaction, undo).await;
        Ok(removed)
    }
}

impl RowStore for MemoryTable {
    fn insert<'a>(
        &'a self,
        rows: Vec<Row>,
        transaction: Option<&'a Transaction>,
    ) -> BoxFuture<'a, Result<Vec<Row>, TemporaError>> {
        Box::pin(self.insert_rows(rows, transaction))
    }

    fn select<'a>(
        &'a self,
        filter: &'a Filter,
        _transaction: Option<&'a Transaction>,
    ) -> BoxFuture<'a, Result<Vec<Row>, TemporaError>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state
                .rows
                .values()
                .filter(|row| filter.matches(row))
                .cloned()
                .collect())
        })
    }

    fn update<'a>(
        &'a self,
        filter: &'a Filter,
        changes: &'a Row,
        transaction: Option<&'a Transaction>,
    ) -> BoxFuture<'a, Result<Vec<Row>, TemporaError>> {
        Box::pin(self.update_rows(filter, changes, transaction))
    }

    fn delete<'a>(
        &'a self,
        filter: &'a Filter,
        transaction: Option<&'a Transaction>,
    ) -> BoxFuture<'a, Result<Vec<Row>, TemporaError>> {
        Box::pin(self.delete_rows(filter, transaction))
    }
}

#[derive(Default)]
struct Inner {
    models: RwLock<BTreeMap<String, Arc<dyn Model>>>,
    journal: Arc<Journal>,
}

impl core::fmt::Debug for Inner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let models: Vec<String> = self
            .models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        f.debug_struct("Inner")
            .field("models", &models)
            .finish_non_exhaustive()
    }
}

/// An in-memory host.
///
/// Cheap to clone; clones share the same tables and transactions.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    inner: Arc<Inner>,
}

impl MemoryDatabase {
    /// An empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the defined models, sorted.
    pub fn model_names(&self) -> Vec<String> {
        self.inner
            .models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Number of transactions currently open.
    pub async fn open_transactions(&self) -> usize {
        self.inner.journal.open.lock().await.len()
    }
}

impl DataMapper for MemoryDatabase {
    fn define(&self, definition: ModelDefinition) -> Result<Arc<dyn Model>, TemporaError> {
        let definition = definition.normalized();
        let mut models = self
            .inner
            .models
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if models.contains_key(&definition.name) {
            return Err(TemporaError::DuplicateEntity {
                name: definition.name,
            });
        }

        let table = MemoryTable {
            definition: Arc::new(definition.clone()),
            state: SharedState::default(),
            journal: Arc::clone(&self.inner.journal),
        };
        let name = definition.name.clone();
        let model: Arc<dyn Model> = Arc::new(LifecycleModel::new(definition, table));
        models.insert(name, Arc::clone(&model));
        drop(models);
        Ok(model)
    }

    fn model(&self, name: &str) -> Option<Arc<dyn Model>> {
        self.inner
            .models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn begin(&self) -> BoxFuture<'_, Result<Transaction, TemporaError>> {
        Box::pin(async move {
            let transaction = Transaction::new();
            self.inner
                .journal
                .open
                .lock()
                .await
                .insert(transaction.id(), Vec::new());
            Ok(transaction)
        })
    }

    fn commit(&self, transaction: Transaction) -> BoxFuture<'_, Result<(), TemporaError>> {
        Box::pin(async move {
            self.inner
                .journal
                .open
                .lock()
                .await
                .remove(&transaction.id())
                .map(|_| ())
                .ok_or(TemporaError::UnknownTransaction(transaction.id()))
        })
    }

    fn rollback(&self, transaction: Transaction) -> BoxFuture<'_, Result<(), TemporaError>> {
        Box::pin(async move {
            let entries = self
                .inner
                .journal
                .open
                .lock()
                .await
                .remove(&transaction.id())
                .ok_or(TemporaError::UnknownTransaction(transaction.id()))?;
            for undo in entries.into_iter().rev() {
                undo.revert().await;
            }
            Ok(())
        })
    }
}
