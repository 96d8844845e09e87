//! JSONB row store for one table.
//!
//! Rows cross the wire as JSONB: inserts and updates project the bound
//! documents onto the table with `jsonb_populate_recordset` and
//! `jsonb_populate_record`, results come back
//! as `to_jsonb(row)`, and filters are JSONB containment (`@>`) tests
//! against the row document.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres};
use tempora_core::{Filter, RowStore, TemporaError, Transaction};
use tempora_types::{ModelDefinition, Row, TransactionId};
use tokio::sync::Mutex;

use crate::ddl::{qualified_table, quote_ident};
use crate::error::DbError;

/// An open `sqlx` transaction; `None` once committed or rolled back.
pub(crate) type TransactionSlot = Arc<Mutex<Option<sqlx::Transaction<'static, Postgres>>>>;

/// Open transactions keyed by their handle.
#[derive(Default)]
pub(crate) struct Transactions {
    open: Mutex<HashMap<TransactionId, TransactionSlot>>,
}

impl core::fmt::Debug for Transactions {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Transactions").finish_non_exhaustive()
    }
}

impl Transactions {
    pub(crate) async fn insert(&self, id: TransactionId, transaction: sqlx::Transaction<'static, Postgres>) {
        self.open
            .lock()
            .await
            .insert(id, Arc::new(Mutex::new(Some(transaction))));
    }

    pub(crate) async fn get(&self, id: TransactionId) -> Result<TransactionSlot, DbError> {
        self.open
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or(DbError::UnknownTransaction(id))
    }

    /// Remove a transaction and hand back the `sqlx` handle.
    pub(crate) async fn take(&self, id: TransactionId) -> Result<sqlx::Transaction<'static, Postgres>, DbError> {
        let slot = self
            .open
            .lock()
            .await
            .remove(&id)
            .ok_or(DbError::UnknownTransaction(id))?;
        let transaction = slot.lock().await.take();
        transaction.ok_or(DbError::UnknownTransaction(id))
    }

    pub(crate) async fn len(&self) -> usize {
        self.open.lock().await.len()
    }
}

/// `INSERT` of the given columns for every element of a JSONB array (`$1`).
pub fn insert_sql(table: &str, columns: &[&str]) -> String {
    if columns.is_empty() {
        return format!("INSERT INTO {table} AS r DEFAULT VALUES RETURNING to_jsonb(r)");
    }
    let columns: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let columns = columns.join(", ");
    format!(
        "INSERT INTO {table} AS r ({columns}) \
         SELECT {columns} FROM jsonb_populate_recordset(NULL::{table}, $1) \
         RETURNING to_jsonb(r)"
    )
}

/// `SELECT` of every row containing the filter document (`$1`).
pub fn select_sql(table: &str, order_by: &[&str]) -> String {
    let order = if order_by.is_empty() {
        String::new()
    } else {
        let keys: Vec<String> = order_by.iter().map(|k| format!("r.{}", quote_ident(k))).collect();
        format!(" ORDER BY {}", keys.join(", "))
    };
    format!("SELECT to_jsonb(r) FROM {table} AS r WHERE to_jsonb(r) @> $1{order}")
}

/// `UPDATE` of the given columns from a JSONB document (`$2`) on every row
/// containing the filter document (`$1`).
pub fn update_sql(table: &str, columns: &[&str]) -> String {
    let assignments: Vec<String> = columns
        .iter()
        .map(|c| {
            let column = quote_ident(c);
            format!("{column} = p.{column}")
        })
        .collect();
    format!(
        "UPDATE {table} AS r SET {} \
         FROM jsonb_populate_record(NULL::{table}, $2) AS p \
         WHERE to_jsonb(r) @> $1 \
         RETURNING to_jsonb(r)",
        assignments.join(", ")
    )
}

/// `DELETE` of every row containing the filter document (`$1`).
pub fn delete_sql(table: &str) -> String {
    format!("DELETE FROM {table} AS r WHERE to_jsonb(r) @> $1 RETURNING to_jsonb(r)")
}

/// Run one row-returning statement, binding each document in turn.
async fn run<'e, E>(sql: &str, documents: Vec<Value>, executor: E) -> Result<Vec<Row>, DbError>
where
    E: sqlx::PgExecutor<'e>,
{
    let mut query = sqlx::query_scalar::<_, Json<Row>>(sql);
    for document in documents {
        query = query.bind(Json(document));
    }
    let rows = query.fetch_all(executor).await?;
    Ok(rows.into_iter().map(|Json(row)| row).collect())
}

/// A [`RowStore`] backed by one `PostgreSQL` table.
#[derive(Debug, Clone)]
pub struct PgStore {
    definition: Arc<ModelDefinition>,
    table: String,
    pool: PgPool,
    transactions: Arc<Transactions>,
}

impl PgStore {
    pub(crate) fn new(
        definition: Arc<ModelDefinition>,
        pool: PgPool,
        transactions: Arc<Transactions>,
    ) -> Self {
        Self {
            table: qualified_table(&definition),
            definition,
            pool,
            transactions,
        }
    }

    /// The schema-qualified, quoted table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Columns of `row` to write: every key the row carries, except a null
    /// on an auto-increment column, which the sequence fills.
    fn columns<'r>(&self, row: &'r Row) -> Vec<&'r str> {
        row.iter()
            .filter(|(name, value)| {
                self.definition
                    .attribute(name)
                    .is_some_and(|attribute| !(value.is_null() && attribute.auto_increment))
            })
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Consecutive runs of rows sharing one column list.
    fn batches<'r>(&self, rows: &'r [Row]) -> Vec<(Vec<&'r str>, Vec<&'r Row>)> {
        let mut batches: Vec<(Vec<&str>, Vec<&Row>)> = Vec::new();
        for row in rows {
            let columns = self.columns(row);
            let joins_last = !columns.is_empty()
                && batches.last().is_some_and(|(last, _)| *last == columns);
            match batches.last_mut() {
                Some((_, members)) if joins_last => members.push(row),
                _ => batches.push((columns, vec![row])),
            }
        }
        batches
    }

    async fn fetch(
        &self,
        sql: &str,
        documents: Vec<Value>,
        transaction: Option<&Transaction>,
    ) -> Result<Vec<Row>, DbError> {
        match transaction {
            None => run(sql, documents, &self.pool).await,
            Some(tx) => {
                let slot = self.transactions.get(tx.id()).await?;
                let mut guard = slot.lock().await;
                let open = guard
                    .as_mut()
                    .ok_or(DbError::UnknownTransaction(tx.id()))?;
                run(sql, documents, &mut **open).await
            }
        }
    }

    /// Insert `rows` as one statement per column list. Several statements
    /// outside a caller transaction share a transaction of their own, so a
    /// batch lands whole or not at all.
    async fn insert_rows(
        &self,
        rows: Vec<Row>,
        transaction: Option<&Transaction>,
    ) -> Result<Vec<Row>, DbError> {
        let statements: Vec<(String, Vec<Value>)> = self
            .batches(&rows)
            .into_iter()
            .map(|(columns, members)| {
                let sql = insert_sql(&self.table, &columns);
                let documents = if columns.is_empty() {
                    Vec::new()
                } else {
                    let members = members.into_iter().cloned().map(Value::Object).collect();
                    vec![Value::Array(members)]
                };
                (sql, documents)
            })
            .collect();

        let mut inserted = Vec::with_capacity(rows.len());
        if transaction.is_some() || statements.len() <= 1 {
            for (sql, documents) in statements {
                inserted.extend(self.fetch(&sql, documents, transaction).await?);
            }
        } else {
            let mut open = self.pool.begin().await?;
            for (sql, documents) in statements {
                inserted.extend(run(&sql, documents, &mut *open).await?);
            }
            open.commit().await?;
        }
        tracing::debug!(table = self.table.as_str(), count = inserted.len(), "Inserted rows");
        Ok(inserted)
    }

    async fn update_rows(
        &self,
        filter: &Filter,
        changes: &Row,
        transaction: Option<&Transaction>,
    ) -> Result<Vec<Row>, DbError> {
        let columns: Vec<&str> = changes
            .keys()
            .filter(|name| self.definition.attribute(name).is_some())
            .map(String::as_str)
            .collect();
        if columns.is_empty() {
            return self
                .fetch(
                    &select_sql(&self.table, &[]),
                    vec![Value::Object(filter.conditions().clone())],
                    transaction,
                )
                .await;
        }

        self.fetch(
            &update_sql(&self.table, &columns),
            vec![
                Value::Object(filter.conditions().clone()),
                Value::Object(changes.clone()),
            ],
            transaction,
        )
        .await
    }
}

impl RowStore for PgStore {
    fn insert<'a>(
        &'a self,
        rows: Vec<Row>,
        transaction: Option<&'a Transaction>,
    ) -> BoxFuture<'a, Result<Vec<Row>, TemporaError>> {
        Box::pin(async move { Ok(self.insert_rows(rows, transaction).await?) })
    }

    fn select<'a>(
        &'a self,
        filter: &'a Filter,
        transaction: Option<&'a Transaction>,
    ) -> BoxFuture<'a, Result<Vec<Row>, TemporaError>> {
        Box::pin(async move {
            let order_by = self.definition.primary_keys();
            let sql = select_sql(&self.table, &order_by);
            Ok(self
                .fetch(&sql, vec![Value::Object(filter.conditions().clone())], transaction)
                .await?)
        })
    }

    fn update<'a>(
        &'a self,
        filter: &'a Filter,
        changes: &'a Row,
        transaction: Option<&'a Transaction>,
    ) -> BoxFuture<'a, Result<Vec<Row>, TemporaError>> {
        Box::pin(async move { Ok(self.update_rows(filter, changes, transaction).await?) })
    }

    fn delete<'a>(
        &'a self,
        filter: &'a Filter,
        transaction: Option<&'a Transaction>,
    ) -> BoxFuture<'a, Result<Vec<Row>, TemporaError>> {
        Box::pin(async move {
            Ok(self
                .fetch(
                    &delete_sql(&self.table),
                    vec![Value::Object(filter.conditions().clone())],
                    transaction,
                )
                .await?)
        })
    }
}
