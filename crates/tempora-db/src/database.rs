//! The `PostgreSQL` [`DataMapper`].

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::BoxFuture;
use tempora_core::{DataMapper, LifecycleModel, Model, TemporaError, Transaction};
use tempora_types::ModelDefinition;

use crate::ddl::schema_statements;
use crate::error::DbError;
use crate::postgres::PostgresPool;
use crate::store::{PgStore, Transactions};

struct Defined {
    definition: ModelDefinition,
    model: Arc<dyn Model>,
}

/// A host whose models live in `PostgreSQL` tables.
///
/// Defining a model does not touch the database; call [`sync`] once every
/// model (and its history) is defined.
///
/// [`sync`]: PgDatabase::sync
#[derive(Clone)]
pub struct PgDatabase {
    pool: PostgresPool,
    models: Arc<RwLock<BTreeMap<String, Defined>>>,
    transactions: Arc<Transactions>,
}

impl PgDatabase {
    /// A host on `pool` with no models.
    pub fn new(pool: PostgresPool) -> Self {
        Self {
            pool,
            models: Arc::default(),
            transactions: Arc::default(),
        }
    }

    /// The connection pool.
    pub const fn pool(&self) -> &PostgresPool {
        &self.pool
    }

    /// Normalized definitions of every defined model, by name.
    pub fn definitions(&self) -> Vec<ModelDefinition> {
        self.models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|defined| defined.definition.clone())
            .collect()
    }

    /// Create the table and indexes of every defined model.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if a statement fails.
    pub async fn sync(&self) -> Result<(), DbError> {
        for definition in self.definitions() {
            self.pool
                .execute_all(&schema_statements(&definition))
                .await?;
            tracing::info!(
                model = definition.name.as_str(),
                table = definition.table_name(),
                "Table synchronized"
            );
        }
        Ok(())
    }

    /// Number of transactions currently open.
    pub async fn open_transactions(&self) -> usize {
        self.transactions.len().await
    }
}

impl core::fmt::Debug for PgDatabase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let models: Vec<String> = self
            .models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        f.debug_struct("PgDatabase")
            .field("models", &models)
            .finish_non_exhaustive()
    }
}

impl DataMapper for PgDatabase {
    fn define(&self, definition: ModelDefinition) -> Result<Arc<dyn Model>, TemporaError> {
        let definition = definition.normalized();
        let mut models = self.models.write().unwrap_or_else(PoisonError::into_inner);
        if models.contains_key(&definition.name) {
            return Err(TemporaError::DuplicateEntity {
                name: definition.name,
            });
        }

        let store = PgStore::new(
            Arc::new(definition.clone()),
            self.pool.pool().clone(),
            Arc::clone(&self.transactions),
        );
        let model: Arc<dyn Model> = Arc::new(LifecycleModel::new(definition.clone(), store));
        models.insert(
            definition.name.clone(),
            Defined {
                definition,
                model: Arc::clone(&model),
            },
        );
        drop(models);
        Ok(model)
    }

    fn model(&self, name: &str) -> Option<Arc<dyn Model>> {
        self.models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|defined| Arc::clone(&defined.model))
    }

    fn begin(&self) -> BoxFuture<'_, Result<Transaction, TemporaError>> {
        Box::pin(async move {
            let open = self
                .pool
                .pool()
                .begin()
                .await
                .map_err(DbError::from)?;
            let transaction = Transaction::new();
            self.transactions.insert(transaction.id(), open).await;
            tracing::debug!(transaction = %transaction.id(), "Transaction opened");
            Ok(transaction)
        })
    }

    fn commit(&self, transaction: Transaction) -> BoxFuture<'_, Result<(), TemporaError>> {
        Box::pin(async move {
            let open = self.transactions.take(transaction.id()).await?;
            open.commit().await.map_err(DbError::from)?;
            tracing::debug!(transaction = %transaction.id(), "Transaction committed");
            Ok(())
        })
    }

    fn rollback(&self, transaction: Transaction) -> BoxFuture<'_, Result<(), TemporaError>> {
        Box::pin(async move {
            let open = self.transactions.take(transaction.id()).await?;
            open.rollback().await.map_err(DbError::from)?;
            tracing::debug!(transaction = %transaction.id(), "Transaction rolled back");
            Ok(())
        })
    }
}
