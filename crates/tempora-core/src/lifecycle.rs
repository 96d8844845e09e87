//! The lifecycle engine shared by every host.
//!
//! [`LifecycleModel`] implements [`Model`] on top of a [`RowStore`]: it
//! owns the hook registry, maintains `createdAt` / `updatedAt` /
//! `deletedAt`, and runs each operation's phases in order:
//!
//! ```text
//! create        beforeCreate      -> insert          -> afterCreate
//! bulk_create   beforeBulkCreate  -> insert all      -> afterBulkCreate
//! update        apply in memory -> beforeUpdate -> persist -> afterUpdate
//! destroy       beforeDestroy     -> (soft) delete   -> afterDestroy
//! restore       beforeRestore     -> clear deletedAt -> afterRestore
//! bulk_update   beforeBulkUpdate  -> per-row update (individual hooks)
//!                                    or one filtered write -> afterBulkUpdate
//! bulk_destroy  beforeBulkDestroy -> per-row destroy (individual hooks)
//!                                    or one filtered write -> afterBulkDestroy
//! ```
//!
//! A failing `before*` hook aborts the operation before storage is touched.

use chrono::{SecondsFormat, Utc};
use futures::future::BoxFuture;
use serde_json::Value;
use tempora_types::{CREATED_AT, DELETED_AT, HookPhase, ModelDefinition, Row, UPDATED_AT};

use crate::error::TemporaError;
use crate::hooks::{Hook, HookEvent, HookRegistry, Instance};
use crate::mapper::{Filter, Model, QueryOptions, Transaction};

/// The storage seam of a host: filtered, transaction-aware row access.
///
/// Every method returns the rows it touched, as stored.
pub trait RowStore: Send + Sync {
    /// Insert rows, applying defaults and sequences.
    fn insert<'a>(
        &'a self,
        rows: Vec<Row>,
        transaction: Option<&'a Transaction>,
    ) -> BoxFuture<'a, Result<Vec<Row>, TemporaError>>;

    /// Rows matching `filter`, in insertion order.
    fn select<'a>(
        &'a self,
        filter: &'a Filter,
        transaction: Option<&'a Transaction>,
    ) -> BoxFuture<'a, Result<Vec<Row>, TemporaError>>;

    /// Apply `changes` to every row matching `filter`.
    fn update<'a>(
        &'a self,
        filter: &'a Filter,
        changes: &'a Row,
        transaction: Option<&'a Transaction>,
    ) -> BoxFuture<'a, Result<Vec<Row>, TemporaError>>;

    /// Remove every row matching `filter`.
    fn delete<'a>(
        &'a self,
        filter: &'a Filter,
        transaction: Option<&'a Transaction>,
    ) -> BoxFuture<'a, Result<Vec<Row>, TemporaError>>;
}

/// Current time as stored in rows (RFC 3339, UTC).
pub fn timestamp_now() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true))
}

/// A model whose rows live in a [`RowStore`].
pub struct LifecycleModel<S> {
    definition: ModelDefinition,
    store: S,
    hooks: HookRegistry,
}

impl<S: RowStore> LifecycleModel<S> {
    /// Wrap a store. `definition` should already be normalized.
    pub fn new(definition: ModelDefinition, store: S) -> Self {
        Self {
            definition,
            store,
            hooks: HookRegistry::new(),
        }
    }

    /// Keep only the attributes the model defines.
    fn known(&self, row: Row) -> Row {
        row.into_iter()
            .filter(|(attribute, _)| self.definition.attributes.contains_key(attribute))
            .collect()
    }

    /// Identity of a stored instance: its primary key as last persisted,
    /// or the whole persisted row when the model has no primary key.
    fn identity(&self, instance: &Instance) -> Result<Filter, TemporaError> {
        let keys = self.definition.primary_keys();
        if keys.is_empty() {
            return Ok(Filter::from_row(instance.previous_data_values.clone()));
        }

        let mut filter = Filter::all();
        for key in keys {
            let value = instance
                .previous(key)
                .or_else(|| instance.get(key))
                .filter(|v| !v.is_null())
                .ok_or_else(|| TemporaError::MissingPrimaryKey {
                    model: self.definition.name.clone(),
                    attribute: key.to_owned(),
                })?;
            filter = filter.with(key, value.clone());
        }
        Ok(filter)
    }

    /// Restrict a filter to live rows on paranoid models.
    fn scoped(&self, filter: Filter, options: &QueryOptions) -> Filter {
        if self.definition.is_paranoid() && options.paranoid {
            filter.with(DELETED_AT, Value::Null)
        } else {
            filter
        }
    }

    fn stamp_created(&self, row: &mut Row) {
        if self.definition.options.timestamps {
            let now = timestamp_now();
            row.insert(CREATED_AT.to_owned(), now.clone());
            row.insert(UPDATED_AT.to_owned(), now);
        }
    }

    fn stamp_updated(&self, row: &mut Row) {
        if self.definition.options.timestamps {
            row.insert(UPDATED_AT.to_owned(), timestamp_now());
        }
    }

    fn no_row_returned(&self, operation: &str) -> TemporaError {
        TemporaError::Storage(format!(
            "{operation} on {} returned no row",
            self.definition.name
        ))
    }
}

impl<S: RowStore> Model for LifecycleModel<S> {
    fn name(&self) -> &str {
        &self.definition.name
    }

    fn definition(&self) -> &ModelDefinition {
        &self.definition
    }

    fn add_hook(&self, phase: HookPhase, hook: Hook) {
        self.hooks.add(phase, hook);
    }

    fn create(&self, row: Row, options: QueryOptions) -> BoxFuture<'_, Result<Instance, TemporaError>> {
        Box::pin(async move {
            let mut row = self.known(row);
            self.stamp_created(&mut row);
            let instance = Instance::build(row);

            self.hooks
                .run(
                    HookPhase::BeforeCreate,
                    &HookEvent::instance(instance.clone(), options.clone()),
                )
                .await?;

            let stored = self
                .store
                .insert(vec![instance.data_values], options.transaction.as_ref())
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| self.no_row_returned("insert"))?;
            let instance = Instance::persisted(stored);

            self.hooks
                .run(
                    HookPhase::AfterCreate,
                    &HookEvent::instance(instance.clone(), options),
                )
                .await?;
            Ok(instance)
        })
    }

    fn bulk_create(
        &self,
        rows: Vec<Row>,
        options: QueryOptions,
    ) -> BoxFuture<'_, Result<Vec<Instance>, TemporaError>> {
        Box::pin(async move {
            let event = HookEvent::bulk(Filter::all(), options.clone());
            self.hooks.run(HookPhase::BeforeBulkCreate, &event).await?;

            let rows: Vec<Row> = rows
                .into_iter()
                .map(|row| {
                    let mut row = self.known(row);
                    self.stamp_created(&mut row);
                    row
                })
                .collect();
            let instances: Vec<Instance> = self
                .store
                .insert(rows, options.transaction.as_ref())
                .await?
                .into_iter()
                .map(Instance::persisted)
                .collect();

            self.hooks.run(HookPhase::AfterBulkCreate, &event).await?;
            Ok(instances)
        })
    }

    fn find_all(
        &self,
        filter: Filter,
        options: QueryOptions,
    ) -> BoxFuture<'_, Result<Vec<Instance>, TemporaError>> {
        Box::pin(async move {
            let filter = self.scoped(filter, &options);
            let rows = self
                .store
                .select(&filter, options.transaction.as_ref())
                .await?;
            Ok(rows.into_iter().map(Instance::persisted).collect())
        })
    }

    fn count(&self, filter: Filter, options: QueryOptions) -> BoxFuture<'_, Result<usize, TemporaError>> {
        Box::pin(async move { Ok(self.find_all(filter, options).await?.len()) })
    }

    fn update(
        &self,
        instance: Instance,
        changes: Row,
        options: QueryOptions,
    ) -> BoxFuture<'_, Result<Instance, TemporaError>> {
        Box::pin(async move {
            let mut changes = self.known(changes);
            self.stamp_updated(&mut changes);
            let mut instance = instance;
            instance.apply(&changes);

            self.hooks
                .run(
                    HookPhase::BeforeUpdate,
                    &HookEvent::instance(instance.clone(), options.clone()),
                )
                .await?;

            let identity = self.identity(&instance)?;
            let stored = self
                .store
                .update(&identity, &changes, options.transaction.as_ref())
                .await?;
            match stored.into_iter().next() {
                Some(row) => instance = Instance::persisted(row),
                None => instance.mark_persisted(),
            }

            self.hooks
                .run(
                    HookPhase::AfterUpdate,
                    &HookEvent::instance(instance.clone(), options),
                )
                .await?;
            Ok(instance)
        })
    }

    fn destroy(
        &self,
        instance: Instance,
        options: QueryOptions,
    ) -> BoxFuture<'_, Result<Instance, TemporaError>> {
        Box::pin(async move {
            self.hooks
                .run(
                    HookPhase::BeforeDestroy,
                    &HookEvent::instance(instance.clone(), options.clone()),
                )
                .await?;

            let identity = self.identity(&instance)?;
            let mut instance = instance;
            if self.definition.is_paranoid() {
                let mut changes = Row::new();
                changes.insert(DELETED_AT.to_owned(), timestamp_now());
                instance.apply(&changes);
                self.store
                    .update(&identity, &changes, options.transaction.as_ref())
                    .await?;
                instance.mark_persisted();
            } else {
                self.store
                    .delete(&identity, options.transaction.as_ref())
                    .await?;
            }

            self.hooks
                .run(
                    HookPhase::AfterDestroy,
                    &HookEvent::instance(instance.clone(), options),
                )
                .await?;
            Ok(instance)
        })
    }

    fn restore(
        &self,
        instance: Instance,
        options: QueryOptions,
    ) -> BoxFuture<'_, Result<Instance, TemporaError>> {
        Box::pin(async move {
            if !self.definition.is_paranoid() {
                return Err(TemporaError::NotParanoid {
                    model: self.definition.name.clone(),
                });
            }

            self.hooks
                .run(
                    HookPhase::BeforeRestore,
                    &HookEvent::instance(instance.clone(), options.clone()),
                )
                .await?;

            let identity = self.identity(&instance)?;
            let mut changes = Row::new();
            changes.insert(DELETED_AT.to_owned(), Value::Null);
            let mut instance = instance;
            instance.apply(&changes);
            let stored = self
                .store
                .update(&identity, &changes, options.transaction.as_ref())
                .await?;
            match stored.into_iter().next() {
                Some(row) => instance = Instance::persisted(row),
                None => instance.mark_persisted(),
            }

            self.hooks
                .run(
                    HookPhase::AfterRestore,
                    &HookEvent::instance(instance.clone(), options),
                )
                .await?;
            Ok(instance)
        })
    }

    fn bulk_update(
        &self,
        changes: Row,
        filter: Filter,
        options: QueryOptions,
    ) -> BoxFuture<'_, Result<usize, TemporaError>> {
        Box::pin(async move {
            let event = HookEvent::bulk(filter.clone(), options.clone());
            self.hooks.run(HookPhase::BeforeBulkUpdate, &event).await?;

            let changes = self.known(changes);
            let affected = if options.individual_hooks {
                let instances = self.find_all(filter, options.clone()).await?;
                let affected = instances.len();
                for instance in instances {
                    self.update(instance, changes.clone(), options.clone())
                        .await?;
                }
                affected
            } else {
                let mut changes = changes;
                self.stamp_updated(&mut changes);
                let filter = self.scoped(filter, &options);
                self.store
                    .update(&filter, &changes, options.transaction.as_ref())
                    .await?
                    .len()
            };

            self.hooks.run(HookPhase::AfterBulkUpdate, &event).await?;
            Ok(affected)
        })
    }

    fn bulk_destroy(
        &self,
        filter: Filter,
        options: QueryOptions,
    ) -> BoxFuture<'_, Result<usize, TemporaError>> {
        Box::pin(async move {
            let event = HookEvent::bulk(filter.clone(), options.clone());
            self.hooks.run(HookPhase::BeforeBulkDestroy, &event).await?;

            let affected = if options.individual_hooks {
                let instances = self.find_all(filter, options.clone()).await?;
                let affected = instances.len();
                for instance in instances {
                    self.destroy(instance, options.clone()).await?;
                }
                affected
            } else if self.definition.is_paranoid() {
                let mut changes = Row::new();
                changes.insert(DELETED_AT.to_owned(), timestamp_now());
                let filter = self.scoped(filter, &options);
                self.store
                    .update(&filter, &changes, options.transaction.as_ref())
                    .await?
                    .len()
            } else {
                self.store
                    .delete(&filter, options.transaction.as_ref())
                    .await?
                    .len()
            };

            self.hooks.run(HookPhase::AfterBulkDestroy, &event).await?;
            Ok(affected)
        })
    }
}

impl<S> core::fmt::Debug for LifecycleModel<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LifecycleModel")
            .field("name", &self.definition.name)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}
