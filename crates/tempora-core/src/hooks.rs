//! Lifecycle hooks: instances, hook events, and the per-model registry.
//!
//! Handlers are registered per [`HookPhase`] and run sequentially in
//! registration order. Several independent handlers may observe the same
//! phase; the first one to fail aborts the phase, and with it the
//! operation that triggered it.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::BoxFuture;
use serde_json::Value;
use tempora_types::{HookPhase, Row};

use crate::error::TemporaError;
use crate::mapper::{Filter, QueryOptions};

/// A row held in memory by the application.
///
/// `previous_data_values` is the state last loaded from or written to
/// storage. While an update is in flight the new values live in
/// `data_values` and the prior ones remain in `previous_data_values`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Instance {
    /// Current in-memory values.
    pub data_values: Row,
    /// Values as last persisted; empty for a row never stored.
    pub previous_data_values: Row,
}

impl Instance {
    /// An instance that has not been stored yet.
    pub fn build(row: Row) -> Self {
        Self {
            data_values: row,
            previous_data_values: Row::new(),
        }
    }

    /// An instance loaded from (or just written to) storage.
    pub fn persisted(row: Row) -> Self {
        Self {
            previous_data_values: row.clone(),
            data_values: row,
        }
    }

    /// Current value of an attribute.
    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.data_values.get(attribute)
    }

    /// Value of an attribute as last persisted.
    pub fn previous(&self, attribute: &str) -> Option<&Value> {
        self.previous_data_values.get(attribute)
    }

    /// Set several attributes in memory.
    pub fn apply(&mut self, changes: &Row) {
        for (attribute, value) in changes {
            self.data_values.insert(attribute.clone(), value.clone());
        }
    }

    /// Record the in-memory values as persisted.
    pub fn mark_persisted(&mut self) {
        self.previous_data_values.clone_from(&self.data_values);
    }
}

/// What a hook observes.
#[derive(Debug, Clone, PartialEq)]
pub enum HookEvent {
    /// A single-row phase (`beforeUpdate`, `afterCreate`, ...).
    Instance {
        /// The row being mutated.
        instance: Instance,
        /// Options of the triggering operation.
        options: QueryOptions,
    },
    /// A filtered multi-row phase (`beforeBulkUpdate`, ...).
    Bulk {
        /// Rows targeted by the operation.
        filter: Filter,
        /// Options of the triggering operation.
        options: QueryOptions,
    },
}

impl HookEvent {
    /// Event for a single-row phase.
    pub const fn instance(instance: Instance, options: QueryOptions) -> Self {
        Self::Instance { instance, options }
    }

    /// Event for a multi-row phase.
    pub const fn bulk(filter: Filter, options: QueryOptions) -> Self {
        Self::Bulk { filter, options }
    }
}

/// A lifecycle handler.
pub type Hook = Arc<dyn Fn(HookEvent) -> BoxFuture<'static, Result<(), TemporaError>> + Send + Sync>;

/// Wrap an async closure as a [`Hook`].
pub fn hook<F, Fut>(handler: F) -> Hook
where
    F: Fn(HookEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TemporaError>> + Send + 'static,
{
    Arc::new(move |event| Box::pin(handler(event)))
}

/// Ordered handler lists per lifecycle phase.
#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<BTreeMap<HookPhase, Vec<Hook>>>,
}

impl HookRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler to a phase.
    pub fn add(&self, phase: HookPhase, hook: Hook) {
        self.hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(phase)
            .or_default()
            .push(hook);
    }

    /// Number of handlers registered for a phase.
    pub fn count(&self, phase: HookPhase) -> usize {
        self.hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&phase)
            .map_or(0, Vec::len)
    }

    /// Run every handler of a phase in registration order.
    ///
    /// Stops at, and returns, the first failure.
    pub async fn run(&self, phase: HookPhase, event: &HookEvent) -> Result<(), TemporaError> {
        let handlers: Vec<Hook> = self
            .hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&phase)
            .cloned()
            .unwrap_or_default();

        for handler in handlers {
            handler(event.clone()).await?;
        }
        Ok(())
    }
}

impl core::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let counts: BTreeMap<HookPhase, usize> = self
            .hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(phase, handlers)| (*phase, handlers.len()))
            .collect();
        f.debug_struct("HookRegistry").field("hooks", &counts).finish()
    }
}
