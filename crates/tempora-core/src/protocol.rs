//! The interception protocol.
//!
//! Registration derives the history model, defines it with the host, makes
//! it write-once, and attaches handlers to the live model's lifecycle:
//!
//! | Mode | Single-row phases | Bulk phases |
//! |------|-------------------|-------------|
//! | diff | `beforeUpdate`, `beforeDestroy` (pre-mutation snapshot) | `beforeBulkUpdate`, `beforeBulkDestroy` |
//! | full | `afterCreate`, `afterUpdate`, `afterDestroy`, `afterRestore` (post-mutation state) | `beforeBulkUpdate`, `beforeBulkDestroy` |
//!
//! Every history write carries the transaction of the triggering operation.
//! Blocking registrations await the write inside the hook phase, so a
//! failure aborts (diff) or fails (full) the operation. Non-blocking ones
//! hand the write to a [`WriteSupervisor`] and return at once.

use std::future::Future;
use std::sync::{Arc, Weak};

use tempora_schema::{ARCHIVED_AT, HISTORY_ID, TrackingMode, derive_history};
use tempora_types::{HookPhase, Row};
use tracing::{debug, info};

use crate::config::TemporalOptions;
use crate::error::TemporaError;
use crate::hooks::{HookEvent, Instance, hook};
use crate::mapper::{DataMapper, Model, QueryOptions};
use crate::registrar::register_history;
use crate::supervisor::WriteSupervisor;

/// Phases on which a history model rejects every mutation.
pub const READ_ONLY_PHASES: [HookPhase; 4] = [
    HookPhase::BeforeUpdate,
    HookPhase::BeforeDestroy,
    HookPhase::BeforeBulkUpdate,
    HookPhase::BeforeBulkDestroy,
];

const BULK_PHASES: [HookPhase; 2] = [HookPhase::BeforeBulkUpdate, HookPhase::BeforeBulkDestroy];

/// Live-model phases observed in each tracking mode.
pub const fn tracked_phases(mode: TrackingMode) -> &'static [HookPhase] {
    match mode {
        TrackingMode::Full => &[
            HookPhase::AfterCreate,
            HookPhase::AfterUpdate,
            HookPhase::AfterDestroy,
            HookPhase::AfterRestore,
        ],
        TrackingMode::Diff => &[HookPhase::BeforeUpdate, HookPhase::BeforeDestroy],
    }
}

/// History tracking with one set of options.
///
/// ```no_run
/// # async fn demo(db: tempora_core::MemoryDatabase) -> Result<(), tempora_core::TemporaError> {
/// use tempora_core::{DataMapper, Temporal, TemporalOptions};
/// use tempora_types::ModelDefinition;
///
/// let temporal = Temporal::new(TemporalOptions::new().with_blocking(false));
/// let _users = temporal.register(db.define(ModelDefinition::new("User"))?, &db)?;
/// // ... mutate users ...
/// temporal.supervisor().settle().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct Temporal {
    options: TemporalOptions,
    supervisor: WriteSupervisor,
}

impl Temporal {
    /// Tracking with `options`.
    pub fn new(options: TemporalOptions) -> Self {
        Self {
            options,
            supervisor: WriteSupervisor::new(),
        }
    }

    /// The supervisor running non-blocking history writes.
    pub const fn supervisor(&self) -> &WriteSupervisor {
        &self.supervisor
    }

    /// Track the history of `live`.
    ///
    /// Returns `live` itself, now carrying the history hooks.
    ///
    /// # Errors
    ///
    /// Returns [`TemporaError::UnknownModel`] if `live` is not defined with
    /// `mapper`, and [`TemporaError::DuplicateEntity`] if the history model
    /// already is.
    pub fn register(
        &self,
        live: Arc<dyn Model>,
        mapper: &dyn DataMapper,
    ) -> Result<Arc<dyn Model>, TemporaError> {
        // The live model and its history share one host.
        if mapper.model(live.name()).is_none() {
            return Err(TemporaError::UnknownModel(live.name().to_owned()));
        }
        let mode = self.options.mode();
        let history = derive_history(live.definition(), mode);
        let sink = register_history(&history, mapper)?;
        enforce_read_only(sink.as_ref());

        let writer = Arc::new(HistoryWriter {
            live_name: live.name().to_owned(),
            live: Arc::downgrade(&live),
            sink,
            mode,
            blocking: self.options.blocking,
            supervisor: self.supervisor.clone(),
        });

        for &phase in tracked_phases(mode) {
            let writer = Arc::clone(&writer);
            live.add_hook(
                phase,
                hook(move |event| {
                    let writer = Arc::clone(&writer);
                    async move { writer.on_mutate(phase, event).await }
                }),
            );
        }
        for phase in BULK_PHASES {
            let writer = Arc::clone(&writer);
            live.add_hook(
                phase,
                hook(move |event| {
                    let writer = Arc::clone(&writer);
                    async move { writer.on_bulk_mutate(phase, event).await }
                }),
            );
        }

        info!(
            model = live.name(),
            history = writer.sink.name(),
            mode = ?mode,
            blocking = self.options.blocking,
            "History tracking enabled"
        );
        Ok(live)
    }
}

/// Track the history of `live` with `options`.
///
/// Non-blocking writes run on a private supervisor; use [`Temporal`] to
/// observe or await them.
///
/// # Errors
///
/// See [`Temporal::register`].
pub fn register(
    live: Arc<dyn Model>,
    mapper: &dyn DataMapper,
    options: TemporalOptions,
) -> Result<Arc<dyn Model>, TemporaError> {
    Temporal::new(options).register(live, mapper)
}

/// Reject updates and deletes on a history model.
pub fn enforce_read_only(sink: &dyn Model) {
    let model = sink.name().to_owned();
    for phase in READ_ONLY_PHASES {
        let model = model.clone();
        sink.add_hook(
            phase,
            hook(move |_| {
                let model = model.clone();
                async move { Err(TemporaError::ReadOnlyViolation { model, phase }) }
            }),
        );
    }
}

/// Writes history rows for one live model.
struct HistoryWriter {
    live_name: String,
    // Weak: the live model owns this writer through its hooks.
    live: Weak<dyn Model>,
    sink: Arc<dyn Model>,
    mode: TrackingMode,
    blocking: bool,
    supervisor: WriteSupervisor,
}

impl HistoryWriter {
    /// Record one instance.
    async fn on_mutate(&self, phase: HookPhase, event: HookEvent) -> Result<(), TemporaError> {
        let HookEvent::Instance { instance, options } = event else {
            return Ok(());
        };

        let row = self.snapshot(&instance);
        debug!(
            model = self.live_name.as_str(),
            history = self.sink.name(),
            phase = %phase,
            rows = 1_usize,
            "Writing history"
        );

        let sink = Arc::clone(&self.sink);
        let history_options = QueryOptions::for_transaction(options.transaction);
        self.dispatch(phase, async move {
            sink.create(row, history_options).await.map(|_| ())
        })
        .await
    }

    /// Record every row a filtered update or destroy is about to touch.
    async fn on_bulk_mutate(&self, phase: HookPhase, event: HookEvent) -> Result<(), TemporaError> {
        let HookEvent::Bulk { filter, options } = event else {
            return Ok(());
        };
        if options.individual_hooks {
            return Ok(());
        }
        let Some(live) = self.live.upgrade() else {
            return Ok(());
        };

        let query = QueryOptions {
            transaction: options.transaction.clone(),
            individual_hooks: false,
            paranoid: options.paranoid,
        };
        let matched = match live.find_all(filter, query).await {
            Ok(matched) => matched,
            Err(e) => {
                let e = TemporaError::bulk_snapshot(&self.live_name, e);
                if self.blocking {
                    return Err(e);
                }
                self.supervisor.report_failure(self.sink.name(), &e);
                return Ok(());
            }
        };
        if matched.is_empty() {
            return Ok(());
        }

        let rows: Vec<Row> = matched
            .into_iter()
            .map(|instance| strip_history_columns(instance.data_values))
            .collect();
        debug!(
            model = self.live_name.as_str(),
            history = self.sink.name(),
            phase = %phase,
            rows = rows.len(),
            "Writing history"
        );

        let sink = Arc::clone(&self.sink);
        let history_options = QueryOptions::for_transaction(options.transaction);
        self.dispatch(phase, async move {
            sink.bulk_create(rows, history_options).await.map(|_| ())
        })
        .await
    }

    /// The row to record: post-mutation state in full mode, the state
    /// last persisted in diff mode.
    fn snapshot(&self, instance: &Instance) -> Row {
        let values = match self.mode {
            TrackingMode::Full => &instance.data_values,
            TrackingMode::Diff if instance.previous_data_values.is_empty() => &instance.data_values,
            TrackingMode::Diff => &instance.previous_data_values,
        };
        strip_history_columns(values.clone())
    }

    async fn dispatch<F>(&self, phase: HookPhase, write: F) -> Result<(), TemporaError>
    where
        F: Future<Output = Result<(), TemporaError>> + Send + 'static,
    {
        let history = self.sink.name().to_owned();
        if self.blocking {
            return write
                .await
                .map_err(|e| TemporaError::history_write(&history, e));
        }

        let label = format!("{history} ({phase})");
        self.supervisor.spawn(label, async move {
            write
                .await
                .map_err(|e| TemporaError::history_write(&history, e))
        });
        Ok(())
    }
}

/// Drop values the history model generates itself.
fn strip_history_columns(mut row: Row) -> Row {
    row.remove(HISTORY_ID);
    row.remove(ARCHIVED_AT);
    row
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn diff_mode_tracks_before_phases_only() {
        assert_eq!(
            tracked_phases(TrackingMode::Diff),
            &[HookPhase::BeforeUpdate, HookPhase::BeforeDestroy]
        );
        assert!(tracked_phases(TrackingMode::Full).iter().all(|p| !p.is_bulk()));
        assert_eq!(tracked_phases(TrackingMode::Full).len(), 4);
    }

    #[test]
    fn synthesized_columns_are_not_copied() {
        let mut row = Row::new();
        row.insert("hid".to_owned(), json!(9));
        row.insert("archivedAt".to_owned(), json!("2024-01-01T00:00:00Z"));
        row.insert("name".to_owned(), json!("Ada"));

        let row = strip_history_columns(row);
        assert_eq!(row.len(), 1);
        assert_eq!(row.get("name"), Some(&json!("Ada")));
    }
}
