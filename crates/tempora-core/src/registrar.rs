//! Registers derived history models with a host.

use std::sync::Arc;

use tempora_schema::HistoryDefinition;
use tracing::info;

use crate::error::TemporaError;
use crate::mapper::{DataMapper, Model};

/// Define `history` with `mapper` and return the history sink.
///
/// # Errors
///
/// Propagates the host's failure unchanged, in particular
/// [`TemporaError::DuplicateEntity`] when the history name is taken.
pub fn register_history(
    history: &HistoryDefinition,
    mapper: &dyn DataMapper,
) -> Result<Arc<dyn Model>, TemporaError> {
    let sink = mapper.define(history.definition.clone())?;
    info!(
        model = history.source.as_str(),
        history = history.name(),
        mode = ?history.mode,
        "History model registered"
    );
    Ok(sink)
}
