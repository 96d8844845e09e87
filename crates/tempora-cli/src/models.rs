//! Model files and the DDL derived from them.

use std::path::Path;

use anyhow::Context;
use tempora_schema::{HistoryDefinition, TrackingMode, derive_history};
use tempora_types::ModelDefinition;

/// A live model read from disk, with its history.
#[derive(Debug, Clone)]
pub struct TrackedModel {
    /// The live definition as written in the file.
    pub live: ModelDefinition,
    /// The derived history definition.
    pub history: HistoryDefinition,
}

impl TrackedModel {
    /// Derive the history of `live`.
    pub fn new(live: ModelDefinition, mode: TrackingMode) -> Self {
        let history = derive_history(&live.clone().normalized(), mode);
        Self { live, history }
    }

    /// DDL for the live table and then the history table.
    pub fn statements(&self) -> Vec<String> {
        let mut statements = tempora_db::ddl::schema_statements(&self.live.clone().normalized());
        statements.extend(tempora_db::ddl::schema_statements(
            &self.history.definition.clone().normalized(),
        ));
        statements
    }
}

/// Parse one YAML model definition.
pub fn parse_model(yaml: &str) -> anyhow::Result<ModelDefinition> {
    Ok(serde_yml::from_str(yaml)?)
}

/// Read one YAML model definition file.
pub fn load_model(path: &Path) -> anyhow::Result<ModelDefinition> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read model file {}", path.display()))?;
    parse_model(&contents).with_context(|| format!("invalid model file {}", path.display()))
}
