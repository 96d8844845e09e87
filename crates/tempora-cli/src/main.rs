//! `tempora` command-line tool.
//!
//! Reads the model definition files listed in the configuration, derives
//! the history model of each, and prints the DDL for both. With
//! `apply: true` the models are registered with a `PostgreSQL` host and
//! their tables are created.
//!
//! # Startup Sequence
//!
//! 1. Load configuration (first argument, `TEMPORA_CONFIG`, or `tempora.yaml`)
//! 2. Initialize structured logging (tracing)
//! 3. Load model files and derive their histories
//! 4. Print DDL
//! 5. Optionally apply it to the database

mod models;

use std::path::{Path, PathBuf};

use anyhow::Context;
use tempora_core::{DataMapper, LoggingConfig, TemporaConfig, Temporal};
use tempora_db::{PgDatabase, PostgresConfig, PostgresPool};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::models::{TrackedModel, load_model};

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG: &str = "tempora.yaml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load configuration.
    let config_path = config_path();
    let config = load_config(&config_path)?;

    // 2. Initialize structured logging.
    init_tracing(&config.logging);
    info!(
        config = %config_path.display(),
        models = config.models.len(),
        full = config.temporal.full,
        blocking = config.temporal.blocking,
        "tempora starting"
    );

    // 3. Load model files.
    let mode = config.temporal.mode();
    let mut tracked = Vec::with_capacity(config.models.len());
    for path in &config.models {
        let live = load_model(path)?;
        info!(model = live.name.as_str(), path = %path.display(), "Model loaded");
        tracked.push(TrackedModel::new(live, mode));
    }

    // 4. Print DDL.
    for model in &tracked {
        for statement in model.statements() {
            println!("{statement};\n");
        }
    }

    // 5. Apply.
    if config.apply {
        apply(&config, tracked).await?;
    }
    Ok(())
}

/// Register every model with a `PostgreSQL` host and create its tables.
async fn apply(config: &TemporaConfig, tracked: Vec<TrackedModel>) -> anyhow::Result<()> {
    let pg_config = PostgresConfig::from_database_config(&config.database)?;
    let pool = PostgresPool::connect(&pg_config)
        .await
        .context("failed to connect to PostgreSQL")?;
    let db = PgDatabase::new(pool);
    let temporal = Temporal::new(config.temporal);

    for model in tracked {
        let live = db.define(model.live)?;
        temporal.register(live, &db)?;
    }
    db.sync().await.context("failed to create tables")?;
    info!(tables = db.definitions().len(), "Schema applied");

    db.pool().close().await;
    Ok(())
}

fn config_path() -> PathBuf {
    std::env::args_os()
        .nth(1)
        .or_else(|| std::env::var_os("TEMPORA_CONFIG"))
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG), PathBuf::from)
}

fn load_config(path: &Path) -> anyhow::Result<TemporaConfig> {
    if path.exists() {
        TemporaConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))
    } else {
        Ok(TemporaConfig::parse("")?)
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
