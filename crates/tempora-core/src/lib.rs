//! Hook-driven history tracking for Tempora.
//!
//! Attaches an append-only history model to a live model and records one
//! history row per observed mutation. The host (the ORM owning the live
//! model) is abstracted by [`DataMapper`] and [`Model`]; [`MemoryDatabase`]
//! is an in-process host, and `tempora-db` provides a `PostgreSQL` one.
//!
//! # Modules
//!
//! - [`mapper`] -- The host contract: models, data mappers, filters, transactions
//! - [`hooks`] -- Instances, hook events, and per-phase handler registries
//! - [`lifecycle`] -- The lifecycle engine hosts build their models on
//! - [`memory`] -- In-memory host
//! - [`registrar`] -- Defines derived history models with a host
//! - [`protocol`] -- History interception and write-once enforcement
//! - [`supervisor`] -- Background (non-blocking) history writes
//! - [`config`] -- YAML configuration
//! - [`error`] -- Error taxonomy

pub mod config;
pub mod error;
pub mod hooks;
pub mod lifecycle;
pub mod mapper;
pub mod memory;
pub mod protocol;
pub mod registrar;
pub mod supervisor;

pub use config::{ConfigError, DatabaseConfig, LoggingConfig, TemporaConfig, TemporalOptions};
pub use error::TemporaError;
pub use hooks::{Hook, HookEvent, HookRegistry, Instance, hook};
pub use lifecycle::{LifecycleModel, RowStore, timestamp_now};
pub use mapper::{DataMapper, Filter, Model, QueryOptions, Transaction};
pub use memory::{MemoryDatabase, MemoryTable};
pub use protocol::{READ_ONLY_PHASES, Temporal, enforce_read_only, register, tracked_phases};
pub use registrar::register_history;
pub use supervisor::WriteSupervisor;
