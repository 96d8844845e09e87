//! `PostgreSQL` host for Tempora.
//!
//! Live and history models are stored as ordinary tables rendered from
//! their definitions. [`PgDatabase`] implements the core `DataMapper`
//! contract on top of a [`PostgresPool`], so history tracking runs against
//! `PostgreSQL` exactly as it does against the in-memory host.
//!
//! ```text
//! PgDatabase (DataMapper)
//!     |
//!     +-- define() --> LifecycleModel<PgStore>   (hooks, timestamps)
//!     |                    |
//!     |                    +-- PgStore --> JSONB INSERT/SELECT/UPDATE/DELETE
//!     |
//!     +-- begin/commit/rollback --> sqlx transactions keyed by TransactionId
//!     |
//!     +-- sync() --> ddl::schema_statements (CREATE TABLE / CREATE INDEX)
//! ```
//!
//! # Modules
//!
//! - [`postgres`] -- `PostgreSQL` connection pool and configuration
//! - [`ddl`] -- Table and index DDL for model definitions
//! - [`store`] -- JSONB row store implementing `RowStore`
//! - [`database`] -- The `DataMapper` implementation
//! - [`error`] -- Shared error types

pub mod database;
pub mod ddl;
pub mod error;
pub mod postgres;
pub mod store;

// Re-export primary types for convenience.
pub use database::PgDatabase;
pub use error::DbError;
pub use postgres::{PostgresConfig, PostgresPool};
pub use store::PgStore;
