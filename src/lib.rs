//! # Tidemark
//!
//! Transactional schema-migration engine for `PostgreSQL` on the `may`
//! runtime.
//!
//! Scripts implement [`Migration`], are registered statically in a
//! [`Registry`], and are applied or reverted by a [`Migrator`] one
//! transaction per script, with history tracked in a self-initializing
//! `tidemark_history` table. Integrity between the registered scripts and
//! the recorded history is verified before any mutation.
//!
//! See the [`migration`] module for the engine and [`cli`] for the
//! embeddable command-line surface.

pub mod config;
pub mod connection;
pub mod executor;
pub mod migration;

#[cfg(feature = "cli")]
pub mod cli;

pub use config::MigratorConfig;
pub use connection::{connect, ConnectionError};
pub use executor::{DbError, MayPostgresExecutor, SqlExecutor};
pub use migration::{
    ApplyOptions, HistoryRecord, HistoryStore, InMemoryHistory, IntegrityViolation, Migration,
    MigrationError, MigrationStatus, Migrator, Registry, RevertOptions, SchemaManager,
    SqlHistoryStore, StatusEntry,
};
