//! Schema-migration engine.
//!
//! This module provides the core pieces of the engine:
//! - [`Migration`] trait: a reversible, identifier-ordered schema change
//! - [`Registry`]: the statically registered, ordered set of scripts
//! - [`HistoryStore`]: durable record of what has been applied
//! - integrity verification between registry and history
//! - [`Migrator`]: transactional apply/revert/status orchestration
//!
//! # Example
//!
//! ```rust,no_run
//! use tidemark::{DbError, Migration, Migrator, Registry, SchemaManager};
//!
//! pub struct CreateUsers;
//!
//! impl Migration for CreateUsers {
//!     fn identifier(&self) -> &str {
//!         "1716032300-create-users"
//!     }
//!
//!     fn up(&self, manager: &SchemaManager<'_>) -> Result<(), DbError> {
//!         manager.execute(
//!             "CREATE TABLE users (id BIGSERIAL PRIMARY KEY, email VARCHAR(255) NOT NULL UNIQUE)",
//!             &[],
//!         )
//!     }
//!
//!     fn down(&self, manager: &SchemaManager<'_>) -> Result<(), DbError> {
//!         manager.execute("DROP TABLE users", &[])
//!     }
//! }
//!
//! # fn run(executor: &dyn tidemark::SqlExecutor) -> Result<(), tidemark::MigrationError> {
//! let registry = Registry::new(vec![Box::new(CreateUsers)])?;
//! let migrator = Migrator::new(&registry, executor);
//! let applied = migrator.apply_pending(Default::default())?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod history;
pub mod migrator;
pub mod registry;
pub mod schema_manager;
pub mod script;
pub mod status;
pub mod verify;

pub use error::{IntegrityViolation, MigrationError};
pub use history::{HistoryRecord, HistoryStore, InMemoryHistory, SqlHistoryStore};
pub use migrator::{ApplyOptions, Migrator, RevertOptions};
pub use registry::Registry;
pub use schema_manager::SchemaManager;
pub use script::Migration;
pub use status::{MigrationStatus, StatusEntry};
pub use verify::verify;
