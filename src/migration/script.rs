//! Migration trait definition

use super::schema_manager::SchemaManager;
use crate::DbError;

/// A single reversible schema change.
///
/// Scripts are authored individually and are immutable once released: the
/// identifier must never change after the script has been applied anywhere,
/// since ordering and drift detection are keyed on it.
///
/// The identifier is a unix-timestamp-prefixed slug such as
/// `1716032300-create-users`. Because every prefix has the same width,
/// lexicographic order is also chronological order.
pub trait Migration: Send + Sync {
    /// Unique, sortable identifier (`{timestamp}-{slug}`).
    fn identifier(&self) -> &str;

    /// Apply the schema change.
    ///
    /// Runs inside a transaction opened by the migrator; on error the whole
    /// transaction, including the history record, is rolled back.
    ///
    /// Note: tidemark targets the `may` runtime, so this is synchronous. The
    /// executor handles coroutine scheduling internally.
    fn up(&self, manager: &SchemaManager<'_>) -> Result<(), DbError>;

    /// Undo the schema change.
    ///
    /// Authors are responsible for `down` actually inverting `up`; the engine
    /// can only verify ordering and bookkeeping, not semantics. A `down` that
    /// is not idempotent and runs twice surfaces the driver error unchanged.
    fn down(&self, manager: &SchemaManager<'_>) -> Result<(), DbError>;
}
