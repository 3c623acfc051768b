//! Migration-specific error types

use crate::DbError;
use thiserror::Error;

/// Drift between the registered scripts and the recorded history, or a
/// configured limit exceeded.
///
/// Returned as a value by [`verify`](super::verify::verify) rather than
/// thrown mid-flight, so callers decide whether to abort. Any violation
/// aborts the whole operation before a single schema change is made.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IntegrityViolation {
    /// History records a migration that no longer exists in the codebase.
    #[error("history records migration '{identifier}' but no such script is registered")]
    UnknownAppliedMigration {
        /// The recorded identifier with no matching script.
        identifier: String,
    },
    /// Applied history is not an in-order prefix of the registry.
    #[error(
        "migration '{found}' was applied at position {position} where '{expected}' was expected; \
         history must follow registration order"
    )]
    OutOfOrderApplication {
        /// Zero-based position in the applied history.
        position: usize,
        /// Identifier the registry expects at this position.
        expected: String,
        /// Identifier actually recorded at this position.
        found: String,
    },
    /// The run would touch more migrations than the configured ceiling.
    #[error("{actual} pending migration(s) exceed the configured maximum of {max}")]
    LimitExceeded {
        /// Number of migrations the run would touch.
        actual: usize,
        /// The configured ceiling.
        max: usize,
    },
}

/// Errors surfaced by the migration engine.
///
/// Nothing here is retried automatically; schema mutations are not safely
/// idempotent in general, so every failure propagates to the caller with the
/// identifier it concerns.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Two registered scripts share an identifier, making ordering ambiguous.
    #[error("duplicate migration identifier '{0}'")]
    DuplicateIdentifier(String),
    /// A registered script's identifier does not match `{timestamp}-{slug}`.
    #[error("malformed migration identifier '{identifier}': {reason}")]
    MalformedIdentifier {
        /// The offending identifier.
        identifier: String,
        /// Why it was rejected.
        reason: String,
    },
    /// Drift detected before any mutation; zero schema changes were made.
    #[error(transparent)]
    Integrity(#[from] IntegrityViolation),
    /// A script's `up`/`down` failed. Its transaction was rolled back;
    /// migrations committed earlier in the same run remain applied.
    #[error(
        "migration '{identifier}' failed after {} earlier migration(s) in this run succeeded: {source}",
        applied.len()
    )]
    Execution {
        /// Identifier of the failing script.
        identifier: String,
        /// Identifiers committed earlier in the same run, in order.
        applied: Vec<String>,
        /// The underlying driver error, unmodified.
        source: DbError,
    },
    /// The bookkeeping write failed after the script's statements ran.
    ///
    /// The script's transaction is rolled back, but this still halts the run
    /// loudly: inspect the history table before retrying.
    #[error(
        "history write for migration '{identifier}' failed; its transaction was rolled back, \
         inspect the history table before retrying: {source}"
    )]
    HistoryWrite {
        /// Identifier whose record could not be written or removed.
        identifier: String,
        /// The underlying driver error.
        source: DbError,
    },
    /// Database error outside any particular script (connection, history
    /// reads, transaction control).
    #[error("database error: {0}")]
    Database(#[from] DbError),
}
