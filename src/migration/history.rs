//! Migration history store
//!
//! The history table is the durable source of truth for "current schema
//! version". The engine never owns this state; it is handed a
//! [`HistoryStore`] so production code uses [`SqlHistoryStore`] over the
//! executor seam while tests substitute [`InMemoryHistory`].

use super::error::MigrationError;
use crate::executor::{DbError, SqlExecutor};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::sync::Mutex;

/// Name of the history table.
pub const HISTORY_TABLE: &str = "tidemark_history";

/// One row of the history table: a migration that is currently applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRecord {
    /// Identifier of the applied script.
    pub identifier: String,
    /// When the script was applied.
    pub applied_at: DateTime<Utc>,
    /// Invocation group; scripts applied in one run share a batch number.
    pub batch: Option<i64>,
}

impl HistoryRecord {
    /// Create a record from a database row.
    ///
    /// Expected column order: `identifier`, `applied_at`, `batch`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the timestamp cannot be parsed.
    pub fn from_row(row: &may_postgres::Row) -> Result<Self, DbError> {
        let identifier: String = row.get(0);

        // `may_postgres` returns TIMESTAMP columns as strings.
        let applied_at_str: String = row.get(1);
        let applied_at = parse_timestamp(&applied_at_str)?;

        let batch: Option<i64> = row.get(2);

        Ok(Self {
            identifier,
            applied_at,
            batch,
        })
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DbError> {
    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
    ];

    for format in FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(naive.and_utc());
        }
    }

    Err(DbError::Other(format!(
        "failed to parse timestamp '{raw}': unrecognized format"
    )))
}

/// Durable record of which migrations have been applied.
///
/// All write operations are expected to run on the same connection as the
/// script they account for, inside the script's transaction, so the record
/// and the schema change commit or roll back together.
pub trait HistoryStore {
    /// Create the history table if it does not exist yet.
    ///
    /// The table's own creation is not tracked as a migration.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::Database`] on storage failure.
    fn ensure_table(&self) -> Result<(), MigrationError>;

    /// All applied records, ascending by `applied_at` / insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::Database`] on storage failure.
    fn applied(&self) -> Result<Vec<HistoryRecord>, MigrationError>;

    /// Next batch number: one past the highest recorded batch.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::Database`] on storage failure.
    fn next_batch(&self) -> Result<i64, MigrationError>;

    /// Insert a record for a freshly applied script.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::HistoryWrite`] on a duplicate identifier or
    /// storage failure.
    fn record_applied(&self, identifier: &str, batch: i64) -> Result<(), MigrationError>;

    /// Remove the record for a reverted script.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::HistoryWrite`] if no such record exists or
    /// the delete fails.
    fn record_reverted(&self, identifier: &str) -> Result<(), MigrationError>;
}

impl<H: HistoryStore + ?Sized> HistoryStore for &H {
    fn ensure_table(&self) -> Result<(), MigrationError> {
        (**self).ensure_table()
    }

    fn applied(&self) -> Result<Vec<HistoryRecord>, MigrationError> {
        (**self).applied()
    }

    fn next_batch(&self) -> Result<i64, MigrationError> {
        (**self).next_batch()
    }

    fn record_applied(&self, identifier: &str, batch: i64) -> Result<(), MigrationError> {
        (**self).record_applied(identifier, batch)
    }

    fn record_reverted(&self, identifier: &str) -> Result<(), MigrationError> {
        (**self).record_reverted(identifier)
    }
}

/// [`HistoryStore`] backed by the `tidemark_history` table.
pub struct SqlHistoryStore<'a> {
    executor: &'a dyn SqlExecutor,
}

impl<'a> SqlHistoryStore<'a> {
    /// Create a store over the given executor.
    pub fn new(executor: &'a dyn SqlExecutor) -> Self {
        Self { executor }
    }
}

impl HistoryStore for SqlHistoryStore<'_> {
    fn ensure_table(&self) -> Result<(), MigrationError> {
        // Raw SQL with IF NOT EXISTS; self-initializing on first use.
        let sql = format!(
            r"
            CREATE TABLE IF NOT EXISTS {HISTORY_TABLE} (
                identifier VARCHAR(255) PRIMARY KEY,
                applied_at TIMESTAMP NOT NULL,
                batch BIGINT
            )
            "
        );
        self.executor.execute(&sql, &[]).map_err(MigrationError::Database)?;

        let index_sql = format!(
            "CREATE INDEX IF NOT EXISTS idx_{HISTORY_TABLE}_applied_at ON {HISTORY_TABLE}(applied_at)"
        );
        self.executor
            .execute(&index_sql, &[])
            .map_err(MigrationError::Database)?;

        Ok(())
    }

    fn applied(&self) -> Result<Vec<HistoryRecord>, MigrationError> {
        let sql = format!(
            "SELECT identifier, applied_at, batch FROM {HISTORY_TABLE} \
             ORDER BY applied_at ASC, identifier ASC"
        );

        let rows = self
            .executor
            .query_all(&sql, &[])
            .map_err(MigrationError::Database)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(HistoryRecord::from_row(row).map_err(MigrationError::Database)?);
        }

        Ok(records)
    }

    fn next_batch(&self) -> Result<i64, MigrationError> {
        let sql = format!("SELECT COALESCE(MAX(batch), 0) FROM {HISTORY_TABLE}");
        let row = self
            .executor
            .query_one(&sql, &[])
            .map_err(MigrationError::Database)?;

        let highest: i64 = row.get(0);
        Ok(highest + 1)
    }

    fn record_applied(&self, identifier: &str, batch: i64) -> Result<(), MigrationError> {
        let sql = format!(
            "INSERT INTO {HISTORY_TABLE} (identifier, applied_at, batch) VALUES ($1, $2, $3)"
        );

        // Format the timestamp as a PostgreSQL timestamp string.
        let applied_at = Utc::now().format("%Y-%m-%d %H:%M:%S%.f").to_string();

        self.executor
            .execute(&sql, &[&identifier, &applied_at, &batch])
            .map_err(|source| MigrationError::HistoryWrite {
                identifier: identifier.to_string(),
                source,
            })?;

        Ok(())
    }

    fn record_reverted(&self, identifier: &str) -> Result<(), MigrationError> {
        let sql = format!("DELETE FROM {HISTORY_TABLE} WHERE identifier = $1");

        let removed = self
            .executor
            .execute(&sql, &[&identifier])
            .map_err(|source| MigrationError::HistoryWrite {
                identifier: identifier.to_string(),
                source,
            })?;

        if removed == 0 {
            return Err(MigrationError::HistoryWrite {
                identifier: identifier.to_string(),
                source: DbError::Query("no history record to remove".to_string()),
            });
        }

        Ok(())
    }
}

/// In-memory [`HistoryStore`] for tests.
///
/// Keeps records in insertion order and mirrors the SQL store's error
/// behavior (duplicate inserts and missing deletes are `HistoryWrite`
/// failures). It does not participate in transactions; engine tests assert
/// on call ordering instead.
#[derive(Default)]
pub struct InMemoryHistory {
    records: Mutex<Vec<HistoryRecord>>,
}

impl InMemoryHistory {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-seeded with records, e.g. to simulate drift.
    pub fn with_records(records: Vec<HistoryRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<HistoryRecord>>, MigrationError> {
        self.records
            .lock()
            .map_err(|e| MigrationError::Database(DbError::Other(format!("history lock poisoned: {e}"))))
    }
}

impl HistoryStore for InMemoryHistory {
    fn ensure_table(&self) -> Result<(), MigrationError> {
        Ok(())
    }

    fn applied(&self) -> Result<Vec<HistoryRecord>, MigrationError> {
        Ok(self.lock()?.clone())
    }

    fn next_batch(&self) -> Result<i64, MigrationError> {
        let highest = self
            .lock()?
            .iter()
            .filter_map(|r| r.batch)
            .max()
            .unwrap_or(0);
        Ok(highest + 1)
    }

    fn record_applied(&self, identifier: &str, batch: i64) -> Result<(), MigrationError> {
        let mut records = self.lock()?;

        if records.iter().any(|r| r.identifier == identifier) {
            return Err(MigrationError::HistoryWrite {
                identifier: identifier.to_string(),
                source: DbError::Query("duplicate history record".to_string()),
            });
        }

        records.push(HistoryRecord {
            identifier: identifier.to_string(),
            applied_at: Utc::now(),
            batch: Some(batch),
        });

        Ok(())
    }

    fn record_reverted(&self, identifier: &str) -> Result<(), MigrationError> {
        let mut records = self.lock()?;

        let before = records.len();
        records.retain(|r| r.identifier != identifier);

        if records.len() == before {
            return Err(MigrationError::HistoryWrite {
                identifier: identifier.to_string(),
                source: DbError::Query("no history record to remove".to_string()),
            });
        }

        Ok(())
    }
}
