//! Database execution seam.
//!
//! [`SqlExecutor`] abstracts raw statement execution over `may_postgres` so
//! the migration engine never talks to a concrete driver type directly.
//! Scripts, the history store and the per-script transaction guard all go
//! through this trait, which is what lets tests substitute a scripted fake.

use may_postgres::types::ToSql;
use may_postgres::{Client, Error as PostgresError, Row};
use thiserror::Error;

/// Errors surfaced by the execution channel.
#[derive(Debug, Error)]
pub enum DbError {
    /// `PostgreSQL` error from `may_postgres`
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] PostgresError),
    /// Query execution error
    #[error("query error: {0}")]
    Query(String),
    /// Other execution errors
    #[error("execution error: {0}")]
    Other(String),
}

/// Trait for executing database statements.
///
/// Implementations may be a direct client, a pooled connection, or a test
/// fake. The engine only needs "execute this SQL and return success or a
/// driver error"; it never parses or validates SQL itself.
pub trait SqlExecutor {
    /// Execute a statement, returning the number of rows affected.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if execution fails.
    fn execute(&self, query: &str, params: &[&dyn ToSql]) -> Result<u64, DbError>;

    /// Execute a query expected to return exactly one row.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if execution fails or the row count is not one.
    fn query_one(&self, query: &str, params: &[&dyn ToSql]) -> Result<Row, DbError>;

    /// Execute a query and return all rows.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if execution fails.
    fn query_all(&self, query: &str, params: &[&dyn ToSql]) -> Result<Vec<Row>, DbError>;
}

/// [`SqlExecutor`] backed by a `may_postgres::Client`.
pub struct MayPostgresExecutor {
    client: Client,
}

impl MayPostgresExecutor {
    /// Create a new executor from a `may_postgres::Client`.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Get a reference to the underlying client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Consume the executor and return the underlying client.
    pub fn into_client(self) -> Client {
        self.client
    }
}

impl SqlExecutor for MayPostgresExecutor {
    fn execute(&self, query: &str, params: &[&dyn ToSql]) -> Result<u64, DbError> {
        self.client.execute(query, params).map_err(DbError::Postgres)
    }

    fn query_one(&self, query: &str, params: &[&dyn ToSql]) -> Result<Row, DbError> {
        self.client.query_one(query, params).map_err(DbError::Postgres)
    }

    fn query_all(&self, query: &str, params: &[&dyn ToSql]) -> Result<Vec<Row>, DbError> {
        self.client.query(query, params).map_err(DbError::Postgres)
    }
}
