//! SchemaManager - schema operations handed to migration scripts

use crate::executor::{DbError, SqlExecutor};
use sea_query::{
    IndexCreateStatement, IndexDropStatement, Table, TableAlterStatement, TableCreateStatement,
    TableDropStatement,
};
use std::fmt::Display;

/// Convenience wrapper scripts receive in `up`/`down`.
///
/// Wraps the execution channel and renders `sea_query` DDL statements for
/// `PostgreSQL`. Scripts that need something the helpers don't cover can use
/// [`execute`](Self::execute) with raw SQL.
pub struct SchemaManager<'a> {
    executor: &'a dyn SqlExecutor,
}

impl<'a> SchemaManager<'a> {
    /// Create a new manager over the given executor.
    pub fn new(executor: &'a dyn SqlExecutor) -> Self {
        Self { executor }
    }

    /// Create a table.
    ///
    /// # Example
    /// ```rust,no_run
    /// use sea_query::{Table, ColumnDef};
    ///
    /// # fn example(manager: &tidemark::SchemaManager<'_>) -> Result<(), tidemark::DbError> {
    /// let table = Table::create()
    ///     .table("users")
    ///     .col(ColumnDef::new("id").big_integer().not_null().auto_increment().primary_key())
    ///     .col(ColumnDef::new("email").string().not_null().unique_key())
    ///     .to_owned();
    /// manager.create_table(table)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn create_table(&self, table: TableCreateStatement) -> Result<(), DbError> {
        let sql = table.build(sea_query::PostgresQueryBuilder);
        self.executor.execute(&sql, &[]).map(|_| ())
    }

    /// Drop a table.
    pub fn drop_table(&self, table: TableDropStatement) -> Result<(), DbError> {
        let sql = table.build(sea_query::PostgresQueryBuilder);
        self.executor.execute(&sql, &[]).map(|_| ())
    }

    /// Alter a table.
    pub fn alter_table(&self, alter: TableAlterStatement) -> Result<(), DbError> {
        let sql = alter.build(sea_query::PostgresQueryBuilder);
        self.executor.execute(&sql, &[]).map(|_| ())
    }

    /// Create an index.
    pub fn create_index(&self, index: IndexCreateStatement) -> Result<(), DbError> {
        let sql = index.build(sea_query::PostgresQueryBuilder);
        self.executor.execute(&sql, &[]).map(|_| ())
    }

    /// Drop an index.
    pub fn drop_index(&self, index: IndexDropStatement) -> Result<(), DbError> {
        let sql = index.build(sea_query::PostgresQueryBuilder);
        self.executor.execute(&sql, &[]).map(|_| ())
    }

    /// Add a column to an existing table.
    pub fn add_column<T: Display>(
        &self,
        table: T,
        column: sea_query::ColumnDef,
    ) -> Result<(), DbError> {
        let alter = Table::alter()
            .table(table.to_string())
            .add_column(column)
            .to_owned();
        self.alter_table(alter)
    }

    /// Drop a column from an existing table.
    pub fn drop_column<T: Display>(&self, table: T, column: &str) -> Result<(), DbError> {
        let alter = Table::alter()
            .table(table.to_string())
            .drop_column(column.to_string())
            .to_owned();
        self.alter_table(alter)
    }

    /// Execute raw SQL.
    ///
    /// # Example
    /// ```rust,no_run
    /// # fn example(manager: &tidemark::SchemaManager<'_>) -> Result<(), tidemark::DbError> {
    /// manager.execute("CREATE EXTENSION IF NOT EXISTS \"uuid-ossp\"", &[])?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn execute(
        &self,
        sql: &str,
        params: &[&dyn may_postgres::types::ToSql],
    ) -> Result<(), DbError> {
        self.executor.execute(sql, params).map(|_| ())
    }

    /// Get a reference to the underlying executor.
    pub fn executor(&self) -> &dyn SqlExecutor {
        self.executor
    }
}
