//! Migrator - core migration execution engine

use super::error::{IntegrityViolation, MigrationError};
use super::history::{HistoryRecord, HistoryStore, SqlHistoryStore};
use super::registry::Registry;
use super::schema_manager::SchemaManager;
use super::script::Migration;
use super::status::{MigrationStatus, StatusEntry};
use super::verify::verify;
use crate::executor::{DbError, SqlExecutor};
use std::collections::HashSet;

/// Options for [`Migrator::apply_pending`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOptions {
    /// Apply at most this many pending scripts (`None` = all pending).
    pub count: Option<usize>,
    /// Hard ceiling on the pending count; exceeding it aborts the run
    /// before any script executes.
    pub max: Option<usize>,
}

/// Options for [`Migrator::revert`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RevertOptions {
    /// Revert this many scripts, most recent first (`None` = 1).
    pub count: Option<usize>,
    /// Revert the whole most recent batch instead of a count.
    pub batch: bool,
}

/// Transaction scoped to a single script.
///
/// `BEGIN` on construction, `COMMIT` on [`commit`](Self::commit), `ROLLBACK`
/// on every other exit path via `Drop`. One script plus its history write is
/// the unit of atomicity; a run is never atomic across scripts.
struct ScriptTransaction<'a> {
    executor: &'a dyn SqlExecutor,
    finished: bool,
}

impl<'a> ScriptTransaction<'a> {
    fn begin(executor: &'a dyn SqlExecutor) -> Result<Self, DbError> {
        executor.execute("BEGIN", &[])?;
        Ok(Self {
            executor,
            finished: false,
        })
    }

    fn commit(mut self) -> Result<(), DbError> {
        self.executor.execute("COMMIT", &[])?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for ScriptTransaction<'_> {
    fn drop(&mut self) {
        // Errors cannot propagate out of drop; the transaction is aborted
        // server-side when the connection sees the failed state anyway.
        if !self.finished {
            let _ = self.executor.execute("ROLLBACK", &[]);
        }
    }
}

/// Orchestrates applying and reverting migrations.
///
/// The migrator owns no durable state; it coordinates the [`Registry`]
/// ("what could be applied") and the [`HistoryStore`] ("what has been
/// applied"). Callers must serialize invocations against one database;
/// concurrent runs are undefined behavior.
pub struct Migrator<'a> {
    registry: &'a Registry,
    executor: &'a dyn SqlExecutor,
    history: Box<dyn HistoryStore + 'a>,
}

impl<'a> Migrator<'a> {
    /// Create a migrator with the SQL-backed history store.
    pub fn new(registry: &'a Registry, executor: &'a dyn SqlExecutor) -> Self {
        Self {
            registry,
            executor,
            history: Box::new(SqlHistoryStore::new(executor)),
        }
    }

    /// Create a migrator with an explicit history store (e.g. an in-memory
    /// store in tests).
    pub fn with_history<H>(registry: &'a Registry, executor: &'a dyn SqlExecutor, history: H) -> Self
    where
        H: HistoryStore + 'a,
    {
        Self {
            registry,
            executor,
            history: Box::new(history),
        }
    }

    /// Apply pending migrations in ascending identifier order.
    ///
    /// Verifies integrity first; any drift or an exceeded `max` ceiling
    /// aborts with zero schema changes. Each script then runs in its own
    /// transaction together with its history record. On failure the failing
    /// script's transaction is rolled back, earlier commits in this run stay
    /// applied, later scripts are never attempted, and the error names the
    /// failing identifier.
    ///
    /// Returns the identifiers applied, in order. An empty pending set is a
    /// successful no-op.
    ///
    /// # Errors
    ///
    /// [`MigrationError::Integrity`], [`MigrationError::Execution`],
    /// [`MigrationError::HistoryWrite`] or [`MigrationError::Database`].
    pub fn apply_pending(&self, options: ApplyOptions) -> Result<Vec<String>, MigrationError> {
        self.history.ensure_table()?;
        let applied = self.history.applied()?;
        verify(self.registry, &applied, options.max)?;

        let recorded: HashSet<&str> = applied.iter().map(|r| r.identifier.as_str()).collect();
        let mut plan: Vec<&dyn Migration> = self
            .registry
            .iter()
            .filter(|m| !recorded.contains(m.identifier()))
            .collect();
        if let Some(count) = options.count {
            plan.truncate(count);
        }

        if plan.is_empty() {
            log::debug!("no pending migrations to apply");
            return Ok(Vec::new());
        }

        let batch = self.history.next_batch()?;
        let manager = SchemaManager::new(self.executor);
        let mut done: Vec<String> = Vec::new();

        for script in plan {
            let identifier = script.identifier().to_string();

            let txn = ScriptTransaction::begin(self.executor).map_err(MigrationError::Database)?;

            if let Err(source) = script.up(&manager) {
                return Err(MigrationError::Execution {
                    identifier,
                    applied: done,
                    source,
                });
            }

            // Same transaction as the script's statements: the record and
            // the schema change commit or roll back together.
            self.history.record_applied(&identifier, batch)?;

            txn.commit().map_err(|source| MigrationError::Execution {
                identifier: identifier.clone(),
                applied: done.clone(),
                source,
            })?;

            log::info!("applied migration {identifier} (batch {batch})");
            done.push(identifier);
        }

        Ok(done)
    }

    /// Revert applied migrations, most recent first.
    ///
    /// The plan is either the trailing records of the most recent batch
    /// (`options.batch`) or the last `options.count` records (default 1).
    /// Same per-script transaction and halt-on-first-failure semantics as
    /// [`apply_pending`](Self::apply_pending).
    ///
    /// Returns the identifiers reverted, in revert order.
    ///
    /// # Errors
    ///
    /// [`MigrationError::Integrity`], [`MigrationError::Execution`],
    /// [`MigrationError::HistoryWrite`] or [`MigrationError::Database`].
    pub fn revert(&self, options: RevertOptions) -> Result<Vec<String>, MigrationError> {
        self.history.ensure_table()?;
        let mut applied = self.history.applied()?;
        verify(self.registry, &applied, None)?;
        applied.sort_by_key(|r| r.applied_at);

        let plan: Vec<HistoryRecord> = if options.batch {
            match applied.last().and_then(|r| r.batch) {
                Some(latest) => applied
                    .iter()
                    .rev()
                    .take_while(|r| r.batch == Some(latest))
                    .cloned()
                    .collect(),
                // No batch numbers recorded; fall back to the single most
                // recent script.
                None => applied.iter().rev().take(1).cloned().collect(),
            }
        } else {
            let count = options.count.unwrap_or(1);
            applied.iter().rev().take(count).cloned().collect()
        };

        if plan.is_empty() {
            log::debug!("no applied migrations to revert");
            return Ok(Vec::new());
        }

        let manager = SchemaManager::new(self.executor);
        let mut done: Vec<String> = Vec::new();

        for record in plan {
            let identifier = record.identifier;

            // Guaranteed registered by the verify pass above.
            let script = self.registry.get(&identifier).ok_or_else(|| {
                MigrationError::Integrity(IntegrityViolation::UnknownAppliedMigration {
                    identifier: identifier.clone(),
                })
            })?;

            let txn = ScriptTransaction::begin(self.executor).map_err(MigrationError::Database)?;

            if let Err(source) = script.down(&manager) {
                return Err(MigrationError::Execution {
                    identifier,
                    applied: done,
                    source,
                });
            }

            self.history.record_reverted(&identifier)?;

            txn.commit().map_err(|source| MigrationError::Execution {
                identifier: identifier.clone(),
                applied: done.clone(),
                source,
            })?;

            log::info!("reverted migration {identifier}");
            done.push(identifier);
        }

        Ok(done)
    }

    /// Report, per registered script, whether it is applied (with timestamp
    /// and batch) or pending. Read-only; no transaction is opened.
    ///
    /// # Errors
    ///
    /// [`MigrationError::Integrity`] on drift, or
    /// [`MigrationError::Database`] on storage failure.
    pub fn status(&self) -> Result<MigrationStatus, MigrationError> {
        self.history.ensure_table()?;
        let applied = self.history.applied()?;
        verify(self.registry, &applied, None)?;

        let entries = self
            .registry
            .identifiers()
            .into_iter()
            .map(|identifier| match applied.iter().find(|r| r.identifier == identifier) {
                Some(record) => StatusEntry {
                    identifier: identifier.to_string(),
                    applied_at: Some(record.applied_at),
                    batch: record.batch,
                },
                None => StatusEntry {
                    identifier: identifier.to_string(),
                    applied_at: None,
                    batch: None,
                },
            })
            .collect();

        Ok(MigrationStatus::new(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::history::InMemoryHistory;
    use chrono::Utc;
    use may_postgres::types::ToSql;
    use std::sync::Mutex;

    /// Records every statement; fails any statement containing `fail_on`.
    struct FakeExecutor {
        statements: Mutex<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    impl FakeExecutor {
        fn new() -> Self {
            Self {
                statements: Mutex::new(Vec::new()),
                fail_on: None,
            }
        }

        fn failing_on(needle: &'static str) -> Self {
            Self {
                statements: Mutex::new(Vec::new()),
                fail_on: Some(needle),
            }
        }

        fn statements(&self) -> Vec<String> {
            self.statements.lock().unwrap().clone()
        }
    }

    impl SqlExecutor for FakeExecutor {
        fn execute(&self, query: &str, _params: &[&dyn ToSql]) -> Result<u64, DbError> {
            self.statements.lock().unwrap().push(query.to_string());
            if let Some(needle) = self.fail_on {
                if query.contains(needle) {
                    return Err(DbError::Query(format!("forced failure on '{needle}'")));
                }
            }
            Ok(1)
        }

        fn query_one(
            &self,
            _query: &str,
            _params: &[&dyn ToSql],
        ) -> Result<may_postgres::Row, DbError> {
            Err(DbError::Query("query_one not supported by fake".to_string()))
        }

        fn query_all(
            &self,
            _query: &str,
            _params: &[&dyn ToSql],
        ) -> Result<Vec<may_postgres::Row>, DbError> {
            Ok(Vec::new())
        }
    }

    struct Step {
        identifier: &'static str,
        up_sql: &'static str,
        down_sql: &'static str,
    }

    impl Migration for Step {
        fn identifier(&self) -> &str {
            self.identifier
        }

        fn up(&self, manager: &SchemaManager<'_>) -> Result<(), DbError> {
            manager.execute(self.up_sql, &[])
        }

        fn down(&self, manager: &SchemaManager<'_>) -> Result<(), DbError> {
            manager.execute(self.down_sql, &[])
        }
    }

    const A: &str = "1716032300-create-users";
    const B: &str = "1716032346-drop-entities";
    const C: &str = "1716032400-add-indexes";

    fn registry_abc() -> Registry {
        Registry::new(vec![
            Box::new(Step {
                identifier: A,
                up_sql: "CREATE TABLE users (id BIGINT)",
                down_sql: "DROP TABLE users",
            }),
            Box::new(Step {
                identifier: B,
                up_sql: "DROP TABLE entities",
                down_sql: "CREATE TABLE entities (id BIGINT)",
            }),
            Box::new(Step {
                identifier: C,
                up_sql: "CREATE INDEX idx_users ON users (id)",
                down_sql: "DROP INDEX idx_users",
            }),
        ])
        .unwrap()
    }

    #[test]
    fn applies_pending_in_order_with_shared_batch() {
        let registry = registry_abc();
        let executor = FakeExecutor::new();
        let history = InMemoryHistory::new();
        let migrator = Migrator::with_history(&registry, &executor, &history);

        let applied = migrator.apply_pending(ApplyOptions::default()).unwrap();
        assert_eq!(applied, vec![A, B, C]);

        let records = history.applied().unwrap();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.batch == Some(1)));
        assert!(records.windows(2).all(|w| w[0].applied_at <= w[1].applied_at));

        // Each script runs between its own BEGIN/COMMIT pair.
        let statements = executor.statements();
        assert_eq!(
            statements,
            vec![
                "BEGIN",
                "CREATE TABLE users (id BIGINT)",
                "COMMIT",
                "BEGIN",
                "DROP TABLE entities",
                "COMMIT",
                "BEGIN",
                "CREATE INDEX idx_users ON users (id)",
                "COMMIT",
            ]
        );
    }

    #[test]
    fn empty_pending_set_is_a_noop() {
        let registry = registry_abc();
        let executor = FakeExecutor::new();
        let history = InMemoryHistory::new();
        let migrator = Migrator::with_history(&registry, &executor, &history);

        migrator.apply_pending(ApplyOptions::default()).unwrap();
        let again = migrator.apply_pending(ApplyOptions::default()).unwrap();
        assert!(again.is_empty());

        let status = migrator.status().unwrap();
        assert!(status.is_up_to_date());
        assert_eq!(status.pending_count, 0);
    }

    #[test]
    fn count_truncates_the_plan() {
        let registry = registry_abc();
        let executor = FakeExecutor::new();
        let history = InMemoryHistory::new();
        let migrator = Migrator::with_history(&registry, &executor, &history);

        let applied = migrator
            .apply_pending(ApplyOptions {
                count: Some(2),
                max: None,
            })
            .unwrap();
        assert_eq!(applied, vec![A, B]);
        assert_eq!(history.applied().unwrap().len(), 2);
    }

    #[test]
    fn exceeding_the_ceiling_applies_nothing() {
        let registry = registry_abc();
        let executor = FakeExecutor::new();
        let history = InMemoryHistory::new();
        let migrator = Migrator::with_history(&registry, &executor, &history);

        let err = migrator
            .apply_pending(ApplyOptions {
                count: None,
                max: Some(2),
            })
            .unwrap_err();

        assert!(matches!(
            err,
            MigrationError::Integrity(IntegrityViolation::LimitExceeded { actual: 3, max: 2 })
        ));
        assert!(history.applied().unwrap().is_empty());
        assert!(executor.statements().is_empty());
    }

    #[test]
    fn failure_mid_run_keeps_earlier_commits_and_stops() {
        let registry = registry_abc();
        let executor = FakeExecutor::failing_on("DROP TABLE entities");
        let history = InMemoryHistory::new();
        let migrator = Migrator::with_history(&registry, &executor, &history);

        let err = migrator.apply_pending(ApplyOptions::default()).unwrap_err();

        match err {
            MigrationError::Execution {
                identifier,
                applied,
                ..
            } => {
                assert_eq!(identifier, B);
                assert_eq!(applied, vec![A]);
            }
            other => panic!("expected execution error, got {other:?}"),
        }

        // A committed and recorded; B rolled back and unrecorded; C never ran.
        let records = history.applied().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].identifier, A);

        let statements = executor.statements();
        assert_eq!(statements.last().map(String::as_str), Some("ROLLBACK"));
        assert!(!statements.iter().any(|s| s.contains("CREATE INDEX")));
    }

    #[test]
    fn revert_defaults_to_most_recent_only() {
        let registry = registry_abc();
        let executor = FakeExecutor::new();
        let history = InMemoryHistory::new();
        let migrator = Migrator::with_history(&registry, &executor, &history);

        migrator.apply_pending(ApplyOptions::default()).unwrap();
        let reverted = migrator.revert(RevertOptions::default()).unwrap();
        assert_eq!(reverted, vec![C]);

        let records = history.applied().unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.identifier != C));
        assert!(executor.statements().iter().any(|s| s == "DROP INDEX idx_users"));
    }

    #[test]
    fn apply_then_revert_same_count_empties_history() {
        let registry = registry_abc();
        let executor = FakeExecutor::new();
        let history = InMemoryHistory::new();
        let migrator = Migrator::with_history(&registry, &executor, &history);

        let applied = migrator.apply_pending(ApplyOptions::default()).unwrap();
        let reverted = migrator
            .revert(RevertOptions {
                count: Some(applied.len()),
                batch: false,
            })
            .unwrap();

        assert_eq!(reverted, vec![C, B, A]);
        assert!(history.applied().unwrap().is_empty());
    }

    #[test]
    fn revert_batch_removes_only_the_latest_batch() {
        let registry = registry_abc();
        let executor = FakeExecutor::new();
        let history = InMemoryHistory::new();
        let migrator = Migrator::with_history(&registry, &executor, &history);

        // First invocation: batch 1 = [A]; second: batch 2 = [B, C].
        migrator
            .apply_pending(ApplyOptions {
                count: Some(1),
                max: None,
            })
            .unwrap();
        migrator.apply_pending(ApplyOptions::default()).unwrap();

        let reverted = migrator
            .revert(RevertOptions {
                count: None,
                batch: true,
            })
            .unwrap();

        assert_eq!(reverted, vec![C, B]);
        let records = history.applied().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].identifier, A);
        assert_eq!(records[0].batch, Some(1));
    }

    #[test]
    fn revert_surfaces_down_failure_and_keeps_the_record() {
        let registry = registry_abc();
        let executor = FakeExecutor::failing_on("DROP INDEX");
        let history = InMemoryHistory::new();
        let migrator = Migrator::with_history(&registry, &executor, &history);

        migrator.apply_pending(ApplyOptions::default()).unwrap();
        let err = migrator.revert(RevertOptions::default()).unwrap_err();

        assert!(matches!(
            err,
            MigrationError::Execution { ref identifier, .. } if identifier == C
        ));
        // The failed revert's record is still present.
        assert_eq!(history.applied().unwrap().len(), 3);
        assert_eq!(
            executor.statements().last().map(String::as_str),
            Some("ROLLBACK")
        );
    }

    #[test]
    fn drifted_history_blocks_every_operation() {
        let registry = registry_abc();
        let executor = FakeExecutor::new();
        let history = InMemoryHistory::with_records(vec![HistoryRecord {
            identifier: "1716039999-deleted-script".to_string(),
            applied_at: Utc::now(),
            batch: Some(1),
        }]);
        let migrator = Migrator::with_history(&registry, &executor, &history);

        for result in [
            migrator.apply_pending(ApplyOptions::default()),
            migrator.revert(RevertOptions::default()),
        ] {
            let err = result.unwrap_err();
            assert!(matches!(
                err,
                MigrationError::Integrity(IntegrityViolation::UnknownAppliedMigration { ref identifier })
                    if identifier == "1716039999-deleted-script"
            ));
        }
        assert!(migrator.status().is_err());
        assert!(executor.statements().is_empty());
    }

    #[test]
    fn default_wiring_bootstraps_the_history_table() {
        let registry = registry_abc();
        let executor = FakeExecutor::new();
        let migrator = Migrator::new(&registry, &executor);

        // Empty history table: every script reports pending.
        let status = migrator.status().unwrap();
        assert_eq!(status.pending_count, 3);
        assert_eq!(status.applied_count, 0);

        let statements = executor.statements();
        assert!(statements
            .iter()
            .any(|s| s.contains("CREATE TABLE IF NOT EXISTS tidemark_history")));
    }

    #[test]
    fn status_reports_applied_timestamps_and_batches() {
        let registry = registry_abc();
        let executor = FakeExecutor::new();
        let history = InMemoryHistory::new();
        let migrator = Migrator::with_history(&registry, &executor, &history);

        migrator
            .apply_pending(ApplyOptions {
                count: Some(2),
                max: None,
            })
            .unwrap();

        let status = migrator.status().unwrap();
        assert_eq!(status.applied_count, 2);
        assert_eq!(status.pending_count, 1);
        assert_eq!(status.next_pending(), Some(C));
        assert_eq!(status.latest_applied(), Some(B));

        let entry_a = &status.entries[0];
        assert!(entry_a.is_applied());
        assert_eq!(entry_a.batch, Some(1));
    }
}
