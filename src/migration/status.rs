//! Migration status reporting

use chrono::{DateTime, Utc};

/// One registry entry in a [`MigrationStatus`] report.
#[derive(Debug, Clone)]
pub struct StatusEntry {
    /// Script identifier.
    pub identifier: String,
    /// When the script was applied; `None` means pending.
    pub applied_at: Option<DateTime<Utc>>,
    /// Batch the script was applied in, if recorded.
    pub batch: Option<i64>,
}

impl StatusEntry {
    /// Whether the script has been applied.
    #[must_use]
    pub fn is_applied(&self) -> bool {
        self.applied_at.is_some()
    }
}

/// Applied/pending breakdown of every registered script, in registry order.
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    /// One entry per registry script, ascending by identifier.
    pub entries: Vec<StatusEntry>,
    /// Number of applied scripts.
    pub applied_count: usize,
    /// Number of pending scripts.
    pub pending_count: usize,
}

impl MigrationStatus {
    /// Build a status report from per-entry data.
    #[must_use]
    pub fn new(entries: Vec<StatusEntry>) -> Self {
        let applied_count = entries.iter().filter(|e| e.is_applied()).count();
        let pending_count = entries.len() - applied_count;

        Self {
            entries,
            applied_count,
            pending_count,
        }
    }

    /// Check if every registered script has been applied.
    #[must_use]
    pub fn is_up_to_date(&self) -> bool {
        self.pending_count == 0
    }

    /// Identifier of the most recently applied script, if any.
    #[must_use]
    pub fn latest_applied(&self) -> Option<&str> {
        self.entries
            .iter()
            .filter(|e| e.is_applied())
            .max_by_key(|e| e.applied_at)
            .map(|e| e.identifier.as_str())
    }

    /// Identifier of the next pending script, if any.
    #[must_use]
    pub fn next_pending(&self) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| !e.is_applied())
            .map(|e| e.identifier.as_str())
    }
}
