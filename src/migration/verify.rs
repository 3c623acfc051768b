//! Integrity verification between registry and history
//!
//! Runs before every mutating operation; any violation aborts the run with
//! zero schema changes.

use super::error::IntegrityViolation;
use super::history::HistoryRecord;
use super::registry::Registry;

/// Check the recorded history against the registered scripts.
///
/// Checks, in order:
/// 1. every recorded identifier has a registered script
///    ([`IntegrityViolation::UnknownAppliedMigration`]);
/// 2. the history, sorted by `applied_at`, is an in-order prefix of the
///    registry ([`IntegrityViolation::OutOfOrderApplication`]);
/// 3. if `max` is set, the pending count does not exceed it
///    ([`IntegrityViolation::LimitExceeded`]).
///
/// # Errors
///
/// Returns the first violation found; the caller must not mutate anything.
pub fn verify(
    registry: &Registry,
    history: &[HistoryRecord],
    max: Option<usize>,
) -> Result<(), IntegrityViolation> {
    let registered = registry.identifiers();

    for record in history {
        if !registered.contains(&record.identifier.as_str()) {
            return Err(IntegrityViolation::UnknownAppliedMigration {
                identifier: record.identifier.clone(),
            });
        }
    }

    let mut ordered: Vec<&HistoryRecord> = history.iter().collect();
    ordered.sort_by_key(|r| r.applied_at);

    for (position, record) in ordered.iter().enumerate() {
        match registered.get(position) {
            Some(expected) if record.identifier == *expected => {}
            Some(expected) => {
                return Err(IntegrityViolation::OutOfOrderApplication {
                    position,
                    expected: (*expected).to_string(),
                    found: record.identifier.clone(),
                });
            }
            // More records than scripts: only reachable when the store holds
            // a duplicate identifier.
            None => {
                return Err(IntegrityViolation::OutOfOrderApplication {
                    position,
                    expected: "(end of registry)".to_string(),
                    found: record.identifier.clone(),
                });
            }
        }
    }

    if let Some(max) = max {
        let pending = registered.len() - ordered.len();
        if pending > max {
            return Err(IntegrityViolation::LimitExceeded {
                actual: pending,
                max,
            });
        }
    }

    Ok(())
}
