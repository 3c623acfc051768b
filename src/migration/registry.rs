//! Static migration registry
//!
//! Scripts are registered explicitly at startup (typically one `Box::new`
//! per script in the host binary) instead of being discovered on disk at
//! runtime. The registry validates and orders them once, at construction.

use super::error::MigrationError;
use super::script::Migration;
use once_cell::sync::Lazy;
use regex::Regex;

/// `{unix timestamp}-{slug}`; fixed-width numeric prefix keeps lexicographic
/// and chronological order identical.
static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{10}-[a-z0-9][a-z0-9_-]*$").expect("identifier regex"));

/// Ordered, validated set of migration scripts.
///
/// Construction fails if any identifier is malformed or duplicated; after
/// that the set is immutable and always sorted ascending by identifier.
pub struct Registry {
    migrations: Vec<Box<dyn Migration>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field(
                "migrations",
                &self
                    .migrations
                    .iter()
                    .map(|m| m.identifier())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Registry {
    /// Build a registry from the host's script list.
    ///
    /// The input order does not matter; scripts are sorted by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::MalformedIdentifier`] if an identifier does
    /// not match `{timestamp}-{slug}`, or
    /// [`MigrationError::DuplicateIdentifier`] if two scripts share one.
    pub fn new(mut migrations: Vec<Box<dyn Migration>>) -> Result<Self, MigrationError> {
        for migration in &migrations {
            let identifier = migration.identifier();
            if !IDENTIFIER_RE.is_match(identifier) {
                return Err(MigrationError::MalformedIdentifier {
                    identifier: identifier.to_string(),
                    reason: "expected a 10-digit unix timestamp, a dash, and a lowercase slug \
                             (e.g. 1716032300-create-users)"
                        .to_string(),
                });
            }
        }

        migrations.sort_by(|a, b| a.identifier().cmp(b.identifier()));

        for pair in migrations.windows(2) {
            if pair[0].identifier() == pair[1].identifier() {
                return Err(MigrationError::DuplicateIdentifier(
                    pair[0].identifier().to_string(),
                ));
            }
        }

        Ok(Self { migrations })
    }

    /// All identifiers, ascending.
    pub fn identifiers(&self) -> Vec<&str> {
        self.migrations.iter().map(|m| m.identifier()).collect()
    }

    /// Look up a script by identifier.
    pub fn get(&self, identifier: &str) -> Option<&dyn Migration> {
        self.migrations
            .binary_search_by(|m| m.identifier().cmp(identifier))
            .ok()
            .map(|idx| self.migrations[idx].as_ref())
    }

    /// Iterate scripts in ascending identifier order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn Migration> {
        self.migrations.iter().map(|m| m.as_ref())
    }

    /// Number of registered scripts.
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}
