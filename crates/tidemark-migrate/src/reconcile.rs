use std::collections::HashMap;
use std::fmt;

use tidemark_common::{Divergence, Error, Result};
use tidemark_db::LedgerEntry;

use crate::migration::Migration;

/// A ledger row paired with the declared migration at the same position.
pub struct AppliedMigration<'a, C> {
    pub entry: LedgerEntry,
    pub migration: &'a Migration<C>,
}

/// The declared sequence split into the prefix the ledger says is applied
/// and the suffix still to run.
pub struct Reconciliation<'a, C> {
    pub applied: Vec<AppliedMigration<'a, C>>,
    pub remaining: &'a [Migration<C>],
}

impl<'a, C> Reconciliation<'a, C> {
    /// The most recently applied migration, the one `down` reverts.
    pub fn last_applied(&self) -> Option<&AppliedMigration<'a, C>> {
        self.applied.last()
    }

    pub fn is_up_to_date(&self) -> bool {
        self.remaining.is_empty()
    }
}

/// Reject sequences with empty or repeated ids before they meet the ledger.
pub fn validate_sequence<C>(declared: &[Migration<C>]) -> Result<()> {
    let mut seen: HashMap<&str, usize> = HashMap::with_capacity(declared.len());
    for (index, migration) in declared.iter().enumerate() {
        if migration.id().is_empty() {
            return Err(Error::InvalidMigrations(format!(
                "migration at index {index} has an empty id"
            )));
        }
        if let Some(first) = seen.insert(migration.id(), index) {
            return Err(Error::InvalidMigrations(format!(
                "duplicate migration id {} at index {first} and {index}",
                migration.id()
            )));
        }
    }
    Ok(())
}

/// Match ledger rows to declared migrations by position.
///
/// Row `i` must name the declared migration at index `i`. Any gap or
/// mismatch means already-applied history was edited, which is reported as
/// a divergence and never repaired.
pub fn reconcile<C>(
    declared: &[Migration<C>],
    ledger: Vec<LedgerEntry>,
) -> Result<Reconciliation<'_, C>> {
    let mut applied = Vec::with_capacity(ledger.len());

    for (index, entry) in ledger.into_iter().enumerate() {
        let Some(migration) = declared.get(index) else {
            return Err(Divergence::Unknown {
                index,
                id: entry.id,
                applied_at: entry.timestamp,
            }
            .into());
        };
        if migration.id() != entry.id {
            return Err(Divergence::Mismatch {
                index,
                expected: migration.id().to_string(),
                actual: entry.id,
                applied_at: entry.timestamp,
            }
            .into());
        }
        applied.push(AppliedMigration { entry, migration });
    }

    let remaining = &declared[applied.len()..];
    Ok(Reconciliation { applied, remaining })
}

impl<C> fmt::Debug for AppliedMigration<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppliedMigration")
            .field("entry", &self.entry)
            .field("migration", self.migration)
            .finish()
    }
}

impl<C> fmt::Debug for Reconciliation<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciliation")
            .field("applied", &self.applied)
            .field("remaining", &self.remaining)
            .finish()
    }
}
