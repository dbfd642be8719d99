//! Migration status report

use crate::migration::{Migration, Version};
use serde::Serialize;

/// Every discovered up migration, ascending by version, with `applied_at`
/// filled in from the ledger where the version is applied
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StatusReport {
    migrations: Vec<Migration>,
}

impl StatusReport {
    /// Create a report; `migrations` is sorted ascending
    #[must_use]
    pub fn new(mut migrations: Vec<Migration>) -> Self {
        migrations.sort();
        Self { migrations }
    }

    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    pub fn into_migrations(self) -> Vec<Migration> {
        self.migrations
    }

    pub fn applied(&self) -> impl Iterator<Item = &Migration> {
        self.migrations.iter().filter(|m| m.is_applied())
    }

    pub fn pending(&self) -> impl Iterator<Item = &Migration> {
        self.migrations.iter().filter(|m| !m.is_applied())
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.migrations.len()
    }

    #[must_use]
    pub fn applied_count(&self) -> usize {
        self.applied().count()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending().count()
    }

    /// Check if all migrations are applied
    #[must_use]
    pub fn is_up_to_date(&self) -> bool {
        self.pending_count() == 0
    }

    /// Highest applied version among the discovered files
    #[must_use]
    pub fn latest_applied_version(&self) -> Option<Version> {
        self.applied().map(|m| m.version).max()
    }

    /// Version the next `migrate` would apply first
    #[must_use]
    pub fn next_pending_version(&self) -> Option<Version> {
        self.pending().map(|m| m.version).next()
    }
}
