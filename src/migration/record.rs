//! `LedgerRow` - Represents entries in the migrations ledger table

use crate::executor::{DbError, Row};
use crate::migration::Version;
use chrono::NaiveDateTime;

/// One applied version as recorded in the ledger table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRow {
    pub version: Version,
    pub applied_at: NaiveDateTime,
    /// Batch the version was applied in; `None` for rows written without one
    pub batch: Option<i64>,
}

impl LedgerRow {
    #[must_use]
    pub fn new(version: Version, applied_at: NaiveDateTime, batch: Option<i64>) -> Self {
        Self {
            version,
            applied_at,
            batch,
        }
    }

    /// Build a `LedgerRow` from a database row
    ///
    /// Expected column order: `version`, `applied_at`, `batch_id`
    ///
    /// # Errors
    ///
    /// Returns `DbError::Decode` if a column is missing or has the wrong type.
    pub fn from_row(row: &Row) -> Result<Self, DbError> {
        let version = row
            .timestamp(0)?
            .ok_or_else(|| DbError::Decode("NULL version in migrations table".to_string()))?;
        let applied_at = row
            .timestamp(1)?
            .ok_or_else(|| DbError::Decode(format!("NULL applied_at for version {}", Version::new(version))))?;
        let batch = row.integer(2)?;

        Ok(Self {
            version: Version::new(version),
            applied_at,
            batch,
        })
    }
}
