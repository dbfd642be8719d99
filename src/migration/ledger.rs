//! Migrations ledger table
//!
//! The ledger records which versions are applied, when, and in which batch.
//! Every method is a single round trip. SQL is written once with `?`
//! placeholders and rewritten per engine by [`Provider::set_placeholders`];
//! the table name is interpolated and must already be a validated identifier.

use crate::executor::{DbConnection, DbError, Value};
use crate::migration::{LedgerRow, Version};
use crate::provider::Provider;
use chrono::NaiveDateTime;

/// Sort direction for [`Ledger::applied_versions`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Ascending,
    Descending,
}

impl Order {
    fn sql(self) -> &'static str {
        match self {
            Order::Ascending => "ASC",
            Order::Descending => "DESC",
        }
    }
}

/// Borrowed view of the ledger table over an open connection
pub struct Ledger<'a> {
    conn: &'a dyn DbConnection,
    provider: &'a dyn Provider,
    table: &'a str,
}

impl<'a> Ledger<'a> {
    pub fn new(conn: &'a dyn DbConnection, provider: &'a dyn Provider, table: &'a str) -> Self {
        Self { conn, provider, table }
    }

    pub fn table(&self) -> &str {
        self.table
    }

    fn sql(&self, template: &str) -> String {
        self.provider.set_placeholders(&template.replace("{table}", self.table))
    }

    fn select_rows(&self, template: &str, params: &[Value]) -> Result<Vec<LedgerRow>, DbError> {
        self.conn
            .query(&self.sql(template), params)?
            .iter()
            .map(LedgerRow::from_row)
            .collect()
    }

    /// Whether the ledger table exists
    pub fn has_table(&self) -> Result<bool, DbError> {
        let rows = self
            .conn
            .query(&self.provider.set_placeholders(self.provider.has_table_query()), &[Value::from(self.table)])?;
        let count = match rows.first() {
            Some(row) => row.integer(0)?.unwrap_or(0),
            None => 0,
        };
        Ok(count > 0)
    }

    /// Create the ledger table
    ///
    /// Not idempotent on every engine; check [`Ledger::has_table`] first.
    pub fn create_table(&self) -> Result<(), DbError> {
        let sql = self.sql(
            "CREATE TABLE {table} (\
                version TIMESTAMP NOT NULL, \
                applied_at TIMESTAMP NOT NULL, \
                batch_id BIGINT, \
                PRIMARY KEY (version)\
            )",
        );
        self.conn.execute(&sql, &[])?;
        Ok(())
    }

    /// Record `version` as applied
    pub fn insert_version(
        &self,
        version: Version,
        applied_at: NaiveDateTime,
        batch: Option<i64>,
    ) -> Result<(), DbError> {
        self.conn.execute(
            &self.sql("INSERT INTO {table} (version, applied_at, batch_id) VALUES (?, ?, ?)"),
            &[
                Value::Timestamp(version.as_datetime()),
                Value::Timestamp(applied_at),
                Value::from(batch),
            ],
        )?;
        Ok(())
    }

    /// Remove `version`, returning the number of rows deleted (0 or 1)
    pub fn delete_version(&self, version: Version) -> Result<u64, DbError> {
        self.conn.execute(
            &self.sql("DELETE FROM {table} WHERE version = ?"),
            &[Value::Timestamp(version.as_datetime())],
        )
    }

    /// Every ledger row in application order (batch, `applied_at`, then version)
    ///
    /// Rows without a batch id sort before every batch.
    pub fn applied_versions(&self, order: Order) -> Result<Vec<LedgerRow>, DbError> {
        let template = format!(
            "SELECT version, applied_at, batch_id FROM {{table}} \
             ORDER BY COALESCE(batch_id, 0) {dir}, applied_at {dir}, version {dir}",
            dir = order.sql()
        );
        self.select_rows(&template, &[])
    }

    /// Row with the highest version number
    pub fn latest_version(&self) -> Result<Option<LedgerRow>, DbError> {
        Ok(self
            .select_rows(
                "SELECT version, applied_at, batch_id FROM {table} ORDER BY version DESC LIMIT 1",
                &[],
            )?
            .into_iter()
            .next())
    }

    /// Row applied most recently
    ///
    /// Differs from [`Ledger::latest_version`] once versions were applied out
    /// of version order.
    pub fn last_applied_version(&self) -> Result<Option<LedgerRow>, DbError> {
        Ok(self
            .select_rows(
                "SELECT version, applied_at, batch_id FROM {table} \
                 ORDER BY COALESCE(batch_id, 0) DESC, applied_at DESC, version DESC LIMIT 1",
                &[],
            )?
            .into_iter()
            .next())
    }

    /// Highest batch id in use, 0 for an empty ledger
    pub fn latest_batch(&self) -> Result<i64, DbError> {
        let rows = self
            .conn
            .query(&self.sql("SELECT COALESCE(MAX(batch_id), 0) FROM {table}"), &[])?;
        match rows.first() {
            Some(row) => Ok(row.integer(0)?.unwrap_or(0)),
            None => Ok(0),
        }
    }
}
