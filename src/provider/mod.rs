//! Per-engine capability sets
//!
//! Every supported engine implements [`Provider`] once. The migrator picks the
//! provider from the registry by engine identifier when it is opened and only
//! ever talks to the database through it and the [`DbConnection`] it returns.

use crate::config::Settings;
use crate::executor::DbConnection;
use crate::migration::MigrateError;
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::path::Path;

mod mysql;
mod postgres;
mod sqlite;

pub use self::mysql::{MysqlConnection, MysqlProvider};
pub use postgres::{PostgresConnection, PostgresProvider};
pub use sqlite::{SqliteConnection, SqliteProvider};

/// Capability set the migration core needs from a database engine
pub trait Provider: Send + Sync {
    /// Engine identifier used in settings and migration file names
    fn engine(&self) -> &'static str;

    /// Name of the underlying driver
    fn driver_name(&self) -> &'static str;

    /// Build the driver connection string from settings
    ///
    /// `project_dir` is the directory holding the migrations directory; engines
    /// that address databases by file path resolve relative paths against it.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a setting the engine needs is missing.
    fn dsn(&self, settings: &Settings, project_dir: &Path) -> Result<String, MigrateError>;

    /// Query returning a single row with a single count column: the number of
    /// tables named like its one `?` parameter.
    fn has_table_query(&self) -> &'static str;

    /// Rewrite `?` placeholders into the engine's native syntax
    fn set_placeholders(&self, sql: &str) -> String {
        sql.to_string()
    }

    /// Open a connection
    ///
    /// # Errors
    ///
    /// Returns `MigrateError::Connection` if the driver cannot connect.
    fn connect(&self, dsn: &str) -> Result<Box<dyn DbConnection>, MigrateError>;
}

static PROVIDERS: Lazy<BTreeMap<&'static str, Box<dyn Provider>>> = Lazy::new(|| {
    let providers: Vec<Box<dyn Provider>> = vec![
        Box::new(SqliteProvider),
        Box::new(PostgresProvider),
        Box::new(MysqlProvider),
    ];
    providers.into_iter().map(|p| (p.engine(), p)).collect()
});

/// Look up the provider registered for `engine`
pub fn provider(engine: &str) -> Option<&'static dyn Provider> {
    PROVIDERS.get(engine).map(|p| p.as_ref())
}

/// Identifiers of every registered engine, sorted
pub fn engines() -> Vec<&'static str> {
    PROVIDERS.keys().copied().collect()
}

/// Rewrite `?` placeholders into `$1..$n`, leaving quoted text alone
pub(crate) fn numbered_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut n = 0;
    let mut quote: Option<char> = None;

    for c in sql.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => {
                quote = None;
                out.push(c);
            }
            (Some(_), c) => out.push(c),
            (None, '\'' | '"') => {
                quote = Some(c);
                out.push(c);
            }
            (None, '?') => {
                n += 1;
                out.push('$');
                out.push_str(&n.to_string());
            }
            (None, c) => out.push(c),
        }
    }
    out
}
