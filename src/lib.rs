//! # dbmigrate
//!
//! Versioned, file-based SQL schema migrations for SQLite, PostgreSQL and MySQL.
//!
//! Migration files live in a `migrations` directory inside the project and are
//! applied in version order. A ledger table in the database records which
//! versions are applied, when, and in which batch. See [`migration::Migrator`]
//! for the operations and [`config::Settings`] for configuration.

pub mod config;
pub mod executor;
pub mod migration;
pub mod provider;

pub use config::Settings;
pub use executor::{DbConnection, DbError, Row, Value};
pub use migration::{
    Direction, EventSinks, LedgerRow, MigrateError, Migration, Migrator, StatusReport, Version,
};
pub use provider::Provider;
