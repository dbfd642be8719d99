//! File-based SQL migrations
//!
//! Migrations are plain SQL files in a migrations directory, named
//! `<version>.<name>.<up|down>[.<engine>].sql`. The [`Migrator`] reconciles
//! them with the ledger table, which records every applied version, and runs
//! them one at a time.
//!
//! # Example
//!
//! ```rust,no_run
//! use dbmigrate::config::Settings;
//! use dbmigrate::migration::Migrator;
//!
//! let mut migrator = Migrator::open(Settings::new("sqlite", "app.db"))?;
//! migrator.generate_migration("create users", None)?;
//! let applied = migrator.migrate_all()?;
//! println!("applied {applied} migration(s)");
//! migrator.close()?;
//! # Ok::<(), dbmigrate::migration::MigrateError>(())
//! ```

pub mod error;
pub mod events;
pub mod file;
pub mod ledger;
#[allow(clippy::module_inception)]
pub mod migration;
pub mod migrator;
pub mod record;
pub mod status;

pub use error::MigrateError;
pub use events::EventSinks;
pub use file::{find_project_dir, slugify};
pub use ledger::{Ledger, Order};
pub use migration::{Direction, Migration, Version, MIGRATION_EXTENSION, VERSION_FORMAT};
pub use migrator::{Migrator, RollbackCandidate};
pub use record::LedgerRow;
pub use status::StatusReport;

/// Result type for migration operations
pub type Result<T, E = MigrateError> = std::result::Result<T, E>;
