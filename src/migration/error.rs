//! Migration-specific error types

use crate::executor::DbError;
use crate::migration::{Direction, Version};
use std::path::PathBuf;

/// Migration-specific errors
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// No engine in the settings
    #[error("database engine not specified")]
    EngineNotSpecified,
    /// No provider registered for the engine
    #[error("database engine {0} is not supported")]
    UnknownEngine(String),
    /// No database name in the settings
    #[error("database name not specified")]
    DatabaseNotSpecified,
    /// The engine needs a user and none was given
    #[error("database user not specified")]
    UserNotSpecified,
    /// The ledger table name is not a plain SQL identifier
    #[error("invalid migrations table name '{0}'")]
    InvalidTableName(String),
    /// Settings could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// File name does not follow `<version>.<name>.<up|down>[.<engine>].sql`
    #[error("invalid migration file name '{name}': {reason}")]
    InvalidFileName { name: String, reason: String },
    /// More than one file resolves to the same version for this direction and engine
    #[error("{direction} migrations for versions {} are duplicated", join_versions(.versions))]
    DuplicateMigration {
        direction: Direction,
        versions: Vec<Version>,
    },
    /// No file for a version in the requested direction
    #[error("{direction} migration for version {version} does not exist")]
    MigrationNotFound { version: Version, direction: Direction },
    /// No ancestor of the start directory holds the migrations directory
    #[error("{migrations_dir} dir not found in {} or any of its parents", .start.display())]
    ProjectNotFound { migrations_dir: String, start: PathBuf },

    /// The database connection could not be opened
    #[error("can't connect to database: {0}")]
    Connection(#[source] DbError),
    /// A ledger round trip failed
    #[error("migrations table error: {0}")]
    Database(#[from] DbError),
    /// A migration body failed to execute
    #[error("can't execute migration {migration}: {source}")]
    Execution {
        migration: String,
        #[source]
        source: DbError,
    },

    /// A migration file is blank or whitespace only
    #[error("empty query in migration {migration}")]
    EmptyQuery { migration: String },
    /// An applied version has no down file and missing downs are not allowed
    #[error("can't get migration for rollback of version {version}: down migration does not exist")]
    MissingDown { version: Version },

    /// A generated migration file would overwrite an existing one
    #[error("migration file {} already exists", .0.display())]
    AlreadyExists(PathBuf),
    /// Filesystem failure
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The migrator was used after `close()`
    #[error("migrator is closed")]
    Closed,

    /// A run stopped part way; `completed` migrations finished before `migration` failed
    #[error("stopped after {completed} migration(s): {source}")]
    Incomplete {
        completed: usize,
        migration: String,
        #[source]
        source: Box<MigrateError>,
    },
}

impl MigrateError {
    /// Number of migrations that finished before the failure (0 unless `Incomplete`)
    pub fn completed(&self) -> usize {
        match self {
            MigrateError::Incomplete { completed, .. } => *completed,
            _ => 0,
        }
    }

    /// The underlying error, looking through `Incomplete`
    pub fn cause(&self) -> &MigrateError {
        match self {
            MigrateError::Incomplete { source, .. } => source.cause(),
            other => other,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MigrateError::Io {
            path: path.into(),
            source,
        }
    }
}

fn join_versions(versions: &[Version]) -> String {
    versions
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
