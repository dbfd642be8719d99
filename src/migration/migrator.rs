//! Migrator - discovers, reconciles and executes migrations

use crate::config::Settings;
use crate::executor::DbConnection;
use crate::migration::file::{
    create_migration_files, find_project_dir, read_migration_files, read_migration_sql, slugify,
};
use crate::migration::{
    Direction, EventSinks, Ledger, LedgerRow, MigrateError, Migration, Order, Result, StatusReport, Version,
};
use crate::provider::{self, Provider};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

#[cfg(feature = "tracing")]
use tracing::info_span;

/// A ledger row picked for rollback and the down migration that reverts it
///
/// `down` is `None` when no down file exists for the version; rolling such a
/// row back only removes it from the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackCandidate {
    pub row: LedgerRow,
    pub down: Option<Migration>,
}

/// Applies and reverts migrations for one project against one database
///
/// Owns a single connection from [`Migrator::open`] until [`Migrator::close`].
/// Operations run strictly one migration after another; callers serialize
/// access, there is no internal locking.
///
/// Each migration runs on its own. A failure stops the rest of the current
/// call but never undoes migrations that already finished in it; such
/// failures come back as [`MigrateError::Incomplete`] carrying the number of
/// migrations that did finish.
pub struct Migrator {
    settings: Settings,
    provider: &'static dyn Provider,
    project_dir: PathBuf,
    migrations_dir: PathBuf,
    conn: Option<Box<dyn DbConnection>>,
    events: EventSinks,
}

impl std::fmt::Debug for Migrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrator")
            .field("engine", &self.provider.engine())
            .field("project_dir", &self.project_dir)
            .field("migrations_table", &self.settings.migrations_table)
            .field("closed", &self.conn.is_none())
            .finish()
    }
}

impl Migrator {
    /// Open a migrator for the project containing the current directory
    ///
    /// # Errors
    ///
    /// See [`Migrator::open_with_events`].
    pub fn open(settings: Settings) -> Result<Self> {
        let cwd = std::env::current_dir().map_err(|e| MigrateError::io(".", e))?;
        Self::open_in(settings, &cwd)
    }

    /// Open a migrator for the project containing `start_dir`
    ///
    /// # Errors
    ///
    /// See [`Migrator::open_with_events`].
    pub fn open_in(settings: Settings, start_dir: &Path) -> Result<Self> {
        Self::open_with_events(settings, start_dir, EventSinks::default())
    }

    /// Open a migrator that reports progress to `events`
    ///
    /// Validates the settings, finds the project directory by walking up from
    /// `start_dir`, connects, and creates the ledger table if it is missing.
    ///
    /// # Errors
    ///
    /// - configuration errors from [`Settings::validate`] and the engine's DSN builder
    /// - `MigrateError::ProjectNotFound` if no ancestor holds the migrations directory
    /// - `MigrateError::Connection` if the database cannot be reached
    /// - `MigrateError::Database` if the ledger table cannot be checked or created
    pub fn open_with_events(mut settings: Settings, start_dir: &Path, events: EventSinks) -> Result<Self> {
        settings.validate()?;
        let provider = provider::provider(&settings.engine)
            .ok_or_else(|| MigrateError::UnknownEngine(settings.engine.clone()))?;

        let project_dir = find_project_dir(start_dir, &settings.migrations_dir)?;
        let migrations_dir = project_dir.join(&settings.migrations_dir);
        log::debug!("project dir: {}", project_dir.display());

        let dsn = provider.dsn(&settings, &project_dir)?;
        log::debug!("connecting to {} database with {} driver", provider.engine(), provider.driver_name());
        let conn = provider.connect(&dsn)?;

        let migrator = Self {
            settings,
            provider,
            project_dir,
            migrations_dir,
            conn: Some(conn),
            events,
        };

        let ledger = migrator.ledger()?;
        if !ledger.has_table()? {
            ledger.create_table()?;
            log::info!("created migrations table {}", ledger.table());
        }
        Ok(migrator)
    }

    /// Release the database connection
    ///
    /// Safe to call more than once. Every other operation fails with
    /// `MigrateError::Closed` afterwards.
    ///
    /// # Errors
    ///
    /// Returns `MigrateError::Connection` if the driver fails to shut down.
    pub fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(MigrateError::Connection)?;
            log::debug!("migrator closed");
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn engine(&self) -> &'static str {
        self.provider.engine()
    }

    /// Directory holding the migrations directory
    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn migrations_dir(&self) -> &Path {
        &self.migrations_dir
    }

    fn conn(&self) -> Result<&dyn DbConnection> {
        self.conn.as_deref().ok_or(MigrateError::Closed)
    }

    fn ledger(&self) -> Result<Ledger<'_>> {
        Ok(Ledger::new(self.conn()?, self.provider, &self.settings.migrations_table))
    }

    /// Migration files for `direction` that run on the configured engine
    fn matching_files(&self, direction: Direction) -> Result<Vec<Migration>> {
        let engine = self.provider.engine();
        let mut files: Vec<Migration> = read_migration_files(&self.migrations_dir)?
            .into_iter()
            .filter(|m| m.direction == direction && m.applies_to(engine))
            .collect();
        files.sort();
        Ok(files)
    }

    /// Every migration in `direction` for the configured engine, ascending by version
    ///
    /// Files restricted to another engine are ignored.
    ///
    /// # Errors
    ///
    /// Returns `MigrateError::DuplicateMigration`, listing every affected
    /// version, if a version has more than one matching file.
    pub fn find_migrations(&self, direction: Direction) -> Result<Vec<Migration>> {
        self.conn()?;
        let files = self.matching_files(direction)?;

        let mut per_version: BTreeMap<Version, usize> = BTreeMap::new();
        for m in &files {
            *per_version.entry(m.version).or_default() += 1;
        }
        let duplicated: Vec<Version> = per_version
            .into_iter()
            .filter(|(_, n)| *n > 1)
            .map(|(v, _)| v)
            .collect();
        if !duplicated.is_empty() {
            return Err(MigrateError::DuplicateMigration {
                direction,
                versions: duplicated,
            });
        }

        log::debug!("found {} {direction} migration(s)", files.len());
        Ok(files)
    }

    /// Resolve the single file for `version` and `direction`
    ///
    /// # Errors
    ///
    /// - `MigrateError::MigrationNotFound` if there is none
    /// - `MigrateError::DuplicateMigration` if there is more than one
    pub fn get_migration(&self, version: Version, direction: Direction) -> Result<Migration> {
        self.conn()?;
        let files = self.matching_files(direction)?;
        resolve(&files, version, direction)
    }

    /// Up migrations whose version is not in the ledger, ascending
    ///
    /// # Errors
    ///
    /// Discovery errors and ledger failures.
    pub fn unapplied_migrations(&self) -> Result<Vec<Migration>> {
        let applied: HashSet<Version> = self
            .ledger()?
            .applied_versions(Order::Ascending)?
            .into_iter()
            .map(|r| r.version)
            .collect();
        Ok(self
            .find_migrations(Direction::Up)?
            .into_iter()
            .filter(|m| !applied.contains(&m.version))
            .collect())
    }

    /// Ledger rows a `rollback(steps)` would revert, most recently applied
    /// first, each paired with its down migration
    ///
    /// `steps == 0` selects the last batch: the most recently applied row and
    /// every row after it that shares its batch id. A positive `steps` takes
    /// that many rows regardless of batch.
    ///
    /// # Errors
    ///
    /// - `MigrateError::MissingDown` if a row has no down file and missing
    ///   downs are not allowed
    /// - `MigrateError::DuplicateMigration` if a row has several down files
    pub fn rollback_candidates(&self, steps: usize) -> Result<Vec<RollbackCandidate>> {
        let rows = self.ledger()?.applied_versions(Order::Descending)?;
        let rows: Vec<LedgerRow> = match rows.first().map(|last| last.batch) {
            None => Vec::new(),
            Some(batch) if steps == 0 => rows.into_iter().take_while(|r| r.batch == batch).collect(),
            Some(_) => rows.into_iter().take(steps).collect(),
        };

        let downs = self.matching_files(Direction::Down)?;
        rows.into_iter()
            .map(|row| {
                let down = match resolve(&downs, row.version, Direction::Down) {
                    Ok(m) => Some(m),
                    Err(MigrateError::MigrationNotFound { .. }) if self.settings.allow_missing_downs => None,
                    Err(MigrateError::MigrationNotFound { version, .. }) => {
                        return Err(MigrateError::MissingDown { version })
                    }
                    Err(e) => return Err(e),
                };
                Ok(RollbackCandidate { row, down })
            })
            .collect()
    }

    /// Apply up to `steps` pending migrations in ascending order; 0 applies all
    ///
    /// Everything applied by one call shares a new batch id. Returns the
    /// number of migrations applied.
    ///
    /// # Errors
    ///
    /// Discovery and ledger errors come back before anything runs. A failing
    /// migration stops the run with `MigrateError::Incomplete`; migrations
    /// applied before it stay applied.
    pub fn migrate(&mut self, steps: usize) -> Result<usize> {
        let pending = self.unapplied_migrations()?;
        let take = if steps == 0 { pending.len() } else { steps.min(pending.len()) };
        if take == 0 {
            log::info!("no migrations to apply");
            return Ok(0);
        }
        self.apply_batch(&pending[..take])
    }

    /// Apply every pending migration
    ///
    /// # Errors
    ///
    /// See [`Migrator::migrate`].
    pub fn migrate_all(&mut self) -> Result<usize> {
        self.migrate(0)
    }

    /// Revert the last `steps` applied migrations, most recent first; 0
    /// reverts the last batch
    ///
    /// Returns the number of versions removed from the ledger, including those
    /// whose down migration was skipped under `allow_missing_downs`.
    ///
    /// # Errors
    ///
    /// Errors from [`Migrator::rollback_candidates`] come back before anything
    /// runs. A failing down migration stops the run with
    /// `MigrateError::Incomplete`.
    pub fn rollback(&mut self, steps: usize) -> Result<usize> {
        let candidates = self.rollback_candidates(steps)?;
        Ok(self.revert(&candidates)?.len())
    }

    /// Revert the last batch
    ///
    /// # Errors
    ///
    /// See [`Migrator::rollback`].
    pub fn rollback_batch(&mut self) -> Result<usize> {
        self.rollback(0)
    }

    /// Roll back like [`Migrator::rollback`], then re-apply exactly the
    /// versions that were removed, ascending, as one new batch
    ///
    /// Up files are resolved before anything is rolled back. Under
    /// `allow_missing_downs` a removed version without an up file is left
    /// unapplied and reported to the error sink.
    ///
    /// Returns the number re-applied; 0 when there was nothing to roll back.
    ///
    /// # Errors
    ///
    /// Rollback errors, `MigrateError::MigrationNotFound` (before anything
    /// runs) if a version to redo has no up file, and
    /// `MigrateError::Incomplete` if rolling back or re-applying fails.
    pub fn redo(&mut self, steps: usize) -> Result<usize> {
        let candidates = self.rollback_candidates(steps)?;
        if candidates.is_empty() {
            log::info!("nothing to redo");
            return Ok(0);
        }

        let ups = self.matching_files(Direction::Up)?;
        let mut migrations = Vec::with_capacity(candidates.len());
        let mut orphans = Vec::new();
        for candidate in &candidates {
            match resolve(&ups, candidate.row.version, Direction::Up) {
                Ok(m) => migrations.push(m),
                Err(MigrateError::MigrationNotFound { version, .. }) if self.settings.allow_missing_downs => {
                    orphans.push(version)
                }
                Err(e) => return Err(e),
            }
        }

        self.revert(&candidates)?;
        for version in orphans {
            log::warn!("up migration for version {version} does not exist, it will not be re-applied");
            self.events.error(MigrateError::MigrationNotFound {
                version,
                direction: Direction::Up,
            });
        }

        if migrations.is_empty() {
            return Ok(0);
        }
        migrations.sort();
        self.apply_batch(&migrations)
    }

    /// Every up migration, ascending, with `applied_at` set for applied versions
    ///
    /// # Errors
    ///
    /// Discovery errors and ledger failures.
    pub fn status(&self) -> Result<StatusReport> {
        let applied: HashMap<Version, _> = self
            .ledger()?
            .applied_versions(Order::Ascending)?
            .into_iter()
            .map(|r| (r.version, r.applied_at))
            .collect();
        let migrations = self
            .find_migrations(Direction::Up)?
            .into_iter()
            .map(|mut m| {
                m.applied_at = applied.get(&m.version).copied();
                m
            })
            .collect();
        Ok(StatusReport::new(migrations))
    }

    /// Create an empty up/down file pair for `description`, stamped now
    ///
    /// # Errors
    ///
    /// See [`Migrator::generate_migration_at`].
    pub fn generate_migration(&self, description: &str, engine: Option<&str>) -> Result<Vec<PathBuf>> {
        self.generate_migration_at(description, engine, Version::now())
    }

    /// Create an empty up/down file pair for `description` at `version`
    ///
    /// The description is slugified; `engine` restricts the pair to one engine.
    ///
    /// # Errors
    ///
    /// - `MigrateError::InvalidFileName` if the description has no words
    /// - `MigrateError::UnknownEngine` if `engine` is not registered
    /// - `MigrateError::AlreadyExists` if either file exists; nothing is created then
    pub fn generate_migration_at(
        &self,
        description: &str,
        engine: Option<&str>,
        version: Version,
    ) -> Result<Vec<PathBuf>> {
        self.conn()?;
        let name = slugify(description);
        if name.is_empty() {
            return Err(MigrateError::InvalidFileName {
                name: description.to_string(),
                reason: "description is empty".to_string(),
            });
        }
        let engine = engine.map(str::trim).filter(|e| !e.is_empty());
        if let Some(e) = engine {
            if provider::provider(e).is_none() {
                return Err(MigrateError::UnknownEngine(e.to_string()));
            }
        }

        let up = Migration::new(version, name, Direction::Up, engine.map(str::to_string));
        let pair = [up.opposite(), up];
        let paths = create_migration_files(&self.migrations_dir, &pair)?;
        for path in &paths {
            log::info!("created {}", path.display());
        }
        Ok(paths)
    }

    /// Up migration of the highest applied version, `None` on an empty ledger
    ///
    /// # Errors
    ///
    /// `MigrateError::MigrationNotFound` if the version has no up file.
    pub fn latest_version_migration(&self) -> Result<Option<Migration>> {
        let row = self.ledger()?.latest_version()?;
        self.applied_migration(row)
    }

    /// Up migration applied most recently, `None` on an empty ledger
    ///
    /// # Errors
    ///
    /// `MigrateError::MigrationNotFound` if the version has no up file.
    pub fn last_applied_migration(&self) -> Result<Option<Migration>> {
        let row = self.ledger()?.last_applied_version()?;
        self.applied_migration(row)
    }

    fn applied_migration(&self, row: Option<LedgerRow>) -> Result<Option<Migration>> {
        let Some(row) = row else {
            return Ok(None);
        };
        let mut migration = self.get_migration(row.version, Direction::Up)?;
        migration.applied_at = Some(row.applied_at);
        Ok(Some(migration))
    }

    fn apply_batch(&mut self, migrations: &[Migration]) -> Result<usize> {
        let batch = self.ledger()?.latest_batch()? + 1;
        for (completed, migration) in migrations.iter().enumerate() {
            if let Err(e) = self.apply(migration, batch) {
                return Err(incomplete(completed, migration, e));
            }
        }
        Ok(migrations.len())
    }

    fn apply(&self, migration: &Migration, batch: i64) -> Result<()> {
        self.execute(migration)?;
        let applied_at = Utc::now().naive_utc();
        self.ledger()?.insert_version(migration.version, applied_at, Some(batch))?;
        log::info!("migration {migration} has been successfully applied");

        let mut applied = migration.clone();
        applied.applied_at = Some(applied_at);
        self.events.applied(&applied);
        Ok(())
    }

    /// Roll back `candidates` in order and return the removed versions
    fn revert(&mut self, candidates: &[RollbackCandidate]) -> Result<Vec<Version>> {
        if candidates.is_empty() {
            log::info!("no migrations to roll back");
        }

        let mut removed = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if let Err(e) = self.revert_one(candidate) {
                let name = match &candidate.down {
                    Some(down) => down.file_name(),
                    None => candidate.row.version.to_string(),
                };
                return Err(MigrateError::Incomplete {
                    completed: removed.len(),
                    migration: name,
                    source: Box::new(e),
                });
            }
            removed.push(candidate.row.version);
        }
        Ok(removed)
    }

    fn revert_one(&self, candidate: &RollbackCandidate) -> Result<()> {
        let version = candidate.row.version;
        let Some(down) = &candidate.down else {
            log::warn!("down migration for version {version} does not exist, removing it from the ledger only");
            self.events.error(MigrateError::MissingDown { version });
            self.ledger()?.delete_version(version)?;
            return Ok(());
        };

        match self.execute(down) {
            Ok(()) => {}
            Err(err @ MigrateError::EmptyQuery { .. }) if self.settings.allow_missing_downs => {
                log::warn!("down migration {down} is empty, removing version {version} from the ledger only");
                self.events.error(err);
                self.ledger()?.delete_version(version)?;
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        self.ledger()?.delete_version(version)?;
        log::info!("migration {down} has been successfully rolled back");
        self.events.applied(down);
        Ok(())
    }

    /// Read a migration body and run it
    fn execute(&self, migration: &Migration) -> Result<()> {
        #[cfg(feature = "tracing")]
        let _span = info_span!("migration", file = %migration.file_name()).entered();

        let conn = self.conn()?;
        let sql = read_migration_sql(&self.migrations_dir, migration)?;
        if sql.trim().is_empty() {
            return Err(MigrateError::EmptyQuery {
                migration: migration.file_name(),
            });
        }
        conn.execute_batch(&sql).map_err(|source| MigrateError::Execution {
            migration: migration.file_name(),
            source,
        })
    }
}

fn resolve(files: &[Migration], version: Version, direction: Direction) -> Result<Migration> {
    let mut matching = files.iter().filter(|m| m.version == version);
    match (matching.next(), matching.next()) {
        (None, _) => Err(MigrateError::MigrationNotFound { version, direction }),
        (Some(m), None) => Ok(m.clone()),
        (Some(_), Some(_)) => Err(MigrateError::DuplicateMigration {
            direction,
            versions: vec![version],
        }),
    }
}

fn incomplete(completed: usize, migration: &Migration, source: MigrateError) -> MigrateError {
    MigrateError::Incomplete {
        completed,
        migration: migration.file_name(),
        source: Box::new(source),
    }
}
