//! Shared fixtures for migrator tests: a throwaway project directory with a
//! `migrations` subdirectory and a SQLite database file next to it.

#![allow(dead_code)]

use dbmigrate::executor::{DbConnection, Value};
use dbmigrate::migration::{EventSinks, Ledger, Migrator, Order};
use dbmigrate::provider::{self, Provider};
use dbmigrate::Settings;
use std::fs;
use std::path::{Path, PathBuf};

pub const V1: &str = "20180918200453";
pub const V2: &str = "20180918200632";
pub const V3: &str = "20180918201019";

pub struct Project {
    pub dir: tempfile::TempDir,
}

impl Project {
    /// Empty project
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        fs::create_dir(dir.path().join("migrations")).expect("Failed to create migrations dir");
        Self { dir }
    }

    /// Project with three up/down pairs, each creating one table `t_<n>`
    pub fn with_three() -> Self {
        let project = Self::new();
        for (i, v) in [V1, V2, V3].iter().enumerate() {
            project.pair(v, &format!("t_{}", i + 1));
        }
        project
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn migrations_dir(&self) -> PathBuf {
        self.path().join("migrations")
    }

    pub fn settings(&self) -> Settings {
        Settings::new("sqlite", "test.db")
    }

    pub fn write(&self, name: &str, sql: &str) {
        fs::write(self.migrations_dir().join(name), sql).expect("Failed to write migration file");
    }

    pub fn remove(&self, name: &str) {
        fs::remove_file(self.migrations_dir().join(name)).expect("Failed to remove migration file");
    }

    /// Write `<version>.create_<table>.{up,down}.sql`
    pub fn pair(&self, version: &str, table: &str) {
        self.write(
            &format!("{version}.create_{table}.up.sql"),
            &format!("CREATE TABLE {table} (id INTEGER PRIMARY KEY);"),
        );
        self.write(&format!("{version}.create_{table}.down.sql"), &format!("DROP TABLE {table};"));
    }

    pub fn open(&self) -> Migrator {
        self.open_with(self.settings())
    }

    pub fn open_with(&self, settings: Settings) -> Migrator {
        Migrator::open_in(settings, self.path()).expect("Failed to open migrator")
    }

    pub fn open_with_events(&self, settings: Settings, events: EventSinks) -> Migrator {
        Migrator::open_with_events(settings, self.path(), events).expect("Failed to open migrator")
    }

    fn connect(&self) -> Box<dyn DbConnection> {
        let sqlite: &dyn Provider = provider::provider("sqlite").expect("sqlite provider");
        let dsn = sqlite.dsn(&self.settings(), self.path()).expect("dsn");
        sqlite.connect(&dsn).expect("Failed to connect")
    }

    /// Applied versions in the ledger, ascending by application time
    pub fn ledger_versions(&self) -> Vec<String> {
        self.ledger_versions_in("migrations")
    }

    pub fn ledger_versions_in(&self, table: &str) -> Vec<String> {
        let conn = self.connect();
        let sqlite = provider::provider("sqlite").expect("sqlite provider");
        Ledger::new(conn.as_ref(), sqlite, table)
            .applied_versions(Order::Ascending)
            .expect("Failed to read ledger")
            .into_iter()
            .map(|row| row.version.to_string())
            .collect()
    }

    pub fn table_exists(&self, table: &str) -> bool {
        let conn = self.connect();
        let sqlite = provider::provider("sqlite").expect("sqlite provider");
        let rows = conn
            .query(sqlite.has_table_query(), &[Value::from(table)])
            .expect("has-table query failed");
        rows[0].integer(0).expect("count column").unwrap_or(0) > 0
    }
}
