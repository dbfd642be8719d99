//! Integration tests against a real PostgreSQL server
//!
//! Each test starts a throwaway `postgres` container, so Docker must be
//! available. Run with `cargo test -p dbmigrate-integration-tests -- --ignored`.
//!
//! Test flow:
//! 1. Create a project directory with SQL migration files
//! 2. Open a migrator against the container
//! 3. Migrate, roll back and redo
//! 4. Verify the ledger and the actual schema

use dbmigrate::executor::Value;
use dbmigrate::migration::{Direction, EventSinks, MigrateError, Migrator};
use dbmigrate::provider::{self, Provider};
use dbmigrate::Settings;
use std::fs;
use std::path::Path;
use testcontainers::clients::Cli;
use testcontainers_modules::postgres::Postgres;

fn settings(port: u16) -> Settings {
    let mut settings = Settings::new("postgres", "postgres");
    settings.host = Some("127.0.0.1".to_string());
    settings.port = Some(port);
    settings.user = Some("postgres".to_string());
    settings.password = Some("postgres".to_string());
    settings
}

fn project() -> tempfile::TempDir {
    let tmp = tempfile::tempdir().expect("Failed to create temp dir");
    let dir = tmp.path().join("migrations");
    fs::create_dir(&dir).expect("Failed to create migrations dir");

    let files = [
        ("20180918200453.create_users.up.sql", "CREATE TABLE users (id SERIAL PRIMARY KEY, email TEXT NOT NULL);"),
        ("20180918200453.create_users.down.sql", "DROP TABLE users;"),
        ("20180918200632.add_name.up.postgres.sql", "ALTER TABLE users ADD COLUMN name TEXT;"),
        ("20180918200632.add_name.down.postgres.sql", "ALTER TABLE users DROP COLUMN name;"),
        ("20180918200632.add_name.up.sqlite.sql", "this is not postgres sql"),
        ("20180918201019.create_posts.up.sql", "CREATE TABLE posts (id SERIAL PRIMARY KEY, user_id INT REFERENCES users(id));\nCREATE INDEX idx_posts_user ON posts (user_id);"),
        ("20180918201019.create_posts.down.sql", "DROP TABLE posts;"),
    ];
    for (name, sql) in files {
        fs::write(dir.join(name), sql).expect("Failed to write migration file");
    }
    tmp
}

/// Count tables named `table` in the current schema through a separate connection
fn table_exists(settings: &Settings, project_dir: &Path, table: &str) -> bool {
    let provider: &dyn Provider = provider::provider("postgres").expect("postgres provider");
    let conn = provider
        .connect(&provider.dsn(settings, project_dir).expect("dsn"))
        .expect("Failed to connect");
    let rows = conn
        .query(&provider.set_placeholders(provider.has_table_query()), &[Value::from(table)])
        .expect("has-table query failed");
    rows[0].integer(0).expect("count column").unwrap_or(0) > 0
}

#[test]
#[ignore = "requires Docker"]
fn test_postgres_migration_lifecycle() {
    let docker = Cli::default();
    let node = docker.run(Postgres::default());
    let settings = settings(node.get_host_port_ipv4(5432));
    let project = project();

    let (tx, rx) = crossbeam_channel::unbounded();
    let mut migrator = Migrator::open_with_events(
        settings.clone(),
        project.path(),
        EventSinks::new().with_applied(tx),
    )
    .expect("Failed to open migrator");

    assert_eq!(migrator.unapplied_migrations().unwrap().len(), 3);
    assert_eq!(migrator.migrate_all().unwrap(), 3);
    assert!(table_exists(&settings, project.path(), "users"));
    assert!(table_exists(&settings, project.path(), "posts"));
    assert!(table_exists(&settings, project.path(), "migrations"));

    let status = migrator.status().unwrap();
    assert_eq!(status.applied_count(), 3);
    assert_eq!(
        status.migrations()[1].file_name(),
        "20180918200632.add_name.up.postgres.sql"
    );

    assert_eq!(migrator.rollback(1).unwrap(), 1);
    assert!(!table_exists(&settings, project.path(), "posts"));

    assert_eq!(migrator.redo(0).unwrap(), 2);
    assert_eq!(migrator.migrate_all().unwrap(), 1);

    let latest = migrator.latest_version_migration().unwrap().unwrap();
    assert_eq!(latest.version.to_string(), "20180918201019");

    assert_eq!(migrator.rollback(0).unwrap(), 1);
    assert_eq!(migrator.rollback(10).unwrap(), 2);
    assert!(!table_exists(&settings, project.path(), "users"));
    assert_eq!(migrator.status().unwrap().applied_count(), 0);

    migrator.close().unwrap();
    drop(migrator);

    let directions: Vec<Direction> = rx.iter().map(|m| m.direction).collect();
    assert_eq!(directions.len(), 3 + 1 + 2 + 2 + 1 + 1 + 2);
    assert_eq!(directions[0], Direction::Up);
    assert_eq!(directions[3], Direction::Down);
}

#[test]
#[ignore = "requires Docker"]
fn test_postgres_failing_migration_keeps_earlier_ones() {
    let docker = Cli::default();
    let node = docker.run(Postgres::default());
    let settings = settings(node.get_host_port_ipv4(5432));
    let project = project();
    fs::write(
        project.path().join("migrations").join("20180918201500.broken.up.sql"),
        "CREATE TABLE broken (id INT REFERENCES nowhere(id));",
    )
    .unwrap();

    let mut migrator = Migrator::open_in(settings, project.path()).expect("Failed to open migrator");
    let err = migrator.migrate_all().unwrap_err();
    assert_eq!(err.completed(), 3);
    assert!(matches!(err.cause(), MigrateError::Execution { .. }));
    assert_eq!(migrator.status().unwrap().pending_count(), 1);
    migrator.close().unwrap();
}

#[test]
#[ignore = "requires Docker"]
fn test_postgres_custom_ledger_table() {
    let docker = Cli::default();
    let node = docker.run(Postgres::default());
    let mut settings = settings(node.get_host_port_ipv4(5432));
    settings.migrations_table = "schema_versions".to_string();
    let project = project();

    let mut migrator = Migrator::open_in(settings.clone(), project.path()).expect("Failed to open migrator");
    assert!(table_exists(&settings, project.path(), "schema_versions"));
    assert_eq!(migrator.migrate(2).unwrap(), 2);
    migrator.close().unwrap();

    // Reopening finds the existing ledger instead of recreating it
    let migrator = Migrator::open_in(settings, project.path()).expect("Failed to reopen migrator");
    assert_eq!(migrator.unapplied_migrations().unwrap().len(), 1);
}

#[test]
#[ignore = "requires Docker"]
fn test_postgres_mixed_case_ledger_table_reopens() {
    let docker = Cli::default();
    let node = docker.run(Postgres::default());
    let mut settings = settings(node.get_host_port_ipv4(5432));
    settings.migrations_table = "SchemaVersions".to_string();
    let project = project();

    let mut migrator = Migrator::open_in(settings.clone(), project.path()).expect("Failed to open migrator");
    // Postgres stores the unquoted name folded to lower case
    assert!(table_exists(&settings, project.path(), "schemaversions"));
    assert_eq!(migrator.migrate(1).unwrap(), 1);
    migrator.close().unwrap();

    let migrator = Migrator::open_in(settings, project.path()).expect("Failed to reopen migrator");
    assert_eq!(migrator.unapplied_migrations().unwrap().len(), 2);
}
