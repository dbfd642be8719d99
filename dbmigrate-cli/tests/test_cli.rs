//! Tests for the dbmigrate binary against a SQLite project in a temp dir

use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn dbmigrate(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_dbmigrate"))
        .current_dir(dir)
        .env("NO_COLOR", "1")
        .args(["--engine", "sqlite", "--database", "test.db"])
        .args(args)
        .output()
        .expect("Failed to run dbmigrate")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn project() -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    fs::create_dir(temp_dir.path().join("migrations")).unwrap();
    temp_dir
}

/// Generate a pair and fill in its bodies
fn generate(dir: &Path, description: &str, table: &str) {
    let output = dbmigrate(dir, &["generate", description]);
    assert!(output.status.success(), "generate failed: {output:?}");

    for entry in fs::read_dir(dir.join("migrations")).unwrap() {
        let path = entry.unwrap().path();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        if !name.contains(description) || fs::metadata(&path).unwrap().len() > 0 {
            continue;
        }
        let sql = if name.ends_with(".up.sql") {
            format!("CREATE TABLE {table} (id INTEGER PRIMARY KEY);")
        } else {
            format!("DROP TABLE {table};")
        };
        fs::write(&path, sql).unwrap();
    }
}

#[test]
fn test_generate_creates_empty_pair() {
    let temp_dir = project();
    let output = dbmigrate(temp_dir.path(), &["generate", "Create", "Users/Roles"]);
    assert!(output.status.success());
    assert_eq!(stdout(&output).matches("Generated migration").count(), 2);

    let mut names: Vec<String> = fs::read_dir(temp_dir.path().join("migrations"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names.len(), 2);
    assert!(names[0].ends_with(".create_users_roles.down.sql"));
    assert!(names[1].ends_with(".create_users_roles.up.sql"));
}

#[test]
fn test_migrate_status_and_rollback() {
    let temp_dir = project();
    generate(temp_dir.path(), "first", "t_first");

    let output = dbmigrate(temp_dir.path(), &["migrate"]);
    assert!(output.status.success(), "migrate failed: {output:?}");
    let out = stdout(&output);
    assert!(out.contains("has been successfully applied"));
    assert!(out.contains("Successfully applied 1 migration(s)"));
    assert!(temp_dir.path().join("test.db").is_file());

    let output = dbmigrate(temp_dir.path(), &["status", "--json"]);
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let migrations = report.as_array().unwrap();
    assert_eq!(migrations.len(), 1);
    assert_eq!(migrations[0]["name"], "first");
    assert!(!migrations[0]["applied_at"].is_null());

    let output = dbmigrate(temp_dir.path(), &["rollback"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("Successfully rolled back 1 migration(s)"));

    let output = dbmigrate(temp_dir.path(), &["rollback"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("No migrations to roll back"));
}

#[test]
fn test_failing_migration_exits_with_error() {
    let temp_dir = project();
    generate(temp_dir.path(), "good", "t_good");
    fs::write(
        temp_dir.path().join("migrations").join("29991231235959.bad.up.sql"),
        "CREATE TABLE",
    )
    .unwrap();

    let output = dbmigrate(temp_dir.path(), &["migrate"]);
    assert!(!output.status.success());
    let err = String::from_utf8_lossy(&output.stderr);
    assert!(err.contains("1 migration(s) applied before the failure"));
    assert!(err.contains("Error:"));
}

#[test]
fn test_missing_project_fails() {
    let temp_dir = TempDir::new().unwrap();
    let output = dbmigrate(temp_dir.path(), &["status"]);
    assert!(!output.status.success());
    assert!(!temp_dir.path().join("test.db").exists());
}
