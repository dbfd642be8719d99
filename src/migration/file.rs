//! Migration file discovery and generation on disk

use crate::migration::{MigrateError, Migration, MIGRATION_EXTENSION};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Find the project directory: the nearest ancestor of `start` (inclusive)
/// that has `migrations_dir` as a direct subdirectory.
///
/// Walks upward one parent at a time and stops at the filesystem root, so the
/// tool can be run from anywhere inside a project.
///
/// # Errors
///
/// Returns `MigrateError::ProjectNotFound` if the root is reached without a match.
pub fn find_project_dir(start: &Path, migrations_dir: &str) -> Result<PathBuf, MigrateError> {
    let mut dir = Some(start);
    while let Some(current) = dir {
        if current.join(migrations_dir).is_dir() {
            return Ok(current.to_path_buf());
        }
        // `parent()` is None at `/` and at a Windows drive or UNC root
        dir = current.parent();
    }
    Err(MigrateError::ProjectNotFound {
        migrations_dir: migrations_dir.to_string(),
        start: start.to_path_buf(),
    })
}

/// Decode every migration file directly inside `dir`
///
/// Subdirectories are not descended into. Files whose names do not decode are
/// skipped, so stray files never break discovery.
///
/// # Errors
///
/// Returns `MigrateError::Io` if the directory cannot be listed.
pub fn read_migration_files(dir: &Path) -> Result<Vec<Migration>, MigrateError> {
    let entries = fs::read_dir(dir).map_err(|e| MigrateError::io(dir, e))?;

    let mut migrations = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| MigrateError::io(dir, e))?;
        let file_type = entry.file_type().map_err(|e| MigrateError::io(entry.path(), e))?;
        if file_type.is_dir() {
            continue;
        }

        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some(MIGRATION_EXTENSION) {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        match Migration::from_file_name(file_name) {
            Ok(migration) => migrations.push(migration),
            Err(e) => log::debug!("skipping {}: {e}", path.display()),
        }
    }
    Ok(migrations)
}

/// Read a migration body
///
/// # Errors
///
/// Returns `MigrateError::Io` if the file cannot be read.
pub fn read_migration_sql(dir: &Path, migration: &Migration) -> Result<String, MigrateError> {
    let path = dir.join(migration.file_name());
    fs::read_to_string(&path).map_err(|e| MigrateError::io(path, e))
}

/// Turn a free-form description into a file name slug
///
/// Lowercases and collapses every run of characters outside `[a-z0-9_]`
/// (whitespace, dots, path separators, punctuation) into one `_`, trimmed at
/// both ends.
pub fn slugify(description: &str) -> String {
    description
        .to_lowercase()
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// Create empty files for `migrations`, never overwriting
///
/// Either every file is created or none is: if one already exists, files
/// created earlier in the same call are removed again.
///
/// # Errors
///
/// - `MigrateError::AlreadyExists` if any target file exists
/// - `MigrateError::Io` for other filesystem failures
pub fn create_migration_files(dir: &Path, migrations: &[Migration]) -> Result<Vec<PathBuf>, MigrateError> {
    let mut created: Vec<PathBuf> = Vec::with_capacity(migrations.len());

    for migration in migrations {
        let path = dir.join(migration.file_name());
        let result = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .and_then(|mut f| f.write_all(b""));

        if let Err(e) = result {
            for p in &created {
                let _ = fs::remove_file(p);
            }
            return Err(match e.kind() {
                std::io::ErrorKind::AlreadyExists => MigrateError::AlreadyExists(path),
                _ => MigrateError::io(path, e),
            });
        }
        created.push(path);
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::Direction;

    #[test]
    fn test_find_project_dir_walks_up() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("migrations")).unwrap();
        let nested = tmp.path().join("cmd").join("deep");
        fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_project_dir(tmp.path(), "migrations").unwrap(), tmp.path());
        assert_eq!(find_project_dir(&nested, "migrations").unwrap(), tmp.path());
    }

    #[test]
    fn test_find_project_dir_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let err = find_project_dir(tmp.path(), "surely_not_a_migrations_dir_name").unwrap_err();
        assert!(matches!(err, MigrateError::ProjectNotFound { .. }));
        assert!(err.to_string().contains("surely_not_a_migrations_dir_name dir not found"));
    }

    #[test]
    fn test_find_project_dir_ignores_plain_file() {
        // EDGE CASE: a file named like the migrations dir does not count
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("dbmigrate_test_marker"), "").unwrap();
        assert!(find_project_dir(tmp.path(), "dbmigrate_test_marker").is_err());
    }

    #[test]
    fn test_read_migration_files_is_flat_and_skips_strays() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        fs::write(dir.join("20180918200453.correct.up.sql"), "SELECT 1;").unwrap();
        fs::write(dir.join("20180918200453.correct.down.sql"), "SELECT 1;").unwrap();
        fs::write(dir.join("notes.sql"), "").unwrap();
        fs::write(dir.join("README.md"), "").unwrap();
        fs::create_dir(dir.join("20180918200632.nested.up.sql")).unwrap();
        fs::create_dir(dir.join("archive")).unwrap();
        fs::write(dir.join("archive").join("20180918201019.old.up.sql"), "").unwrap();

        let mut found = read_migration_files(dir).unwrap();
        found.sort();
        let names: Vec<_> = found.iter().map(|m| m.file_name()).collect();
        assert_eq!(
            names,
            vec!["20180918200453.correct.down.sql", "20180918200453.correct.up.sql"]
        );
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify(" test  Migration \n "), "test_migration");
        assert_eq!(slugify(" test\tSpecific migration \n "), "test_specific_migration");
        assert_eq!(slugify("add users.email"), "add_users_email");
        assert_eq!(slugify("   "), "");
        // EDGE CASE: path separators must not leak into the file name
        assert_eq!(slugify("add users/roles"), "add_users_roles");
        assert_eq!(slugify("drop C:\\temp - old"), "drop_c_temp_old");
        assert_eq!(slugify("../escape"), "escape");
        assert_eq!(slugify("keep_under_score"), "keep_under_score");
    }

    #[test]
    fn test_create_migration_files_never_overwrites() {
        let tmp = tempfile::tempdir().unwrap();
        let version = "20180918200453".parse().unwrap();
        let pair = [
            Migration::new(version, "x", Direction::Up, None),
            Migration::new(version, "x", Direction::Down, None),
        ];

        // Pre-existing down file: the up file must be cleaned up again
        fs::write(tmp.path().join(pair[1].file_name()), "keep me").unwrap();
        let err = create_migration_files(tmp.path(), &pair).unwrap_err();
        assert!(matches!(err, MigrateError::AlreadyExists(_)));
        assert!(!tmp.path().join(pair[0].file_name()).exists());
        assert_eq!(
            fs::read_to_string(tmp.path().join(pair[1].file_name())).unwrap(),
            "keep me"
        );

        fs::remove_file(tmp.path().join(pair[1].file_name())).unwrap();
        let created = create_migration_files(tmp.path(), &pair).unwrap();
        assert_eq!(created.len(), 2);
        assert!(created.iter().all(|p| p.is_file()));
    }
}
