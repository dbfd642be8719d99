//! Migration model and file name codec
//!
//! A migration file is named `<version>.<name>.<direction>[.<engine>].sql`, where
//! `<version>` is a `YYYYMMDDHHMMSS` timestamp. [`Migration::from_file_name`] and
//! [`Migration::file_name`] are exact inverses for every valid migration.

use crate::migration::MigrateError;
use chrono::{NaiveDateTime, Timelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Version format, also used for the file name prefix
pub const VERSION_FORMAT: &str = "%Y%m%d%H%M%S";

/// Extension every migration file carries
pub const MIGRATION_EXTENSION: &str = "sql";

static VERSION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{14}$").expect("valid version regex"));

/// Migration version: a timestamp with second resolution
///
/// Shared by the up and down files of one logical change, and the key of the
/// ledger table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(NaiveDateTime);

impl Version {
    /// Version for `dt`, dropping anything below one second
    pub fn new(dt: NaiveDateTime) -> Self {
        Version(dt.with_nanosecond(0).unwrap_or(dt))
    }

    /// Version stamped with the current UTC time
    pub fn now() -> Self {
        Version::new(Utc::now().naive_utc())
    }

    pub fn as_datetime(&self) -> NaiveDateTime {
        self.0
    }
}

impl From<NaiveDateTime> for Version {
    fn from(dt: NaiveDateTime) -> Self {
        Version::new(dt)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(VERSION_FORMAT))
    }
}

impl FromStr for Version {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| MigrateError::InvalidFileName {
            name: s.to_string(),
            reason,
        };
        if !VERSION_RE.is_match(s) {
            return Err(invalid("version must be a 14 digit YYYYMMDDHHMMSS timestamp".to_string()));
        }
        NaiveDateTime::parse_from_str(s, VERSION_FORMAT)
            .map(Version)
            .map_err(|e| invalid(format!("version is not a valid timestamp: {e}")))
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Which way a migration file moves the schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = MigrateError;

    /// Case-insensitive; file name decoding uses the exact lowercase form instead
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            _ => Err(MigrateError::InvalidFileName {
                name: s.to_string(),
                reason: "direction must be 'up' or 'down'".to_string(),
            }),
        }
    }
}

/// One versioned migration file
///
/// Built fresh from file names and ledger rows on every operation; nothing is
/// cached between calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Migration {
    pub version: Version,
    /// Human-readable slug, not part of the identity
    pub name: String,
    pub direction: Direction,
    /// Engine the file is restricted to; `None` applies to every engine
    pub engine: Option<String>,
    /// When the version was applied; only set for up migrations read back from the ledger
    pub applied_at: Option<NaiveDateTime>,
}

impl Migration {
    pub fn new(
        version: Version,
        name: impl Into<String>,
        direction: Direction,
        engine: Option<String>,
    ) -> Self {
        Self {
            version,
            name: name.into(),
            direction,
            engine,
            applied_at: None,
        }
    }

    /// Decode a migration from its file name
    ///
    /// # Errors
    ///
    /// Returns `MigrateError::InvalidFileName` if the name is not
    /// `<14 digit version>.<name>.<up|down>[.<engine>].sql`.
    ///
    /// # Example
    ///
    /// ```
    /// use dbmigrate::migration::{Direction, Migration};
    ///
    /// let m = Migration::from_file_name("20180918200453.create_users.up.sqlite.sql").unwrap();
    /// assert_eq!(m.name, "create_users");
    /// assert_eq!(m.direction, Direction::Up);
    /// assert_eq!(m.engine.as_deref(), Some("sqlite"));
    /// assert_eq!(m.file_name(), "20180918200453.create_users.up.sqlite.sql");
    /// ```
    pub fn from_file_name(file_name: &str) -> Result<Self, MigrateError> {
        let invalid = |reason: &str| MigrateError::InvalidFileName {
            name: file_name.to_string(),
            reason: reason.to_string(),
        };

        let stem = file_name
            .strip_suffix(MIGRATION_EXTENSION)
            .and_then(|s| s.strip_suffix('.'))
            .ok_or_else(|| invalid("extension must be .sql"))?;

        let parts: Vec<&str> = stem.split('.').collect();
        if !(3..=4).contains(&parts.len()) {
            return Err(invalid("expected <version>.<name>.<direction>[.<engine>].sql"));
        }
        if parts.iter().any(|p| p.is_empty()) {
            return Err(invalid("empty name segment"));
        }

        let version = parts[0].parse::<Version>().map_err(|_| {
            invalid("version must be a valid 14 digit YYYYMMDDHHMMSS timestamp")
        })?;
        let direction = match parts[2] {
            "up" => Direction::Up,
            "down" => Direction::Down,
            _ => return Err(invalid("direction must be 'up' or 'down'")),
        };
        let engine = parts.get(3).map(|e| e.to_string());

        Ok(Migration::new(version, parts[1], direction, engine))
    }

    /// Encode the file name this migration is stored under
    pub fn file_name(&self) -> String {
        match &self.engine {
            Some(engine) => format!(
                "{}.{}.{}.{}.{}",
                self.version, self.name, self.direction, engine, MIGRATION_EXTENSION
            ),
            None => format!(
                "{}.{}.{}.{}",
                self.version, self.name, self.direction, MIGRATION_EXTENSION
            ),
        }
    }

    pub fn is_applied(&self) -> bool {
        self.applied_at.is_some()
    }

    /// Whether this file runs on `engine`
    pub fn applies_to(&self, engine: &str) -> bool {
        self.engine.as_deref().map_or(true, |e| e == engine)
    }

    /// The same change in the other direction
    pub fn opposite(&self) -> Migration {
        let direction = match self.direction {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        };
        Migration::new(self.version, self.name.clone(), direction, self.engine.clone())
    }
}

impl fmt::Display for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

impl Ord for Migration {
    /// Version first; the file name breaks ties so the order is total
    fn cmp(&self, other: &Self) -> Ordering {
        self.version
            .cmp(&other.version)
            .then_with(|| self.file_name().cmp(&other.file_name()))
            .then_with(|| self.applied_at.cmp(&other.applied_at))
    }
}

impl PartialOrd for Migration {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
