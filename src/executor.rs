//! Database execution abstraction
//!
//! Provides the [`DbConnection`] trait the migrator talks to, plus the small
//! value/row model it needs to bind ledger parameters and read ledger rows back.
//!
//! Each supported engine implements [`DbConnection`] once (see [`crate::provider`]),
//! so the migration core never touches a driver type directly.

use chrono::NaiveDateTime;
use std::fmt;

/// Textual timestamp formats accepted when a driver hands timestamps back as strings.
///
/// SQLite has no native timestamp type, so ledger timestamps round-trip as text.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
];

/// Format used when a timestamp has to be sent to the database as text.
pub const TIMESTAMP_TEXT_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Database execution error
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// Error from the SQLite driver
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Error from the PostgreSQL driver
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] may_postgres::Error),
    /// Error from the MySQL driver
    #[error("MySQL error: {0}")]
    Mysql(#[from] mysql::Error),
    /// A column could not be converted into a [`Value`] or read back as the requested type
    #[error("Decode error: {0}")]
    Decode(String),
}

/// A bound parameter or a column value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    Integer(i64),
    Text(String),
    Timestamp(NaiveDateTime),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<Option<i64>> for Value {
    fn from(v: Option<i64>) -> Self {
        v.map_or(Value::Null, Value::Integer)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Timestamp(ts) => write!(f, "{}", ts.format(TIMESTAMP_TEXT_FORMAT)),
        }
    }
}

/// One result row, columns in select order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Read column `idx` as an integer (`None` for SQL `NULL`)
    ///
    /// # Errors
    ///
    /// Returns `DbError::Decode` if the column is missing or holds a non-integer value.
    pub fn integer(&self, idx: usize) -> Result<Option<i64>, DbError> {
        match self.column(idx)? {
            Value::Null => Ok(None),
            Value::Integer(i) => Ok(Some(*i)),
            Value::Text(s) => s
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|e| DbError::Decode(format!("column {idx}: '{s}' is not an integer: {e}"))),
            Value::Timestamp(ts) => Err(DbError::Decode(format!(
                "column {idx}: expected integer, got timestamp {ts}"
            ))),
        }
    }

    /// Read column `idx` as a timestamp (`None` for SQL `NULL`)
    ///
    /// Textual timestamps are parsed with the formats SQLite and PostgreSQL
    /// commonly produce.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Decode` if the column is missing or cannot be parsed.
    pub fn timestamp(&self, idx: usize) -> Result<Option<NaiveDateTime>, DbError> {
        match self.column(idx)? {
            Value::Null => Ok(None),
            Value::Timestamp(ts) => Ok(Some(*ts)),
            Value::Text(s) => parse_timestamp(s).map(Some).ok_or_else(|| {
                DbError::Decode(format!(
                    "column {idx}: failed to parse timestamp '{s}': unrecognized format"
                ))
            }),
            Value::Integer(i) => Err(DbError::Decode(format!(
                "column {idx}: expected timestamp, got integer {i}"
            ))),
        }
    }

    fn column(&self, idx: usize) -> Result<&Value, DbError> {
        self.values
            .get(idx)
            .ok_or_else(|| DbError::Decode(format!("column {idx} out of range ({} columns)", self.values.len())))
    }
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

/// Trait for executing statements against one open database connection
///
/// Implementations receive SQL that is already in the engine's placeholder
/// syntax; rewriting happens in [`crate::provider::Provider::set_placeholders`].
///
/// A connection is owned exclusively by one [`crate::Migrator`]; there is no
/// internal locking.
pub trait DbConnection: Send {
    /// Execute a single statement and return the number of rows affected
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the driver rejects the statement.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, DbError>;

    /// Execute a script that may contain several `;`-separated statements
    ///
    /// Used for migration bodies. No parameters are bound.
    ///
    /// # Errors
    ///
    /// Returns `DbError` on the first failing statement.
    fn execute_batch(&self, sql: &str) -> Result<(), DbError>;

    /// Run a query and collect every row
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the query fails or a column has a type that cannot
    /// be represented as a [`Value`].
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DbError>;

    /// Close the connection, releasing the driver handle
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the driver reports a failure while shutting down.
    fn close(self: Box<Self>) -> Result<(), DbError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2018, 9, 18)
            .and_then(|d| d.and_hms_opt(h, m, s))
            .unwrap()
    }

    #[test]
    fn test_row_timestamp_from_text() {
        let row = Row::new(vec![
            Value::Text("2018-09-18 20:04:53".to_string()),
            Value::Text("2018-09-18T20:04:53.250".to_string()),
            Value::Timestamp(ts(20, 4, 53)),
            Value::Null,
        ]);
        assert_eq!(row.timestamp(0).unwrap(), Some(ts(20, 4, 53)));
        assert_eq!(
            row.timestamp(1).unwrap().map(|t| t.and_utc().timestamp_subsec_millis()),
            Some(250)
        );
        assert_eq!(row.timestamp(2).unwrap(), Some(ts(20, 4, 53)));
        assert_eq!(row.timestamp(3).unwrap(), None);
    }

    #[test]
    fn test_row_timestamp_rejects_garbage() {
        let row = Row::new(vec![Value::Text("yesterday".to_string()), Value::Integer(3)]);
        assert!(matches!(row.timestamp(0), Err(DbError::Decode(_))));
        assert!(matches!(row.timestamp(1), Err(DbError::Decode(_))));
        // EDGE CASE: out of range column
        assert!(matches!(row.timestamp(7), Err(DbError::Decode(_))));
    }

    #[test]
    fn test_row_integer() {
        let row = Row::new(vec![Value::Integer(4), Value::Text(" 12 ".to_string()), Value::Null]);
        assert_eq!(row.integer(0).unwrap(), Some(4));
        assert_eq!(row.integer(1).unwrap(), Some(12));
        assert_eq!(row.integer(2).unwrap(), None);
        assert_eq!(row.len(), 3);
    }

    #[test]
    fn test_value_display_roundtrips_through_row() {
        let v = Value::from(ts(1, 2, 3));
        let row = Row::new(vec![Value::Text(v.to_string())]);
        assert_eq!(row.timestamp(0).unwrap(), Some(ts(1, 2, 3)));
        assert_eq!(Value::from(None::<i64>), Value::Null);
    }

    #[test]
    fn test_db_error_display() {
        let err = DbError::Decode("bad column".to_string());
        assert!(err.to_string().contains("Decode error"));
        assert!(err.to_string().contains("bad column"));
    }
}
