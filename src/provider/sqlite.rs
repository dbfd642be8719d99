use super::Provider;
use crate::config::Settings;
use crate::executor::{DbConnection, DbError, Row, Value, TIMESTAMP_TEXT_FORMAT};
use crate::migration::MigrateError;
use rusqlite::types::{Value as SqliteValue, ValueRef};
use std::path::Path;

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteProvider;

impl Provider for SqliteProvider {
    fn engine(&self) -> &'static str {
        "sqlite"
    }

    fn driver_name(&self) -> &'static str {
        "sqlite3"
    }

    fn dsn(&self, settings: &Settings, project_dir: &Path) -> Result<String, MigrateError> {
        if settings.database.trim().is_empty() {
            return Err(MigrateError::DatabaseNotSpecified);
        }
        let path = Path::new(&settings.database);
        let path = if path.is_absolute() || settings.database == ":memory:" {
            path.to_path_buf()
        } else {
            project_dir.join(path)
        };
        Ok(path.to_string_lossy().into_owned())
    }

    fn has_table_query(&self) -> &'static str {
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?"
    }

    fn connect(&self, dsn: &str) -> Result<Box<dyn DbConnection>, MigrateError> {
        let conn = rusqlite::Connection::open(dsn).map_err(|e| MigrateError::Connection(e.into()))?;
        Ok(Box::new(SqliteConnection::new(conn)))
    }
}

/// [`DbConnection`] over a `rusqlite` connection
pub struct SqliteConnection {
    conn: rusqlite::Connection,
}

impl SqliteConnection {
    pub fn new(conn: rusqlite::Connection) -> Self {
        Self { conn }
    }

    /// Open a private in-memory database
    pub fn in_memory() -> Result<Self, DbError> {
        Ok(Self::new(rusqlite::Connection::open_in_memory()?))
    }
}

fn to_sqlite(value: &Value) -> SqliteValue {
    match value {
        Value::Null => SqliteValue::Null,
        Value::Integer(i) => SqliteValue::Integer(*i),
        Value::Text(s) => SqliteValue::Text(s.clone()),
        Value::Timestamp(ts) => SqliteValue::Text(ts.format(TIMESTAMP_TEXT_FORMAT).to_string()),
    }
}

fn from_sqlite(value: ValueRef<'_>) -> Result<Value, DbError> {
    match value {
        ValueRef::Null => Ok(Value::Null),
        ValueRef::Integer(i) => Ok(Value::Integer(i)),
        ValueRef::Text(bytes) => Ok(Value::Text(String::from_utf8_lossy(bytes).into_owned())),
        ValueRef::Real(f) => Err(DbError::Decode(format!("unsupported REAL value {f}"))),
        ValueRef::Blob(_) => Err(DbError::Decode("unsupported BLOB value".to_string())),
    }
}

impl DbConnection for SqliteConnection {
    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, DbError> {
        let affected = self
            .conn
            .execute(sql, rusqlite::params_from_iter(params.iter().map(to_sqlite)))?;
        Ok(affected as u64)
    }

    fn execute_batch(&self, sql: &str) -> Result<(), DbError> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DbError> {
        let mut stmt = self.conn.prepare(sql)?;
        let column_count = stmt.column_count();
        let mut rows = stmt.query(rusqlite::params_from_iter(params.iter().map(to_sqlite)))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let values = (0..column_count)
                .map(|i| row.get_ref(i).map_err(DbError::from).and_then(from_sqlite))
                .collect::<Result<Vec<_>, _>>()?;
            out.push(Row::new(values));
        }
        Ok(out)
    }

    fn close(self: Box<Self>) -> Result<(), DbError> {
        self.conn.close().map_err(|(_, e)| DbError::Sqlite(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_dsn_resolves_relative_to_project() {
        let p = SqliteProvider;
        let dsn = p.dsn(&Settings::new("sqlite", "test.db"), Path::new("/srv/app")).unwrap();
        assert_eq!(Path::new(&dsn), Path::new("/srv/app/test.db"));

        let dsn = p.dsn(&Settings::new("sqlite", "/var/db/app.db"), Path::new("/srv/app")).unwrap();
        assert_eq!(dsn, "/var/db/app.db");

        assert!(matches!(
            p.dsn(&Settings::new("sqlite", ""), Path::new("/srv/app")),
            Err(MigrateError::DatabaseNotSpecified)
        ));
    }

    #[test]
    fn test_execute_and_query_roundtrip() {
        let conn = SqliteConnection::in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (v TIMESTAMP, n BIGINT, s TEXT); CREATE TABLE u (x INTEGER);")
            .unwrap();

        let ts = NaiveDate::from_ymd_opt(2018, 9, 18)
            .and_then(|d| d.and_hms_opt(20, 4, 53))
            .unwrap();
        let affected = conn
            .execute(
                "INSERT INTO t (v, n, s) VALUES (?, ?, ?)",
                &[Value::Timestamp(ts), Value::Null, Value::from("x")],
            )
            .unwrap();
        assert_eq!(affected, 1);

        let rows = conn.query("SELECT v, n, s FROM t WHERE v = ?", &[Value::Timestamp(ts)]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].timestamp(0).unwrap(), Some(ts));
        assert_eq!(rows[0].integer(1).unwrap(), None);
        assert_eq!(rows[0].get(2), Some(&Value::Text("x".to_string())));

        let count = conn
            .query(SqliteProvider.has_table_query(), &[Value::from("u")])
            .unwrap();
        assert_eq!(count[0].integer(0).unwrap(), Some(1));

        Box::new(conn).close().unwrap();
    }
}
