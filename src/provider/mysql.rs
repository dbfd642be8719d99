use super::Provider;
use crate::config::Settings;
use crate::executor::{DbConnection, DbError, Row, Value};
use crate::migration::MigrateError;
use chrono::{Datelike, NaiveDate, Timelike};
use mysql::prelude::Queryable;
use mysql::{Conn, Params};
use std::cell::RefCell;
use std::path::Path;

#[cfg(feature = "tracing")]
use tracing::debug_span;

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 3306;

#[derive(Debug, Clone, Copy, Default)]
pub struct MysqlProvider;

/// Percent-encode a URL component, keeping only unreserved characters
fn encode(v: &str) -> String {
    let mut out = String::with_capacity(v.len());
    for b in v.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~') {
            out.push(char::from(b));
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

impl Provider for MysqlProvider {
    fn engine(&self) -> &'static str {
        "mysql"
    }

    fn driver_name(&self) -> &'static str {
        "mysql"
    }

    fn dsn(&self, settings: &Settings, _project_dir: &Path) -> Result<String, MigrateError> {
        if settings.database.trim().is_empty() {
            return Err(MigrateError::DatabaseNotSpecified);
        }
        let user = settings
            .user
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or(MigrateError::UserNotSpecified)?;

        let credentials = match settings.password.as_deref().filter(|p| !p.is_empty()) {
            Some(password) => format!("{}:{}", encode(user), encode(password)),
            None => encode(user),
        };
        Ok(format!(
            "mysql://{credentials}@{}:{}/{}",
            settings.host.as_deref().unwrap_or(DEFAULT_HOST),
            settings.port.unwrap_or(DEFAULT_PORT),
            encode(&settings.database)
        ))
    }

    fn has_table_query(&self) -> &'static str {
        "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = DATABASE() AND table_name = ?"
    }

    fn connect(&self, dsn: &str) -> Result<Box<dyn DbConnection>, MigrateError> {
        #[cfg(feature = "tracing")]
        let _span = debug_span!("mysql_connect").entered();

        let conn = Conn::new(dsn).map_err(|e| MigrateError::Connection(e.into()))?;
        Ok(Box::new(MysqlConnection::new(conn)))
    }
}

/// [`DbConnection`] over a synchronous `mysql` connection
///
/// The driver needs `&mut` access for every round trip; the connection is
/// never shared, so a `RefCell` is enough.
pub struct MysqlConnection {
    conn: RefCell<Conn>,
}

impl MysqlConnection {
    pub fn new(conn: Conn) -> Self {
        Self { conn: RefCell::new(conn) }
    }
}

fn to_params(params: &[Value]) -> Params {
    if params.is_empty() {
        return Params::Empty;
    }
    Params::Positional(params.iter().map(to_mysql).collect())
}

fn to_mysql(value: &Value) -> mysql::Value {
    match value {
        Value::Null => mysql::Value::NULL,
        Value::Integer(i) => mysql::Value::Int(*i),
        Value::Text(s) => mysql::Value::Bytes(s.clone().into_bytes()),
        Value::Timestamp(ts) => mysql::Value::Date(
            u16::try_from(ts.year()).unwrap_or(0),
            ts.month() as u8,
            ts.day() as u8,
            ts.hour() as u8,
            ts.minute() as u8,
            ts.second() as u8,
            ts.nanosecond() / 1_000,
        ),
    }
}

fn from_mysql(value: &mysql::Value, idx: usize) -> Result<Value, DbError> {
    match value {
        mysql::Value::NULL => Ok(Value::Null),
        mysql::Value::Int(i) => Ok(Value::Integer(*i)),
        mysql::Value::UInt(u) => i64::try_from(*u)
            .map(Value::Integer)
            .map_err(|_| DbError::Decode(format!("column {idx}: {u} does not fit in i64"))),
        mysql::Value::Bytes(bytes) => Ok(Value::Text(String::from_utf8_lossy(bytes).into_owned())),
        mysql::Value::Date(y, mo, d, h, mi, s, us) => NaiveDate::from_ymd_opt(i32::from(*y), u32::from(*mo), u32::from(*d))
            .and_then(|date| date.and_hms_micro_opt(u32::from(*h), u32::from(*mi), u32::from(*s), *us))
            .map(Value::Timestamp)
            .ok_or_else(|| DbError::Decode(format!("column {idx}: invalid datetime {value:?}"))),
        other => Err(DbError::Decode(format!("column {idx}: unsupported value {other:?}"))),
    }
}

fn decode_row(row: &mysql::Row) -> Result<Row, DbError> {
    (0..row.len())
        .map(|i| match row.as_ref(i) {
            Some(v) => from_mysql(v, i),
            None => Ok(Value::Null),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Row::new)
}

impl DbConnection for MysqlConnection {
    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, DbError> {
        let mut conn = self.conn.borrow_mut();
        conn.exec_drop(sql, to_params(params))?;
        Ok(conn.affected_rows())
    }

    fn execute_batch(&self, sql: &str) -> Result<(), DbError> {
        // text protocol; the driver enables multi-statement scripts
        self.conn.borrow_mut().query_drop(sql)?;
        Ok(())
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DbError> {
        let rows: Vec<mysql::Row> = self.conn.borrow_mut().exec(sql, to_params(params))?;
        rows.iter().map(decode_row).collect()
    }

    fn close(self: Box<Self>) -> Result<(), DbError> {
        // dropping the connection sends COM_QUIT
        drop(self.conn.into_inner());
        Ok(())
    }
}
