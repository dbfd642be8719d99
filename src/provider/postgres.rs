use super::{numbered_placeholders, Provider};
use crate::config::Settings;
use crate::executor::{DbConnection, DbError, Row, Value};
use crate::migration::MigrateError;
use chrono::NaiveDateTime;
use may_postgres::types::{ToSql, Type};
use may_postgres::Client;
use std::path::Path;

#[cfg(feature = "tracing")]
use tracing::debug_span;

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 5432;

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresProvider;

/// Quote a key/value connection string value when it needs it
fn quote_value(v: &str) -> String {
    if !v.is_empty() && !v.contains([' ', '\'', '\\']) {
        return v.to_string();
    }
    let escaped = v.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}'")
}

impl Provider for PostgresProvider {
    fn engine(&self) -> &'static str {
        "postgres"
    }

    fn driver_name(&self) -> &'static str {
        "postgres"
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

        let mut parts = vec![
            format!("host={}", quote_value(settings.host.as_deref().unwrap_or(DEFAULT_HOST))),
            format!("port={}", settings.port.unwrap_or(DEFAULT_PORT)),
            format!("user={}", quote_value(user)),
        ];
        if let Some(password) = settings.password.as_deref().filter(|p| !p.is_empty()) {
            parts.push(format!("password={}", quote_value(password)));
        }
        parts.push(format!("dbname={}", quote_value(&settings.database)));
        Ok(parts.join(" "))
    }

    fn has_table_query(&self) -> &'static str {
        // unquoted identifiers are folded to lower case when the table is created
        "SELECT COUNT(*) FROM pg_catalog.pg_tables WHERE schemaname = current_schema() AND tablename = lower(?)"
    }

    fn set_placeholders(&self, sql: &str) -> String {
        numbered_placeholders(sql)
    }

    fn connect(&self, dsn: &str) -> Result<Box<dyn DbConnection>, MigrateError> {
        #[cfg(feature = "tracing")]
        let _span = debug_span!("postgres_connect").entered();

        let client = may_postgres::connect(dsn).map_err(|e| MigrateError::Connection(e.into()))?;
        Ok(Box::new(PostgresConnection::new(client)))
    }
}

/// [`DbConnection`] over a `may_postgres` client
pub struct PostgresConnection {
    client: Client,
}

impl PostgresConnection {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn to_sql_params(params: &[Value]) -> Vec<Box<dyn ToSql>> {
    params
        .iter()
        .map(|v| -> Box<dyn ToSql> {
            match v {
                Value::Null => Box::new(Option::<i64>::None),
                Value::Integer(i) => Box::new(*i),
                Value::Text(s) => Box::new(s.clone()),
                Value::Timestamp(ts) => Box::new(*ts),
            }
        })
        .collect()
}

fn decode_column(row: &may_postgres::Row, idx: usize) -> Result<Value, DbError> {
    let ty = row.columns()[idx].type_().clone();
    let value = if ty == Type::TIMESTAMP {
        row.try_get::<_, Option<NaiveDateTime>>(idx)?.map(Value::Timestamp)
    } else if ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(idx)?.map(Value::Integer)
    } else if ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(idx)?.map(|i| Value::Integer(i64::from(i)))
    } else if ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(idx)?.map(|i| Value::Integer(i64::from(i)))
    } else if ty == Type::TEXT || ty == Type::VARCHAR || ty == Type::NAME || ty == Type::BPCHAR {
        row.try_get::<_, Option<String>>(idx)?.map(Value::Text)
    } else {
        return Err(DbError::Decode(format!("unsupported column type {ty} at index {idx}")));
    };
    Ok(value.unwrap_or(Value::Null))
}

impl DbConnection for PostgresConnection {
    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, DbError> {
        let owned = to_sql_params(params);
        let refs: Vec<&dyn ToSql> = owned.iter().map(|p| p.as_ref()).collect();
        Ok(self.client.execute(sql, &refs)?)
    }

    fn execute_batch(&self, sql: &str) -> Result<(), DbError> {
        self.client.batch_execute(sql)?;
        Ok(())
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DbError> {
        let owned = to_sql_params(params);
        let refs: Vec<&dyn ToSql> = owned.iter().map(|p| p.as_ref()).collect();
        let rows = self.client.query(sql, &refs)?;

        rows.iter()
            .map(|row| {
                (0..row.len())
                    .map(|i| decode_column(row, i))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Row::new)
            })
            .collect()
    }

    fn close(self: Box<Self>) -> Result<(), DbError> {
        // may_postgres closes the socket when the last client handle is dropped
        drop(self.client);
        Ok(())
    }
}
