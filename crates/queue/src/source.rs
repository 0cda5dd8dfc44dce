//! [`QueryExecutor`] backed by short-lived PostgreSQL / MySQL pools.
//!
//! Each admitted query opens its own small pool against the target
//! connection, pings it, runs the statement and closes the pool. Values are
//! decoded by the column's database type name into JSON.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use cadence_core::model::{Connection, SourceType};
use cadence_core::Row;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlRow, MySqlSslMode};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow, PgSslMode};
use sqlx::{Column, Connection as _, Executor, Row as _, TypeInfo, ValueRef};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::QueueError;
use crate::executor::QueryExecutor;
use crate::request::{QueryRequest, QueryResult};

/// Flat byte estimate for any value that is not a blob.
const SCALAR_BYTES: u64 = 8;

#[derive(Debug, Clone)]
pub struct SqlSourceExecutor {
    max_connections: u32,
    max_lifetime: Duration,
    acquire_timeout: Duration,
}

impl Default for SqlSourceExecutor {
    fn default() -> Self {
        Self {
            max_connections: 5,
            max_lifetime: Duration::from_secs(5 * 60),
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

impl SqlSourceExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    async fn run_postgres(&self, req: &QueryRequest) -> Result<Decoded, QueueError> {
        let c = &req.connection;
        let ssl_mode = c
            .option_str("ssl_mode")
            .and_then(|m| m.parse::<PgSslMode>().ok())
            .unwrap_or(PgSslMode::Prefer);
        let options = PgConnectOptions::new()
            .host(&c.host)
            .port(port(c))
            .database(&c.database)
            .username(&c.username)
            .password(&c.password)
            .ssl_mode(ssl_mode);

        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .max_lifetime(self.max_lifetime)
            .acquire_timeout(self.acquire_timeout)
            .connect_with(options)
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        let result = async {
            let mut conn = pool.acquire().await?;
            conn.ping().await?;

            let sql = req.effective_sql();
            let mut query = sqlx::query(&sql);
            for p in &req.params {
                query = match p {
                    Value::Null => query.bind(None::<String>),
                    Value::Bool(b) => query.bind(*b),
                    Value::Number(n) => match n.as_i64() {
                        Some(i) => query.bind(i),
                        None => query.bind(n.as_f64()),
                    },
                    Value::String(s) => query.bind(s.as_str()),
                    other => query.bind(other.clone()),
                };
            }
            let rows = query.fetch_all(&mut *conn).await?;

            let columns = match rows.first() {
                Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
                None => (&mut *conn)
                    .describe(&sql)
                    .await?
                    .columns()
                    .iter()
                    .map(|c| c.name().to_string())
                    .collect(),
            };

            let mut decoded = Decoded::new(columns);
            for row in &rows {
                decoded.push(decode_pg_row(row));
            }
            Ok::<_, sqlx::Error>(decoded)
        }
        .await;

        pool.close().await;
        result.map_err(QueueError::from)
    }

    async fn run_mysql(&self, req: &QueryRequest) -> Result<Decoded, QueueError> {
        let c = &req.connection;
        let ssl_mode = c
            .option_str("ssl_mode")
            .and_then(|m| m.parse::<MySqlSslMode>().ok())
            .unwrap_or(MySqlSslMode::Preferred);
        let options = MySqlConnectOptions::new()
            .host(&c.host)
            .port(port(c))
            .database(&c.database)
            .username(&c.username)
            .password(&c.password)
            .ssl_mode(ssl_mode);

        let pool = MySqlPoolOptions::new()
            .max_connections(self.max_connections)
            .max_lifetime(self.max_lifetime)
            .acquire_timeout(self.acquire_timeout)
            .connect_with(options)
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        let result = async {
            let mut conn = pool.acquire().await?;
            conn.ping().await?;

            let sql = req.effective_sql();
            let mut query = sqlx::query(&sql);
            for p in &req.params {
                query = match p {
                    Value::Null => query.bind(None::<String>),
                    Value::Bool(b) => query.bind(*b),
                    Value::Number(n) => match n.as_i64() {
                        Some(i) => query.bind(i),
                        None => query.bind(n.as_f64()),
                    },
                    Value::String(s) => query.bind(s.as_str()),
                    other => query.bind(other.clone()),
                };
            }
            let rows = query.fetch_all(&mut *conn).await?;

            let columns = match rows.first() {
                Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
                None => (&mut *conn)
                    .describe(&sql)
                    .await?
                    .columns()
                    .iter()
                    .map(|c| c.name().to_string())
                    .collect(),
            };

            let mut decoded = Decoded::new(columns);
            for row in &rows {
                decoded.push(decode_mysql_row(row));
            }
            Ok::<_, sqlx::Error>(decoded)
        }
        .await;

        pool.close().await;
        result.map_err(QueueError::from)
    }
}

#[async_trait]
impl QueryExecutor for SqlSourceExecutor {
    async fn execute(&self, request: &QueryRequest, cancel: &CancellationToken) -> QueryResult {
        let started = Instant::now();
        let run = async {
            match request.connection.kind {
                SourceType::Postgres => self.run_postgres(request).await,
                SourceType::Mysql => self.run_mysql(request).await,
            }
        };
        let outcome = tokio::select! {
            res = run => res,
            _ = cancel.cancelled() => Err(QueueError::Cancelled),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(decoded) => {
                debug!(
                    connection_id = %request.connection.id,
                    rows = decoded.rows.len(),
                    bytes = decoded.bytes,
                    elapsed_ms,
                    "source query finished"
                );
                let mut res = QueryResult::from_rows(decoded.columns, decoded.rows, decoded.bytes);
                res.execution_time_ms = elapsed_ms;
                res
            }
            Err(e) => QueryResult::failed(e.to_string(), elapsed_ms),
        }
    }
}

struct Decoded {
    columns: Vec<String>,
    rows: Vec<Row>,
    bytes: u64,
}

impl Decoded {
    fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
            bytes: 0,
        }
    }

    fn push(&mut self, (row, bytes): (Row, u64)) {
        self.rows.push(row);
        self.bytes += bytes;
    }
}

fn port(c: &Connection) -> u16 {
    u16::try_from(c.port).unwrap_or(match c.kind {
        SourceType::Postgres => 5432,
        SourceType::Mysql => 3306,
    })
}

fn float(v: f64) -> Value {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn blob(bytes: Vec<u8>) -> (Value, u64) {
    let len = bytes.len() as u64;
    (Value::String(String::from_utf8_lossy(&bytes).into_owned()), len)
}

fn decode_pg_row(row: &PgRow) -> (Row, u64) {
    let mut out = Row::with_capacity(row.len());
    let mut bytes = 0;
    for (idx, column) in row.columns().iter().enumerate() {
        let type_name = column.type_info().name();
        let (value, size) = match decode_pg(row, idx, type_name) {
            Ok(v) => v,
            Err(e) => {
                debug!(column = column.name(), type_name, error = %e, "undecodable value, using null");
                (Value::Null, SCALAR_BYTES)
            }
        };
        bytes += size;
        out.insert(column.name().to_string(), value);
    }
    (out, bytes)
}

fn decode_pg(row: &PgRow, idx: usize, type_name: &str) -> Result<(Value, u64), sqlx::Error> {
    let scalar = |v: Value| Ok((v, SCALAR_BYTES));
    match type_name {
        "BOOL" => scalar(row.try_get::<Option<bool>, _>(idx)?.map_or(Value::Null, Value::Bool)),
        "INT2" => scalar(row.try_get::<Option<i16>, _>(idx)?.map_or(Value::Null, Value::from)),
        "INT4" => scalar(row.try_get::<Option<i32>, _>(idx)?.map_or(Value::Null, Value::from)),
        "INT8" => scalar(row.try_get::<Option<i64>, _>(idx)?.map_or(Value::Null, Value::from)),
        "FLOAT4" => scalar(
            row.try_get::<Option<f32>, _>(idx)?
                .map_or(Value::Null, |v| float(f64::from(v))),
        ),
        "FLOAT8" => scalar(row.try_get::<Option<f64>, _>(idx)?.map_or(Value::Null, float)),
        "NUMERIC" => {
            let raw = row.try_get_raw(idx)?;
            if raw.is_null() {
                return scalar(Value::Null);
            }
            let bytes = raw.as_bytes().map_err(sqlx::Error::Decode)?;
            scalar(pg_numeric(bytes).map_or(Value::Null, float))
        }
        "UUID" => scalar(
            row.try_get::<Option<uuid::Uuid>, _>(idx)?
                .map_or(Value::Null, |v| Value::String(v.to_string())),
        ),
        "TIMESTAMPTZ" => scalar(
            row.try_get::<Option<DateTime<Utc>>, _>(idx)?
                .map_or(Value::Null, |v| Value::String(v.to_rfc3339())),
        ),
        "TIMESTAMP" => scalar(
            row.try_get::<Option<NaiveDateTime>, _>(idx)?
                .map_or(Value::Null, |v| Value::String(v.to_string())),
        ),
        "DATE" => scalar(
            row.try_get::<Option<NaiveDate>, _>(idx)?
                .map_or(Value::Null, |v| Value::String(v.to_string())),
        ),
        "TIME" => scalar(
            row.try_get::<Option<NaiveTime>, _>(idx)?
                .map_or(Value::Null, |v| Value::String(v.to_string())),
        ),
        "JSON" | "JSONB" => scalar(row.try_get::<Option<Value>, _>(idx)?.unwrap_or(Value::Null)),
        "BYTEA" => Ok(row
            .try_get::<Option<Vec<u8>>, _>(idx)?
            .map_or((Value::Null, SCALAR_BYTES), blob)),
        _ => scalar(
            row.try_get_unchecked::<Option<String>, _>(idx)?
                .map_or(Value::Null, Value::String),
        ),
    }
}

/// Decode the binary wire form of a PostgreSQL NUMERIC: digit count,
/// weight, sign and scale as big-endian 16-bit words, followed by base-10000
/// digits.
fn pg_numeric(bytes: &[u8]) -> Option<f64> {
    let word = |i: usize| -> Option<i16> {
        let b = bytes.get(i * 2..i * 2 + 2)?;
        Some(i16::from_be_bytes([b[0], b[1]]))
    };
    let ndigits = usize::try_from(word(0)?).ok()?;
    let weight = i32::from(word(1)?);
    let sign = word(2)? as u16;
    if sign == 0xC000 {
        return None;
    }
    let mut value = 0f64;
    for i in 0..ndigits {
        let digit = f64::from(word(4 + i)?);
        value += digit * 10_000f64.powi(weight - i as i32);
    }
    if sign == 0x4000 {
        value = -value;
    }
    Some(value)
}

fn decode_mysql_row(row: &MySqlRow) -> (Row, u64) {
    let mut out = Row::with_capacity(row.len());
    let mut bytes = 0;
    for (idx, column) in row.columns().iter().enumerate() {
        let type_name = column.type_info().name();
        let (value, size) = match decode_mysql(row, idx, type_name) {
            Ok(v) => v,
            Err(e) => {
                debug!(column = column.name(), type_name, error = %e, "undecodable value, using null");
                (Value::Null, SCALAR_BYTES)
            }
        };
        bytes += size;
        out.insert(column.name().to_string(), value);
    }
    (out, bytes)
}

fn decode_mysql(row: &MySqlRow, idx: usize, type_name: &str) -> Result<(Value, u64), sqlx::Error> {
    let scalar = |v: Value| Ok((v, SCALAR_BYTES));
    match type_name {
        t if t.ends_with("UNSIGNED") => scalar(
            row.try_get_unchecked::<Option<u64>, _>(idx)?
                .map_or(Value::Null, Value::from),
        ),
        "BOOLEAN" => scalar(
            row.try_get_unchecked::<Option<bool>, _>(idx)?
                .map_or(Value::Null, Value::Bool),
        ),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => scalar(
            row.try_get_unchecked::<Option<i64>, _>(idx)?
                .map_or(Value::Null, Value::from),
        ),
        "FLOAT" => scalar(
            row.try_get::<Option<f32>, _>(idx)?
                .map_or(Value::Null, |v| float(f64::from(v))),
        ),
        "DOUBLE" => scalar(row.try_get::<Option<f64>, _>(idx)?.map_or(Value::Null, float)),
        "DECIMAL" => scalar(
            row.try_get_unchecked::<Option<String>, _>(idx)?
                .map_or(Value::Null, |s| match s.parse::<f64>() {
                    Ok(v) => float(v),
                    Err(_) => Value::String(s),
                }),
        ),
        "DATETIME" => scalar(
            row.try_get::<Option<NaiveDateTime>, _>(idx)?
                .map_or(Value::Null, |v| Value::String(v.to_string())),
        ),
        "TIMESTAMP" => scalar(
            row.try_get::<Option<DateTime<Utc>>, _>(idx)?
                .map_or(Value::Null, |v| Value::String(v.to_rfc3339())),
        ),
        "DATE" => scalar(
            row.try_get::<Option<NaiveDate>, _>(idx)?
                .map_or(Value::Null, |v| Value::String(v.to_string())),
        ),
        "TIME" => scalar(
            row.try_get::<Option<NaiveTime>, _>(idx)?
                .map_or(Value::Null, |v| Value::String(v.to_string())),
        ),
        "JSON" => scalar(row.try_get::<Option<Value>, _>(idx)?.unwrap_or(Value::Null)),
        "BINARY" | "VARBINARY" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" => Ok(row
            .try_get_unchecked::<Option<Vec<u8>>, _>(idx)?
            .map_or((Value::Null, SCALAR_BYTES), blob)),
        _ => scalar(
            row.try_get_unchecked::<Option<String>, _>(idx)?
                .map_or(Value::Null, Value::String),
        ),
    }
}
