use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cadence_core::model::{Connection, ConnectionDirectory, DestinationType, Pipeline, SourceType};
use cadence_core::Row;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{external_table_name, internal_table_name, Dialect, LoadPlan, Loader};
use crate::error::PipelineError;

/// Loads into the application database (INTERNAL_RAW) or into an external
/// PostgreSQL / MySQL connection looked up by id.
pub struct SqlLoader {
    internal: PgPool,
    connections: Arc<dyn ConnectionDirectory>,
}

impl SqlLoader {
    pub fn new(internal: PgPool, connections: Arc<dyn ConnectionDirectory>) -> Self {
        Self {
            internal,
            connections,
        }
    }

    async fn destination(&self, pipeline: &Pipeline) -> Result<Connection, PipelineError> {
        let id = pipeline.destination_config.connection_id.ok_or_else(|| {
            PipelineError::Config("connection_id required in destination config".into())
        })?;
        let conn = self
            .connections
            .get(id)
            .await
            .map_err(|e| PipelineError::Load(format!("destination connection: {e}")))?;
        Ok(conn)
    }
}

#[async_trait]
impl Loader for SqlLoader {
    async fn load(
        &self,
        pipeline: &Pipeline,
        rows: &[Row],
        cancel: &CancellationToken,
    ) -> Result<u64, PipelineError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let write_mode = pipeline.destination_config.write_mode;

        match pipeline.destination_type {
            DestinationType::InternalRaw => {
                let plan = LoadPlan::new(internal_table_name(&pipeline.name), rows, write_mode);
                write_pg(&self.internal, &plan, rows, cancel).await
            }
            DestinationType::Postgres => {
                let conn = self.destination(pipeline).await?;
                let plan = LoadPlan::new(external_table_name(pipeline), rows, write_mode);
                let pool = pg_pool(&conn).await?;
                let res = write_pg(&pool, &plan, rows, cancel).await;
                pool.close().await;
                res
            }
            DestinationType::Mysql => {
                let conn = self.destination(pipeline).await?;
                let plan = LoadPlan::new(external_table_name(pipeline), rows, write_mode);
                let pool = mysql_pool(&conn).await?;
                let res = write_mysql(&pool, &plan, rows, cancel).await;
                pool.close().await;
                res
            }
        }
    }
}

fn load_err(e: sqlx::Error) -> PipelineError {
    PipelineError::Load(e.to_string())
}

fn port(conn: &Connection, fallback: u16) -> u16 {
    u16::try_from(conn.port).unwrap_or(fallback)
}

async fn pg_pool(conn: &Connection) -> Result<PgPool, PipelineError> {
    if conn.kind != SourceType::Postgres {
        return Err(PipelineError::Config(format!(
            "destination connection {} is not a POSTGRES connection",
            conn.id
        )));
    }
    let ssl_mode = conn
        .option_str("ssl_mode")
        .and_then(|m| m.parse::<PgSslMode>().ok())
        .unwrap_or(PgSslMode::Prefer);
    let options = PgConnectOptions::new()
        .host(&conn.host)
        .port(port(conn, 5432))
        .database(&conn.database)
        .username(&conn.username)
        .password(&conn.password)
        .ssl_mode(ssl_mode);
    PgPoolOptions::new()
        .max_connections(5)
        .max_lifetime(Duration::from_secs(5 * 60))
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(options)
        .await
        .map_err(|e| PipelineError::Load(format!("failed to connect to destination: {e}")))
}

async fn mysql_pool(conn: &Connection) -> Result<MySqlPool, PipelineError> {
    if conn.kind != SourceType::Mysql {
        return Err(PipelineError::Config(format!(
            "destination connection {} is not a MYSQL connection",
            conn.id
        )));
    }
    let options = MySqlConnectOptions::new()
        .host(&conn.host)
        .port(port(conn, 3306))
        .database(&conn.database)
        .username(&conn.username)
        .password(&conn.password);
    MySqlPoolOptions::new()
        .max_connections(5)
        .max_lifetime(Duration::from_secs(5 * 60))
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(options)
        .await
        .map_err(|e| PipelineError::Load(format!("failed to connect to destination: {e}")))
}

async fn write_pg(
    pool: &PgPool,
    plan: &LoadPlan,
    rows: &[Row],
    cancel: &CancellationToken,
) -> Result<u64, PipelineError> {
    let d = Dialect::Postgres;
    if plan.write_mode == cadence_core::model::WriteMode::Overwrite {
        sqlx::query(&plan.drop_sql(d)).execute(pool).await.map_err(load_err)?;
    }
    sqlx::query(&plan.create_sql(d)).execute(pool).await.map_err(load_err)?;

    let batch_rows = plan.batch_rows();
    let mut written = 0u64;
    for (i, batch) in rows.chunks(batch_rows).enumerate() {
        let sql = plan.insert_sql(d, batch.len());
        let mut query = sqlx::query(&sql);
        for v in plan.batch_values(batch) {
            query = query.bind(v);
        }
        tokio::select! {
            res = query.execute(pool) => {
                res.map_err(|e| PipelineError::Load(format!(
                    "batch insert failed at row {}: {e}", i * batch_rows
                )))?;
            }
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
        }
        written += batch.len() as u64;
        debug!(table = %plan.table, written, "batch inserted");
    }
    info!(table = %plan.table, rows = written, "destination load complete");
    Ok(written)
}

async fn write_mysql(
    pool: &MySqlPool,
    plan: &LoadPlan,
    rows: &[Row],
    cancel: &CancellationToken,
) -> Result<u64, PipelineError> {
    let d = Dialect::Mysql;
    if plan.write_mode == cadence_core::model::WriteMode::Overwrite {
        sqlx::query(&plan.drop_sql(d)).execute(pool).await.map_err(load_err)?;
    }
    sqlx::query(&plan.create_sql(d)).execute(pool).await.map_err(load_err)?;

    let batch_rows = plan.batch_rows();
    let mut written = 0u64;
    for (i, batch) in rows.chunks(batch_rows).enumerate() {
        let sql = plan.insert_sql(d, batch.len());
        let mut query = sqlx::query(&sql);
        for v in plan.batch_values(batch) {
            query = query.bind(v);
        }
        tokio::select! {
            res = query.execute(pool) => {
                res.map_err(|e| PipelineError::Load(format!(
                    "batch insert failed at row {}: {e}", i * batch_rows
                )))?;
            }
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
        }
        written += batch.len() as u64;
    }
    info!(table = %plan.table, rows = written, "destination load complete");
    Ok(written)
}
