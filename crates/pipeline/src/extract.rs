//! Source resolution and extraction through the admission queue.

use std::sync::Arc;

use cadence_core::model::{Connection, ConnectionDirectory, Pipeline};
use cadence_core::Row;
use cadence_queue::{AdmissionQueue, Priority, QueryRequest};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::PipelineError;

/// Rows pulled from the source plus counters.
#[derive(Debug, Clone, Default)]
pub struct Extracted {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub bytes: u64,
}

pub struct Extractor {
    queue: AdmissionQueue,
    connections: Arc<dyn ConnectionDirectory>,
}

impl Extractor {
    pub fn new(queue: AdmissionQueue, connections: Arc<dyn ConnectionDirectory>) -> Self {
        Self { queue, connections }
    }

    /// Credentials: a `connection_ref` wins over inline source config.
    pub async fn resolve_connection(&self, pipeline: &Pipeline) -> Result<Connection, PipelineError> {
        if let Some(id) = pipeline.connection_ref {
            return Ok(self.connections.get(id).await?);
        }
        let cfg = &pipeline.source_config;
        if !cfg.has_host() {
            return Err(PipelineError::Config(
                "source config needs a host or a connection_ref".into(),
            ));
        }
        let mut options = serde_json::Map::new();
        if let Some(mode) = cfg.ssl_mode.as_deref() {
            options.insert("ssl_mode".into(), mode.into());
        }
        Ok(Connection {
            id: Uuid::nil(),
            kind: pipeline.source_type,
            host: cfg.host.clone().unwrap_or_default(),
            port: cfg.port.map(i32::from).unwrap_or(match pipeline.source_type {
                cadence_core::model::SourceType::Postgres => 5432,
                cadence_core::model::SourceType::Mysql => 3306,
            }),
            database: cfg.database.clone().unwrap_or_default(),
            username: cfg.username.clone().unwrap_or_default(),
            password: cfg.password.clone().unwrap_or_default(),
            options: serde_json::Value::Object(options),
        })
    }

    pub async fn extract(
        &self,
        pipeline: &Pipeline,
        cancel: &CancellationToken,
    ) -> Result<Extracted, PipelineError> {
        let sql = resolve_sql(pipeline)?;
        let connection = self.resolve_connection(pipeline).await?;
        let request = QueryRequest::new(connection, sql).with_limit(pipeline.effective_row_limit());

        let result = self
            .queue
            .enqueue(request, Priority::Normal, cancel)
            .await?
            .into_result()?;

        Ok(Extracted {
            columns: result.columns,
            rows: result.rows,
            bytes: result.bytes,
        })
    }
}

/// SQL: the pipeline's `source_query` wins over `source_config.query`.
pub fn resolve_sql(pipeline: &Pipeline) -> Result<String, PipelineError> {
    [
        pipeline.source_query.as_deref(),
        pipeline.source_config.query.as_deref(),
    ]
    .into_iter()
    .flatten()
    .map(str::trim)
    .find(|q| !q.is_empty())
    .map(str::to_string)
    .ok_or_else(|| PipelineError::Config("no source query configured".into()))
}
