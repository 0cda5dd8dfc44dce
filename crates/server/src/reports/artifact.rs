//! Report artifacts: files written to the export directory.
//!
//! Query reports rendered as CSV are produced here by running the saved
//! query through the admission queue. Every other combination is handed to
//! an external writer when one is configured.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use cadence_core::model::{ConnectionDirectory, ReportFormat, ResourceType, ScheduledReport};
use cadence_queue::{AdmissionQueue, Priority, QueryRequest, QueryResult};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use super::store::ReportStore;
use super::types::ReportError;

#[derive(Debug, Clone)]
pub struct ArtifactRequest {
    pub name: String,
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub format: ReportFormat,
    pub options: Value,
}

impl ArtifactRequest {
    pub fn for_report(report: &ScheduledReport) -> Self {
        Self {
            name: report.name.clone(),
            resource_type: report.resource_type,
            resource_id: report.resource_id.clone(),
            format: report.format,
            options: report.options.clone(),
        }
    }

    fn row_limit(&self) -> Option<i64> {
        self.options
            .get("row_limit")
            .and_then(Value::as_i64)
            .filter(|n| *n > 0)
    }
}

#[derive(Debug, Clone)]
pub struct Artifact {
    pub path: PathBuf,
    pub size: u64,
    pub format: ReportFormat,
}

#[async_trait]
pub trait ArtifactWriter: Send + Sync {
    async fn write(
        &self,
        request: &ArtifactRequest,
        cancel: &CancellationToken,
    ) -> Result<Artifact, ReportError>;
}

pub struct FileArtifactWriter {
    export_dir: PathBuf,
    queue: AdmissionQueue,
    connections: Arc<dyn ConnectionDirectory>,
    store: Arc<dyn ReportStore>,
    external: Option<Arc<dyn ArtifactWriter>>,
}

impl FileArtifactWriter {
    pub fn new(
        export_dir: PathBuf,
        queue: AdmissionQueue,
        connections: Arc<dyn ConnectionDirectory>,
        store: Arc<dyn ReportStore>,
    ) -> Self {
        Self {
            export_dir,
            queue,
            connections,
            store,
            external: None,
        }
    }

    /// Writer for dashboards and non-CSV formats.
    pub fn with_external(mut self, writer: Arc<dyn ArtifactWriter>) -> Self {
        self.external = Some(writer);
        self
    }

    async fn write_query_csv(
        &self,
        request: &ArtifactRequest,
        cancel: &CancellationToken,
    ) -> Result<Artifact, ReportError> {
        let query_id: Uuid = request.resource_id.trim().parse().map_err(|_| {
            ReportError::Generation(format!("invalid saved query id '{}'", request.resource_id))
        })?;
        let query = self.store.get_query(query_id).await?;
        let connection = self.connections.get(query.connection_id).await?;

        let mut query_request = QueryRequest::new(connection, query.sql);
        if let Some(limit) = request.row_limit() {
            query_request = query_request.with_limit(limit);
        }
        let result = self
            .queue
            .enqueue(query_request, Priority::Low, cancel)
            .await?
            .into_result()?;

        let path = artifact_path(&self.export_dir, ReportFormat::Csv);
        let body = render_csv(&result);
        tokio::fs::create_dir_all(&self.export_dir).await?;
        tokio::fs::write(&path, body.as_bytes()).await?;
        debug!(path = %path.display(), rows = result.rows.len(), "report csv written");

        Ok(Artifact {
            path,
            size: body.len() as u64,
            format: ReportFormat::Csv,
        })
    }
}

#[async_trait]
impl ArtifactWriter for FileArtifactWriter {
    async fn write(
        &self,
        request: &ArtifactRequest,
        cancel: &CancellationToken,
    ) -> Result<Artifact, ReportError> {
        if request.resource_type == ResourceType::Query && request.format == ReportFormat::Csv {
            return self.write_query_csv(request, cancel).await;
        }
        match &self.external {
            Some(writer) => writer.write(request, cancel).await,
            None => Err(ReportError::Generation(format!(
                "no writer configured for {} {} reports",
                request.resource_type, request.format
            ))),
        }
    }
}

/// `report_<id8>.<ext>` under `dir`.
pub fn artifact_path(dir: &Path, format: ReportFormat) -> PathBuf {
    let id = Uuid::new_v4().simple().to_string();
    dir.join(format!("report_{}.{}", &id[..8], format.extension()))
}

pub fn render_csv(result: &QueryResult) -> String {
    let mut out = String::new();
    push_record(&mut out, result.columns.iter().map(String::as_str));
    for row in &result.rows {
        let cells: Vec<String> = result
            .columns
            .iter()
            .map(|c| row.get(c).map(cell_text).unwrap_or_default())
            .collect();
        push_record(&mut out, cells.iter().map(String::as_str));
    }
    out
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn push_record<'a>(out: &mut String, fields: impl Iterator<Item = &'a str>) {
    for (i, field) in fields.enumerate() {
        if i > 0 {
            out.push(',');
        }
        if field.contains([',', '"', '\n', '\r']) {
            out.push('"');
            out.push_str(&field.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(field);
        }
    }
    out.push_str("\r\n");
}
