//! Artifact generation through the admission queue, without a database.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cadence_core::config::QueueConfig;
use cadence_core::model::{
    Connection, ConnectionDirectory, ReportFormat, ReportRun, ResourceType, SavedQuery,
    ScheduledReport, SourceType,
};
use cadence_core::{CoreError, Row};
use cadence_queue::{AdmissionQueue, QueryExecutor, QueryRequest, QueryResult};
use cadence_server::reports::{
    Artifact, ArtifactRequest, ArtifactWriter, FileArtifactWriter, ReportError, ReportStore,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct Signups;

#[async_trait]
impl QueryExecutor for Signups {
    async fn execute(&self, request: &QueryRequest, _: &CancellationToken) -> QueryResult {
        assert_eq!(request.sql, "SELECT day, signups FROM daily_signups");
        let rows = [("2025-03-01", 42), ("2025-03-02", 57)]
            .into_iter()
            .map(|(day, n)| {
                let mut row = Row::new();
                row.insert("day".into(), json!(day));
                row.insert("signups".into(), json!(n));
                row
            })
            .collect();
        QueryResult::from_rows(vec!["day".into(), "signups".into()], rows, 48)
    }
}

struct Connections;

#[async_trait]
impl ConnectionDirectory for Connections {
    async fn get(&self, id: Uuid) -> Result<Connection, CoreError> {
        Ok(Connection {
            id,
            kind: SourceType::Postgres,
            host: "analytics.internal".into(),
            port: 5432,
            database: "analytics".into(),
            username: "reader".into(),
            password: String::new(),
            options: Value::Null,
        })
    }
}

/// Only saved-query lookups are served.
struct Queries;

#[async_trait]
impl ReportStore for Queries {
    async fn get_report(&self, id: Uuid) -> Result<ScheduledReport, ReportError> {
        Err(ReportError::NotFound(id))
    }

    async fn get_query(&self, id: Uuid) -> Result<SavedQuery, ReportError> {
        Ok(SavedQuery {
            id,
            connection_id: Uuid::new_v4(),
            sql: "SELECT day, signups FROM daily_signups".into(),
        })
    }

    async fn insert_run(&self, _: &ReportRun) -> Result<(), ReportError> {
        Ok(())
    }

    async fn finish_run(&self, _: &ReportRun, _: &ScheduledReport) -> Result<(), ReportError> {
        Ok(())
    }

    async fn expired_runs(&self, _: DateTime<Utc>) -> Result<Vec<ReportRun>, ReportError> {
        Ok(Vec::new())
    }

    async fn delete_runs(&self, _: &[Uuid]) -> Result<u64, ReportError> {
        Ok(0)
    }
}

#[derive(Default)]
struct Renderer {
    calls: AtomicUsize,
}

#[async_trait]
impl ArtifactWriter for Renderer {
    async fn write(
        &self,
        request: &ArtifactRequest,
        _: &CancellationToken,
    ) -> Result<Artifact, ReportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Artifact {
            path: format!("/renders/{}.{}", request.resource_id, request.format).into(),
            size: 2048,
            format: request.format,
        })
    }
}

fn writer(dir: &std::path::Path, shutdown: &CancellationToken) -> FileArtifactWriter {
    let queue = AdmissionQueue::new(Arc::new(Signups), &QueueConfig::default());
    queue.start(shutdown.clone());
    FileArtifactWriter::new(
        dir.join("exports"),
        queue,
        Arc::new(Connections),
        Arc::new(Queries),
    )
}

fn request(resource_type: ResourceType, format: ReportFormat) -> ArtifactRequest {
    ArtifactRequest {
        name: "Daily signups".into(),
        resource_type,
        resource_id: Uuid::new_v4().to_string(),
        format,
        options: Value::Null,
    }
}

#[tokio::test]
async fn query_report_is_written_as_csv() {
    let dir = tempfile::tempdir().unwrap();
    let shutdown = CancellationToken::new();
    let writer = writer(dir.path(), &shutdown);

    let artifact = writer
        .write(&request(ResourceType::Query, ReportFormat::Csv), &shutdown)
        .await
        .unwrap();

    assert_eq!(artifact.format, ReportFormat::Csv);
    assert!(artifact.path.starts_with(dir.path().join("exports")));
    let body = std::fs::read_to_string(&artifact.path).unwrap();
    assert_eq!(body, "day,signups\r\n2025-03-01,42\r\n2025-03-02,57\r\n");
    assert_eq!(artifact.size, body.len() as u64);
    shutdown.cancel();
}

#[tokio::test]
async fn other_formats_need_an_external_writer() {
    let dir = tempfile::tempdir().unwrap();
    let shutdown = CancellationToken::new();

    let err = writer(dir.path(), &shutdown)
        .write(&request(ResourceType::Dashboard, ReportFormat::Pdf), &shutdown)
        .await
        .unwrap_err();
    assert!(matches!(err, ReportError::Generation(_)));

    let renderer = Arc::new(Renderer::default());
    let writer = writer(dir.path(), &shutdown).with_external(renderer.clone());
    let artifact = writer
        .write(&request(ResourceType::Query, ReportFormat::Xlsx), &shutdown)
        .await
        .unwrap();
    assert_eq!(artifact.size, 2048);
    assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);
    shutdown.cancel();
}

#[tokio::test]
async fn cancelled_run_does_not_reach_the_source() {
    let dir = tempfile::tempdir().unwrap();
    let shutdown = CancellationToken::new();
    let writer = writer(dir.path(), &shutdown);

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let err = writer
        .write(&request(ResourceType::Query, ReportFormat::Csv), &cancelled)
        .await
        .unwrap_err();
    assert!(matches!(err, ReportError::Cancelled));
    assert!(!dir.path().join("exports").exists());
    shutdown.cancel();
}
