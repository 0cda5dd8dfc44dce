//! Report runs: generate the artifact, hand it to delivery, record the
//! outcome on the run and the report.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cadence_core::config::ReportConfig;
use cadence_core::model::{ReportFormat, ReportRun, ReportRunStatus, ResourceType, ScheduledReport};
use cadence_core::{AuditSink, ValidationResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::artifact::{ArtifactRequest, ArtifactWriter};
use super::delivery::{build_intent, Outbox};
use super::store::ReportStore;
use super::types::{PreviewRequest, PreviewResponse, ReportError, TriggerResponse};


/// Files and rows removed by a cleanup pass.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct CleanupSummary {
    pub runs_deleted: u64,
    pub files_removed: u64,
}

pub struct ReportRunner {
    store: Arc<dyn ReportStore>,
    writer: Arc<dyn ArtifactWriter>,
    outbox: Outbox,
    config: ReportConfig,
    timeout: Duration,
    audit: Arc<dyn AuditSink>,
}

impl ReportRunner {
    pub fn new(
        store: Arc<dyn ReportStore>,
        writer: Arc<dyn ArtifactWriter>,
        outbox: Outbox,
        config: ReportConfig,
        timeout: Duration,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            writer,
            outbox,
            config,
            timeout,
            audit,
        }
    }

    /// Create a `running` run and generate it in the background.
    pub async fn spawn_run(
        self: &Arc<Self>,
        report_id: Uuid,
        triggered_by: &str,
        parent: &CancellationToken,
    ) -> Result<(TriggerResponse, JoinHandle<ReportRun>), ReportError> {
        let report = self.store.get_report(report_id).await?;
        if !report.is_active {
            return Err(ReportError::Inactive);
        }

        let run = ReportRun {
            id: Uuid::new_v4(),
            report_id,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: None,
            status: ReportRunStatus::Running,
            file_path: None,
            file_size: None,
            file_type: None,
            error: None,
            sent_to: Vec::new(),
            per_recipient_status: BTreeMap::new(),
            triggered_by: Some(triggered_by.to_string()),
        };
        self.store.insert_run(&run).await?;
        self.audit.record(
            "report.triggered",
            &json!({"report_id": report_id, "run_id": run.id, "triggered_by": triggered_by}),
        );

        let response = TriggerResponse {
            run_id: run.id,
            status: run.status,
            message: "Report generation started".to_string(),
            started_at: run.started_at,
        };
        let runner = self.clone();
        let cancel = parent.child_token();
        let handle = tokio::spawn(async move { runner.complete(report, run, cancel).await });
        Ok((response, handle))
    }

    async fn complete(
        &self,
        mut report: ScheduledReport,
        mut run: ReportRun,
        cancel: CancellationToken,
    ) -> ReportRun {
        let started = Instant::now();
        let outcome = {
            let work = self.generate_and_send(&report, &mut run, &cancel);
            tokio::select! {
                _ = cancel.cancelled() => Err(ReportError::Cancelled),
                r = tokio::time::timeout(self.timeout, work) => {
                    r.unwrap_or(Err(ReportError::Cancelled))
                }
            }
        };
        cancel.cancel();

        let now = Utc::now();
        run.finished_at = Some(now);
        run.duration_ms = Some(started.elapsed().as_millis() as i64);
        match outcome {
            Ok(()) => {
                run.status = ReportRunStatus::Success;
                info!(
                    report_id = %report.id,
                    run_id = %run.id,
                    recipients = run.sent_to.len(),
                    duration_ms = run.duration_ms,
                    "report run succeeded"
                );
            }
            Err(e) => {
                run.status = ReportRunStatus::Failed;
                run.error = Some(e.to_string());
                warn!(report_id = %report.id, run_id = %run.id, error = %e, "report run failed");
            }
        }

        apply_outcome(&mut report, &run, now);
        if let Err(e) = self.store.finish_run(&run, &report).await {
            warn!(report_id = %report.id, run_id = %run.id, error = %e, "failed to record report run");
        }
        run
    }

    async fn generate_and_send(
        &self,
        report: &ScheduledReport,
        run: &mut ReportRun,
        cancel: &CancellationToken,
    ) -> Result<(), ReportError> {
        let artifact = self
            .writer
            .write(&ArtifactRequest::for_report(report), cancel)
            .await?;
        run.file_path = Some(artifact.path.display().to_string());
        run.file_size = Some(artifact.size as i64);
        run.file_type = Some(artifact.format.as_str().to_string());

        let intent = build_intent(report, run.id, &artifact, &self.config.base_url)?;
        let recipients: Vec<String> = intent.recipients().cloned().collect();
        self.outbox.send(intent).await?;

        run.per_recipient_status = recipients
            .iter()
            .map(|r| (r.clone(), "sent".to_string()))
            .collect();
        run.sent_to = recipients;
        Ok(())
    }

    /// Generate an artifact without creating a run.
    pub async fn preview(
        &self,
        req: &PreviewRequest,
        parent: &CancellationToken,
    ) -> Result<PreviewResponse, ReportError> {
        let mut invalid = ValidationResult::new();
        let resource_type = req.resource_type.parse::<ResourceType>().ok();
        if resource_type.is_none() {
            invalid.error("resource_type", format!("unsupported resource type '{}'", req.resource_type));
        }
        let format = req.format.parse::<ReportFormat>().ok();
        if format.is_none() {
            invalid.error("format", format!("unsupported format '{}'", req.format));
        }
        let (Some(resource_type), Some(format)) = (resource_type, format) else {
            return Err(ReportError::Validation(invalid));
        };

        let request = ArtifactRequest {
            name: "Preview".to_string(),
            resource_type,
            resource_id: req.resource_id.clone(),
            format,
            options: req.options.clone(),
        };
        let cancel = parent.child_token();
        let artifact = tokio::time::timeout(self.timeout, self.writer.write(&request, &cancel))
            .await
            .unwrap_or(Err(ReportError::Cancelled));
        cancel.cancel();
        let artifact = artifact?;

        let now = Utc::now();
        Ok(PreviewResponse {
            preview_url: format!(
                "{}/api/scheduled-reports/preview/{}?file={}",
                self.config.base_url.trim_end_matches('/'),
                Uuid::new_v4(),
                artifact.path.display()
            ),
            file_size: artifact.size,
            expires_at: now + chrono::Duration::hours(1),
        })
    }

    /// Delete finished runs older than `retention_days` and their files.
    pub async fn cleanup(
        &self,
        now: DateTime<Utc>,
        retention_days: u32,
    ) -> Result<CleanupSummary, ReportError> {
        let cutoff = now - chrono::Duration::days(i64::from(retention_days));
        let expired = self.store.expired_runs(cutoff).await?;
        if expired.is_empty() {
            return Ok(CleanupSummary::default());
        }

        let mut summary = CleanupSummary::default();
        for path in expired.iter().filter_map(|r| r.file_path.as_deref()) {
            match tokio::fs::remove_file(path).await {
                Ok(()) => summary.files_removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path, "report file already gone");
                }
                Err(e) => warn!(path, error = %e, "failed to remove report file"),
            }
        }
        let ids: Vec<Uuid> = expired.iter().map(|r| r.id).collect();
        summary.runs_deleted = self.store.delete_runs(&ids).await?;
        info!(
            runs = summary.runs_deleted,
            files = summary.files_removed,
            %cutoff,
            "old report runs cleaned up"
        );
        Ok(summary)
    }
}

/// Fold a finished run into the report's run columns and advance
/// `next_run_at`.
pub fn apply_outcome(report: &mut ScheduledReport, run: &ReportRun, now: DateTime<Utc>) {
    report.last_run_at = Some(now);
    report.updated_at = now;
    match run.status {
        ReportRunStatus::Success => {
            report.last_run_status = Some(ReportRunStatus::Success.as_str().to_string());
            report.last_run_error = None;
            report.success_count += 1;
            report.consecutive_failures = 0;
        }
        _ => {
            report.last_run_status = Some(ReportRunStatus::Failed.as_str().to_string());
            report.last_run_error = run.error.clone();
            report.failure_count += 1;
            report.consecutive_failures += 1;
        }
    }
    report.next_run_at = Some(next_run_or_tomorrow(report, now));
}

/// A stored cadence that no longer parses retries a day later instead of
/// becoming due on every tick.
pub(crate) fn next_run_or_tomorrow(report: &ScheduledReport, now: DateTime<Utc>) -> DateTime<Utc> {
    report.next_run_after(now).unwrap_or_else(|e| {
        warn!(report_id = %report.id, error = %e, "invalid report cadence, retrying tomorrow");
        now + chrono::Duration::days(1)
    })
}
