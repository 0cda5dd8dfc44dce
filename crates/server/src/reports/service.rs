//! Scheduled report CRUD, manual triggers and the due-report job.

use std::sync::Arc;

use cadence_core::model::{ReportRun, ScheduledReport};
use cadence_core::schedule::{ScheduleKind, TimeOfDay};
use cadence_core::{AuditSink, ValidationResult};
use cadence_rules::request::page_window;
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::runner::{CleanupSummary, ReportRunner};
use super::store::{PgReportStore, ReportStore};
use super::types::{
    CreateReportRequest, PreviewRequest, PreviewResponse, ReportError, TriggerResponse,
    UpdateReportRequest,
};
use super::validation::{validate_create, validate_update};
use crate::inflight::InFlight;
use crate::page::Page;

pub struct ReportService {
    store: Arc<PgReportStore>,
    runner: Arc<ReportRunner>,
    retention_days: u32,
    audit: Arc<dyn AuditSink>,
}

impl ReportService {
    pub fn new(
        store: Arc<PgReportStore>,
        runner: Arc<ReportRunner>,
        retention_days: u32,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            runner,
            retention_days,
            audit,
        }
    }

    // ── CRUD ────────────────────────────────────────────────────────

    pub async fn create_report(
        &self,
        owner: &str,
        req: CreateReportRequest,
    ) -> Result<ScheduledReport, ReportError> {
        let report = build_report(owner, req, Utc::now())?;
        self.store.insert(&report).await?;
        info!(report_id = %report.id, name = %report.name, next_run_at = ?report.next_run_at, "scheduled report created");
        self.audit.record("report.created", &json!({"report_id": report.id, "owner": owner}));
        Ok(report)
    }

    pub async fn update_report(
        &self,
        id: Uuid,
        owner: &str,
        req: UpdateReportRequest,
    ) -> Result<ScheduledReport, ReportError> {
        let mut report = self.get_report(id, owner).await?;
        apply_update(&mut report, req, Utc::now())?;
        self.store.update(&report).await?;
        self.audit.record("report.updated", &json!({"report_id": id, "owner": owner}));
        Ok(report)
    }

    pub async fn delete_report(&self, id: Uuid, owner: &str) -> Result<(), ReportError> {
        self.store.delete(id, owner).await?;
        info!(report_id = %id, "scheduled report deleted");
        self.audit.record("report.deleted", &json!({"report_id": id, "owner": owner}));
        Ok(())
    }

    pub async fn get_report(&self, id: Uuid, owner: &str) -> Result<ScheduledReport, ReportError> {
        let report = self.store.get_report(id).await?;
        if report.owner != owner {
            return Err(ReportError::NotFound(id));
        }
        Ok(report)
    }

    pub async fn list_reports(&self, owner: &str) -> Result<Vec<ScheduledReport>, ReportError> {
        self.store.list(owner).await
    }

    pub async fn list_report_runs(
        &self,
        report_id: Uuid,
        owner: &str,
        page: Option<i64>,
        page_size: Option<i64>,
    ) -> Result<Page<ReportRun>, ReportError> {
        self.get_report(report_id, owner).await?;
        let (limit, offset) = page_window(page, page_size);
        let (items, total) = self.store.list_runs(report_id, limit, offset).await?;
        Ok(Page {
            items,
            total,
            limit,
            offset,
        })
    }

    pub async fn get_report_run(&self, run_id: Uuid) -> Result<Option<ReportRun>, ReportError> {
        self.store.get_run(run_id).await
    }

    /// Flip `is_active`. Activation schedules the next run from now,
    /// deactivation clears it.
    pub async fn toggle_report_active(
        &self,
        id: Uuid,
        owner: &str,
    ) -> Result<ScheduledReport, ReportError> {
        let mut report = self.get_report(id, owner).await?;
        toggle(&mut report, Utc::now())?;
        self.store
            .set_active(id, report.is_active, report.next_run_at, report.updated_at)
            .await?;
        info!(report_id = %id, active = report.is_active, "scheduled report toggled");
        self.audit.record(
            "report.toggled",
            &json!({"report_id": id, "owner": owner, "is_active": report.is_active}),
        );
        Ok(report)
    }

    // ── Runs ────────────────────────────────────────────────────────

    /// Start a run and return as soon as it is recorded.
    pub async fn execute_scheduled_report(
        &self,
        id: Uuid,
        triggered_by: &str,
        parent: &CancellationToken,
    ) -> Result<TriggerResponse, ReportError> {
        let (response, _handle) = self.runner.spawn_run(id, triggered_by, parent).await?;
        Ok(response)
    }

    /// Start a run and wait for it to finish.
    pub async fn run_scheduled_report(
        &self,
        id: Uuid,
        triggered_by: &str,
        parent: &CancellationToken,
    ) -> Result<ReportRun, ReportError> {
        let (_, handle) = self.runner.spawn_run(id, triggered_by, parent).await?;
        handle
            .await
            .map_err(|e| ReportError::Generation(format!("report task failed: {e}")))
    }

    pub async fn preview_report(
        &self,
        req: &PreviewRequest,
        parent: &CancellationToken,
    ) -> Result<PreviewResponse, ReportError> {
        self.runner.preview(req, parent).await
    }

    pub async fn cleanup_old_reports(
        &self,
        now: DateTime<Utc>,
    ) -> Result<CleanupSummary, ReportError> {
        self.runner.cleanup(now, self.retention_days).await
    }

    /// Start every due report not already running. Returns how many runs
    /// were started.
    pub async fn process_due_reports(
        &self,
        now: DateTime<Utc>,
        guard: &InFlight,
        parent: &CancellationToken,
    ) -> Result<usize, ReportError> {
        let due = self.store.find_due(now).await?;
        let mut started = 0;
        for id in due {
            let Some(claim) = guard.claim(id) else {
                debug!(report_id = %id, "report still running, skipping");
                continue;
            };
            match self.runner.spawn_run(id, "scheduler", parent).await {
                Ok((response, handle)) => {
                    debug!(report_id = %id, run_id = %response.run_id, "scheduled report started");
                    tokio::spawn(async move {
                        let _claim = claim;
                        if let Err(e) = handle.await {
                            warn!(category = "cron_scheduled_reports", report_id = %id, error = %e, "report task panicked");
                        }
                    });
                    started += 1;
                }
                Err(e) => warn!(
                    category = "cron_scheduled_reports",
                    report_id = %id,
                    kind = %e.kind(),
                    error = %e,
                    "failed to start scheduled report"
                ),
            }
        }
        Ok(started)
    }
}

// ── Pure helpers ────────────────────────────────────────────────────

fn validation(result: ValidationResult) -> Result<(), ReportError> {
    if result.valid {
        Ok(())
    } else {
        Err(ReportError::Validation(result))
    }
}

fn timezone_or_utc(tz: Option<String>) -> String {
    tz.map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "UTC".to_string())
}

/// Wall-clock kinds keep a normalised `HH:MM` (09:00 when unset); cron
/// reports carry none.
fn normalized_time(kind: ScheduleKind, raw: Option<&str>) -> Result<Option<String>, ReportError> {
    if kind == ScheduleKind::Cron {
        return Ok(None);
    }
    Ok(Some(TimeOfDay::parse(raw)?.to_string()))
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

pub fn build_report(
    owner: &str,
    req: CreateReportRequest,
    now: DateTime<Utc>,
) -> Result<ScheduledReport, ReportError> {
    validation(validate_create(&req))?;

    let schedule_kind: ScheduleKind = req.schedule_kind.parse()?;
    let mut report = ScheduledReport {
        id: Uuid::new_v4(),
        name: req.name.trim().to_string(),
        description: req.description,
        owner: owner.to_string(),
        resource_type: req.resource_type.parse()?,
        resource_id: req.resource_id.trim().to_string(),
        schedule_kind,
        time_of_day: normalized_time(schedule_kind, req.time_of_day.as_deref())?,
        day_of_week: req.day_of_week,
        day_of_month: req.day_of_month,
        cron: non_empty(req.cron),
        timezone: timezone_or_utc(req.timezone),
        format: req.format.parse()?,
        options: req.options,
        subject: non_empty(req.subject),
        message: non_empty(req.message),
        recipients: req
            .recipients
            .into_iter()
            .map(|mut r| {
                r.email = r.email.trim().to_string();
                r
            })
            .collect(),
        is_active: true,
        last_run_at: None,
        last_run_status: None,
        last_run_error: None,
        next_run_at: None,
        success_count: 0,
        failure_count: 0,
        consecutive_failures: 0,
        created_at: now,
        updated_at: now,
    };
    report.next_run_at = Some(report.next_run_after(now)?);
    Ok(report)
}

/// Apply a partial update in place. A changed cadence is validated as a
/// whole and reschedules an active report.
pub fn apply_update(
    report: &mut ScheduledReport,
    req: UpdateReportRequest,
    now: DateTime<Utc>,
) -> Result<(), ReportError> {
    validation(validate_update(&req))?;
    let reschedule = req.touches_schedule();

    if let Some(name) = req.name {
        report.name = name.trim().to_string();
    }
    if let Some(description) = req.description {
        report.description = Some(description);
    }
    if let Some(resource_type) = req.resource_type {
        report.resource_type = resource_type.parse()?;
    }
    if let Some(resource_id) = req.resource_id {
        report.resource_id = resource_id.trim().to_string();
    }
    if let Some(kind) = req.schedule_kind {
        report.schedule_kind = kind.parse()?;
    }
    if req.time_of_day.is_some() {
        report.time_of_day = req.time_of_day;
    }
    if req.day_of_week.is_some() {
        report.day_of_week = req.day_of_week;
    }
    if req.day_of_month.is_some() {
        report.day_of_month = req.day_of_month;
    }
    if req.cron.is_some() {
        report.cron = non_empty(req.cron);
    }
    if let Some(tz) = req.timezone {
        report.timezone = timezone_or_utc(Some(tz));
    }
    if let Some(format) = req.format {
        report.format = format.parse()?;
    }
    if let Some(options) = req.options {
        report.options = options;
    }
    if req.subject.is_some() {
        report.subject = non_empty(req.subject);
    }
    if req.message.is_some() {
        report.message = non_empty(req.message);
    }
    if let Some(recipients) = req.recipients {
        report.recipients = recipients;
    }

    if reschedule {
        report.time_of_day =
            normalized_time(report.schedule_kind, report.time_of_day.as_deref())?;
        report.cadence()?;
        if report.is_active {
            report.next_run_at = Some(report.next_run_after(now)?);
        }
    }
    report.updated_at = now;
    Ok(())
}

pub fn toggle(report: &mut ScheduledReport, now: DateTime<Utc>) -> Result<(), ReportError> {
    if report.is_active {
        report.is_active = false;
        report.next_run_at = None;
    } else {
        report.next_run_at = Some(report.next_run_after(now)?);
        report.is_active = true;
    }
    report.updated_at = now;
    Ok(())
}
