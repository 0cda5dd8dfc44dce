//! Persistence for scheduled reports and their runs.

use async_trait::async_trait;
use cadence_core::model::{ReportRun, SavedQuery, ScheduledReport};
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::types::ReportError;
use crate::directory::find_saved_query;

/// What the report runner reads and writes.
#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn get_report(&self, id: Uuid) -> Result<ScheduledReport, ReportError>;

    async fn get_query(&self, id: Uuid) -> Result<SavedQuery, ReportError>;

    async fn insert_run(&self, run: &ReportRun) -> Result<(), ReportError>;

    /// Write the finished run and the report's run columns (`last_run_*`,
    /// counters, `next_run_at`) in one transaction.
    async fn finish_run(&self, run: &ReportRun, report: &ScheduledReport)
        -> Result<(), ReportError>;

    /// Finished (`success` / `failed`) runs started before `cutoff`.
    async fn expired_runs(&self, cutoff: DateTime<Utc>) -> Result<Vec<ReportRun>, ReportError>;

    async fn delete_runs(&self, ids: &[Uuid]) -> Result<u64, ReportError>;
}

const REPORT_COLUMNS: &str = "id, name, description, owner, resource_type, resource_id, \
    schedule_kind, time_of_day, day_of_week, day_of_month, cron, timezone, format, options, \
    subject, message, recipients, is_active, last_run_at, last_run_status, last_run_error, \
    next_run_at, success_count, failure_count, consecutive_failures, created_at, updated_at";

const RUN_COLUMNS: &str = "id, report_id, started_at, finished_at, duration_ms, status, \
    file_path, file_size, file_type, error, sent_to, per_recipient_status, triggered_by";

#[derive(Clone)]
pub struct PgReportStore {
    pool: PgPool,
}

impl PgReportStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, r: &ScheduledReport) -> Result<(), ReportError> {
        sqlx::query(
            "INSERT INTO scheduled_reports (id, name, description, owner, resource_type, \
             resource_id, schedule_kind, time_of_day, day_of_week, day_of_month, cron, timezone, \
             format, options, subject, message, recipients, is_active, next_run_at, created_at, \
             updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, \
             $15, $16, $17, $18, $19, $20, $21)",
        )
        .bind(r.id)
        .bind(&r.name)
        .bind(&r.description)
        .bind(&r.owner)
        .bind(r.resource_type.as_str())
        .bind(&r.resource_id)
        .bind(r.schedule_kind.as_str())
        .bind(&r.time_of_day)
        .bind(r.day_of_week)
        .bind(r.day_of_month)
        .bind(&r.cron)
        .bind(&r.timezone)
        .bind(r.format.as_str())
        .bind(&r.options)
        .bind(&r.subject)
        .bind(&r.message)
        .bind(Json(&r.recipients))
        .bind(r.is_active)
        .bind(r.next_run_at)
        .bind(r.created_at)
        .bind(r.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update(&self, r: &ScheduledReport) -> Result<(), ReportError> {
        let result = sqlx::query(
            "UPDATE scheduled_reports SET name = $2, description = $3, resource_type = $4, \
             resource_id = $5, schedule_kind = $6, time_of_day = $7, day_of_week = $8, \
             day_of_month = $9, cron = $10, timezone = $11, format = $12, options = $13, \
             subject = $14, message = $15, recipients = $16, next_run_at = $17, updated_at = $18 \
             WHERE id = $1",
        )
        .bind(r.id)
        .bind(&r.name)
        .bind(&r.description)
        .bind(r.resource_type.as_str())
        .bind(&r.resource_id)
        .bind(r.schedule_kind.as_str())
        .bind(&r.time_of_day)
        .bind(r.day_of_week)
        .bind(r.day_of_month)
        .bind(&r.cron)
        .bind(&r.timezone)
        .bind(r.format.as_str())
        .bind(&r.options)
        .bind(&r.subject)
        .bind(&r.message)
        .bind(Json(&r.recipients))
        .bind(r.next_run_at)
        .bind(r.updated_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ReportError::NotFound(r.id));
        }
        Ok(())
    }

    pub async fn delete(&self, id: Uuid, owner: &str) -> Result<(), ReportError> {
        let result = sqlx::query("DELETE FROM scheduled_reports WHERE id = $1 AND owner = $2")
            .bind(id)
            .bind(owner)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ReportError::NotFound(id));
        }
        Ok(())
    }

    pub async fn list(&self, owner: &str) -> Result<Vec<ScheduledReport>, ReportError> {
        let rows = sqlx::query_as::<_, ScheduledReport>(&format!(
            "SELECT {REPORT_COLUMNS} FROM scheduled_reports WHERE owner = $1 ORDER BY created_at DESC"
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Runs of one report, newest first, plus the total count.
    pub async fn list_runs(
        &self,
        report_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ReportRun>, i64), ReportError> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM scheduled_report_runs WHERE report_id = $1")
                .bind(report_id)
                .fetch_one(&self.pool)
                .await?;
        let rows = sqlx::query_as::<_, ReportRun>(&format!(
            "SELECT {RUN_COLUMNS} FROM scheduled_report_runs WHERE report_id = $1 \
             ORDER BY started_at DESC LIMIT $2 OFFSET $3"
        ))
        .bind(report_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok((rows, total))
    }

    pub async fn get_run(&self, run_id: Uuid) -> Result<Option<ReportRun>, ReportError> {
        let run = sqlx::query_as::<_, ReportRun>(&format!(
            "SELECT {RUN_COLUMNS} FROM scheduled_report_runs WHERE id = $1"
        ))
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(run)
    }

    pub async fn set_active(
        &self,
        id: Uuid,
        active: bool,
        next_run_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), ReportError> {
        let result = sqlx::query(
            "UPDATE scheduled_reports SET is_active = $2, next_run_at = $3, updated_at = $4 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(active)
        .bind(next_run_at)
        .bind(now)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ReportError::NotFound(id));
        }
        Ok(())
    }

    pub async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, ReportError> {
        let ids = sqlx::query_scalar(
            "SELECT id FROM scheduled_reports WHERE is_active \
             AND (next_run_at IS NULL OR next_run_at <= $1) ORDER BY next_run_at ASC NULLS FIRST",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}

#[async_trait]
impl ReportStore for PgReportStore {
    async fn get_report(&self, id: Uuid) -> Result<ScheduledReport, ReportError> {
        sqlx::query_as::<_, ScheduledReport>(&format!(
            "SELECT {REPORT_COLUMNS} FROM scheduled_reports WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ReportError::NotFound(id))
    }

    async fn get_query(&self, id: Uuid) -> Result<SavedQuery, ReportError> {
        find_saved_query(&self.pool, id)
            .await?
            .ok_or_else(|| ReportError::Generation(format!("saved query not found: {id}")))
    }

    async fn insert_run(&self, run: &ReportRun) -> Result<(), ReportError> {
        sqlx::query(
            "INSERT INTO scheduled_report_runs (id, report_id, started_at, status, triggered_by) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(run.id)
        .bind(run.report_id)
        .bind(run.started_at)
        .bind(run.status.as_str())
        .bind(&run.triggered_by)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn finish_run(
        &self,
        run: &ReportRun,
        report: &ScheduledReport,
    ) -> Result<(), ReportError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE scheduled_report_runs SET finished_at = $2, duration_ms = $3, status = $4, \
             file_path = $5, file_size = $6, file_type = $7, error = $8, sent_to = $9, \
             per_recipient_status = $10 WHERE id = $1",
        )
        .bind(run.id)
        .bind(run.finished_at)
        .bind(run.duration_ms)
        .bind(run.status.as_str())
        .bind(&run.file_path)
        .bind(run.file_size)
        .bind(&run.file_type)
        .bind(&run.error)
        .bind(Json(&run.sent_to))
        .bind(Json(&run.per_recipient_status))
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE scheduled_reports SET last_run_at = $2, last_run_status = $3, \
             last_run_error = $4, success_count = $5, failure_count = $6, \
             consecutive_failures = $7, next_run_at = $8, updated_at = $9 WHERE id = $1",
        )
        .bind(report.id)
        .bind(report.last_run_at)
        .bind(&report.last_run_status)
        .bind(&report.last_run_error)
        .bind(report.success_count)
        .bind(report.failure_count)
        .bind(report.consecutive_failures)
        .bind(report.next_run_at)
        .bind(report.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn expired_runs(&self, cutoff: DateTime<Utc>) -> Result<Vec<ReportRun>, ReportError> {
        let rows = sqlx::query_as::<_, ReportRun>(&format!(
            "SELECT {RUN_COLUMNS} FROM scheduled_report_runs \
             WHERE status IN ('success', 'failed') AND started_at < $1"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn delete_runs(&self, ids: &[Uuid]) -> Result<u64, ReportError> {
        let result = sqlx::query("DELETE FROM scheduled_report_runs WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
