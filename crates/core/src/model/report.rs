//! Scheduled reports and their runs.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;
use crate::schedule::{ReportCadence, ScheduleKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Dashboard,
    Query,
}

text_enum!(ResourceType, "resource type", {
    Dashboard => "dashboard",
    Query => "query",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Pdf,
    Csv,
    Xlsx,
    Png,
}

text_enum!(ReportFormat, "report format", {
    Pdf => "pdf",
    Csv => "csv",
    Xlsx => "xlsx",
    Png => "png",
});

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        self.as_str()
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ReportFormat::Pdf => "application/pdf",
            ReportFormat::Csv => "text/csv",
            ReportFormat::Xlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
            ReportFormat::Png => "image/png",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientRole {
    #[default]
    To,
    Cc,
    Bcc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub email: String,
    #[serde(default)]
    pub role: RecipientRole,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScheduledReport {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub owner: String,
    #[sqlx(try_from = "String")]
    pub resource_type: ResourceType,
    pub resource_id: String,
    #[sqlx(try_from = "String")]
    pub schedule_kind: ScheduleKind,
    pub time_of_day: Option<String>,
    pub day_of_week: Option<i32>,
    pub day_of_month: Option<i32>,
    pub cron: Option<String>,
    pub timezone: String,
    #[sqlx(try_from = "String")]
    pub format: ReportFormat,
    pub options: serde_json::Value,
    pub subject: Option<String>,
    pub message: Option<String>,
    #[sqlx(json)]
    pub recipients: Vec<Recipient>,
    pub is_active: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_status: Option<String>,
    pub last_run_error: Option<String>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub success_count: i32,
    pub failure_count: i32,
    pub consecutive_failures: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledReport {
    pub fn cadence(&self) -> Result<ReportCadence, CoreError> {
        ReportCadence::from_parts(
            self.schedule_kind,
            self.time_of_day.as_deref(),
            self.day_of_week,
            self.day_of_month,
            self.cron.as_deref(),
        )
    }

    pub fn next_run_after(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, CoreError> {
        self.cadence()?.next_run(&self.timezone, now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportRunStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

text_enum!(ReportRunStatus, "report run status", {
    Pending => "pending",
    Running => "running",
    Success => "success",
    Failed => "failed",
    Cancelled => "cancelled",
});

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReportRun {
    pub id: Uuid,
    pub report_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    #[sqlx(try_from = "String")]
    pub status: ReportRunStatus,
    pub file_path: Option<String>,
    pub file_size: Option<i64>,
    pub file_type: Option<String>,
    pub error: Option<String>,
    #[sqlx(json)]
    pub sent_to: Vec<String>,
    #[sqlx(json)]
    pub per_recipient_status: BTreeMap<String, String>,
    pub triggered_by: Option<String>,
}
