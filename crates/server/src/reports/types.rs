use cadence_core::model::{Recipient, ReportRunStatus};
use cadence_core::{CoreError, ErrorKind, ValidationResult, CANCELLED_MESSAGE};
use cadence_queue::QueueError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("scheduled report not found")]
    NotFound(Uuid),

    #[error("scheduled report is not active")]
    Inactive,

    #[error("validation failed: {0}")]
    Validation(ValidationResult),

    #[error("report generation failed: {0}")]
    Generation(String),

    #[error("{0}")]
    Delivery(String),

    #[error("{}", CANCELLED_MESSAGE)]
    Cancelled,

    #[error("store error: {0}")]
    Store(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReportError::NotFound(_) => ErrorKind::NotFound,
            ReportError::Inactive | ReportError::Validation(_) => ErrorKind::Configuration,
            ReportError::Generation(_) => ErrorKind::Evaluation,
            ReportError::Delivery(_) | ReportError::Store(_) | ReportError::Io(_) => {
                ErrorKind::Dependency
            }
            ReportError::Cancelled => ErrorKind::Cancellation,
        }
    }
}

impl From<sqlx::Error> for ReportError {
    fn from(e: sqlx::Error) -> Self {
        ReportError::Store(e.to_string())
    }
}

impl From<CoreError> for ReportError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::Database(db) => ReportError::Store(db.to_string()),
            CoreError::ConnectionNotFound(_) => ReportError::Generation(e.to_string()),
            other => {
                let mut result = ValidationResult::new();
                result.error("schedule", other.to_string());
                ReportError::Validation(result)
            }
        }
    }
}

impl From<QueueError> for ReportError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Cancelled => ReportError::Cancelled,
            other => ReportError::Generation(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateReportRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub resource_type: String,
    pub resource_id: String,
    pub schedule_kind: String,
    #[serde(default)]
    pub time_of_day: Option<String>,
    #[serde(default)]
    pub day_of_week: Option<i32>,
    #[serde(default)]
    pub day_of_month: Option<i32>,
    #[serde(default)]
    pub cron: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default)]
    pub options: Value,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub recipients: Vec<Recipient>,
}

fn default_format() -> String {
    "pdf".to_string()
}

/// Partial update; schedule fields are re-validated together.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateReportRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub schedule_kind: Option<String>,
    pub time_of_day: Option<String>,
    pub day_of_week: Option<i32>,
    pub day_of_month: Option<i32>,
    pub cron: Option<String>,
    pub timezone: Option<String>,
    pub format: Option<String>,
    pub options: Option<Value>,
    pub subject: Option<String>,
    pub message: Option<String>,
    pub recipients: Option<Vec<Recipient>>,
}

impl UpdateReportRequest {
    pub fn touches_schedule(&self) -> bool {
        self.schedule_kind.is_some()
            || self.time_of_day.is_some()
            || self.day_of_week.is_some()
            || self.day_of_month.is_some()
            || self.cron.is_some()
            || self.timezone.is_some()
    }
}

/// Returned as soon as a run has been created; generation continues in
/// the background.
#[derive(Debug, Clone, Serialize)]
pub struct TriggerResponse {
    pub run_id: Uuid,
    pub status: ReportRunStatus,
    pub message: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewRequest {
    pub resource_type: String,
    pub resource_id: String,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default)]
    pub options: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreviewResponse {
    pub preview_url: String,
    pub file_size: u64,
    pub expires_at: DateTime<Utc>,
}
