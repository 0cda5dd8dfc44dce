//! Pipelines, their runs, and run logs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Row limit used when a pipeline stores zero or a negative value.
pub const DEFAULT_ROW_LIMIT: i64 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceType {
    Postgres,
    Mysql,
}

text_enum!(SourceType, "source type", {
    Postgres => "POSTGRES",
    Mysql => "MYSQL",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DestinationType {
    InternalRaw,
    Postgres,
    Mysql,
}

text_enum!(DestinationType, "destination type", {
    InternalRaw => "INTERNAL_RAW",
    Postgres => "POSTGRES",
    Mysql => "MYSQL",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WriteMode {
    #[default]
    Append,
    Overwrite,
}

/// Inline source credentials and query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

impl SourceConfig {
    pub fn has_host(&self) -> bool {
        self.host.as_deref().is_some_and(|h| !h.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DestinationConfig {
    /// Required for external POSTGRES / MYSQL destinations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,
    #[serde(default)]
    pub write_mode: WriteMode,
}

/// One ordered transform. `step_type` is free text: unknown types are
/// passed through at run time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformStep {
    pub order: i32,
    #[serde(rename = "type")]
    pub step_type: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityRuleType {
    NotNull,
    Unique,
    Range,
    Regex,
}

text_enum!(QualityRuleType, "quality rule type", {
    NotNull => "NOT_NULL",
    Unique => "UNIQUE",
    Range => "RANGE",
    Regex => "REGEX",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuleSeverity {
    #[default]
    Warn,
    Fail,
}

text_enum!(RuleSeverity, "rule severity", {
    Warn => "WARN",
    Fail => "FAIL",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityRule {
    pub id: String,
    pub column: String,
    pub rule_type: QualityRuleType,
    /// RANGE: `{"min": .., "max": ..}`; REGEX: the pattern string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub severity: RuleSeverity,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Pipeline {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub owner: String,
    #[sqlx(try_from = "String")]
    pub source_type: SourceType,
    #[sqlx(json)]
    pub source_config: SourceConfig,
    pub connection_ref: Option<Uuid>,
    pub source_query: Option<String>,
    #[sqlx(try_from = "String")]
    pub destination_type: DestinationType,
    #[sqlx(json)]
    pub destination_config: DestinationConfig,
    #[sqlx(json)]
    pub transformation_steps: Vec<TransformStep>,
    #[sqlx(json)]
    pub quality_rules: Vec<QualityRule>,
    pub row_limit: i64,
    pub schedule: Option<String>,
    pub timezone: String,
    pub is_active: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_status: Option<String>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Pipeline {
    pub fn effective_row_limit(&self) -> i64 {
        if self.row_limit <= 0 {
            DEFAULT_ROW_LIMIT
        } else {
            self.row_limit
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Processing,
    Extracting,
    Transforming,
    Loading,
    Completed,
    Failed,
    Cancelled,
}

text_enum!(RunStatus, "run status", {
    Processing => "PROCESSING",
    Extracting => "EXTRACTING",
    Transforming => "TRANSFORMING",
    Loading => "LOADING",
    Completed => "COMPLETED",
    Failed => "FAILED",
    Cancelled => "CANCELLED",
});

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub step: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// One invocation of a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PipelineRun {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    #[sqlx(try_from = "String")]
    pub status: RunStatus,
    pub progress: i32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub rows_processed: i64,
    pub bytes_processed: i64,
    pub quality_violations: i32,
    pub error: Option<String>,
    #[sqlx(json)]
    pub logs: Vec<ExecutionLog>,
}
