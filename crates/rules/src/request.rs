//! Request and response shapes for the alert service.

use cadence_core::model::{AlertState, Severity};
use cadence_core::Row;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelRequest {
    /// Validated against the channel type vocabulary.
    pub channel_type: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub config: Value,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAlertRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub query_id: Uuid,
    #[serde(alias = "column")]
    pub target_column: String,
    pub operator: String,
    pub threshold: f64,
    pub schedule: String,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub cooldown_minutes: Option<i32>,
    #[serde(default)]
    pub channels: Vec<ChannelRequest>,
}

/// Partial update; `None` leaves the field as it is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateAlertRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub query_id: Option<Uuid>,
    #[serde(alias = "column")]
    pub target_column: Option<String>,
    pub operator: Option<String>,
    pub threshold: Option<f64>,
    pub schedule: Option<String>,
    pub timezone: Option<String>,
    pub severity: Option<String>,
    pub cooldown_minutes: Option<i32>,
    pub is_active: Option<bool>,
    /// Replaces the whole channel set when present.
    pub channels: Option<Vec<ChannelRequest>>,
}

impl UpdateAlertRequest {
    pub fn touches_schedule(&self) -> bool {
        self.schedule.is_some() || self.timezone.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestAlertRequest {
    pub query_id: Uuid,
    #[serde(alias = "column")]
    pub target_column: String,
    pub operator: String,
    pub threshold: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestAlertResponse {
    pub triggered: bool,
    pub value: Option<f64>,
    pub threshold: f64,
    pub message: String,
    pub query_duration_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row: Option<Row>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertFilter {
    pub state: Option<AlertState>,
    pub severity: Option<Severity>,
    pub is_active: Option<bool>,
    /// Case-insensitive match on name and description.
    pub search: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl AlertFilter {
    /// `(limit, offset)` with page defaulting to 1 and size to 20 (max 100).
    pub fn window(&self) -> (i64, i64) {
        page_window(self.page, self.page_size)
    }
}

pub fn page_window(page: Option<i64>, page_size: Option<i64>) -> (i64, i64) {
    let size = page_size.filter(|s| *s > 0).unwrap_or(20).min(100);
    let page = page.filter(|p| *p > 0).unwrap_or(1);
    (size, (page - 1) * size)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AlertStats {
    pub total: i64,
    pub active: i64,
    pub ok: i64,
    pub triggered: i64,
    pub acknowledged: i64,
    pub muted: i64,
    pub error: i64,
    pub critical: i64,
    pub warning: i64,
    pub info: i64,
    pub triggered_last_24h: i64,
}
