//! Alerts, their channels, and their evaluation history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Minutes of cooldown applied when an alert is saved with a non-positive value.
pub const DEFAULT_COOLDOWN_MINUTES: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertState {
    Ok,
    Triggered,
    Acknowledged,
    Muted,
    Error,
}

text_enum!(AlertState, "alert state", {
    Ok => "OK",
    Triggered => "TRIGGERED",
    Acknowledged => "ACKNOWLEDGED",
    Muted => "MUTED",
    Error => "ERROR",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    #[default]
    Warning,
    Info,
}

text_enum!(Severity, "severity", {
    Critical => "critical",
    Warning => "warning",
    Info => "info",
});

/// Outcome recorded in `last_status`, used to restore state after unmute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LastStatus {
    Ok,
    Triggered,
}

text_enum!(LastStatus, "last status", {
    Ok => "OK",
    Triggered => "TRIGGERED",
});

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Alert {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub query_id: Uuid,
    pub owner: String,
    pub target_column: String,
    /// Kept as text; parsed when the alert is evaluated.
    pub operator: String,
    pub threshold: f64,
    pub schedule: String,
    pub timezone: String,
    #[sqlx(try_from = "String")]
    pub severity: Severity,
    pub cooldown_minutes: i32,
    #[sqlx(try_from = "String")]
    pub state: AlertState,
    pub is_active: bool,
    pub is_muted: bool,
    pub muted_until: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_value: Option<f64>,
    pub last_status: Option<String>,
    pub last_error: Option<String>,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub last_notified_at: Option<DateTime<Utc>>,
    pub trigger_count: i32,
    pub notification_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[sqlx(skip)]
    #[serde(default)]
    pub channels: Vec<AlertChannelConfig>,
}

impl Alert {
    pub fn last_status(&self) -> Option<LastStatus> {
        self.last_status.as_deref().and_then(|s| s.parse().ok())
    }

    /// Cooldown as a duration; non-positive values use the default.
    pub fn cooldown(&self) -> chrono::Duration {
        let minutes = if self.cooldown_minutes > 0 {
            self.cooldown_minutes
        } else {
            DEFAULT_COOLDOWN_MINUTES
        };
        chrono::Duration::minutes(i64::from(minutes))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Email,
    Webhook,
    Inapp,
    Slack,
    Teams,
}

text_enum!(ChannelType, "channel type", {
    Email => "email",
    Webhook => "webhook",
    Inapp => "inapp",
    Slack => "slack",
    Teams => "teams",
});

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AlertChannelConfig {
    pub id: Uuid,
    pub alert_id: Uuid,
    #[sqlx(try_from = "String")]
    pub channel_type: ChannelType,
    pub enabled: bool,
    /// Channel-specific settings (`url`, `headers`, `webhook_url`, ...).
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Ok,
    Triggered,
    Error,
}

text_enum!(HistoryStatus, "history status", {
    Ok => "ok",
    Triggered => "triggered",
    Error => "error",
});

/// One row per evaluation attempt.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AlertHistory {
    pub id: Uuid,
    pub alert_id: Uuid,
    pub checked_at: DateTime<Utc>,
    pub query_duration_ms: i64,
    #[sqlx(try_from = "String")]
    pub status: HistoryStatus,
    pub value: Option<f64>,
    pub threshold: Option<f64>,
    pub message: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

text_enum!(DeliveryStatus, "delivery status", {
    Sent => "sent",
    Failed => "failed",
});

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotificationLog {
    pub id: Uuid,
    pub history_id: Uuid,
    #[sqlx(try_from = "String")]
    pub channel_type: ChannelType,
    #[sqlx(try_from = "String")]
    pub status: DeliveryStatus,
    pub error: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Acknowledgement {
    pub id: Uuid,
    pub alert_id: Uuid,
    pub acknowledged_by: String,
    pub note: Option<String>,
    pub acknowledged_at: DateTime<Utc>,
}

/// Saved query an alert or report points at. Owned by an external service.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SavedQuery {
    pub id: Uuid,
    pub connection_id: Uuid,
    pub sql: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_text_round_trips() {
        for state in [
            AlertState::Ok,
            AlertState::Triggered,
            AlertState::Acknowledged,
            AlertState::Muted,
            AlertState::Error,
        ] {
            assert_eq!(state.as_str().parse::<AlertState>().unwrap(), state);
        }
        assert_eq!("triggered".parse::<AlertState>().unwrap(), AlertState::Triggered);
        assert!("PAUSED".parse::<AlertState>().is_err());
    }

    #[test]
    fn error_variants_decode_from_stored_text() {
        assert_eq!(AlertState::try_from("ERROR".to_string()).unwrap(), AlertState::Error);
        assert_eq!(HistoryStatus::try_from("error".to_string()).unwrap(), HistoryStatus::Error);
        assert!(HistoryStatus::try_from("failed".to_string()).is_err());
    }

    #[test]
    fn channel_type_parses_lowercase() {
        assert_eq!(ChannelType::try_from("slack".to_string()).unwrap(), ChannelType::Slack);
        assert!(ChannelType::try_from("pager".to_string()).is_err());
    }
}
