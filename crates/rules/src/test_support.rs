use cadence_core::model::{Alert, AlertState, Severity};
use chrono::Utc;
use uuid::Uuid;

/// Active OK alert: `value > 100`, every five minutes, 10 minute cooldown.
pub(crate) fn alert() -> Alert {
    let now = Utc::now();
    Alert {
        id: Uuid::new_v4(),
        name: "Queue depth".into(),
        description: None,
        query_id: Uuid::new_v4(),
        owner: "ops".into(),
        target_column: "value".into(),
        operator: ">".into(),
        threshold: 100.0,
        schedule: "*/5 * * * *".into(),
        timezone: "UTC".into(),
        severity: Severity::Critical,
        cooldown_minutes: 10,
        state: AlertState::Ok,
        is_active: true,
        is_muted: false,
        muted_until: None,
        last_run_at: None,
        next_run_at: None,
        last_value: None,
        last_status: None,
        last_error: None,
        last_triggered_at: None,
        last_notified_at: None,
        trigger_count: 0,
        notification_count: 0,
        created_at: now,
        updated_at: now,
        channels: Vec::new(),
    }
}
