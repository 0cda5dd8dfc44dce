use cadence_core::model::{
    Recipient, RecipientRole, ReportFormat, ResourceType, ScheduledReport,
};
use cadence_core::schedule::ScheduleKind;
use chrono::Utc;
use uuid::Uuid;

/// Active daily 09:00 UTC CSV report of a saved query, one `to` and one `cc`.
pub(crate) fn report() -> ScheduledReport {
    let now = Utc::now();
    ScheduledReport {
        id: Uuid::new_v4(),
        name: "Daily signups".into(),
        description: None,
        owner: "growth".into(),
        resource_type: ResourceType::Query,
        resource_id: Uuid::new_v4().to_string(),
        schedule_kind: ScheduleKind::Daily,
        time_of_day: Some("09:00".into()),
        day_of_week: None,
        day_of_month: None,
        cron: None,
        timezone: "UTC".into(),
        format: ReportFormat::Csv,
        options: serde_json::Value::Null,
        subject: None,
        message: None,
        recipients: vec![
            Recipient {
                email: "growth@example.com".into(),
                role: RecipientRole::To,
            },
            Recipient {
                email: "ceo@example.com".into(),
                role: RecipientRole::Cc,
            },
        ],
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
    }
}
