//! Alert CRUD, state commands and the due-alert job.

use std::sync::Arc;

use cadence_core::model::{
    Acknowledgement, Alert, AlertChannelConfig, AlertHistory, AlertState, ChannelType, Severity,
    DEFAULT_COOLDOWN_MINUTES,
};
use cadence_core::schedule::next_run;
use cadence_core::AuditSink;
use cadence_rules::request::page_window;
use cadence_rules::{
    transition, validate_create, validate_update, AlertError, AlertEvaluator, AlertEvent,
    AlertFilter, AlertStats, AlertStore, ChannelRequest, CheckOutcome, CreateAlertRequest,
    TestAlertRequest, TestAlertResponse, UpdateAlertRequest,
};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::store::PgAlertStore;
use crate::inflight::InFlight;
use crate::page::Page;

pub struct AlertService {
    store: Arc<PgAlertStore>,
    evaluator: Arc<AlertEvaluator>,
    audit: Arc<dyn AuditSink>,
    /// Alerts with a check running, scheduled or manual.
    in_flight: InFlight,
}

impl AlertService {
    pub fn new(
        store: Arc<PgAlertStore>,
        evaluator: Arc<AlertEvaluator>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            evaluator,
            audit,
            in_flight: InFlight::new(),
        }
    }

    // ── CRUD ────────────────────────────────────────────────────────

    pub async fn create_alert(
        &self,
        owner: &str,
        req: CreateAlertRequest,
    ) -> Result<Alert, AlertError> {
        let alert = build_alert(owner, req, Utc::now())?;
        self.store.insert(&alert).await?;
        info!(alert_id = %alert.id, name = %alert.name, "alert created");
        self.audit.record("alert.created", &json!({"alert_id": alert.id, "owner": owner}));
        Ok(alert)
    }

    pub async fn update_alert(
        &self,
        id: Uuid,
        owner: &str,
        req: UpdateAlertRequest,
    ) -> Result<Alert, AlertError> {
        let mut alert = self.get_alert(id, owner).await?;
        let replace_channels = apply_update(&mut alert, req, Utc::now())?;
        self.store.update(&alert, replace_channels).await?;
        self.audit.record("alert.updated", &json!({"alert_id": id, "owner": owner}));
        Ok(alert)
    }

    pub async fn delete_alert(&self, id: Uuid, owner: &str) -> Result<(), AlertError> {
        self.store.delete(id, owner).await?;
        info!(alert_id = %id, "alert deleted");
        self.audit.record("alert.deleted", &json!({"alert_id": id, "owner": owner}));
        Ok(())
    }

    /// The alert with its channels; other owners' alerts are not found.
    pub async fn get_alert(&self, id: Uuid, owner: &str) -> Result<Alert, AlertError> {
        let alert = self.store.get_alert(id).await?;
        if alert.owner != owner {
            return Err(AlertError::NotFound(id));
        }
        Ok(alert)
    }

    pub async fn list_alerts(
        &self,
        owner: &str,
        filter: &AlertFilter,
    ) -> Result<Page<Alert>, AlertError> {
        let (limit, offset) = filter.window();
        let (items, total) = self.store.list(owner, filter).await?;
        Ok(Page {
            items,
            total,
            limit,
            offset,
        })
    }

    /// Evaluation history, newest first.
    pub async fn alert_history(
        &self,
        id: Uuid,
        owner: &str,
        page: Option<i64>,
        page_size: Option<i64>,
    ) -> Result<Vec<AlertHistory>, AlertError> {
        self.get_alert(id, owner).await?;
        let (limit, offset) = page_window(page, page_size);
        self.store.history(id, limit, offset).await
    }

    // ── State commands ──────────────────────────────────────────────

    pub async fn acknowledge_alert(
        &self,
        id: Uuid,
        owner: &str,
        user: &str,
        note: Option<String>,
    ) -> Result<Acknowledgement, AlertError> {
        self.get_alert(id, owner).await?;
        let now = Utc::now();
        let ack = self
            .store
            .acknowledge(id, |alert| acknowledge(alert, user, note, now))
            .await?;
        info!(alert_id = %id, user, "alert acknowledged");
        self.audit.record("alert.acknowledged", &json!({"alert_id": id, "user": user}));
        Ok(ack)
    }

    /// Mute indefinitely, or for `duration_minutes` when given.
    pub async fn mute_alert(
        &self,
        id: Uuid,
        owner: &str,
        duration_minutes: Option<i64>,
    ) -> Result<Alert, AlertError> {
        self.get_alert(id, owner).await?;
        let now = Utc::now();
        let alert = self
            .store
            .change_mute(id, |alert| mute(alert, duration_minutes, now))
            .await?;
        info!(alert_id = %id, until = ?alert.muted_until, "alert muted");
        self.audit.record(
            "alert.muted",
            &json!({"alert_id": id, "muted_until": alert.muted_until}),
        );
        Ok(alert)
    }

    pub async fn unmute_alert(&self, id: Uuid, owner: &str) -> Result<Alert, AlertError> {
        self.get_alert(id, owner).await?;
        let now = Utc::now();
        let alert = self.store.change_mute(id, |alert| unmute(alert, now)).await?;
        info!(alert_id = %id, state = %alert.state, "alert unmuted");
        self.audit.record("alert.unmuted", &json!({"alert_id": id}));
        Ok(alert)
    }

    // ── Runs ────────────────────────────────────────────────────────

    /// Ad-hoc evaluation; nothing is written and nobody is notified.
    pub async fn test_alert(
        &self,
        req: &TestAlertRequest,
        parent: &CancellationToken,
    ) -> Result<TestAlertResponse, AlertError> {
        self.evaluator.test(req, parent).await
    }

    /// Check one alert now. Refused while another check of it runs.
    pub async fn check_alert(
        &self,
        id: Uuid,
        parent: &CancellationToken,
    ) -> Result<CheckOutcome, AlertError> {
        let _claim = self.in_flight.claim(id).ok_or(AlertError::Busy(id))?;
        self.evaluator.check(id, Utc::now(), parent).await
    }

    /// Number of alert checks currently running.
    pub fn running(&self) -> usize {
        self.in_flight.len()
    }

    pub async fn alert_stats(&self, owner: &str) -> Result<AlertStats, AlertError> {
        self.store.stats(owner, Utc::now()).await
    }

    pub async fn triggered_alerts(&self, owner: &str) -> Result<Vec<Alert>, AlertError> {
        self.store.triggered(owner).await
    }

    /// Dispatch a check for every due alert that is not already running.
    /// Returns the number of checks started.
    pub async fn process_due_alerts(
        self: &Arc<Self>,
        now: DateTime<Utc>,
        parent: &CancellationToken,
    ) -> Result<usize, AlertError> {
        let due = self.store.find_due(now).await?;
        let mut dispatched = 0;
        for id in due {
            let Some(claim) = self.in_flight.claim(id) else {
                debug!(alert_id = %id, "alert check still running, skipping");
                continue;
            };
            let this = Arc::clone(self);
            let parent = parent.clone();
            tokio::spawn(async move {
                let _claim = claim;
                match this.evaluator.check(id, Utc::now(), &parent).await {
                    Ok(outcome) => debug!(
                        alert_id = %id,
                        state = %outcome.state,
                        notifications = outcome.notifications.len(),
                        "alert checked"
                    ),
                    Err(e) => warn!(
                        category = "cron_alerts",
                        alert_id = %id,
                        kind = %e.kind(),
                        error = %e,
                        "alert check failed"
                    ),
                }
            });
            dispatched += 1;
        }
        Ok(dispatched)
    }
}

// ── Pure helpers ────────────────────────────────────────────────────

fn validation(result: cadence_core::ValidationResult) -> Result<(), AlertError> {
    if result.valid {
        Ok(())
    } else {
        Err(AlertError::Validation(result))
    }
}

fn cooldown_or_default(minutes: Option<i32>) -> i32 {
    minutes.filter(|m| *m > 0).unwrap_or(DEFAULT_COOLDOWN_MINUTES)
}

fn timezone_or_utc(tz: Option<String>) -> String {
    tz.map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "UTC".to_string())
}

fn channel_rows(alert_id: Uuid, channels: Vec<ChannelRequest>) -> Vec<AlertChannelConfig> {
    if channels.is_empty() {
        return vec![AlertChannelConfig {
            id: Uuid::new_v4(),
            alert_id,
            channel_type: ChannelType::Email,
            enabled: true,
            config: json!({}),
        }];
    }
    channels
        .into_iter()
        .filter_map(|c| {
            let channel_type = c.channel_type.parse().ok()?;
            Some(AlertChannelConfig {
                id: Uuid::new_v4(),
                alert_id,
                channel_type,
                enabled: c.enabled,
                config: if c.config.is_null() { json!({}) } else { c.config },
            })
        })
        .collect()
}

/// Validate a create request and build the row to insert. With no
/// channels supplied a default enabled email channel is attached.
pub fn build_alert(
    owner: &str,
    req: CreateAlertRequest,
    now: DateTime<Utc>,
) -> Result<Alert, AlertError> {
    validation(validate_create(&req))?;

    let id = Uuid::new_v4();
    let timezone = timezone_or_utc(req.timezone);
    let next_run_at = next_run(&req.schedule, &timezone, now)?;
    let severity = match req.severity.as_deref() {
        Some(s) => s.parse()?,
        None => Severity::default(),
    };

    Ok(Alert {
        id,
        name: req.name.trim().to_string(),
        description: req.description,
        query_id: req.query_id,
        owner: owner.to_string(),
        target_column: req.target_column.trim().to_string(),
        operator: req.operator.trim().to_string(),
        threshold: req.threshold,
        schedule: req.schedule.trim().to_string(),
        timezone,
        severity,
        cooldown_minutes: cooldown_or_default(req.cooldown_minutes),
        state: AlertState::Ok,
        is_active: true,
        is_muted: false,
        muted_until: None,
        last_run_at: None,
        next_run_at: Some(next_run_at),
        last_value: None,
        last_status: None,
        last_error: None,
        last_triggered_at: None,
        last_notified_at: None,
        trigger_count: 0,
        notification_count: 0,
        created_at: now,
        updated_at: now,
        channels: channel_rows(id, req.channels),
    })
}

/// Apply a partial update in place. Returns whether the channel set was
/// replaced.
pub fn apply_update(
    alert: &mut Alert,
    req: UpdateAlertRequest,
    now: DateTime<Utc>,
) -> Result<bool, AlertError> {
    validation(validate_update(&req))?;
    let reschedule = req.touches_schedule() || req.is_active == Some(true);

    if let Some(name) = req.name {
        alert.name = name.trim().to_string();
    }
    if let Some(description) = req.description {
        alert.description = Some(description);
    }
    if let Some(query_id) = req.query_id {
        alert.query_id = query_id;
    }
    if let Some(column) = req.target_column {
        alert.target_column = column.trim().to_string();
    }
    if let Some(op) = req.operator {
        alert.operator = op.trim().to_string();
    }
    if let Some(threshold) = req.threshold {
        alert.threshold = threshold;
    }
    if let Some(schedule) = req.schedule {
        alert.schedule = schedule.trim().to_string();
    }
    if req.timezone.is_some() {
        alert.timezone = timezone_or_utc(req.timezone);
    }
    if let Some(severity) = req.severity {
        alert.severity = severity.parse()?;
    }
    if let Some(minutes) = req.cooldown_minutes {
        alert.cooldown_minutes = cooldown_or_default(Some(minutes));
    }
    if let Some(active) = req.is_active {
        alert.is_active = active;
    }
    if reschedule {
        alert.next_run_at = Some(next_run(&alert.schedule, &alert.timezone, now)?);
    }
    alert.updated_at = now;

    match req.channels {
        Some(channels) => {
            alert.channels = channel_rows(alert.id, channels);
            Ok(true)
        }
        None => Ok(false),
    }
}

/// New state plus the acknowledgement row.
pub fn acknowledge(
    alert: &Alert,
    user: &str,
    note: Option<String>,
    now: DateTime<Utc>,
) -> Result<(AlertState, Acknowledgement), AlertError> {
    let state = transition(alert.state, alert.last_status(), AlertEvent::Acknowledge)?;
    let ack = Acknowledgement {
        id: Uuid::new_v4(),
        alert_id: alert.id,
        acknowledged_by: user.to_string(),
        note: note.filter(|n| !n.trim().is_empty()),
        acknowledged_at: now,
    };
    Ok((state, ack))
}

pub fn mute(
    alert: &mut Alert,
    duration_minutes: Option<i64>,
    now: DateTime<Utc>,
) -> Result<(), AlertError> {
    alert.state = transition(alert.state, alert.last_status(), AlertEvent::Mute)?;
    alert.is_muted = true;
    alert.muted_until = duration_minutes
        .filter(|m| *m > 0)
        .map(|m| now + Duration::minutes(m));
    alert.updated_at = now;
    Ok(())
}

/// Restores TRIGGERED when the last evaluation triggered, otherwise OK.
pub fn unmute(alert: &mut Alert, now: DateTime<Utc>) -> Result<(), AlertError> {
    alert.state = transition(alert.state, alert.last_status(), AlertEvent::Unmute)?;
    alert.is_muted = false;
    alert.muted_until = None;
    alert.updated_at = now;
    Ok(())
}
