//! PostgreSQL persistence for alerts, their channels and history.

use async_trait::async_trait;
use cadence_core::model::{
    Acknowledgement, Alert, AlertChannelConfig, AlertHistory, AlertState, NotificationLog,
    SavedQuery,
};
use cadence_rules::{AlertError, AlertFilter, AlertStats, AlertStore};
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

use crate::directory::find_saved_query;

const ALERT_COLUMNS: &str = "id, name, description, query_id, owner, target_column, operator, \
    threshold, schedule, timezone, severity, cooldown_minutes, state, is_active, is_muted, \
    muted_until, last_run_at, next_run_at, last_value, last_status, last_error, \
    last_triggered_at, last_notified_at, trigger_count, notification_count, created_at, updated_at";

#[derive(Clone)]
pub struct PgAlertStore {
    pool: PgPool,
}

impl PgAlertStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ── CRUD ────────────────────────────────────────────────────────

    /// Insert the alert row and its channels in one transaction.
    pub async fn insert(&self, alert: &Alert) -> Result<(), AlertError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO alerts (id, name, description, query_id, owner, target_column, operator, \
             threshold, schedule, timezone, severity, cooldown_minutes, state, is_active, \
             is_muted, muted_until, next_run_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)",
        )
        .bind(alert.id)
        .bind(&alert.name)
        .bind(&alert.description)
        .bind(alert.query_id)
        .bind(&alert.owner)
        .bind(&alert.target_column)
        .bind(&alert.operator)
        .bind(alert.threshold)
        .bind(&alert.schedule)
        .bind(&alert.timezone)
        .bind(alert.severity.as_str())
        .bind(alert.cooldown_minutes)
        .bind(alert.state.as_str())
        .bind(alert.is_active)
        .bind(alert.is_muted)
        .bind(alert.muted_until)
        .bind(alert.next_run_at)
        .bind(alert.created_at)
        .bind(alert.updated_at)
        .execute(&mut *tx)
        .await?;

        insert_channels(&mut tx, &alert.channels).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Write the user-editable columns. `replace_channels` swaps the whole
    /// channel set in the same transaction.
    pub async fn update(&self, alert: &Alert, replace_channels: bool) -> Result<(), AlertError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE alerts SET name = $2, description = $3, query_id = $4, target_column = $5, \
             operator = $6, threshold = $7, schedule = $8, timezone = $9, severity = $10, \
             cooldown_minutes = $11, is_active = $12, next_run_at = $13, updated_at = $14 \
             WHERE id = $1",
        )
        .bind(alert.id)
        .bind(&alert.name)
        .bind(&alert.description)
        .bind(alert.query_id)
        .bind(&alert.target_column)
        .bind(&alert.operator)
        .bind(alert.threshold)
        .bind(&alert.schedule)
        .bind(&alert.timezone)
        .bind(alert.severity.as_str())
        .bind(alert.cooldown_minutes)
        .bind(alert.is_active)
        .bind(alert.next_run_at)
        .bind(alert.updated_at)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AlertError::NotFound(alert.id));
        }

        if replace_channels {
            sqlx::query("DELETE FROM alert_channels WHERE alert_id = $1")
                .bind(alert.id)
                .execute(&mut *tx)
                .await?;
            insert_channels(&mut tx, &alert.channels).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn delete(&self, id: Uuid, owner: &str) -> Result<(), AlertError> {
        let result = sqlx::query("DELETE FROM alerts WHERE id = $1 AND owner = $2")
            .bind(id)
            .bind(owner)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AlertError::NotFound(id));
        }
        Ok(())
    }

    /// Alerts of `owner` matching `filter`, newest first, plus the total
    /// count before paging.
    pub async fn list(
        &self,
        owner: &str,
        filter: &AlertFilter,
    ) -> Result<(Vec<Alert>, i64), AlertError> {
        let (limit, offset) = filter.window();

        let mut count: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM alerts WHERE owner = ");
        count.push_bind(owner);
        push_filter(&mut count, filter);
        let total = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE owner = "));
        qb.push_bind(owner);
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);
        let alerts = qb.build_query_as::<Alert>().fetch_all(&self.pool).await?;

        Ok((alerts, total))
    }

    pub async fn history(
        &self,
        alert_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AlertHistory>, AlertError> {
        let rows = sqlx::query_as::<_, AlertHistory>(
            "SELECT id, alert_id, checked_at, query_duration_ms, status, value, threshold, \
             message, error_message FROM alert_history WHERE alert_id = $1 \
             ORDER BY checked_at DESC LIMIT $2 OFFSET $3",
        )
        .bind(alert_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Lock the alert, let `decide` acknowledge it as currently stored,
    /// then write the new state and record who acknowledged it.
    pub async fn acknowledge<F>(&self, alert_id: Uuid, decide: F) -> Result<Acknowledgement, AlertError>
    where
        F: FnOnce(&Alert) -> Result<(AlertState, Acknowledgement), AlertError> + Send,
    {
        let mut tx = self.pool.begin().await?;
        let alert = lock_alert(&mut tx, alert_id).await?;
        let (state, ack) = decide(&alert)?;
        sqlx::query("UPDATE alerts SET state = $2, updated_at = $3 WHERE id = $1")
            .bind(alert_id)
            .bind(state.as_str())
            .bind(ack.acknowledged_at)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO alert_acknowledgements (id, alert_id, acknowledged_by, note, acknowledged_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(ack.id)
        .bind(ack.alert_id)
        .bind(&ack.acknowledged_by)
        .bind(&ack.note)
        .bind(ack.acknowledged_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(ack)
    }

    /// Lock the alert, apply a mute or unmute to it as currently stored
    /// and write the state and mute columns back.
    pub async fn change_mute<F>(&self, alert_id: Uuid, change: F) -> Result<Alert, AlertError>
    where
        F: FnOnce(&mut Alert) -> Result<(), AlertError> + Send,
    {
        let mut tx = self.pool.begin().await?;
        let mut alert = lock_alert(&mut tx, alert_id).await?;
        change(&mut alert)?;
        sqlx::query(
            "UPDATE alerts SET state = $2, is_muted = $3, muted_until = $4, updated_at = $5 \
             WHERE id = $1",
        )
        .bind(alert_id)
        .bind(alert.state.as_str())
        .bind(alert.is_muted)
        .bind(alert.muted_until)
        .bind(alert.updated_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        alert.channels = self.channels(alert_id).await?;
        Ok(alert)
    }

    pub async fn stats(&self, owner: &str, now: DateTime<Utc>) -> Result<AlertStats, AlertError> {
        let row: (i64, i64, i64, i64, i64, i64, i64, i64, i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), \
             COUNT(*) FILTER (WHERE is_active), \
             COUNT(*) FILTER (WHERE state = 'OK'), \
             COUNT(*) FILTER (WHERE state = 'TRIGGERED'), \
             COUNT(*) FILTER (WHERE state = 'ACKNOWLEDGED'), \
             COUNT(*) FILTER (WHERE state = 'MUTED'), \
             COUNT(*) FILTER (WHERE state = 'ERROR'), \
             COUNT(*) FILTER (WHERE severity = 'critical'), \
             COUNT(*) FILTER (WHERE severity = 'warning'), \
             COUNT(*) FILTER (WHERE severity = 'info') \
             FROM alerts WHERE owner = $1",
        )
        .bind(owner)
        .fetch_one(&self.pool)
        .await?;

        let triggered_last_24h: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM alert_history h JOIN alerts a ON a.id = h.alert_id \
             WHERE a.owner = $1 AND h.status = 'triggered' AND h.checked_at >= $2",
        )
        .bind(owner)
        .bind(now - Duration::hours(24))
        .fetch_one(&self.pool)
        .await?;

        Ok(AlertStats {
            total: row.0,
            active: row.1,
            ok: row.2,
            triggered: row.3,
            acknowledged: row.4,
            muted: row.5,
            error: row.6,
            critical: row.7,
            warning: row.8,
            info: row.9,
            triggered_last_24h,
        })
    }

    pub async fn triggered(&self, owner: &str) -> Result<Vec<Alert>, AlertError> {
        let alerts = sqlx::query_as::<_, Alert>(&format!(
            "SELECT {ALERT_COLUMNS} FROM alerts WHERE owner = $1 AND state = 'TRIGGERED' \
             ORDER BY last_triggered_at DESC NULLS LAST"
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;
        Ok(alerts)
    }

    /// Ids of active alerts whose next run is unset or has been reached.
    pub async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, AlertError> {
        let ids = sqlx::query_scalar(
            "SELECT id FROM alerts WHERE is_active AND (next_run_at IS NULL OR next_run_at <= $1) \
             ORDER BY next_run_at ASC NULLS FIRST",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn channels(&self, alert_id: Uuid) -> Result<Vec<AlertChannelConfig>, AlertError> {
        let channels = sqlx::query_as::<_, AlertChannelConfig>(
            "SELECT id, alert_id, channel_type, enabled, config FROM alert_channels \
             WHERE alert_id = $1 ORDER BY channel_type",
        )
        .bind(alert_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(channels)
    }
}

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &AlertFilter) {
    if let Some(state) = filter.state {
        qb.push(" AND state = ").push_bind(state.as_str());
    }
    if let Some(severity) = filter.severity {
        qb.push(" AND severity = ").push_bind(severity.as_str());
    }
    if let Some(active) = filter.is_active {
        qb.push(" AND is_active = ").push_bind(active);
    }
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("%{search}%");
        qb.push(" AND (name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR description ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

/// The alert row, locked until `tx` ends.
async fn lock_alert(tx: &mut Transaction<'_, Postgres>, alert_id: Uuid) -> Result<Alert, AlertError> {
    sqlx::query_as::<_, Alert>(&format!(
        "SELECT {ALERT_COLUMNS} FROM alerts WHERE id = $1 FOR UPDATE"
    ))
    .bind(alert_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(AlertError::NotFound(alert_id))
}

async fn insert_channels(
    tx: &mut Transaction<'_, Postgres>,
    channels: &[AlertChannelConfig],
) -> Result<(), sqlx::Error> {
    for channel in channels {
        sqlx::query(
            "INSERT INTO alert_channels (id, alert_id, channel_type, enabled, config) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(channel.id)
        .bind(channel.alert_id)
        .bind(channel.channel_type.as_str())
        .bind(channel.enabled)
        .bind(&channel.config)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl AlertStore for PgAlertStore {
    async fn get_alert(&self, id: Uuid) -> Result<Alert, AlertError> {
        let mut alert =
            sqlx::query_as::<_, Alert>(&format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or(AlertError::NotFound(id))?;
        alert.channels = self.channels(id).await?;
        Ok(alert)
    }

    async fn get_query(&self, id: Uuid) -> Result<SavedQuery, AlertError> {
        find_saved_query(&self.pool, id)
            .await?
            .ok_or(AlertError::QueryNotFound(id))
    }

    async fn record_evaluation(
        &self,
        alert_id: Uuid,
        history: &AlertHistory,
        apply: &(dyn for<'a> Fn(&'a mut Alert) -> Result<(), AlertError> + Send + Sync),
    ) -> Result<Alert, AlertError> {
        let mut tx = self.pool.begin().await?;
        let mut alert = lock_alert(&mut tx, alert_id).await?;
        apply(&mut alert)?;
        sqlx::query(
            "UPDATE alerts SET state = $2, is_muted = $3, muted_until = $4, last_run_at = $5, \
             next_run_at = $6, last_value = $7, last_status = $8, last_error = $9, \
             last_triggered_at = $10, trigger_count = $11, updated_at = $12 WHERE id = $1",
        )
        .bind(alert.id)
        .bind(alert.state.as_str())
        .bind(alert.is_muted)
        .bind(alert.muted_until)
        .bind(alert.last_run_at)
        .bind(alert.next_run_at)
        .bind(alert.last_value)
        .bind(&alert.last_status)
        .bind(&alert.last_error)
        .bind(alert.last_triggered_at)
        .bind(alert.trigger_count)
        .bind(alert.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO alert_history (id, alert_id, checked_at, query_duration_ms, status, value, \
             threshold, message, error_message) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(history.id)
        .bind(history.alert_id)
        .bind(history.checked_at)
        .bind(history.query_duration_ms)
        .bind(history.status.as_str())
        .bind(history.value)
        .bind(history.threshold)
        .bind(&history.message)
        .bind(&history.error_message)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        alert.channels = self.channels(alert_id).await?;
        Ok(alert)
    }

    async fn record_notifications(
        &self,
        alert_id: Uuid,
        logs: &[NotificationLog],
        notified_at: DateTime<Utc>,
    ) -> Result<(), AlertError> {
        let mut tx = self.pool.begin().await?;
        for log in logs {
            sqlx::query(
                "INSERT INTO alert_notification_logs (id, history_id, channel_type, status, error, sent_at) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(log.id)
            .bind(log.history_id)
            .bind(log.channel_type.as_str())
            .bind(log.status.as_str())
            .bind(&log.error)
            .bind(log.sent_at)
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query(
            "UPDATE alerts SET last_notified_at = $2, notification_count = notification_count + $3 \
             WHERE id = $1",
        )
        .bind(alert_id)
        .bind(notified_at)
        .bind(logs.len() as i32)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }
}
