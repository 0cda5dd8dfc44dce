//! Alert evaluation: run the saved query, compare, transition, notify.
//!
//! One [`AlertEvaluator::check`] call is one scheduled tick for one alert.
//! Query and evaluation failures never escape as errors; they are recorded
//! as an `error` history row and move the alert to ERROR. Only store
//! failures and lookups of unknown or inactive alerts are returned.

use std::sync::Arc;
use std::time::{Duration, Instant};

use cadence_core::model::{
    Alert, AlertHistory, AlertState, ConnectionDirectory, DeliveryStatus, HistoryStatus,
    LastStatus, NotificationLog,
};
use cadence_core::schedule::next_run;
use cadence_core::{AuditSink, Row, CANCELLED_MESSAGE};
use cadence_notify::{AlertContext, ChannelTarget, Dispatcher};
use cadence_queue::{AdmissionQueue, Priority, QueryRequest};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::coerce::numeric_value;
use crate::cooldown::{can_send_notification, mute_expired};
use crate::error::{AlertError, EvalError};
use crate::operator::Operator;
use crate::request::{TestAlertRequest, TestAlertResponse};
use crate::state::{transition, AlertEvent};
use crate::store::AlertStore;

/// Delay before an alert with an unusable schedule is checked again.
const SCHEDULE_RETRY_DAYS: i64 = 1;

/// Result of comparing one value against a threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub value: f64,
    pub triggered: bool,
    pub message: String,
}

/// Compare `row[column]` against `threshold` with `operator`.
pub fn evaluate(
    row: &Row,
    column: &str,
    operator: &str,
    threshold: f64,
) -> Result<Evaluation, EvalError> {
    let op: Operator = operator.parse()?;
    let value = numeric_value(row, column)?;
    let triggered = op.holds(value, threshold);
    let message = if triggered {
        format!(
            "Alert triggered: {} (value: {value:.2}, threshold: {threshold:.2})",
            op.describe(column, threshold)
        )
    } else {
        format!("Alert OK: value {value:.2} does not trigger condition")
    };
    Ok(Evaluation {
        value,
        triggered,
        message,
    })
}

/// What one check did.
#[derive(Debug, Clone, Serialize)]
pub struct CheckOutcome {
    pub history: AlertHistory,
    pub state: AlertState,
    pub notifications: Vec<NotificationLog>,
}

pub struct AlertEvaluator {
    store: Arc<dyn AlertStore>,
    queue: AdmissionQueue,
    connections: Arc<dyn ConnectionDirectory>,
    dispatcher: Arc<Dispatcher>,
    audit: Arc<dyn AuditSink>,
    timeout: Duration,
}

impl AlertEvaluator {
    pub fn new(
        store: Arc<dyn AlertStore>,
        queue: AdmissionQueue,
        connections: Arc<dyn ConnectionDirectory>,
        dispatcher: Arc<Dispatcher>,
        audit: Arc<dyn AuditSink>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            connections,
            dispatcher,
            audit,
            timeout,
        }
    }

    /// Run one scheduled check of `alert_id` as of `now`. The query and
    /// the notification fan-out share one deadline of the check timeout.
    pub async fn check(
        &self,
        alert_id: Uuid,
        now: DateTime<Utc>,
        parent: &CancellationToken,
    ) -> Result<CheckOutcome, AlertError> {
        let alert = self.store.get_alert(alert_id).await?;
        if !alert.is_active {
            return Err(AlertError::Inactive);
        }

        let deadline = tokio::time::Instant::now() + self.timeout;
        let cancel = parent.child_token();

        let started = Instant::now();
        let fetched = self.fetch_row(alert.query_id, &cancel, deadline).await;
        let query_duration_ms = started.elapsed().as_millis() as i64;
        let evaluation = fetched.and_then(|row| {
            evaluate(&row, &alert.target_column, &alert.operator, alert.threshold)
        });
        match &evaluation {
            Ok(eval) => {
                debug!(alert_id = %alert.id, value = eval.value, triggered = eval.triggered, "alert evaluated")
            }
            Err(e) => {
                warn!(alert_id = %alert.id, kind = %e.kind(), error = %e, "alert evaluation failed")
            }
        }
        let history = history_row(&alert, now, query_duration_ms, &evaluation);

        // State moves on from the row as stored now, so a mute or
        // acknowledgement made while the query ran is kept.
        let alert = self
            .store
            .record_evaluation(alert_id, &history, &|stored: &mut Alert| {
                apply_check(stored, &evaluation, now)
            })
            .await?;

        let triggered = evaluation.as_ref().is_ok_and(|e| e.triggered);
        let notifications = if triggered && can_send_notification(&alert, alert.state, now) {
            self.notify(&alert, &history, now, &cancel, deadline).await
        } else {
            Vec::new()
        };

        self.audit.record(
            "alert.checked",
            &json!({
                "alert_id": alert.id,
                "history_id": history.id,
                "status": history.status.as_str(),
                "state": alert.state.as_str(),
                "notifications": notifications.len(),
            }),
        );

        Ok(CheckOutcome {
            history,
            state: alert.state,
            notifications,
        })
    }

    /// Run an ad-hoc evaluation. Nothing is persisted.
    pub async fn test(
        &self,
        req: &TestAlertRequest,
        parent: &CancellationToken,
    ) -> Result<TestAlertResponse, AlertError> {
        let query = self.store.get_query(req.query_id).await?;
        let connection = self
            .connections
            .get(query.connection_id)
            .await
            .map_err(|e| AlertError::Eval(e.into()))?;

        let deadline = tokio::time::Instant::now() + self.timeout;
        let cancel = parent.child_token();
        let started = Instant::now();
        let outcome = self
            .run_limited(QueryRequest::new(connection, query.sql), &cancel, deadline)
            .await;
        let query_duration_ms = started.elapsed().as_millis() as i64;

        let mut response = TestAlertResponse {
            triggered: false,
            value: None,
            threshold: req.threshold,
            message: String::new(),
            query_duration_ms,
            row: None,
        };

        let row = match outcome {
            Ok(Some(row)) => row,
            Ok(None) => {
                response.message = "Query returned no rows".into();
                return Ok(response);
            }
            Err(EvalError::Query(msg)) => {
                response.message = format!("Query error: {msg}");
                return Ok(response);
            }
            Err(e) => return Err(e.into()),
        };

        match evaluate(&row, &req.target_column, &req.operator, req.threshold) {
            Ok(eval) => {
                response.triggered = eval.triggered;
                response.value = Some(eval.value);
                response.message = eval.message;
            }
            Err(e) => response.message = format!("Evaluation error: {e}"),
        }
        response.row = Some(row);
        Ok(response)
    }

    /// First row of the alert's saved query, bounded by `deadline`.
    async fn fetch_row(
        &self,
        query_id: Uuid,
        cancel: &CancellationToken,
        deadline: tokio::time::Instant,
    ) -> Result<Row, EvalError> {
        let query = self
            .store
            .get_query(query_id)
            .await
            .map_err(|e| EvalError::Dependency(e.to_string()))?;
        let connection = self.connections.get(query.connection_id).await?;
        self.run_limited(QueryRequest::new(connection, query.sql), cancel, deadline)
            .await?
            .ok_or(EvalError::EmptyResult)
    }

    async fn run_limited(
        &self,
        request: QueryRequest,
        cancel: &CancellationToken,
        deadline: tokio::time::Instant,
    ) -> Result<Option<Row>, EvalError> {
        let run = self.queue.enqueue(request.with_limit(1), Priority::High, cancel);
        let result = match tokio::time::timeout_at(deadline, run).await {
            Ok(result) => result?.into_result()?,
            Err(_) => {
                cancel.cancel();
                return Err(EvalError::Cancelled);
            }
        };
        Ok(result.rows.into_iter().next())
    }

    /// Fan out to every enabled channel and record one log per attempt.
    /// Deliveries still pending at `deadline`, or on cancellation, are
    /// abandoned and logged as failed.
    async fn notify(
        &self,
        alert: &Alert,
        history: &AlertHistory,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
        deadline: tokio::time::Instant,
    ) -> Vec<NotificationLog> {
        let targets: Vec<ChannelTarget> = alert
            .channels
            .iter()
            .filter(|c| c.enabled)
            .map(|c| ChannelTarget {
                channel_type: c.channel_type,
                config: c.config.clone(),
            })
            .collect();
        if targets.is_empty() {
            debug!(alert_id = %alert.id, "alert triggered with no enabled channels");
            return Vec::new();
        }

        let context = AlertContext {
            alert_id: alert.id.to_string(),
            history_id: history.id.to_string(),
            name: alert.name.clone(),
            description: alert.description.clone(),
            severity: alert.severity.to_string(),
            target_column: alert.target_column.clone(),
            operator: alert.operator.clone(),
            threshold: alert.threshold,
            value: history.value.unwrap_or_default(),
            state: alert.state.to_string(),
            message: history.message.clone().unwrap_or_default(),
            checked_at: now.to_rfc3339(),
        };
        let notification = match self.dispatcher.registry().renderer().notification(context) {
            Ok(n) => n,
            Err(e) => {
                warn!(alert_id = %alert.id, error = %e, "could not render notification");
                return Vec::new();
            }
        };

        let alert_key = alert.id.to_string();
        let dispatch = self.dispatcher.dispatch(&alert_key, &targets, &notification);
        let results = tokio::select! {
            results = tokio::time::timeout_at(deadline, dispatch) => results.ok(),
            _ = cancel.cancelled() => None,
        };
        let logs: Vec<NotificationLog> = match results {
            Some(results) => results
                .into_iter()
                .map(|r| NotificationLog {
                    id: Uuid::new_v4(),
                    history_id: history.id,
                    channel_type: r.channel,
                    status: if r.success {
                        DeliveryStatus::Sent
                    } else {
                        DeliveryStatus::Failed
                    },
                    error: r.error,
                    sent_at: r.success.then_some(now),
                })
                .collect(),
            None => {
                cancel.cancel();
                warn!(alert_id = %alert.id, "notification delivery abandoned at the check deadline");
                targets
                    .iter()
                    .map(|t| NotificationLog {
                        id: Uuid::new_v4(),
                        history_id: history.id,
                        channel_type: t.channel_type,
                        status: DeliveryStatus::Failed,
                        error: Some(CANCELLED_MESSAGE.to_string()),
                        sent_at: None,
                    })
                    .collect()
            }
        };

        if let Err(e) = self.store.record_notifications(alert.id, &logs, now).await {
            warn!(alert_id = %alert.id, error = %e, "failed to record notifications");
        }
        logs
    }
}

/// The history row for one check of `alert`.
fn history_row(
    alert: &Alert,
    now: DateTime<Utc>,
    query_duration_ms: i64,
    evaluation: &Result<Evaluation, EvalError>,
) -> AlertHistory {
    let mut history = AlertHistory {
        id: Uuid::new_v4(),
        alert_id: alert.id,
        checked_at: now,
        query_duration_ms,
        status: HistoryStatus::Ok,
        value: None,
        threshold: Some(alert.threshold),
        message: None,
        error_message: None,
    };
    match evaluation {
        Ok(eval) => {
            history.status = if eval.triggered {
                HistoryStatus::Triggered
            } else {
                HistoryStatus::Ok
            };
            history.value = Some(eval.value);
            history.message = Some(eval.message.clone());
        }
        Err(e) => {
            history.status = HistoryStatus::Error;
            history.message = Some(e.to_string());
            history.error_message = Some(e.to_string());
        }
    }
    history
}

/// Move `alert`, as currently stored, on by one check's result at `now`:
/// lapse an expired mute, apply the state transition, bump the trigger
/// counters and set the run columns.
pub fn apply_check(
    alert: &mut Alert,
    evaluation: &Result<Evaluation, EvalError>,
    now: DateTime<Utc>,
) -> Result<(), AlertError> {
    if mute_expired(alert, now) {
        alert.state = transition(alert.state, alert.last_status(), AlertEvent::Unmute)?;
        alert.is_muted = false;
        alert.muted_until = None;
        info!(alert_id = %alert.id, state = %alert.state, "mute expired, alert unmuted");
    }

    match evaluation {
        Ok(eval) => {
            let previous = alert.state;
            let next = transition(
                previous,
                alert.last_status(),
                AlertEvent::Evaluated {
                    triggered: eval.triggered,
                },
            )?;
            if next == AlertState::Triggered && previous != AlertState::Triggered {
                alert.trigger_count += 1;
                alert.last_triggered_at = Some(now);
            }
            alert.state = next;
            alert.last_value = Some(eval.value);
            alert.last_error = None;
            alert.last_status = Some(
                if eval.triggered {
                    LastStatus::Triggered
                } else {
                    LastStatus::Ok
                }
                .to_string(),
            );
        }
        Err(e) => {
            alert.state = transition(alert.state, alert.last_status(), AlertEvent::EvaluationFailed)?;
            alert.last_error = Some(e.to_string());
        }
    }

    alert.last_run_at = Some(now);
    alert.next_run_at = Some(next_run_or_retry(alert, now));
    alert.updated_at = now;
    Ok(())
}

/// Next fire of the alert's schedule. A schedule that no longer yields
/// one is retried a day later instead of on every tick.
fn next_run_or_retry(alert: &Alert, now: DateTime<Utc>) -> DateTime<Utc> {
    next_run(&alert.schedule, &alert.timezone, now).unwrap_or_else(|e| {
        warn!(alert_id = %alert.id, error = %e, "could not compute next run, retrying in a day");
        now + chrono::Duration::days(SCHEDULE_RETRY_DAYS)
    })
}

#[cfg(test)]
mod tests;
