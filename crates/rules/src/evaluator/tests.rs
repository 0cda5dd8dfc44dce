use super::*;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use cadence_core::config::{NotifyConfig, QueueConfig};
use cadence_core::model::{AlertChannelConfig, ChannelType, Connection, SavedQuery, SourceType};
use cadence_core::{CoreError, TracingAuditSink, CANCELLED_MESSAGE};
use cadence_notify::{ChannelRegistry, Notification, Notifier, NotifyError, TemplateRenderer};
use cadence_queue::{QueryExecutor, QueryResult};
use chrono::TimeZone;
use serde_json::Value;

use crate::test_support;

// ── Doubles ──

struct MemoryAlertStore {
    alert: Mutex<Alert>,
    query: SavedQuery,
    histories: Mutex<Vec<AlertHistory>>,
    logs: Mutex<Vec<NotificationLog>>,
}

impl MemoryAlertStore {
    fn alert(&self) -> Alert {
        self.alert.lock().unwrap().clone()
    }

    fn histories(&self) -> Vec<AlertHistory> {
        self.histories.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn get_alert(&self, id: Uuid) -> Result<Alert, AlertError> {
        let alert = self.alert();
        if alert.id == id {
            Ok(alert)
        } else {
            Err(AlertError::NotFound(id))
        }
    }

    async fn get_query(&self, id: Uuid) -> Result<SavedQuery, AlertError> {
        if self.query.id == id {
            Ok(self.query.clone())
        } else {
            Err(AlertError::QueryNotFound(id))
        }
    }

    async fn record_evaluation(
        &self,
        alert_id: Uuid,
        history: &AlertHistory,
        apply: &(dyn for<'a> Fn(&'a mut Alert) -> Result<(), AlertError> + Send + Sync),
    ) -> Result<Alert, AlertError> {
        let mut stored = self.alert.lock().unwrap();
        if stored.id != alert_id {
            return Err(AlertError::NotFound(alert_id));
        }
        let mut next = stored.clone();
        apply(&mut next)?;
        *stored = next.clone();
        self.histories.lock().unwrap().push(history.clone());
        Ok(next)
    }

    async fn record_notifications(
        &self,
        _: Uuid,
        logs: &[NotificationLog],
        notified_at: DateTime<Utc>,
    ) -> Result<(), AlertError> {
        let mut stored = self.alert.lock().unwrap();
        stored.last_notified_at = Some(notified_at);
        stored.notification_count += logs.len() as i32;
        self.logs.lock().unwrap().extend_from_slice(logs);
        Ok(())
    }
}

type Hook = Box<dyn FnOnce() + Send>;

/// One-row source whose `value` column can be changed between checks.
/// `None` makes the query fail.
struct MetricSource {
    value: Mutex<Option<Value>>,
    /// Runs once, while the next query is executing.
    during_query: Mutex<Option<Hook>>,
}

impl MetricSource {
    fn set(&self, value: Option<Value>) {
        *self.value.lock().unwrap() = value;
    }

    fn while_querying(&self, hook: impl FnOnce() + Send + 'static) {
        *self.during_query.lock().unwrap() = Some(Box::new(hook));
    }
}

#[async_trait]
impl QueryExecutor for MetricSource {
    async fn execute(&self, request: &QueryRequest, _: &CancellationToken) -> QueryResult {
        assert_eq!(request.limit, Some(1));
        let hook = self.during_query.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        match self.value.lock().unwrap().clone() {
            Some(v) => {
                let mut row = Row::new();
                row.insert("value".into(), v);
                QueryResult::from_rows(vec!["value".into()], vec![row], 8)
            }
            None => QueryResult::failed("relation \"metrics\" does not exist", 1),
        }
    }
}

struct Connections;

#[async_trait]
impl ConnectionDirectory for Connections {
    async fn get(&self, id: Uuid) -> Result<Connection, CoreError> {
        Ok(Connection {
            id,
            kind: SourceType::Postgres,
            host: "metrics.internal".into(),
            port: 5432,
            database: "metrics".into(),
            username: "reader".into(),
            password: String::new(),
            options: Value::Null,
        })
    }
}

#[derive(Default)]
struct CountingNotifier {
    sent: AtomicUsize,
    fail: AtomicBool,
}

#[async_trait]
impl Notifier for CountingNotifier {
    async fn send(&self, _: &Notification) -> Result<(), NotifyError> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotifyError::Config("mailbox unavailable".into()));
        }
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "email"
    }
}

/// Accepts the notification and never answers.
struct StalledNotifier;

#[async_trait]
impl Notifier for StalledNotifier {
    async fn send(&self, _: &Notification) -> Result<(), NotifyError> {
        std::future::pending().await
    }

    fn channel_name(&self) -> &str {
        "email"
    }
}

// ── Harness ──

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

fn minutes(m: i64) -> DateTime<Utc> {
    t0() + chrono::Duration::minutes(m)
}

struct Harness {
    evaluator: AlertEvaluator,
    store: Arc<MemoryAlertStore>,
    source: Arc<MetricSource>,
    email: Arc<CountingNotifier>,
    alert_id: Uuid,
    shutdown: CancellationToken,
}

impl Harness {
    fn new(configure: impl FnOnce(&mut Alert)) -> Self {
        Self::with_email(configure, None)
    }

    /// `email` replaces the counting email notifier in the registry.
    fn with_email(configure: impl FnOnce(&mut Alert), email: Option<Arc<dyn Notifier>>) -> Self {
        let mut alert = test_support::alert();
        alert.channels = vec![AlertChannelConfig {
            id: Uuid::new_v4(),
            alert_id: alert.id,
            channel_type: ChannelType::Email,
            enabled: true,
            config: serde_json::json!({"to": ["ops@example.com"]}),
        }];
        configure(&mut alert);
        let alert_id = alert.id;

        let store = Arc::new(MemoryAlertStore {
            query: SavedQuery {
                id: alert.query_id,
                connection_id: Uuid::new_v4(),
                sql: "SELECT depth AS value FROM queue_stats".into(),
            },
            alert: Mutex::new(alert),
            histories: Mutex::new(Vec::new()),
            logs: Mutex::new(Vec::new()),
        });

        let shutdown = CancellationToken::new();
        let source = Arc::new(MetricSource {
            value: Mutex::new(Some(serde_json::json!(150))),
            during_query: Mutex::new(None),
        });
        let queue = AdmissionQueue::new(source.clone(), &QueueConfig::default());
        queue.start(shutdown.clone());

        let counting = Arc::new(CountingNotifier::default());
        let registered: Arc<dyn Notifier> = email.unwrap_or_else(|| counting.clone() as Arc<dyn Notifier>);
        let registry = ChannelRegistry::new(&NotifyConfig::default(), Arc::new(TemplateRenderer::new()))
            .with_external(ChannelType::Email, registered);

        let evaluator = AlertEvaluator::new(
            store.clone(),
            queue,
            Arc::new(Connections),
            Arc::new(Dispatcher::new(registry)),
            Arc::new(TracingAuditSink),
            Duration::from_secs(30),
        );
        Self {
            evaluator,
            store,
            source,
            email: counting,
            alert_id,
            shutdown,
        }
    }

    async fn check(&self, at: DateTime<Utc>) -> CheckOutcome {
        self.evaluator
            .check(self.alert_id, at, &self.shutdown)
            .await
            .unwrap()
    }

    fn sent(&self) -> usize {
        self.email.sent.load(Ordering::SeqCst)
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// ── Evaluation ──

#[test]
fn evaluate_formats_messages() {
    let mut row = Row::new();
    row.insert("value".into(), serde_json::json!("150"));
    let eval = evaluate(&row, "value", ">", 100.0).unwrap();
    assert!(eval.triggered);
    assert_eq!(
        eval.message,
        "Alert triggered: value > 100.00 (value: 150.00, threshold: 100.00)"
    );

    let eval = evaluate(&row, "value", "<=", 100.0).unwrap();
    assert_eq!(eval.message, "Alert OK: value 150.00 does not trigger condition");

    assert_eq!(
        evaluate(&row, "value", "~", 1.0).unwrap_err(),
        EvalError::UnknownOperator("~".into())
    );
    assert_eq!(
        evaluate(&row, "depth", ">", 1.0).unwrap_err(),
        EvalError::ColumnNotFound("depth".into())
    );
}

// ── Scheduled checks ──

#[tokio::test(start_paused = true)]
async fn trigger_respects_cooldown_across_recovery() {
    let h = Harness::new(|_| {});

    let first = h.check(t0()).await;
    assert_eq!(first.state, AlertState::Triggered);
    assert_eq!(first.history.status, HistoryStatus::Triggered);
    assert_eq!(first.notifications.len(), 1);
    assert_eq!(first.notifications[0].status, DeliveryStatus::Sent);
    assert_eq!(h.sent(), 1);

    let alert = h.store.alert();
    assert_eq!(alert.trigger_count, 1);
    assert_eq!(alert.last_triggered_at, Some(t0()));
    assert_eq!(alert.last_notified_at, Some(t0()));
    assert_eq!(alert.next_run_at, Some(minutes(5)));
    assert_eq!(alert.last_status.as_deref(), Some("TRIGGERED"));

    // Still inside the 10 minute cooldown.
    h.source.set(Some(serde_json::json!(160)));
    let second = h.check(minutes(5)).await;
    assert_eq!(second.state, AlertState::Triggered);
    assert!(second.notifications.is_empty());
    assert_eq!(h.sent(), 1);
    assert_eq!(h.store.alert().trigger_count, 1);

    h.source.set(Some(serde_json::json!(80)));
    let third = h.check(minutes(10)).await;
    assert_eq!(third.state, AlertState::Ok);
    assert_eq!(
        third.history.message.as_deref(),
        Some("Alert OK: value 80.00 does not trigger condition")
    );
    assert!(third.notifications.is_empty());

    h.source.set(Some(serde_json::json!(200)));
    let fourth = h.check(minutes(15)).await;
    assert_eq!(fourth.state, AlertState::Triggered);
    assert_eq!(fourth.notifications.len(), 1);
    assert_eq!(h.sent(), 2);

    let alert = h.store.alert();
    assert_eq!(alert.trigger_count, 2);
    assert_eq!(alert.notification_count, 2);
    assert_eq!(alert.last_value, Some(200.0));
    assert_eq!(alert.last_notified_at, Some(minutes(15)));
    assert_eq!(alert.next_run_at, Some(minutes(20)));
    assert_eq!(h.store.histories().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn query_failure_records_error_history() {
    let h = Harness::new(|_| {});
    h.source.set(None);

    let outcome = h.check(t0()).await;
    assert_eq!(outcome.state, AlertState::Error);
    assert_eq!(outcome.history.status, HistoryStatus::Error);
    assert_eq!(
        outcome.history.error_message.as_deref(),
        Some("query execution failed: relation \"metrics\" does not exist")
    );
    assert!(outcome.notifications.is_empty());

    let alert = h.store.alert();
    assert_eq!(alert.state, AlertState::Error);
    assert!(alert.last_error.is_some());
    assert_eq!(alert.last_run_at, Some(t0()));
    assert_eq!(alert.next_run_at, Some(minutes(5)));

    // Recovery from ERROR follows the predicate.
    h.source.set(Some(serde_json::json!(150)));
    let outcome = h.check(minutes(5)).await;
    assert_eq!(outcome.state, AlertState::Triggered);
    assert!(h.store.alert().last_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn non_numeric_value_is_an_evaluation_error() {
    let h = Harness::new(|_| {});
    h.source.set(Some(serde_json::json!("n/a")));

    let outcome = h.check(t0()).await;
    assert_eq!(outcome.state, AlertState::Error);
    assert_eq!(
        outcome.history.message.as_deref(),
        Some("column value value 'n/a' is not numeric")
    );
}

#[tokio::test(start_paused = true)]
async fn muted_alert_evaluates_without_notifying() {
    let h = Harness::new(|a| {
        a.state = AlertState::Muted;
        a.is_muted = true;
        a.muted_until = Some(minutes(30));
    });

    let outcome = h.check(t0()).await;
    assert_eq!(outcome.state, AlertState::Muted);
    assert_eq!(outcome.history.status, HistoryStatus::Triggered);
    assert!(outcome.notifications.is_empty());
    assert_eq!(h.store.alert().last_status.as_deref(), Some("TRIGGERED"));

    // Mute window over: restored from last_status and notified.
    let outcome = h.check(minutes(30)).await;
    assert_eq!(outcome.state, AlertState::Triggered);
    assert_eq!(outcome.notifications.len(), 1);
    let alert = h.store.alert();
    assert!(!alert.is_muted);
    assert!(alert.muted_until.is_none());
}

#[tokio::test(start_paused = true)]
async fn acknowledged_holds_while_condition_is_true() {
    let h = Harness::new(|a| a.state = AlertState::Acknowledged);

    let outcome = h.check(t0()).await;
    assert_eq!(outcome.state, AlertState::Acknowledged);
    assert!(outcome.notifications.is_empty());
    assert_eq!(h.sent(), 0);

    h.source.set(Some(serde_json::json!(1)));
    assert_eq!(h.check(minutes(5)).await.state, AlertState::Ok);
}

#[tokio::test(start_paused = true)]
async fn mute_during_the_query_is_kept_and_suppresses_notification() {
    let h = Harness::new(|_| {});
    let store = h.store.clone();
    h.source.while_querying(move || {
        let mut alert = store.alert.lock().unwrap();
        alert.state = AlertState::Muted;
        alert.is_muted = true;
        alert.muted_until = None;
    });

    let outcome = h.check(t0()).await;
    assert_eq!(outcome.state, AlertState::Muted);
    assert_eq!(outcome.history.status, HistoryStatus::Triggered);
    assert!(outcome.notifications.is_empty());
    assert_eq!(h.sent(), 0);

    let alert = h.store.alert();
    assert_eq!(alert.state, AlertState::Muted);
    assert!(alert.is_muted);
    assert_eq!(alert.trigger_count, 0);
    assert!(alert.last_notified_at.is_none());
    assert_eq!(alert.last_status.as_deref(), Some("TRIGGERED"));
    assert_eq!(alert.last_run_at, Some(t0()));
}

#[tokio::test(start_paused = true)]
async fn acknowledgement_during_the_query_is_kept() {
    let h = Harness::new(|a| a.state = AlertState::Triggered);
    let store = h.store.clone();
    h.source.while_querying(move || {
        store.alert.lock().unwrap().state = AlertState::Acknowledged;
    });

    let outcome = h.check(t0()).await;
    assert_eq!(outcome.state, AlertState::Acknowledged);
    assert!(outcome.notifications.is_empty());
    assert_eq!(h.store.alert().state, AlertState::Acknowledged);
}

#[tokio::test(start_paused = true)]
async fn stalled_delivery_is_abandoned_at_the_check_deadline() {
    let h = Harness::with_email(|_| {}, Some(Arc::new(StalledNotifier)));
    let started = tokio::time::Instant::now();

    let outcome = h.check(t0()).await;

    assert!(started.elapsed() <= Duration::from_secs(30));
    assert_eq!(outcome.state, AlertState::Triggered);
    assert_eq!(outcome.notifications.len(), 1);
    let log = &outcome.notifications[0];
    assert_eq!(log.status, DeliveryStatus::Failed);
    assert_eq!(log.error.as_deref(), Some(CANCELLED_MESSAGE));
    assert!(log.sent_at.is_none());

    // The abandoned attempt still starts the cooldown.
    assert_eq!(h.store.alert().last_notified_at, Some(t0()));
    assert!(h.check(minutes(5)).await.notifications.is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_delivery_is_logged_and_starts_cooldown() {
    let h = Harness::new(|_| {});
    h.email.fail.store(true, Ordering::SeqCst);

    let outcome = h.check(t0()).await;
    assert_eq!(outcome.notifications.len(), 1);
    assert_eq!(outcome.notifications[0].status, DeliveryStatus::Failed);
    assert!(outcome.notifications[0].sent_at.is_none());
    assert_eq!(h.store.alert().last_notified_at, Some(t0()));

    assert!(h.check(minutes(5)).await.notifications.is_empty());
}

#[tokio::test(start_paused = true)]
async fn disabled_channels_are_skipped() {
    let h = Harness::new(|a| a.channels[0].enabled = false);
    let outcome = h.check(t0()).await;
    assert_eq!(outcome.state, AlertState::Triggered);
    assert!(outcome.notifications.is_empty());
    assert_eq!(h.sent(), 0);
    assert!(h.store.alert().last_notified_at.is_none());
}

#[tokio::test(start_paused = true)]
async fn inactive_alert_is_rejected() {
    let h = Harness::new(|a| a.is_active = false);
    let err = h
        .evaluator
        .check(h.alert_id, t0(), &h.shutdown)
        .await
        .unwrap_err();
    assert!(matches!(err, AlertError::Inactive));
    assert!(h.store.histories().is_empty());
}

// ── Applying a check ──

fn triggered_at(value: f64) -> Result<Evaluation, EvalError> {
    Ok(Evaluation {
        value,
        triggered: true,
        message: format!("Alert triggered: value > 100.00 (value: {value:.2}, threshold: 100.00)"),
    })
}

#[test]
fn unusable_schedule_is_retried_a_day_later() {
    let mut alert = test_support::alert();
    alert.schedule = "every other tuesday".into();

    apply_check(&mut alert, &triggered_at(150.0), t0()).unwrap();

    assert_eq!(alert.state, AlertState::Triggered);
    assert_eq!(alert.last_run_at, Some(t0()));
    assert_eq!(alert.next_run_at, Some(t0() + chrono::Duration::days(1)));
}

#[test]
fn expired_mute_lapses_before_the_transition() {
    let mut alert = test_support::alert();
    alert.state = AlertState::Muted;
    alert.is_muted = true;
    alert.muted_until = Some(t0());
    alert.last_status = Some("OK".into());

    apply_check(&mut alert, &triggered_at(150.0), t0()).unwrap();

    assert_eq!(alert.state, AlertState::Triggered);
    assert!(!alert.is_muted);
    assert!(alert.muted_until.is_none());
    assert_eq!(alert.trigger_count, 1);
    assert_eq!(alert.last_triggered_at, Some(t0()));
    assert_eq!(alert.next_run_at, Some(minutes(5)));
}

// ── Ad-hoc test ──

#[tokio::test(start_paused = true)]
async fn test_request_is_not_persisted() {
    let h = Harness::new(|_| {});
    let query_id = h.store.alert().query_id;
    let req = TestAlertRequest {
        query_id,
        target_column: "value".into(),
        operator: ">=".into(),
        threshold: 150.0,
    };

    let response = h.evaluator.test(&req, &h.shutdown).await.unwrap();
    assert!(response.triggered);
    assert_eq!(response.value, Some(150.0));
    assert!(response.row.is_some());

    h.source.set(None);
    let response = h.evaluator.test(&req, &h.shutdown).await.unwrap();
    assert!(!response.triggered);
    assert!(response.message.starts_with("Query error: "));

    h.source.set(Some(serde_json::json!(150)));
    let bad = TestAlertRequest {
        target_column: "missing".into(),
        ..req
    };
    let response = h.evaluator.test(&bad, &h.shutdown).await.unwrap();
    assert_eq!(
        response.message,
        "Evaluation error: column missing not found in query result"
    );

    assert!(h.store.histories().is_empty());
    assert_eq!(h.sent(), 0);
}
