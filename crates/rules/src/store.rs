use async_trait::async_trait;
use cadence_core::model::{Alert, AlertHistory, NotificationLog, SavedQuery};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AlertError;

/// Durable alert state used by the evaluator.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// The alert with its channel rows.
    async fn get_alert(&self, id: Uuid) -> Result<Alert, AlertError>;

    async fn get_query(&self, id: Uuid) -> Result<SavedQuery, AlertError>;

    /// Lock the alert row, let `apply` move it on from its current stored
    /// state, write the state and run columns back and insert the history
    /// row, all in one transaction. Returns the alert as written, with its
    /// channels. Notification bookkeeping is left untouched.
    async fn record_evaluation(
        &self,
        alert_id: Uuid,
        history: &AlertHistory,
        apply: &(dyn for<'a> Fn(&'a mut Alert) -> Result<(), AlertError> + Send + Sync),
    ) -> Result<Alert, AlertError>;

    /// Insert notification-log rows, set `last_notified_at` and add the
    /// number of attempts to `notification_count`.
    async fn record_notifications(
        &self,
        alert_id: Uuid,
        logs: &[NotificationLog],
        notified_at: DateTime<Utc>,
    ) -> Result<(), AlertError>;
}
