//! Stand-in for channels delivered by other platform services (email,
//! in-app). The rendered notification is logged and counted as sent.

use async_trait::async_trait;
use cadence_notify::{Notification, Notifier, NotifyError};
use tracing::info;

pub struct HandoffNotifier {
    channel: &'static str,
}

impl HandoffNotifier {
    pub fn new(channel: &'static str) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl Notifier for HandoffNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(
            channel = self.channel,
            alert_id = %notification.context.alert_id,
            subject = %notification.subject,
            "notification handed off"
        );
        Ok(())
    }

    fn channel_name(&self) -> &str {
        self.channel
    }
}
