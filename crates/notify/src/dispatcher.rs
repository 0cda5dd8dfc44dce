//! Fans a notification out to an alert's channels.
//!
//! Channels are attempted concurrently. A channel that cannot be built or
//! fails to deliver yields a failed result; the others still go out.

use std::time::Instant;

use cadence_core::model::ChannelType;
use futures::future::join_all;
use serde_json::Value;

use crate::registry::ChannelRegistry;
use crate::traits::{DispatchResult, Notification};

/// One enabled channel on an alert.
#[derive(Debug, Clone)]
pub struct ChannelTarget {
    pub channel_type: ChannelType,
    pub config: Value,
}

pub struct Dispatcher {
    registry: ChannelRegistry,
}

impl Dispatcher {
    pub fn new(registry: ChannelRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// Returns one result per target, in target order.
    pub async fn dispatch(
        &self,
        alert_id: &str,
        targets: &[ChannelTarget],
        notification: &Notification,
    ) -> Vec<DispatchResult> {
        if targets.is_empty() {
            tracing::debug!(alert_id, "no notification channels configured");
            return Vec::new();
        }

        let attempts = targets.iter().map(|target| async move {
            let start = Instant::now();
            let outcome = match self.registry.build(target.channel_type, &target.config) {
                Ok(notifier) => notifier.send(notification).await,
                Err(e) => Err(e),
            };
            let duration_ms = start.elapsed().as_millis() as u64;

            let (success, error) = match outcome {
                Ok(()) => {
                    tracing::info!(
                        alert_id,
                        channel = target.channel_type.as_str(),
                        duration_ms,
                        "notification delivered"
                    );
                    (true, None)
                }
                Err(e) => {
                    tracing::warn!(
                        alert_id,
                        channel = target.channel_type.as_str(),
                        error = %e,
                        duration_ms,
                        "notification delivery failed"
                    );
                    (false, Some(e.to_string()))
                }
            };

            DispatchResult {
                channel: target.channel_type,
                success,
                error,
                duration_ms,
            }
        });

        join_all(attempts).await
    }
}
