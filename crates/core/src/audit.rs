//! Fire-and-forget audit recording.

use serde_json::Value;
use tracing::info;

/// Receives audit events from the scheduled executors. Implementations must
/// swallow their own failures.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &str, metadata: &Value);
}

/// Emits each audit event as a `tracing` event under the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &str, metadata: &Value) {
        info!(target: "audit", event, metadata = %metadata, "audit event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording(Mutex<Vec<String>>);

    impl AuditSink for Recording {
        fn record(&self, event: &str, _metadata: &Value) {
            if let Ok(mut events) = self.0.lock() {
                events.push(event.to_string());
            }
        }
    }

    #[test]
    fn sinks_are_object_safe() {
        let sink: Box<dyn AuditSink> = Box::new(Recording::default());
        sink.record("alert.created", &serde_json::json!({"id": 1}));
        TracingAuditSink.record("alert.deleted", &Value::Null);
    }
}
