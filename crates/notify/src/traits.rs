//! Notifier trait definition and shared error types.

use std::collections::HashMap;

use cadence_core::model::ChannelType;
use cadence_core::ErrorKind;

use crate::templating::AlertContext;

/// Errors that can occur during notification delivery.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Template rendering failed: {0}")]
    Template(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl NotifyError {
    /// Transport failures and 5xx responses are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            NotifyError::Http(e) => !e.is_builder(),
            NotifyError::Status { status, .. } => *status >= 500,
            NotifyError::Template(_) | NotifyError::Config(_) => false,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            NotifyError::Http(_) | NotifyError::Status { .. } => ErrorKind::Transient,
            NotifyError::Template(_) | NotifyError::Config(_) => ErrorKind::Configuration,
        }
    }
}

/// A rendered notification ready for delivery.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Notification {
    pub subject: String,
    pub body: String,
    /// Flat string metadata (alert id, severity, history id).
    pub metadata: HashMap<String, String>,
    /// Structured context the subject and body were rendered from.
    pub context: AlertContext,
}

/// A channel implementation. Retrying is the implementation's business.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;

    /// Human-readable name for this channel (e.g., "webhook", "slack").
    fn channel_name(&self) -> &str;
}

/// Result of dispatching a notification to a single channel.
#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub channel: ChannelType,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}
