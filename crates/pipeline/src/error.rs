//! Pipeline run error types.

use cadence_core::{CoreError, ErrorKind, CANCELLED_MESSAGE};
use cadence_queue::QueueError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline not found: {0}")]
    NotFound(Uuid),

    #[error("invalid pipeline configuration: {0}")]
    Config(String),

    #[error("transform step '{step}' failed: {reason}")]
    Transform { step: String, reason: String },

    #[error("extraction failed: {0}")]
    Extract(String),

    #[error("quality rule violation (severity=FAIL): {rule_type} on column '{column}'")]
    QualityFailure { rule_type: String, column: String },

    #[error("load failed: {0}")]
    Load(String),

    #[error("{0}")]
    Dependency(String),

    #[error("{}", CANCELLED_MESSAGE)]
    Cancelled,

    #[error("store error: {0}")]
    Store(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::NotFound(_) => ErrorKind::NotFound,
            PipelineError::Config(_) => ErrorKind::Configuration,
            PipelineError::Transform { .. } => ErrorKind::Evaluation,
            PipelineError::Extract(_) | PipelineError::Load(_) | PipelineError::Dependency(_) => {
                ErrorKind::Dependency
            }
            PipelineError::QualityFailure { .. } => ErrorKind::QualityFailure,
            PipelineError::Cancelled => ErrorKind::Cancellation,
            PipelineError::Store(_) => ErrorKind::Dependency,
        }
    }

    pub(crate) fn transform(step: &str, reason: impl Into<String>) -> Self {
        PipelineError::Transform {
            step: step.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<QueueError> for PipelineError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Cancelled => PipelineError::Cancelled,
            other => PipelineError::Extract(other.to_string()),
        }
    }
}

impl From<CoreError> for PipelineError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::ConnectionNotFound(id) => {
                PipelineError::Dependency(format!("connection not found: {id}"))
            }
            CoreError::Database(db) => PipelineError::Store(db.to_string()),
            other => PipelineError::Config(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(e: sqlx::Error) -> Self {
        PipelineError::Store(e.to_string())
    }
}
