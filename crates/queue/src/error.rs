//! Admission queue error types.

use cadence_core::{ErrorKind, CANCELLED_MESSAGE};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The caller's token fired before or during execution.
    #[error("{}", CANCELLED_MESSAGE)]
    Cancelled,

    /// The dispatcher dropped the job without answering (shutdown).
    #[error("admission queue closed")]
    Closed,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("query error: {0}")]
    Query(String),
}

impl QueueError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueueError::Cancelled => ErrorKind::Cancellation,
            QueueError::Closed => ErrorKind::Programmer,
            QueueError::Connection(_) => ErrorKind::Dependency,
            QueueError::Query(_) => ErrorKind::Evaluation,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, QueueError::Cancelled)
    }
}

impl From<sqlx::Error> for QueueError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Configuration(_) => QueueError::Connection(e.to_string()),
            other => QueueError::Query(other.to_string()),
        }
    }
}
