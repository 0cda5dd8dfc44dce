use serde::Serialize;
use thiserror::Error;

/// Failure classes shared by every executor.
///
/// Each crate's error type maps onto one of these through a `kind()` method so
/// callers can decide how to record a failure without matching on crate-local
/// variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Rejected at create/update time (bad cron, missing host, ...).
    Configuration,
    /// A collaborator was missing or unreachable.
    Dependency,
    /// Column missing, non-numeric value, unknown operator.
    Evaluation,
    /// A FAIL-severity quality rule was violated.
    QualityFailure,
    /// Retryable transport failure.
    Transient,
    /// Context cancelled or deadline exceeded.
    Cancellation,
    /// An internal invariant was broken.
    Programmer,
    /// Unknown id.
    NotFound,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Dependency => "dependency",
            ErrorKind::Evaluation => "evaluation",
            ErrorKind::QualityFailure => "quality_failure",
            ErrorKind::Transient => "transient",
            ErrorKind::Cancellation => "cancellation",
            ErrorKind::Programmer => "programmer",
            ErrorKind::NotFound => "not_found",
        };
        f.write_str(s)
    }
}

/// Message recorded on every run that ends through cancellation or timeout.
pub const CANCELLED_MESSAGE: &str = "cancelled or timed out";

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("unsupported schedule: {0}")]
    UnsupportedSchedule(String),

    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("invalid time_of_day '{0}': expected HH:MM")]
    InvalidTimeOfDay(String),

    #[error("{0}")]
    InvalidField(String),

    #[error("unknown {kind} '{value}'")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::UnsupportedSchedule(_)
            | CoreError::InvalidCron { .. }
            | CoreError::InvalidTimeOfDay(_)
            | CoreError::InvalidField(_)
            | CoreError::UnknownVariant { .. } => ErrorKind::Configuration,
            CoreError::ConnectionNotFound(_) | CoreError::Database(_) => ErrorKind::Dependency,
        }
    }

    pub(crate) fn unknown(kind: &'static str, value: impl Into<String>) -> Self {
        CoreError::UnknownVariant {
            kind,
            value: value.into(),
        }
    }
}
