use cadence_core::{CoreError, ErrorKind, ValidationResult, CANCELLED_MESSAGE};
use cadence_queue::QueueError;
use thiserror::Error;
use uuid::Uuid;

/// Why one evaluation did not produce a value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("column {0} not found in query result")]
    ColumnNotFound(String),

    #[error("column {column} value '{value}' is not numeric")]
    NonNumericColumn { column: String, value: String },

    #[error("unknown operator: {0}")]
    UnknownOperator(String),

    #[error("query returned no rows")]
    EmptyResult,

    #[error("query execution failed: {0}")]
    Query(String),

    #[error("{0}")]
    Dependency(String),

    #[error("{}", CANCELLED_MESSAGE)]
    Cancelled,
}

impl EvalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EvalError::ColumnNotFound(_)
            | EvalError::NonNumericColumn { .. }
            | EvalError::UnknownOperator(_)
            | EvalError::EmptyResult => ErrorKind::Evaluation,
            EvalError::Query(_) | EvalError::Dependency(_) => ErrorKind::Dependency,
            EvalError::Cancelled => ErrorKind::Cancellation,
        }
    }
}

impl From<QueueError> for EvalError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Cancelled => EvalError::Cancelled,
            QueueError::Query(msg) => EvalError::Query(msg),
            other => EvalError::Dependency(other.to_string()),
        }
    }
}

impl From<CoreError> for EvalError {
    fn from(e: CoreError) -> Self {
        EvalError::Dependency(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("alert not found: {0}")]
    NotFound(Uuid),

    #[error("query not found: {0}")]
    QueryNotFound(Uuid),

    #[error("alert is not active")]
    Inactive,

    #[error("validation failed: {0}")]
    Validation(ValidationResult),

    #[error("cannot {action} an alert in state {state}")]
    InvalidTransition { action: &'static str, state: String },

    #[error("a check of alert {0} is already running")]
    Busy(Uuid),

    #[error("store error: {0}")]
    Store(String),

    #[error(transparent)]
    Eval(#[from] EvalError),
}

impl AlertError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AlertError::NotFound(_) | AlertError::QueryNotFound(_) => ErrorKind::NotFound,
            AlertError::Inactive
            | AlertError::Validation(_)
            | AlertError::InvalidTransition { .. }
            | AlertError::Busy(_) => ErrorKind::Configuration,
            AlertError::Store(_) => ErrorKind::Dependency,
            AlertError::Eval(e) => e.kind(),
        }
    }
}

impl From<sqlx::Error> for AlertError {
    fn from(e: sqlx::Error) -> Self {
        AlertError::Store(e.to_string())
    }
}

impl From<CoreError> for AlertError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::Database(db) => AlertError::Store(db.to_string()),
            other => {
                let mut result = ValidationResult::new();
                result.error("schedule", other.to_string());
                AlertError::Validation(result)
            }
        }
    }
}
