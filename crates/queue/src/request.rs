//! Query requests, priorities and results.

use std::fmt;

use cadence_core::model::Connection;
use cadence_core::Row;
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// Dispatch tier. Lower value dispatches first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical = 0,
    High = 1,
    #[default]
    Normal = 2,
    Low = 3,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        };
        f.write_str(s)
    }
}

/// One source query to run against an external connection.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub connection: Connection,
    pub sql: String,
    /// Positional parameters bound in order.
    pub params: Vec<serde_json::Value>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl QueryRequest {
    pub fn new(connection: Connection, sql: impl Into<String>) -> Self {
        Self {
            connection,
            sql: sql.into(),
            params: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_params(mut self, params: Vec<serde_json::Value>) -> Self {
        self.params = params;
        self
    }

    /// SQL actually sent to the server: the user query wrapped in a
    /// sub-select when a limit or offset applies.
    pub fn effective_sql(&self) -> String {
        let sql = self.sql.trim().trim_end_matches(';');
        if self.limit.is_none() && self.offset.is_none() {
            return sql.to_string();
        }
        let mut wrapped = format!("SELECT * FROM ({sql}) AS _sub");
        if let Some(limit) = self.limit {
            wrapped.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = self.offset {
            wrapped.push_str(&format!(" OFFSET {offset}"));
        }
        wrapped
    }
}

/// Materialised result of one query. Execution failures are carried in
/// `error` rather than surfaced as a queue error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub row_count: usize,
    /// Blob columns count their length; every other value counts 8.
    pub bytes: u64,
    pub execution_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResult {
    pub fn from_rows(columns: Vec<String>, rows: Vec<Row>, bytes: u64) -> Self {
        Self {
            columns,
            row_count: rows.len(),
            rows,
            bytes,
            execution_time_ms: 0,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            execution_time_ms,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Turn a result carrying an execution error into `Err`.
    pub fn into_result(self) -> Result<Self, QueueError> {
        match self.error {
            Some(e) => Err(QueueError::Query(e)),
            None => Ok(self),
        }
    }
}
