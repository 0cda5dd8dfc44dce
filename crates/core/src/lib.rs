pub mod audit;
pub mod config;
pub mod error;
pub mod model;
pub mod number;
pub mod schedule;
pub mod validation;

pub use audit::{AuditSink, TracingAuditSink};
pub use config::Config;
pub use error::*;
pub use validation::ValidationResult;

/// A result row keyed by column name, in select-list order.
pub type Row = indexmap::IndexMap<String, serde_json::Value>;
