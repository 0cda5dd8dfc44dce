//! Ordered, in-memory row transforms.
//!
//! Steps run in ascending `order` (stable for equal orders). Each known
//! step type has a typed config; a config that does not deserialize is an
//! error, while an unknown step type passes rows through untouched.

mod aggregate;
mod dedupe;
mod filter;
mod reshape;

use cadence_core::model::TransformStep;
use cadence_core::Row;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::PipelineError;

pub use aggregate::{AggregateConfig, AggregateSpec};
pub use dedupe::DedupeConfig;
pub use filter::FilterConfig;
pub use reshape::{CastConfig, RenameConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformKind {
    Filter,
    Rename,
    Cast,
    Deduplicate,
    Aggregate,
}

impl TransformKind {
    /// `None` for step types this engine does not know.
    pub fn parse(step_type: &str) -> Option<Self> {
        match step_type.trim().to_ascii_uppercase().as_str() {
            "FILTER" => Some(TransformKind::Filter),
            "RENAME" => Some(TransformKind::Rename),
            "CAST" => Some(TransformKind::Cast),
            "DEDUPLICATE" => Some(TransformKind::Deduplicate),
            "AGGREGATE" => Some(TransformKind::Aggregate),
            _ => None,
        }
    }
}

/// Steps in execution order.
pub fn ordered(steps: &[TransformStep]) -> Vec<&TransformStep> {
    let mut sorted: Vec<&TransformStep> = steps.iter().collect();
    sorted.sort_by_key(|s| s.order);
    sorted
}

/// Apply one step to the full row set.
pub fn apply_step(rows: Vec<Row>, step: &TransformStep) -> Result<Vec<Row>, PipelineError> {
    let Some(kind) = TransformKind::parse(&step.step_type) else {
        return Ok(rows);
    };
    match kind {
        TransformKind::Filter => Ok(filter::apply(rows, &config(step)?)),
        TransformKind::Rename => Ok(reshape::rename(rows, &config(step)?)),
        TransformKind::Cast => Ok(reshape::cast(rows, &config(step)?)),
        TransformKind::Deduplicate => dedupe::apply(rows, &config(step)?)
            .map_err(|reason| PipelineError::transform(&step.step_type, reason)),
        TransformKind::Aggregate => aggregate::apply(rows, &config(step)?)
            .map_err(|reason| PipelineError::transform(&step.step_type, reason)),
    }
}

/// Apply every step in order.
pub fn apply_all(mut rows: Vec<Row>, steps: &[TransformStep]) -> Result<Vec<Row>, PipelineError> {
    for step in ordered(steps) {
        rows = apply_step(rows, step)?;
    }
    Ok(rows)
}

/// Check that a known step's config deserializes. Unknown types pass.
pub fn check_step(step: &TransformStep) -> Result<(), PipelineError> {
    match TransformKind::parse(&step.step_type) {
        None => Ok(()),
        Some(TransformKind::Filter) => config::<FilterConfig>(step).map(drop),
        Some(TransformKind::Rename) => config::<RenameConfig>(step).map(drop),
        Some(TransformKind::Cast) => config::<CastConfig>(step).map(drop),
        Some(TransformKind::Deduplicate) => config::<DedupeConfig>(step).map(drop),
        Some(TransformKind::Aggregate) => config::<AggregateConfig>(step).map(drop),
    }
}

fn config<T: DeserializeOwned>(step: &TransformStep) -> Result<T, PipelineError> {
    let raw = if step.config.is_null() {
        Value::Object(Default::default())
    } else {
        step.config.clone()
    };
    serde_json::from_value(raw).map_err(|e| PipelineError::transform(&step.step_type, e.to_string()))
}

/// One stringified value per key column, so no value can spill into the
/// next column's part of the key.
pub(crate) fn composite_key(row: &Row, columns: &[String]) -> Vec<String> {
    columns
        .iter()
        .map(|col| cadence_core::number::stringify(row.get(col).unwrap_or(&Value::Null)))
        .collect()
}

/// Build a row from `(column, value)` pairs.
#[cfg(test)]
pub(crate) fn row(pairs: &[(&str, Value)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}
