//! Strict numeric extraction of an alert's target column.

use cadence_core::number::{stringify, Number};
use cadence_core::Row;

use crate::error::EvalError;

/// Read `column` from `row` as `f64`.
///
/// Integers widen, numeric strings parse, anything else is
/// [`EvalError::NonNumericColumn`]. A missing column is
/// [`EvalError::ColumnNotFound`].
pub fn numeric_value(row: &Row, column: &str) -> Result<f64, EvalError> {
    let value = row
        .get(column)
        .ok_or_else(|| EvalError::ColumnNotFound(column.to_string()))?;
    Number::from_value(value)
        .as_f64()
        .ok_or_else(|| EvalError::NonNumericColumn {
            column: column.to_string(),
            value: stringify(value),
        })
}
