use cadence_core::Row;
use serde::Deserialize;
use serde_json::Value;

use crate::condition::evaluate_condition;

#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    pub column: String,
    pub operator: String,
    #[serde(default)]
    pub value: Value,
}

pub(super) fn apply(rows: Vec<Row>, config: &FilterConfig) -> Vec<Row> {
    rows.into_iter()
        .filter(|row| {
            let cell = row.get(&config.column).unwrap_or(&Value::Null);
            evaluate_condition(cell, &config.operator, &config.value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::row;
    use serde_json::json;

    #[test]
    fn keeps_matching_rows_in_order() {
        let rows = vec![
            row(&[("status", json!("open")), ("n", json!(1))]),
            row(&[("status", json!("closed")), ("n", json!(2))]),
            row(&[("status", json!("open")), ("n", json!(3))]),
        ];
        let config: FilterConfig =
            serde_json::from_value(json!({"column": "status", "operator": "eq", "value": "open"}))
                .unwrap();
        let out = apply(rows, &config);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1]["n"], json!(3));
    }

    #[test]
    fn missing_column_reads_as_null() {
        let rows = vec![row(&[("a", json!(1))])];
        let config: FilterConfig =
            serde_json::from_value(json!({"column": "b", "operator": "is_null"})).unwrap();
        assert_eq!(apply(rows, &config).len(), 1);
    }

    #[test]
    fn config_requires_column_and_operator() {
        assert!(serde_json::from_value::<FilterConfig>(json!({"column": "a"})).is_err());
    }
}
