//! Column renames and type casts.

use cadence_core::number::{coerce_f64, stringify};
use cadence_core::Row;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct RenameConfig {
    /// `old name -> new name`.
    pub mappings: IndexMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CastConfig {
    /// `column -> target type`.
    pub casts: IndexMap<String, String>,
}

pub(super) fn rename(mut rows: Vec<Row>, config: &RenameConfig) -> Vec<Row> {
    for row in rows.iter_mut() {
        for (old, new) in &config.mappings {
            if new.is_empty() || old == new {
                continue;
            }
            let Some(idx) = row.get_index_of(old) else {
                continue;
            };
            if let Some((_, value)) = row.shift_remove_index(idx) {
                row.shift_remove(new);
                let at = idx.min(row.len());
                row.shift_insert(at, new.clone(), value);
            }
        }
    }
    rows
}

pub(super) fn cast(mut rows: Vec<Row>, config: &CastConfig) -> Vec<Row> {
    for row in rows.iter_mut() {
        for (column, target) in &config.casts {
            if let Some(value) = row.get_mut(column) {
                *value = cast_value(value, target);
            }
        }
    }
    rows
}

/// Convert one value to `target`. Nulls and unknown targets are unchanged.
pub fn cast_value(value: &Value, target: &str) -> Value {
    if value.is_null() {
        return Value::Null;
    }
    match target.trim().to_ascii_uppercase().as_str() {
        "STRING" | "TEXT" => Value::String(stringify(value)),
        "INT" | "INTEGER" => Value::from(coerce_f64(value).trunc() as i64),
        "FLOAT" | "DOUBLE" | "DECIMAL" => Value::from(coerce_f64(value)),
        "BOOL" | "BOOLEAN" => {
            let s = stringify(value).to_lowercase();
            Value::Bool(matches!(s.as_str(), "true" | "1" | "yes"))
        }
        _ => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::row;
    use serde_json::json;

    #[test]
    fn rename_keeps_column_position() {
        let rows = vec![row(&[("a", json!(1)), ("b", json!(2)), ("c", json!(3))])];
        let config: RenameConfig =
            serde_json::from_value(json!({"mappings": {"b": "beta", "missing": "x"}})).unwrap();
        let out = rename(rows, &config);
        let keys: Vec<&str> = out[0].keys().map(String::as_str).collect();
        assert_eq!(keys, ["a", "beta", "c"]);
        assert_eq!(out[0]["beta"], json!(2));
    }

    #[test]
    fn rename_onto_existing_column_overwrites_it() {
        let rows = vec![row(&[("a", json!(1)), ("b", json!(2))])];
        let config: RenameConfig = serde_json::from_value(json!({"mappings": {"a": "b"}})).unwrap();
        let out = rename(rows, &config);
        assert_eq!(out[0].len(), 1);
        assert_eq!(out[0]["b"], json!(1));
    }

    #[test]
    fn casts_follow_target_vocabulary() {
        assert_eq!(cast_value(&json!(12.9), "INT"), json!(12));
        assert_eq!(cast_value(&json!("-3.7"), "integer"), json!(-3));
        assert_eq!(cast_value(&json!("2.5"), "DECIMAL"), json!(2.5));
        assert_eq!(cast_value(&json!(7), "TEXT"), json!("7"));
        assert_eq!(cast_value(&json!("YES"), "BOOL"), json!(true));
        assert_eq!(cast_value(&json!(1), "BOOLEAN"), json!(true));
        assert_eq!(cast_value(&json!("no"), "BOOLEAN"), json!(false));
        assert_eq!(cast_value(&json!(null), "FLOAT"), json!(null));
        assert_eq!(cast_value(&json!("x"), "UUID"), json!("x"));
    }

    #[test]
    fn cast_skips_missing_columns() {
        let rows = vec![row(&[("a", json!("1"))])];
        let config: CastConfig =
            serde_json::from_value(json!({"casts": {"a": "INT", "z": "INT"}})).unwrap();
        let out = cast(rows, &config);
        assert_eq!(out[0].len(), 1);
        assert_eq!(out[0]["a"], json!(1));
    }
}
