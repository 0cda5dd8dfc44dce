use std::collections::HashSet;

use cadence_core::Row;
use serde::Deserialize;

use super::composite_key;

#[derive(Debug, Clone, Deserialize)]
pub struct DedupeConfig {
    pub columns: Vec<String>,
}

/// Keep the first row for each distinct key over `columns`.
pub(super) fn apply(rows: Vec<Row>, config: &DedupeConfig) -> Result<Vec<Row>, String> {
    if config.columns.is_empty() {
        return Err("deduplicate requires a non-empty 'columns' array".into());
    }
    let mut seen = HashSet::with_capacity(rows.len());
    Ok(rows
        .into_iter()
        .filter(|row| seen.insert(composite_key(row, &config.columns)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::row;
    use serde_json::json;

    #[test]
    fn keeps_first_occurrence_per_key() {
        let rows = vec![
            row(&[("a", json!("x")), ("b", json!(1)), ("n", json!(1))]),
            row(&[("a", json!("x")), ("b", json!(1)), ("n", json!(2))]),
            row(&[("a", json!("x")), ("b", json!(2)), ("n", json!(3))]),
        ];
        let config = DedupeConfig {
            columns: vec!["a".into(), "b".into()],
        };
        let out = apply(rows, &config).unwrap();
        let ns: Vec<_> = out.iter().map(|r| r["n"].clone()).collect();
        assert_eq!(ns, vec![json!(1), json!(3)]);
    }

    #[test]
    fn key_parts_never_run_together() {
        // Joined into one string these pairs would collide.
        let rows = vec![
            row(&[("a", json!("ab")), ("b", json!("c"))]),
            row(&[("a", json!("a")), ("b", json!("bc"))]),
            row(&[("a", json!("x\u{1f}y")), ("b", json!("z"))]),
            row(&[("a", json!("x")), ("b", json!("y\u{1f}z"))]),
        ];
        let config = DedupeConfig {
            columns: vec!["a".into(), "b".into()],
        };
        assert_eq!(apply(rows, &config).unwrap().len(), 4);
    }

    #[test]
    fn empty_column_list_is_rejected() {
        let config = DedupeConfig { columns: vec![] };
        assert!(apply(vec![], &config).is_err());
    }
}
