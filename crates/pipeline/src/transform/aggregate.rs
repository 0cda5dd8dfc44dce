//! Group-by with COUNT / SUM / AVG / MIN / MAX.

use cadence_core::number::coerce_f64;
use cadence_core::Row;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

use super::composite_key;

#[derive(Debug, Clone, Deserialize)]
pub struct AggregateConfig {
    #[serde(rename = "groupBy", alias = "group_by")]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub aggregates: Vec<AggregateSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregateSpec {
    #[serde(default)]
    pub column: String,
    pub function: String,
    #[serde(default)]
    pub alias: Option<String>,
}

impl AggregateSpec {
    /// Output column: the alias, or `<function>_<column>`.
    pub fn output_name(&self) -> String {
        match self.alias.as_deref() {
            Some(a) if !a.is_empty() => a.to_string(),
            _ => format!("{}_{}", self.function, self.column),
        }
    }
}

pub(super) fn apply(rows: Vec<Row>, config: &AggregateConfig) -> Result<Vec<Row>, String> {
    if config.group_by.is_empty() {
        return Err("aggregate requires a non-empty 'groupBy' array".into());
    }

    // Insertion order of the IndexMap is first-seen group order.
    let mut groups: IndexMap<Vec<String>, Vec<Row>> = IndexMap::new();
    for row in rows {
        groups
            .entry(composite_key(&row, &config.group_by))
            .or_default()
            .push(row);
    }

    let out = groups
        .into_values()
        .map(|members| {
            let mut out = Row::new();
            for col in &config.group_by {
                let v = members[0].get(col).cloned().unwrap_or(Value::Null);
                out.insert(col.clone(), v);
            }
            for spec in &config.aggregates {
                out.insert(spec.output_name(), compute(&members, spec));
            }
            out
        })
        .collect();
    Ok(out)
}

fn compute(rows: &[Row], spec: &AggregateSpec) -> Value {
    let values = || {
        rows.iter()
            .map(|r| coerce_f64(r.get(&spec.column).unwrap_or(&Value::Null)))
    };
    match spec.function.trim().to_ascii_uppercase().as_str() {
        "COUNT" => Value::from(rows.len() as u64),
        "SUM" => Value::from(values().sum::<f64>()),
        "AVG" => {
            if rows.is_empty() {
                Value::from(0.0)
            } else {
                Value::from(values().sum::<f64>() / rows.len() as f64)
            }
        }
        "MIN" => values().reduce(f64::min).map_or(Value::Null, Value::from),
        "MAX" => values().reduce(f64::max).map_or(Value::Null, Value::from),
        _ => Value::Null,
    }
}
