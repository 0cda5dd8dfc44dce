//! Numeric view over loosely typed query values.
//!
//! Source rows arrive as JSON values. Alert evaluation needs a strict
//! conversion (non-numeric is an error) while pipeline transforms use a
//! lenient one (non-numeric counts as zero). Both go through [`Number`].

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
    /// A string whose trimmed content parsed as a number.
    ParsedFromString(f64),
    NonNumeric,
}

impl Number {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Number::Int(i)
                } else {
                    n.as_f64().map(Number::Float).unwrap_or(Number::NonNumeric)
                }
            }
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(Number::ParsedFromString)
                .unwrap_or(Number::NonNumeric),
            _ => Number::NonNumeric,
        }
    }

    /// Strict conversion: `None` for anything that is not a number.
    pub fn as_f64(self) -> Option<f64> {
        match self {
            Number::Int(i) => Some(i as f64),
            Number::Float(f) | Number::ParsedFromString(f) => Some(f),
            Number::NonNumeric => None,
        }
    }

    /// Lenient conversion used by filters and aggregates.
    pub fn or_zero(self) -> f64 {
        self.as_f64().unwrap_or(0.0)
    }

    pub fn is_numeric(self) -> bool {
        !matches!(self, Number::NonNumeric)
    }
}

/// Lenient numeric coercion of a JSON value. Booleans count as 1/0.
pub fn coerce_f64(value: &Value) -> f64 {
    match value {
        Value::Bool(true) => 1.0,
        Value::Bool(false) => 0.0,
        other => Number::from_value(other).or_zero(),
    }
}

/// String form of a value as it would be written to a text column.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_json_values() {
        assert_eq!(Number::from_value(&json!(42)), Number::Int(42));
        assert_eq!(Number::from_value(&json!(1.5)), Number::Float(1.5));
        assert_eq!(
            Number::from_value(&json!(" 3.25 ")),
            Number::ParsedFromString(3.25)
        );
        assert_eq!(Number::from_value(&json!("abc")), Number::NonNumeric);
        assert_eq!(Number::from_value(&json!(null)), Number::NonNumeric);
        assert_eq!(Number::from_value(&json!(true)), Number::NonNumeric);
        assert_eq!(Number::from_value(&json!({"a": 1})), Number::NonNumeric);
    }

    #[test]
    fn nan_strings_are_not_numbers() {
        assert_eq!(Number::from_value(&json!("NaN")), Number::NonNumeric);
        assert_eq!(Number::from_value(&json!("inf")), Number::NonNumeric);
    }

    #[test]
    fn lenient_coercion_defaults_to_zero() {
        assert_eq!(coerce_f64(&json!("hello")), 0.0);
        assert_eq!(coerce_f64(&json!("10")), 10.0);
        assert_eq!(coerce_f64(&json!(true)), 1.0);
        assert_eq!(coerce_f64(&json!(null)), 0.0);
    }

    #[test]
    fn stringify_matches_text_column_form() {
        assert_eq!(stringify(&json!(null)), "");
        assert_eq!(stringify(&json!("x")), "x");
        assert_eq!(stringify(&json!(15)), "15");
        assert_eq!(stringify(&json!(false)), "false");
    }
}
