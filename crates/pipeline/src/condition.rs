//! Row-level filter conditions.

use cadence_core::number::{coerce_f64, stringify};
use serde_json::Value;

/// Evaluate `cell <operator> expected`.
///
/// Equality and text operators compare string forms; ordering operators
/// coerce both sides to `f64` (non-numeric text counts as zero). Unknown
/// operators keep the row.
pub fn evaluate_condition(cell: &Value, operator: &str, expected: &Value) -> bool {
    let cell_str = stringify(cell);
    let expected_str = stringify(expected);

    match operator.trim().to_ascii_lowercase().as_str() {
        "eq" | "=" | "==" => text_or_number_eq(cell, expected, &cell_str, &expected_str),
        "neq" | "!=" | "<>" => !text_or_number_eq(cell, expected, &cell_str, &expected_str),
        "contains" => cell_str
            .to_lowercase()
            .contains(&expected_str.to_lowercase()),
        "not_contains" => !cell_str
            .to_lowercase()
            .contains(&expected_str.to_lowercase()),
        "starts_with" => cell_str
            .to_lowercase()
            .starts_with(&expected_str.to_lowercase()),
        "gt" | ">" => coerce_f64(cell) > coerce_f64(expected),
        "gte" | ">=" => coerce_f64(cell) >= coerce_f64(expected),
        "lt" | "<" => coerce_f64(cell) < coerce_f64(expected),
        "lte" | "<=" => coerce_f64(cell) <= coerce_f64(expected),
        "is_null" => cell.is_null() || cell_str.is_empty(),
        "is_not_null" => !cell.is_null() && !cell_str.is_empty(),
        _ => true,
    }
}

// `15.0` and `15` print differently as JSON; treat two numbers as equal
// when their values are.
fn text_or_number_eq(cell: &Value, expected: &Value, cell_str: &str, expected_str: &str) -> bool {
    match (cell, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => cell_str == expected_str,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn equality_compares_string_forms() {
        assert!(evaluate_condition(&json!("active"), "eq", &json!("active")));
        assert!(evaluate_condition(&json!(5), "==", &json!("5")));
        assert!(evaluate_condition(&json!(15.0), "=", &json!(15)));
        assert!(evaluate_condition(&json!("a"), "<>", &json!("b")));
        assert!(!evaluate_condition(&json!("a"), "neq", &json!("a")));
    }

    #[test]
    fn text_operators_ignore_case() {
        assert!(evaluate_condition(&json!("Hello World"), "contains", &json!("WORLD")));
        assert!(evaluate_condition(&json!("Hello"), "not_contains", &json!("xyz")));
        assert!(evaluate_condition(&json!("Hello"), "starts_with", &json!("he")));
        assert!(!evaluate_condition(&json!("Hello"), "starts_with", &json!("lo")));
    }

    #[test]
    fn ordering_coerces_to_numbers() {
        assert!(evaluate_condition(&json!("15"), ">", &json!(10)));
        assert!(evaluate_condition(&json!(10), "gte", &json!("10")));
        assert!(evaluate_condition(&json!("abc"), "lt", &json!(1)));
        assert!(!evaluate_condition(&json!(null), "gt", &json!(0)));
        assert!(evaluate_condition(&json!(2.5), "lte", &json!(2.5)));
    }

    #[test]
    fn null_checks_treat_empty_string_as_null() {
        assert!(evaluate_condition(&json!(null), "is_null", &Value::Null));
        assert!(evaluate_condition(&json!(""), "is_null", &Value::Null));
        assert!(evaluate_condition(&json!(0), "is_not_null", &Value::Null));
        assert!(!evaluate_condition(&json!(""), "is_not_null", &Value::Null));
    }

    #[test]
    fn unknown_operator_keeps_row() {
        assert!(evaluate_condition(&json!(1), "between", &json!(2)));
    }
}
