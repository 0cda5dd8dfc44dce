//! Threshold comparison operators.

use std::fmt;
use std::str::FromStr;

use crate::error::EvalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Gt,
    Lt,
    Eq,
    Gte,
    Lte,
    Neq,
}

impl Operator {
    pub const ALL: [&'static str; 7] = [">", "<", "=", "==", ">=", "<=", "!="];

    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Eq => "=",
            Operator::Gte => ">=",
            Operator::Lte => "<=",
            Operator::Neq => "!=",
        }
    }

    /// Exact float comparison; equality has no epsilon.
    #[allow(clippy::float_cmp)]
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Operator::Gt => value > threshold,
            Operator::Lt => value < threshold,
            Operator::Eq => value == threshold,
            Operator::Gte => value >= threshold,
            Operator::Lte => value <= threshold,
            Operator::Neq => value != threshold,
        }
    }

    /// `"<column> <op> <threshold>"` with the threshold at two decimals.
    pub fn describe(&self, column: &str, threshold: f64) -> String {
        format!("{column} {} {threshold:.2}", self.symbol())
    }
}

impl FromStr for Operator {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            ">" => Ok(Operator::Gt),
            "<" => Ok(Operator::Lt),
            "=" | "==" => Ok(Operator::Eq),
            ">=" => Ok(Operator::Gte),
            "<=" => Ok(Operator::Lte),
            "!=" => Ok(Operator::Neq),
            other => Err(EvalError::UnknownOperator(other.to_string())),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}
