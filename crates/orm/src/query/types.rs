//! Query Types - criteria handed to a backend and their evaluation against rows

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::Row;

/// Query operator types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryOperator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Like,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

impl fmt::Display for QueryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryOperator::Equal => write!(f, "="),
            QueryOperator::NotEqual => write!(f, "!="),
            QueryOperator::GreaterThan => write!(f, ">"),
            QueryOperator::GreaterThanOrEqual => write!(f, ">="),
            QueryOperator::LessThan => write!(f, "<"),
            QueryOperator::LessThanOrEqual => write!(f, "<="),
            QueryOperator::Like => write!(f, "LIKE"),
            QueryOperator::In => write!(f, "IN"),
            QueryOperator::NotIn => write!(f, "NOT IN"),
            QueryOperator::IsNull => write!(f, "IS NULL"),
            QueryOperator::IsNotNull => write!(f, "IS NOT NULL"),
        }
    }
}

/// Where clause condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhereCondition {
    pub column: String,
    pub operator: QueryOperator,
    pub value: Option<Value>,
    pub values: Vec<Value>, // For IN, NOT IN
}

impl WhereCondition {
    pub fn new(column: impl Into<String>, operator: QueryOperator, value: Option<Value>) -> Self {
        Self {
            column: column.into(),
            operator,
            value,
            values: Vec::new(),
        }
    }

    /// Condition from a scope entry: `null` is IS NULL, arrays are IN
    pub fn from_pair(column: &str, value: &Value) -> Self {
        match value {
            Value::Null => Self::new(column, QueryOperator::IsNull, None),
            Value::Array(values) => Self {
                column: column.to_string(),
                operator: QueryOperator::In,
                value: None,
                values: values.clone(),
            },
            other => Self::new(column, QueryOperator::Equal, Some(other.clone())),
        }
    }

    /// Evaluate against a row. Missing columns read as `null`.
    pub fn matches(&self, row: &Row) -> bool {
        let actual = row.get(&self.column).unwrap_or(&Value::Null);
        let expected = self.value.as_ref().unwrap_or(&Value::Null);
        match self.operator {
            QueryOperator::IsNull => actual.is_null(),
            QueryOperator::IsNotNull => !actual.is_null(),
            QueryOperator::Equal => !actual.is_null() && values_equal(actual, expected),
            QueryOperator::NotEqual => !actual.is_null() && !values_equal(actual, expected),
            QueryOperator::GreaterThan => compare_values(actual, expected) == Some(Ordering::Greater),
            QueryOperator::GreaterThanOrEqual => matches!(
                compare_values(actual, expected),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            QueryOperator::LessThan => compare_values(actual, expected) == Some(Ordering::Less),
            QueryOperator::LessThanOrEqual => matches!(
                compare_values(actual, expected),
                Some(Ordering::Less | Ordering::Equal)
            ),
            QueryOperator::Like => match (actual.as_str(), expected.as_str()) {
                (Some(text), Some(pattern)) => like(text, pattern),
                _ => false,
            },
            QueryOperator::In => self.values.iter().any(|v| values_equal(actual, v)),
            QueryOperator::NotIn => {
                !actual.is_null() && !self.values.iter().any(|v| values_equal(actual, v))
            }
        }
    }
}

/// Order by direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderDirection {
    Asc,
    Desc,
}

impl fmt::Display for OrderDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderDirection::Asc => write!(f, "ASC"),
            OrderDirection::Desc => write!(f, "DESC"),
        }
    }
}

/// Equality that treats `2`, `2.0` and `"2"` as the same key
pub fn values_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
            s.trim().parse::<f64>().ok() == n.as_f64()
        }
        _ => false,
    }
}

/// Total-ish ordering used for ORDER BY; `null` sorts first
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Null, _) => Some(Ordering::Less),
        (_, Value::Null) => Some(Ordering::Greater),
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn like(text: &str, pattern: &str) -> bool {
    let parts: Vec<&str> = pattern.split('%').collect();
    if parts.len() == 1 {
        return text == pattern;
    }
    let mut rest = text;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(tail) => rest = tail,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}
