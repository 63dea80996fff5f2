//! Condition builders on [`QueryBuilder`]
//!
//! Conditions are ANDed. Association scopes, STI type filters and finder
//! options all end up here before a backend sees the query.

use serde_json::Value;

use super::builder::QueryBuilder;
use super::types::{QueryOperator, WhereCondition};

impl QueryBuilder {
    /// `column = value`. Null columns never match; use [`where_null`](Self::where_null).
    pub fn where_eq<T>(mut self, column: &str, value: T) -> Self
    where
        T: Into<Value>,
    {
        self.where_conditions
            .push(WhereCondition::new(column, QueryOperator::Equal, Some(value.into())));
        self
    }

    /// `column <op> value` for the single-value operators
    pub fn where_op<T: Into<Value>>(mut self, column: &str, operator: QueryOperator, value: T) -> Self {
        self.where_conditions
            .push(WhereCondition::new(column, operator, Some(value.into())));
        self
    }

    /// `column IN (values)`. An empty list matches nothing.
    pub fn where_in(mut self, column: &str, values: Vec<Value>) -> Self {
        self.where_conditions.push(WhereCondition {
            column: column.to_string(),
            operator: QueryOperator::In,
            value: None,
            values,
        });
        self
    }

    pub fn where_null(mut self, column: &str) -> Self {
        self.where_conditions
            .push(WhereCondition::new(column, QueryOperator::IsNull, None));
        self
    }

    /// Append conditions built elsewhere (declared association conditions, finder options)
    pub fn where_conditions<I>(mut self, conditions: I) -> Self
    where
        I: IntoIterator<Item = WhereCondition>,
    {
        self.where_conditions.extend(conditions);
        self
    }
}
