//! Query Builder - table-level criteria passed to a [`DatabaseBackend`](crate::backends::DatabaseBackend)

use std::cmp::Ordering;

use serde_json::Value;

use super::types::*;
use crate::model::Row;

/// Criteria for one table: conditions, ordering and an optional window
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryBuilder {
    pub(crate) table: String,
    pub(crate) where_conditions: Vec<WhereCondition>,
    pub(crate) order_by: Vec<(String, OrderDirection)>,
    pub(crate) limit_count: Option<usize>,
    pub(crate) offset_value: Option<usize>,
}

impl QueryBuilder {
    /// Create a new query against `table`
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn conditions(&self) -> &[WhereCondition] {
        &self.where_conditions
    }

    pub fn ordering(&self) -> &[(String, OrderDirection)] {
        &self.order_by
    }

    pub fn limit_value(&self) -> Option<usize> {
        self.limit_count
    }

    pub fn limit(mut self, count: usize) -> Self {
        self.limit_count = Some(count);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset_value = Some(offset);
        self
    }

    /// True when every condition holds for `row`
    pub fn matches(&self, row: &Row) -> bool {
        self.where_conditions.iter().all(|c| c.matches(row))
    }

    /// Sort rows by the ORDER BY list. Rows that compare equal keep their order.
    pub fn sort_rows<T>(&self, rows: &mut [T], row_of: impl Fn(&T) -> &Row) {
        if self.order_by.is_empty() {
            return;
        }
        rows.sort_by(|a, b| {
            let (a, b) = (row_of(a), row_of(b));
            for (column, direction) in &self.order_by {
                let left = a.get(column).unwrap_or(&Value::Null);
                let right = b.get(column).unwrap_or(&Value::Null);
                let ordering = compare_values(left, right).unwrap_or(Ordering::Equal);
                let ordering = match direction {
                    OrderDirection::Asc => ordering,
                    OrderDirection::Desc => ordering.reverse(),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
    }

    /// Apply OFFSET and LIMIT to an already sorted list
    pub fn window<T>(&self, rows: Vec<T>) -> Vec<T> {
        let offset = self.offset_value.unwrap_or(0);
        let iter = rows.into_iter().skip(offset);
        match self.limit_count {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}

/// Criteria for reading targets through a join table
#[derive(Debug, Clone, PartialEq)]
pub struct JoinQuery {
    pub join_table: String,
    /// Join column referencing the owner
    pub owner_column: String,
    pub owner_key: Value,
    /// Join column referencing the target's primary key
    pub target_column: String,
    pub target_primary_key: String,
    /// Conditions and ordering on the target table
    pub target: QueryBuilder,
}

impl JoinQuery {
    pub fn new(
        join_table: impl Into<String>,
        owner_column: impl Into<String>,
        owner_key: Value,
        target_column: impl Into<String>,
        target_primary_key: impl Into<String>,
        target: QueryBuilder,
    ) -> Self {
        Self {
            join_table: join_table.into(),
            owner_column: owner_column.into(),
            owner_key,
            target_column: target_column.into(),
            target_primary_key: target_primary_key.into(),
            target,
        }
    }
}
