//! Query Builder ORDER BY operations

use super::builder::QueryBuilder;
use super::types::*;

impl QueryBuilder {
    /// Add ORDER BY clause (ascending)
    pub fn order_by(mut self, column: &str) -> Self {
        self.order_by.push((column.to_string(), OrderDirection::Asc));
        self
    }

    /// Add ORDER BY clause (descending)
    pub fn order_by_desc(mut self, column: &str) -> Self {
        self.order_by.push((column.to_string(), OrderDirection::Desc));
        self
    }

    /// Append a parsed ORDER BY list
    pub fn order_by_clauses(mut self, clauses: &[(String, OrderDirection)]) -> Self {
        self.order_by.extend(clauses.iter().cloned());
        self
    }
}

/// Parse an order clause such as `"name DESC, id"`
pub fn parse_order(clause: &str) -> Vec<(String, OrderDirection)> {
    clause
        .split(',')
        .filter_map(|part| {
            let mut words = part.split_whitespace();
            let column = words.next()?;
            let direction = match words.next() {
                Some(dir) if dir.eq_ignore_ascii_case("desc") => OrderDirection::Desc,
                _ => OrderDirection::Asc,
            };
            Some((column.to_string(), direction))
        })
        .collect()
}
