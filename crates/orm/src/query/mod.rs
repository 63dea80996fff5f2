//! Query Module - backend-neutral criteria for finds, counts, updates and deletes
//!
//! No SQL is generated here; backends interpret the criteria.

pub mod builder;
pub mod ordering;
pub mod types;
pub mod where_clause;

pub use builder::{JoinQuery, QueryBuilder};
pub use ordering::parse_order;
pub use types::{compare_values, values_equal, OrderDirection, QueryOperator, WhereCondition};
