//! Core Database Backend Traits
//!
//! The persistence contract the association layer is written against. A
//! backend stores rows per table and interprets [`QueryBuilder`] criteria; it
//! knows nothing about models, associations or callbacks.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::OrmResult;
use crate::model::{KeyKind, PrimaryKey, Row};
use crate::query::{JoinQuery, QueryBuilder};

/// A target row read through a join table, with the join row's extra columns
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedRow {
    pub target: Row,
    /// Join-row columns other than the two key columns
    pub join: Row,
}

/// Abstract table store
///
/// Transactions nest: `begin` inside an open transaction joins it, and a
/// `rollback` at any depth makes the outermost scope roll back.
#[async_trait]
pub trait DatabaseBackend: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Rows matching `query`, ordered and windowed
    async fn select(&self, query: &QueryBuilder) -> OrmResult<Vec<Row>>;

    async fn count(&self, query: &QueryBuilder) -> OrmResult<u64>;

    /// Insert a row. A key already present in `row` is kept, otherwise one is
    /// assigned according to `key_kind`.
    async fn insert(&self, table: &str, primary_key: &str, key_kind: KeyKind, row: Row) -> OrmResult<PrimaryKey>;

    /// Overwrite `changes` on every matching row; returns rows affected
    async fn update(&self, query: &QueryBuilder, changes: &Row) -> OrmResult<u64>;

    /// Add `by` to an integer column on every matching row
    async fn increment(&self, query: &QueryBuilder, column: &str, by: i64) -> OrmResult<u64>;

    async fn delete(&self, query: &QueryBuilder) -> OrmResult<u64>;

    /// Insert a keyless row (join tables)
    async fn insert_join(&self, table: &str, row: Row) -> OrmResult<()>;

    /// Targets linked to an owner through a join table
    async fn select_through(&self, query: &JoinQuery) -> OrmResult<Vec<JoinedRow>>;

    async fn count_through(&self, query: &JoinQuery) -> OrmResult<u64>;

    /// Custom finder statement; `params[0]` is the owner's key
    async fn select_by_sql(&self, sql: &str, params: &[Value]) -> OrmResult<Vec<Row>>;

    /// Custom counter statement; `params[0]` is the owner's key
    async fn count_by_sql(&self, sql: &str, params: &[Value]) -> OrmResult<u64>;

    async fn begin(&self) -> OrmResult<()>;

    async fn commit(&self) -> OrmResult<()>;

    async fn rollback(&self) -> OrmResult<()>;

    /// Current transaction nesting depth
    async fn transaction_depth(&self) -> usize;
}
