//! In-memory backend
//!
//! Tables of JSON rows behind a `tokio::sync::Mutex`. Transactions snapshot
//! every table on the outermost `begin` and restore the snapshot on rollback.
//! Custom finder/counter SQL is served by handlers registered per statement.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::core::{DatabaseBackend, JoinedRow};
use crate::error::{ModelError, OrmResult};
use crate::model::{KeyKind, PrimaryKey, Row};
use crate::query::{values_equal, JoinQuery, QueryBuilder};

/// Serves one registered finder statement
pub type SqlHandler = Arc<dyn Fn(&TableView<'_>, &[Value]) -> Vec<Row> + Send + Sync>;

/// Serves one registered counter statement
pub type CountHandler = Arc<dyn Fn(&TableView<'_>, &[Value]) -> u64 + Send + Sync>;

/// Read-only access to the tables for SQL handlers
pub struct TableView<'a> {
    tables: &'a HashMap<String, Table>,
}

impl<'a> TableView<'a> {
    pub fn rows(&self, table: &str) -> &'a [Row] {
        self.tables
            .get(table)
            .map(|t| t.rows.as_slice())
            .unwrap_or(&[])
    }

    /// Rows of `table` matching `query`'s conditions and ordering
    pub fn select(&self, query: &QueryBuilder) -> Vec<Row> {
        select_rows(self.tables, query)
    }
}

/// One write seen by the backend, in order
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Insert { table: String, key: Option<PrimaryKey> },
    Update { table: String, rows: u64 },
    Delete { table: String, rows: u64 },
    Begin,
    Commit,
    Rollback,
}

#[derive(Debug, Clone, Default)]
struct Table {
    rows: Vec<Row>,
    next_id: i64,
}

#[derive(Default)]
struct MemoryState {
    tables: HashMap<String, Table>,
    snapshot: Option<HashMap<String, Table>>,
    depth: usize,
    rollback_only: bool,
    defaults: HashMap<String, Row>,
    finders: HashMap<String, SqlHandler>,
    counters: HashMap<String, CountHandler>,
    failing: HashSet<String>,
    log: Vec<WriteOp>,
}

impl MemoryState {
    fn check_writable(&self, table: &str) -> OrmResult<()> {
        if self.failing.contains(table) {
            return Err(ModelError::Database(format!("write to '{}' failed", table)));
        }
        Ok(())
    }

    fn apply_defaults(&self, table: &str, row: &mut Row) {
        if let Some(defaults) = self.defaults.get(table) {
            for (column, value) in defaults {
                row.entry(column.clone()).or_insert_with(|| value.clone());
            }
        }
    }
}

#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Column defaults applied to inserted rows of `table` (like DDL defaults)
    pub fn with_table_defaults(mut self, table: &str, defaults: Value) -> Self {
        if let Value::Object(defaults) = defaults {
            self.state.get_mut().defaults.insert(table.to_string(), defaults);
        }
        self
    }

    pub fn with_finder_sql<F>(mut self, sql: &str, handler: F) -> Self
    where
        F: Fn(&TableView<'_>, &[Value]) -> Vec<Row> + Send + Sync + 'static,
    {
        self.state.get_mut().finders.insert(sql.to_string(), Arc::new(handler));
        self
    }

    pub fn with_counter_sql<F>(mut self, sql: &str, handler: F) -> Self
    where
        F: Fn(&TableView<'_>, &[Value]) -> u64 + Send + Sync + 'static,
    {
        self.state.get_mut().counters.insert(sql.to_string(), Arc::new(handler));
        self
    }

    /// Load fixture rows verbatim; keys are kept and the id sequence advanced past them
    pub async fn seed(&self, table: &str, rows: Vec<Value>) -> OrmResult<()> {
        let mut state = self.state.lock().await;
        let entry = state.tables.entry(table.to_string()).or_default();
        for value in rows {
            let row = match value {
                Value::Object(row) => row,
                other => {
                    return Err(ModelError::Serialization(format!(
                        "fixture rows must be objects, got {}",
                        other
                    )))
                }
            };
            if let Some(id) = row.get("id").and_then(Value::as_i64) {
                entry.next_id = entry.next_id.max(id);
            }
            entry.rows.push(row);
        }
        debug!(target: "tether::backend", "Seeded {} with {} rows", table, entry.rows.len());
        Ok(())
    }

    /// Snapshot of every row currently in `table`
    pub async fn rows(&self, table: &str) -> Vec<Row> {
        let state = self.state.lock().await;
        state.tables.get(table).map(|t| t.rows.clone()).unwrap_or_default()
    }

    pub async fn writes(&self) -> Vec<WriteOp> {
        self.state.lock().await.log.clone()
    }

    pub async fn clear_writes(&self) {
        self.state.lock().await.log.clear();
    }

    /// Make every write to `table` fail with a database error
    pub async fn fail_writes_to(&self, table: &str) {
        self.state.lock().await.failing.insert(table.to_string());
    }

    pub async fn allow_writes_to(&self, table: &str) {
        self.state.lock().await.failing.remove(table);
    }
}

impl fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBackend").finish_non_exhaustive()
    }
}

fn select_rows(tables: &HashMap<String, Table>, query: &QueryBuilder) -> Vec<Row> {
    let mut rows: Vec<Row> = tables
        .get(query.table())
        .map(|t| t.rows.iter().filter(|r| query.matches(r)).cloned().collect())
        .unwrap_or_default();
    query.sort_rows(&mut rows, |r| r);
    query.window(rows)
}

fn joined_rows(tables: &HashMap<String, Table>, query: &JoinQuery) -> Vec<JoinedRow> {
    let links = match tables.get(&query.join_table) {
        Some(table) => &table.rows,
        None => return Vec::new(),
    };
    let targets = tables
        .get(query.target.table())
        .map(|t| t.rows.as_slice())
        .unwrap_or(&[]);

    let mut joined = Vec::new();
    for link in links {
        let owner = link.get(&query.owner_column).unwrap_or(&Value::Null);
        if owner.is_null() || !values_equal(owner, &query.owner_key) {
            continue;
        }
        let target_key = link.get(&query.target_column).unwrap_or(&Value::Null);
        let found = targets.iter().find(|row| {
            row.get(&query.target_primary_key)
                .map_or(false, |key| !key.is_null() && values_equal(key, target_key))
        });
        if let Some(target) = found {
            if !query.target.matches(target) {
                continue;
            }
            let mut extra = link.clone();
            extra.remove(&query.owner_column);
            extra.remove(&query.target_column);
            joined.push(JoinedRow {
                target: target.clone(),
                join: extra,
            });
        }
    }
    query.target.sort_rows(&mut joined, |j| &j.target);
    query.target.window(joined)
}

#[async_trait]
impl DatabaseBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn select(&self, query: &QueryBuilder) -> OrmResult<Vec<Row>> {
        let state = self.state.lock().await;
        let rows = select_rows(&state.tables, query);
        trace!(target: "tether::backend", "select {} -> {} rows", query.table(), rows.len());
        Ok(rows)
    }

    async fn count(&self, query: &QueryBuilder) -> OrmResult<u64> {
        let state = self.state.lock().await;
        Ok(select_rows(&state.tables, query).len() as u64)
    }

    async fn insert(&self, table: &str, primary_key: &str, key_kind: KeyKind, mut row: Row) -> OrmResult<PrimaryKey> {
        let mut state = self.state.lock().await;
        state.check_writable(table)?;
        state.apply_defaults(table, &mut row);

        let entry = state.tables.entry(table.to_string()).or_default();
        let key = match row.get(primary_key).and_then(PrimaryKey::from_value) {
            Some(existing) => {
                if let Some(id) = existing.as_i64() {
                    entry.next_id = entry.next_id.max(id);
                }
                existing
            }
            None => match key_kind {
                KeyKind::Integer => {
                    entry.next_id += 1;
                    PrimaryKey::Integer(entry.next_id)
                }
                KeyKind::Uuid => PrimaryKey::Uuid(Uuid::new_v4()),
            },
        };
        row.insert(primary_key.to_string(), key.to_value());
        entry.rows.push(row);

        trace!(target: "tether::backend", "insert {} id={}", table, key);
        state.log.push(WriteOp::Insert {
            table: table.to_string(),
            key: Some(key.clone()),
        });
        Ok(key)
    }

    async fn update(&self, query: &QueryBuilder, changes: &Row) -> OrmResult<u64> {
        let mut state = self.state.lock().await;
        state.check_writable(query.table())?;
        let mut affected = 0;
        if let Some(table) = state.tables.get_mut(query.table()) {
            for row in table.rows.iter_mut().filter(|r| query.matches(r)) {
                for (column, value) in changes {
                    row.insert(column.clone(), value.clone());
                }
                affected += 1;
            }
        }
        trace!(target: "tether::backend", "update {} -> {} rows", query.table(), affected);
        state.log.push(WriteOp::Update {
            table: query.table().to_string(),
            rows: affected,
        });
        Ok(affected)
    }

    async fn increment(&self, query: &QueryBuilder, column: &str, by: i64) -> OrmResult<u64> {
        let mut state = self.state.lock().await;
        state.check_writable(query.table())?;
        let mut affected = 0;
        if let Some(table) = state.tables.get_mut(query.table()) {
            for row in table.rows.iter_mut().filter(|r| query.matches(r)) {
                let current = row.get(column).and_then(Value::as_i64).unwrap_or(0);
                row.insert(column.to_string(), Value::from(current + by));
                affected += 1;
            }
        }
        state.log.push(WriteOp::Update {
            table: query.table().to_string(),
            rows: affected,
        });
        Ok(affected)
    }

    async fn delete(&self, query: &QueryBuilder) -> OrmResult<u64> {
        let mut state = self.state.lock().await;
        state.check_writable(query.table())?;
        let mut affected = 0;
        if let Some(table) = state.tables.get_mut(query.table()) {
            let before = table.rows.len();
            table.rows.retain(|r| !query.matches(r));
            affected = (before - table.rows.len()) as u64;
        }
        trace!(target: "tether::backend", "delete {} -> {} rows", query.table(), affected);
        state.log.push(WriteOp::Delete {
            table: query.table().to_string(),
            rows: affected,
        });
        Ok(affected)
    }

    async fn insert_join(&self, table: &str, mut row: Row) -> OrmResult<()> {
        let mut state = self.state.lock().await;
        state.check_writable(table)?;
        state.apply_defaults(table, &mut row);
        state.tables.entry(table.to_string()).or_default().rows.push(row);
        state.log.push(WriteOp::Insert {
            table: table.to_string(),
            key: None,
        });
        Ok(())
    }

    async fn select_through(&self, query: &JoinQuery) -> OrmResult<Vec<JoinedRow>> {
        let state = self.state.lock().await;
        let rows = joined_rows(&state.tables, query);
        trace!(
            target: "tether::backend",
            "select {} through {} -> {} rows",
            query.target.table(),
            query.join_table,
            rows.len()
        );
        Ok(rows)
    }

    async fn count_through(&self, query: &JoinQuery) -> OrmResult<u64> {
        let state = self.state.lock().await;
        Ok(joined_rows(&state.tables, query).len() as u64)
    }

    async fn select_by_sql(&self, sql: &str, params: &[Value]) -> OrmResult<Vec<Row>> {
        let state = self.state.lock().await;
        let handler = state
            .finders
            .get(sql)
            .ok_or_else(|| ModelError::Database(format!("no handler registered for SQL: {}", sql)))?;
        Ok(handler(&TableView { tables: &state.tables }, params))
    }

    async fn count_by_sql(&self, sql: &str, params: &[Value]) -> OrmResult<u64> {
        let state = self.state.lock().await;
        let handler = state
            .counters
            .get(sql)
            .ok_or_else(|| ModelError::Database(format!("no handler registered for SQL: {}", sql)))?;
        Ok(handler(&TableView { tables: &state.tables }, params))
    }

    async fn begin(&self) -> OrmResult<()> {
        let mut state = self.state.lock().await;
        if state.depth == 0 {
            state.snapshot = Some(state.tables.clone());
            state.rollback_only = false;
        }
        state.depth += 1;
        state.log.push(WriteOp::Begin);
        Ok(())
    }

    async fn commit(&self) -> OrmResult<()> {
        let mut state = self.state.lock().await;
        if state.depth == 0 {
            return Err(ModelError::Transaction(
                "commit without an open transaction".to_string(),
            ));
        }
        state.depth -= 1;
        if state.depth > 0 {
            return Ok(());
        }
        let snapshot = state.snapshot.take();
        if state.rollback_only {
            if let Some(tables) = snapshot {
                state.tables = tables;
            }
            state.rollback_only = false;
            state.log.push(WriteOp::Rollback);
            warn!(target: "tether::backend", "Commit refused: a nested scope rolled back");
            return Err(ModelError::Transaction(
                "transaction rolled back by a nested scope".to_string(),
            ));
        }
        state.log.push(WriteOp::Commit);
        Ok(())
    }

    async fn rollback(&self) -> OrmResult<()> {
        let mut state = self.state.lock().await;
        if state.depth == 0 {
            return Err(ModelError::Transaction(
                "rollback without an open transaction".to_string(),
            ));
        }
        state.depth -= 1;
        state.rollback_only = true;
        if state.depth == 0 {
            if let Some(tables) = state.snapshot.take() {
                state.tables = tables;
            }
            state.rollback_only = false;
            state.log.push(WriteOp::Rollback);
        }
        Ok(())
    }

    async fn transaction_depth(&self) -> usize {
        self.state.lock().await.depth
    }
}
