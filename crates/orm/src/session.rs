//! Record session
//!
//! The record-level persistence layer: find, save, destroy and reload records
//! of registered models, and hand out association proxies bound to an owner.
//! A session is cheap to clone; clones share the registry and the backend.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::{debug, warn};

use crate::backends::DatabaseBackend;
use crate::config::SessionConfig;
use crate::error::{FieldError, ModelError, ModelResult};
use crate::events::ModelEvent;
use crate::model::record::Record;
use crate::model::{PrimaryKey, RecordRef, Row};
use crate::query::{values_equal, QueryBuilder, WhereCondition};
use crate::relationships::collection::CollectionProxy;
use crate::relationships::dependency;
use crate::relationships::metadata::{RelationshipMetadata, RelationshipType};
use crate::relationships::proxy::{AssociationCache, CollectionEntry, SingleTarget};
use crate::relationships::registry::{ModelInfo, Registry};
use crate::relationships::single::SingleProxy;
use crate::transaction::Transaction;

/// Boxed future used where save and destroy recurse through associations
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Error recorded on an association whose pending members are invalid
pub const INVALID_MESSAGE: &str = "is invalid";

/// In-memory state changed inside the current outermost transaction
enum JournalEntry {
    Inserted {
        record: RecordRef,
        previous_id: Option<PrimaryKey>,
    },
    Destroyed(RecordRef),
    Cache {
        record: RecordRef,
        name: String,
        previous: Option<AssociationCache>,
    },
}

impl JournalEntry {
    fn revert(self) {
        match self {
            JournalEntry::Inserted { record, previous_id } => {
                match previous_id {
                    Some(id) => record.set_id(&id),
                    None => record.clear_id(),
                }
                record.set_new_record(true);
            }
            JournalEntry::Destroyed(record) => record.clear_destroyed(),
            JournalEntry::Cache { record, name, previous } => match previous {
                Some(cache) => record.store_association(&name, cache),
                None => record.reset_association(&name),
            },
        }
    }
}

#[derive(Clone)]
pub struct Session {
    registry: Arc<Registry>,
    backend: Arc<dyn DatabaseBackend>,
    config: SessionConfig,
    journal: Arc<Mutex<Vec<JournalEntry>>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("backend", &self.backend.name())
            .field("models", &self.registry.model_names())
            .field("config", &self.config)
            .finish()
    }
}

impl Session {
    pub fn new(registry: Arc<Registry>, backend: Arc<dyn DatabaseBackend>) -> Self {
        Self::with_config(registry, backend, SessionConfig::default())
    }

    pub fn with_config(registry: Arc<Registry>, backend: Arc<dyn DatabaseBackend>, config: SessionConfig) -> Self {
        Self {
            registry,
            backend,
            config,
            journal: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn backend(&self) -> &Arc<dyn DatabaseBackend> {
        &self.backend
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // ---- records -------------------------------------------------------

    /// An unsaved record with the model's defaults and `attributes` applied
    pub fn new_record(&self, model: &str, attributes: Value) -> ModelResult<RecordRef> {
        let info = self.registry.model(model)?;
        let mut row = info.defaults.clone();
        match attributes {
            Value::Null => {}
            Value::Object(values) => row.extend(values),
            other => {
                return Err(ModelError::Serialization(format!(
                    "attributes for {} must be an object, got {}",
                    model, other
                )))
            }
        }
        if info.parent.is_some() {
            row.insert(info.inheritance_column.clone(), Value::String(info.name.clone()));
        }
        Ok(RecordRef::new(Record::new(&info.name, &info.primary_key, row, true)))
    }

    /// Build and save; an invalid record is returned unsaved with its errors
    pub async fn create(&self, model: &str, attributes: Value) -> ModelResult<RecordRef> {
        let record = self.new_record(model, attributes)?;
        self.save(&record).await?;
        Ok(record)
    }

    /// Primary key of a persisted record
    pub fn identity(&self, record: &RecordRef) -> ModelResult<PrimaryKey> {
        record.id().ok_or(ModelError::MissingPrimaryKey)
    }

    /// Base query for `model`, narrowed to its subtypes on a shared table
    pub fn scope(&self, model: &str) -> ModelResult<QueryBuilder> {
        self.registry.scope(model)
    }

    pub async fn find(&self, model: &str, id: impl Into<PrimaryKey>) -> ModelResult<RecordRef> {
        let id = id.into();
        let info = self.registry.model(model)?;
        let query = self
            .registry
            .scope(model)?
            .where_eq(&info.primary_key, id.to_value())
            .limit(1);
        self.load(model, &query)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::not_found(model, vec![id]))
    }

    /// First record whose columns equal `conditions` (`{"name": "37signals"}`)
    pub async fn find_by(&self, model: &str, conditions: Value) -> ModelResult<Option<RecordRef>> {
        let pairs = match conditions {
            Value::Object(pairs) => pairs,
            other => {
                return Err(ModelError::Serialization(format!(
                    "conditions must be an object, got {}",
                    other
                )))
            }
        };
        let query = self
            .registry
            .scope(model)?
            .where_conditions(pairs.iter().map(|(column, value)| WhereCondition::from_pair(column, value)))
            .limit(1);
        Ok(self.load(model, &query).await?.into_iter().next())
    }

    pub async fn find_all(&self, model: &str) -> ModelResult<Vec<RecordRef>> {
        let query = self.registry.scope(model)?;
        self.load(model, &query).await
    }

    /// Records of `model` matching `query`, which should start from [`Session::scope`]
    pub async fn find_where(&self, model: &str, query: &QueryBuilder) -> ModelResult<Vec<RecordRef>> {
        self.load(model, query).await
    }

    pub async fn count(&self, model: &str) -> ModelResult<u64> {
        let query = self.registry.scope(model)?;
        self.log_query("count", query.table());
        self.backend.count(&query).await
    }

    /// Refresh attributes from storage and drop every cached association
    pub async fn reload(&self, record: &RecordRef) -> ModelResult<()> {
        let info = self.registry.model(&record.model())?;
        let id = self.identity(record)?;
        let query = QueryBuilder::new(info.table.clone())
            .where_eq(&info.primary_key, id.to_value())
            .limit(1);
        self.log_query("select", &info.table);
        let row = self
            .backend
            .select(&query)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::not_found(info.name.clone(), vec![id]))?;
        record.replace_attributes(row);
        record.reset_associations();
        Ok(())
    }

    pub(crate) fn instantiate(&self, model: &str, row: Row) -> ModelResult<RecordRef> {
        let info = self.registry.model_for_row(model, &row)?;
        Ok(RecordRef::new(Record::new(&info.name, &info.primary_key, row, false)))
    }

    pub(crate) async fn load(&self, model: &str, query: &QueryBuilder) -> ModelResult<Vec<RecordRef>> {
        self.log_query("select", query.table());
        let rows = self.backend.select(query).await?;
        rows.into_iter().map(|row| self.instantiate(model, row)).collect()
    }

    /// Target scope of an association plus its declared conditions
    pub(crate) fn association_scope(&self, meta: &RelationshipMetadata) -> ModelResult<QueryBuilder> {
        Ok(self
            .registry
            .scope(&meta.target_model)?
            .where_conditions(meta.conditions.iter().cloned()))
    }

    pub(crate) fn log_query(&self, operation: &str, table: &str) {
        if self.config.log_queries {
            debug!(target: "tether::backend", "{} on {} via {}", operation, table, self.backend.name());
        }
    }

    // ---- associations --------------------------------------------------

    /// Proxy for a has_one or belongs_to association of `owner`
    pub fn single(&self, owner: &RecordRef, name: &str) -> ModelResult<SingleProxy<'_>> {
        let meta = self.registry.association(&owner.model(), name)?;
        if meta.is_collection() {
            return Err(ModelError::Relationship(format!(
                "{} is a collection association",
                meta.qualified_name()
            )));
        }
        Ok(SingleProxy::new(self, owner.clone(), meta))
    }

    /// Proxy for a has_many or has_and_belongs_to_many association of `owner`
    pub fn collection(&self, owner: &RecordRef, name: &str) -> ModelResult<CollectionProxy<'_>> {
        let meta = self.registry.association(&owner.model(), name)?;
        if !meta.is_collection() {
            return Err(ModelError::Relationship(format!(
                "{} is not a collection association",
                meta.qualified_name()
            )));
        }
        Ok(CollectionProxy::new(self, owner.clone(), meta))
    }

    // ---- validation ----------------------------------------------------

    /// Run validations, recording errors on the record. New records pending in
    /// loaded associations are validated too.
    pub fn valid(&self, record: &RecordRef) -> bool {
        self.validate_record(record, &mut Vec::new())
    }

    fn validate_record(&self, record: &RecordRef, visited: &mut Vec<RecordRef>) -> bool {
        if visited.iter().any(|seen| seen.ptr_eq(record)) {
            return true;
        }
        visited.push(record.clone());

        let info = match self.registry.model(&record.model()) {
            Ok(info) => info,
            Err(_) => return true,
        };
        let mut errors: Vec<FieldError> = info
            .validations
            .iter()
            .flat_map(|validation| validation.check(record))
            .collect();

        let owner_is_new = record.is_new_record();
        for meta in &info.associations {
            let pending: Vec<RecordRef> = match record.cached_association(&meta.name) {
                Some(AssociationCache::Collection(target)) => target
                    .records()
                    .into_iter()
                    .filter(|member| owner_is_new || member.is_new_record())
                    .collect(),
                Some(AssociationCache::Single(single)) => {
                    single.target.into_iter().filter(RecordRef::is_new_record).collect()
                }
                None => continue,
            };
            let mut associated_valid = true;
            for member in &pending {
                associated_valid &= self.validate_record(member, visited);
            }
            if !associated_valid {
                errors.push(FieldError::new(meta.name.clone(), INVALID_MESSAGE));
            }
        }

        let valid = errors.is_empty();
        record.set_errors(errors);
        valid
    }

    // ---- save ----------------------------------------------------------

    /// Validate and persist the record and its pending associations.
    /// Returns `Ok(false)` when validation fails.
    pub fn save<'a>(&'a self, record: &'a RecordRef) -> BoxFuture<'a, ModelResult<bool>> {
        Box::pin(async move {
            if record.is_destroyed() {
                return Err(ModelError::Relationship(format!(
                    "{} has been destroyed and cannot be saved",
                    record.model()
                )));
            }
            if !self.valid(record) {
                debug!(
                    target: "tether::session",
                    "{} not saved: {:?}", record.model(), record.errors()
                );
                return Ok(false);
            }
            self.save_without_validation(record).await
        })
    }

    /// Like [`save`](Self::save) but an invalid record is an error
    pub async fn save_strict(&self, record: &RecordRef) -> ModelResult<()> {
        if self.save(record).await? {
            Ok(())
        } else {
            Err(ModelError::Validation {
                model: record.model(),
                errors: record.errors(),
            })
        }
    }

    /// Set one attribute and save, skipping validation
    pub async fn update_attribute(&self, record: &RecordRef, attribute: &str, value: impl Into<Value>) -> ModelResult<bool> {
        record.set(attribute, value);
        self.save_without_validation(record).await
    }

    fn save_without_validation<'a>(&'a self, record: &'a RecordRef) -> BoxFuture<'a, ModelResult<bool>> {
        Box::pin(async move {
            let label = format!("save {}", record.model());
            match self.atomically(&label, self.persist(record)).await {
                Ok(()) => Ok(true),
                Err(ModelError::Validation { model, errors }) => {
                    debug!(
                        target: "tether::session",
                        "{} not saved: associated {} is invalid ({:?})",
                        record.model(),
                        model,
                        errors
                    );
                    Ok(false)
                }
                Err(error) => Err(error),
            }
        })
    }

    async fn persist(&self, record: &RecordRef) -> ModelResult<()> {
        let info = self.registry.model(&record.model())?;
        self.save_parents(record, info).await?;

        let was_new = record.is_new_record();
        self.notify(info, ModelEvent::Saving, record).await?;
        if was_new {
            self.notify(info, ModelEvent::Creating, record).await?;
            self.insert(record, info).await?;
            self.notify(info, ModelEvent::Created, record).await?;
        } else {
            self.notify(info, ModelEvent::Updating, record).await?;
            self.update(record, info).await?;
            self.notify(info, ModelEvent::Updated, record).await?;
        }

        self.save_children(record, info, was_new).await?;
        self.notify(info, ModelEvent::Saved, record).await
    }

    /// belongs_to targets are saved first so their keys can be copied onto the record
    async fn save_parents(&self, record: &RecordRef, info: &ModelInfo) -> ModelResult<()> {
        for meta in info.associations.iter().filter(|m| m.kind == RelationshipType::BelongsTo) {
            let cached = match record.cached_association(&meta.name) {
                Some(AssociationCache::Single(cached)) => cached,
                _ => continue,
            };
            let parent = match &cached.target {
                Some(parent) => parent,
                None => continue,
            };
            if parent.is_new_record() && !self.save(parent).await? {
                return Err(invalid(parent));
            }
            if cached.dirty {
                let key = parent.id().map(|id| id.to_value()).unwrap_or(Value::Null);
                record.set(&meta.foreign_key, key.clone());
                record.store_association(
                    &meta.name,
                    AssociationCache::Single(SingleTarget::loaded(Some(parent.clone()), key)),
                );
            }
        }
        Ok(())
    }

    async fn insert(&self, record: &RecordRef, info: &ModelInfo) -> ModelResult<()> {
        let previous_id = record.id();
        let mut row = record.attributes();
        if row.get(&info.primary_key).map_or(false, Value::is_null) {
            row.remove(&info.primary_key);
        }
        self.log_query("insert", &info.table);
        let key = self
            .backend
            .insert(&info.table, &info.primary_key, info.key_kind, row)
            .await?;
        record.set_id(&key);
        record.set_new_record(false);
        self.record_journal(JournalEntry::Inserted {
            record: record.clone(),
            previous_id,
        });
        debug!(target: "tether::session", "Created {} {}", info.name, key);
        self.adjust_counters(record, info, 1).await
    }

    async fn update(&self, record: &RecordRef, info: &ModelInfo) -> ModelResult<()> {
        let id = self.identity(record)?;
        let mut changes = record.attributes();
        changes.remove(&info.primary_key);
        if self.config.use_counter_cache {
            // storage owns these; the loaded values may be behind
            for column in self.registry.counter_columns(&info.name) {
                changes.remove(column);
            }
        }
        let query = QueryBuilder::new(info.table.clone()).where_eq(&info.primary_key, id.to_value());
        self.log_query("update", &info.table);
        self.backend.update(&query, &changes).await?;
        Ok(())
    }

    /// Flush members buffered on the record's loaded associations
    async fn save_children(&self, record: &RecordRef, info: &ModelInfo, was_new: bool) -> ModelResult<()> {
        let owner_key = self.identity(record)?.to_value();
        for meta in &info.associations {
            match (meta.kind, record.cached_association(&meta.name)) {
                (RelationshipType::HasMany, Some(AssociationCache::Collection(target))) => {
                    for entry in target.entries.iter().filter(|e| was_new || e.record.is_new_record()) {
                        entry.record.set(&meta.foreign_key, owner_key.clone());
                        if !self.save(&entry.record).await? {
                            return Err(invalid(&entry.record));
                        }
                    }
                }
                (RelationshipType::HasAndBelongsToMany, Some(AssociationCache::Collection(target))) => {
                    for entry in target.entries.iter().filter(|e| was_new || e.record.is_new_record()) {
                        if entry.record.is_new_record() && !self.save(&entry.record).await? {
                            return Err(invalid(&entry.record));
                        }
                        self.insert_join_row(meta, &owner_key, entry).await?;
                    }
                }
                (RelationshipType::HasOne, Some(AssociationCache::Single(cached))) => {
                    if let Some(target) = cached.target {
                        let linked = values_equal(&target.get(&meta.foreign_key), &owner_key);
                        if target.is_new_record() || !linked {
                            target.set(&meta.foreign_key, owner_key.clone());
                            if !self.save(&target).await? {
                                return Err(invalid(&target));
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Link `entry` to the owner through the join table, with its pending join attributes
    pub(crate) async fn insert_join_row(
        &self,
        meta: &RelationshipMetadata,
        owner_key: &Value,
        entry: &CollectionEntry,
    ) -> ModelResult<()> {
        let join = meta.join()?;
        let target_key = self.identity(&entry.record)?.to_value();
        let mut row = entry.join.clone().unwrap_or_default();
        row.insert(join.owner_key.clone(), owner_key.clone());
        row.insert(join.target_key.clone(), target_key);
        self.log_query("insert", &join.table);
        self.backend.insert_join(&join.table, row).await
    }

    /// Move `counter_cache` columns on belongs_to parents by `by`
    async fn adjust_counters(&self, record: &RecordRef, info: &ModelInfo, by: i64) -> ModelResult<()> {
        if !self.config.use_counter_cache {
            return Ok(());
        }
        for meta in &info.associations {
            if let Some(column) = &meta.counter_cache {
                let key = record.get(&meta.foreign_key);
                if key.is_null() {
                    continue;
                }
                let parent = self.registry.model(&meta.target_model)?;
                let query = QueryBuilder::new(parent.table.clone()).where_eq(&parent.primary_key, key);
                self.log_query("increment", &parent.table);
                self.backend.increment(&query, column, by).await?;
            }
        }
        Ok(())
    }

    // ---- destroy -------------------------------------------------------

    /// Destroy the record after cascading its dependent associations.
    /// Everything runs in one transaction; a failure anywhere undoes all of it.
    pub fn destroy<'a>(&'a self, record: &'a RecordRef) -> BoxFuture<'a, ModelResult<()>> {
        Box::pin(async move {
            if record.is_destroyed() {
                return Ok(());
            }
            if record.is_new_record() {
                record.mark_destroyed();
                return Ok(());
            }
            let label = format!("destroy {}", record.model());
            self.atomically(&label, self.destroy_persisted(record)).await
        })
    }

    async fn destroy_persisted(&self, record: &RecordRef) -> ModelResult<()> {
        let info = self.registry.model(&record.model())?;
        let id = self.identity(record)?;

        self.notify(info, ModelEvent::Deleting, record).await?;
        dependency::destroy_dependents(self, record, info).await?;

        let query = QueryBuilder::new(info.table.clone()).where_eq(&info.primary_key, id.to_value());
        self.log_query("delete", &info.table);
        self.backend.delete(&query).await?;
        self.adjust_counters(record, info, -1).await?;
        self.notify(info, ModelEvent::Deleted, record).await?;

        record.mark_destroyed();
        self.record_journal(JournalEntry::Destroyed(record.clone()));
        debug!(target: "tether::session", "Destroyed {} {}", info.name, id);
        Ok(())
    }

    // ---- transactions --------------------------------------------------

    /// Open a transaction scope, or a no-op scope when cascades are not transactional
    pub async fn transaction(&self, label: &str) -> ModelResult<Transaction> {
        if self.config.transactional_cascades {
            Transaction::begin(self.backend.clone(), label).await
        } else {
            Ok(Transaction::disabled(label))
        }
    }

    /// Run `operation` in a transaction scope. When the outermost scope fails,
    /// records inserted or destroyed inside it get their in-memory state back.
    pub(crate) async fn atomically<T, F>(&self, label: &str, operation: F) -> ModelResult<T>
    where
        F: Future<Output = ModelResult<T>>,
    {
        let outermost = self.backend.transaction_depth().await == 0;
        if outermost {
            // left over from scopes the caller opened and closed by hand
            self.journal().clear();
        }
        let tx = self.transaction(label).await?;
        let result = tx.finish(operation.await).await;

        if outermost {
            let entries = std::mem::take(&mut *self.journal());
            if let Err(error) = &result {
                if self.config.transactional_cascades {
                    warn!(target: "tether::session", "{} rolled back: {}", label, error);
                    entries.into_iter().rev().for_each(JournalEntry::revert);
                }
            }
        }
        result
    }

    fn journal(&self) -> MutexGuard<'_, Vec<JournalEntry>> {
        self.journal.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_journal(&self, entry: JournalEntry) {
        self.journal().push(entry);
    }

    /// Replace a cached association; a rollback of the outermost scope puts the old cache back
    pub(crate) fn replace_association(&self, record: &RecordRef, name: &str, cache: AssociationCache) {
        let previous = record.cached_association(name);
        record.store_association(name, cache);
        self.record_journal(JournalEntry::Cache {
            record: record.clone(),
            name: name.to_string(),
            previous,
        });
    }

    async fn notify(&self, info: &ModelInfo, event: ModelEvent, record: &RecordRef) -> ModelResult<()> {
        info.observers
            .trigger(event, record)
            .await
            .map_err(|error| {
                if error.is_veto() {
                    debug!(target: "tether::session", "{} {} vetoed: {}", info.name, event, error);
                } else {
                    warn!(target: "tether::session", "{} {} observer failed: {}", info.name, event, error);
                }
                ModelError::Callback {
                    model: info.name.clone(),
                    callback: event.to_string(),
                    reason: error.to_string(),
                }
            })
    }
}

fn invalid(record: &RecordRef) -> ModelError {
    ModelError::Validation {
        model: record.model(),
        errors: record.errors(),
    }
}
