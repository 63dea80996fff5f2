//! Collection associations: has_many and has_and_belongs_to_many
//!
//! A [`CollectionProxy`] reads and mutates the ordered member list cached on
//! the owner. Every mutation loads the collection first. Additions and
//! removals on a persisted owner are written through immediately inside one
//! transaction; on a new owner they stay in memory until the owner is saved.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::error::{ModelError, ModelResult};
use crate::model::{PrimaryKey, RecordRef, Row};
use crate::query::{parse_order, JoinQuery, OrderDirection, QueryBuilder, QueryOperator, WhereCondition};
use crate::session::Session;

use super::dependency;
use super::metadata::{RelationshipMetadata, RelationshipType};
use super::proxy::{dedupe, AssociationCache, AssociationProxy, CollectionEntry, CollectionTarget};
use super::value::{check_record, expect_list, expect_members, AssociationValue};

/// What a scoped find looks for
#[derive(Debug, Clone, PartialEq)]
pub enum Finder {
    Id(PrimaryKey),
    Ids(Vec<PrimaryKey>),
    First,
    All,
}

/// Extra criteria for a scoped find
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub conditions: Vec<WhereCondition>,
    /// Replaces the association's declared order when non-empty
    pub order: Vec<(String, OrderDirection)>,
    pub limit: Option<usize>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn where_eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.condition(WhereCondition::from_pair(column, &value.into()))
    }

    pub fn condition(mut self, condition: WhereCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// `"name DESC, id"`
    pub fn order(mut self, clause: &str) -> Self {
        self.order = parse_order(clause);
        self
    }

    pub fn limit(mut self, count: usize) -> Self {
        self.limit = Some(count);
        self
    }
}

/// Outcome of [`CollectionProxy::find_with`]
#[derive(Debug, Clone)]
pub enum FindResult {
    One(RecordRef),
    Many(Vec<RecordRef>),
    NotFound,
}

impl FindResult {
    pub fn into_one(self) -> Option<RecordRef> {
        match self {
            FindResult::One(record) => Some(record),
            FindResult::Many(records) => records.into_iter().next(),
            FindResult::NotFound => None,
        }
    }

    pub fn into_many(self) -> Vec<RecordRef> {
        match self {
            FindResult::One(record) => vec![record],
            FindResult::Many(records) => records,
            FindResult::NotFound => Vec::new(),
        }
    }
}

pub struct CollectionProxy<'s> {
    session: &'s Session,
    owner: RecordRef,
    meta: Arc<RelationshipMetadata>,
}

impl fmt::Debug for CollectionProxy<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionProxy")
            .field("association", &self.meta.qualified_name())
            .field("owner", &self.owner)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl AssociationProxy for CollectionProxy<'_> {
    fn owner(&self) -> &RecordRef {
        &self.owner
    }

    fn metadata(&self) -> &RelationshipMetadata {
        &self.meta
    }
}

impl<'s> CollectionProxy<'s> {
    pub(crate) fn new(session: &'s Session, owner: RecordRef, meta: Arc<RelationshipMetadata>) -> Self {
        Self { session, owner, meta }
    }

    fn cached(&self) -> Option<CollectionTarget> {
        match self.owner.cached_association(&self.meta.name) {
            Some(AssociationCache::Collection(target)) => Some(target),
            _ => None,
        }
    }

    fn store(&self, target: CollectionTarget) {
        self.owner
            .store_association(&self.meta.name, AssociationCache::Collection(target));
    }

    /// Key written into members, `None` while the owner is unsaved
    fn owner_key(&self) -> Option<Value> {
        if self.owner.is_new_record() {
            return None;
        }
        self.owner.id().map(|id| id.to_value())
    }

    fn is_habtm(&self) -> bool {
        self.meta.kind == RelationshipType::HasAndBelongsToMany
    }

    fn label(&self, operation: &str) -> String {
        format!("{} {}", operation, self.meta.qualified_name())
    }

    // ---- loading -------------------------------------------------------

    async fn load_target(&self, force_reload: bool) -> ModelResult<CollectionTarget> {
        if !force_reload {
            if let Some(target) = self.cached() {
                return Ok(target);
            }
        }
        let entries = match self.owner_key() {
            Some(key) => self.fetch(&key, &FindOptions::default()).await?,
            None => Vec::new(),
        };
        debug!(
            target: "tether::association",
            "Loaded {} ({} members)", self.meta.qualified_name(), entries.len()
        );
        let target = CollectionTarget::new(entries);
        self.store(target.clone());
        Ok(target)
    }

    /// Members in storage matching the association scope and `options`
    async fn fetch(&self, owner_key: &Value, options: &FindOptions) -> ModelResult<Vec<CollectionEntry>> {
        let session = self.session;
        let target_model = &self.meta.target_model;

        let mut entries = if let Some(sql) = &self.meta.finder_sql {
            session.log_query("select_by_sql", target_model);
            let rows = session
                .backend()
                .select_by_sql(sql, &[owner_key.clone()])
                .await?;
            let filter = QueryBuilder::new(target_model.clone())
                .where_conditions(options.conditions.iter().cloned())
                .order_by_clauses(&options.order);
            let mut rows: Vec<Row> = rows.into_iter().filter(|row| filter.matches(row)).collect();
            filter.sort_rows(&mut rows, |row| row);
            if let Some(limit) = options.limit {
                rows.truncate(limit);
            }
            rows.into_iter()
                .map(|row| session.instantiate(target_model, row).map(CollectionEntry::new))
                .collect::<ModelResult<Vec<_>>>()?
        } else {
            let mut query = self.target_query(options)?;
            if let Some(limit) = options.limit {
                query = query.limit(limit);
            }
            if self.is_habtm() {
                let query = self.join_query(owner_key, query)?;
                session.log_query("select_through", &query.join_table);
                session
                    .backend()
                    .select_through(&query)
                    .await?
                    .into_iter()
                    .map(|joined| {
                        session
                            .instantiate(target_model, joined.target)
                            .map(|record| CollectionEntry::with_join(record, joined.join))
                    })
                    .collect::<ModelResult<Vec<_>>>()?
            } else {
                let query = query.where_eq(&self.meta.foreign_key, owner_key.clone());
                session
                    .load(target_model, &query)
                    .await?
                    .into_iter()
                    .map(CollectionEntry::new)
                    .collect()
            }
        };

        if self.meta.uniq {
            let mut unique: Vec<CollectionEntry> = Vec::with_capacity(entries.len());
            for entry in entries.drain(..) {
                if !unique.iter().any(|seen| seen.record == entry.record) {
                    unique.push(entry);
                }
            }
            entries = unique;
        }
        Ok(entries)
    }

    /// Target scope with declared conditions, `options` and the effective order
    fn target_query(&self, options: &FindOptions) -> ModelResult<QueryBuilder> {
        let order = if options.order.is_empty() {
            &self.meta.order
        } else {
            &options.order
        };
        Ok(self
            .session
            .association_scope(&self.meta)?
            .where_conditions(options.conditions.iter().cloned())
            .order_by_clauses(order))
    }

    fn join_query(&self, owner_key: &Value, target: QueryBuilder) -> ModelResult<JoinQuery> {
        let join = self.meta.join()?;
        let info = self.session.registry().model(&self.meta.target_model)?;
        Ok(JoinQuery::new(
            join.table.clone(),
            join.owner_key.clone(),
            owner_key.clone(),
            join.target_key.clone(),
            info.primary_key.clone(),
            target,
        ))
    }

    /// Count members matching `options` without loading them, where possible
    async fn count_matching(&self, owner_key: &Value, options: &FindOptions) -> ModelResult<usize> {
        if self.meta.finder_sql.is_some() || self.meta.uniq {
            return Ok(self.fetch(owner_key, options).await?.len());
        }
        let query = self.target_query(options)?;
        let count = if self.is_habtm() {
            let query = self.join_query(owner_key, query)?;
            self.session.log_query("count_through", &query.join_table);
            self.session.backend().count_through(&query).await?
        } else {
            let query = query.where_eq(&self.meta.foreign_key, owner_key.clone());
            self.session.log_query("count", query.table());
            self.session.backend().count(&query).await?
        };
        Ok(count as usize)
    }

    // ---- reads ---------------------------------------------------------

    /// Members in cache order, loading on first access
    pub async fn records(&self, force_reload: bool) -> ModelResult<Vec<RecordRef>> {
        Ok(self.load_target(force_reload).await?.records())
    }

    pub async fn reload(&self) -> ModelResult<Vec<RecordRef>> {
        self.records(true).await
    }

    /// Member count. Uses the cache when loaded, otherwise a counter column,
    /// counter SQL or a count query, without loading members.
    pub async fn size(&self) -> ModelResult<usize> {
        if let Some(target) = self.cached() {
            return Ok(target.len());
        }
        let key = match self.owner_key() {
            Some(key) => key,
            None => return Ok(0),
        };

        if self.meta.kind == RelationshipType::HasMany && self.session.config().use_counter_cache {
            let column = format!("{}_count", self.meta.name);
            if let Some(count) = self.owner.get_i64(&column) {
                return Ok(count.max(0) as usize);
            }
        }
        if let Some(sql) = &self.meta.counter_sql {
            self.session.log_query("count_by_sql", &self.meta.target_model);
            let count = self.session.backend().count_by_sql(sql, &[key]).await?;
            return Ok(count as usize);
        }
        if self.meta.finder_sql.is_some() {
            return Ok(self.load_target(false).await?.len());
        }
        self.count_matching(&key, &FindOptions::default()).await
    }

    /// Member count after a full load
    pub async fn length(&self) -> ModelResult<usize> {
        Ok(self.load_target(false).await?.len())
    }

    pub async fn is_empty(&self) -> ModelResult<bool> {
        Ok(self.size().await? == 0)
    }

    pub async fn first(&self) -> ModelResult<Option<RecordRef>> {
        Ok(self.load_target(false).await?.records().into_iter().next())
    }

    pub async fn last(&self) -> ModelResult<Option<RecordRef>> {
        Ok(self.load_target(false).await?.records().pop())
    }

    /// Loaded members without duplicates. The cache keeps them.
    pub async fn uniq(&self) -> ModelResult<Vec<RecordRef>> {
        Ok(dedupe(self.records(false).await?))
    }

    /// Membership test; a count query when the collection is not loaded
    pub async fn include(&self, record: &RecordRef) -> ModelResult<bool> {
        if let Some(target) = self.cached() {
            return Ok(target.contains(record));
        }
        if record.is_new_record() || !self.session.registry().is_a(&record.model(), &self.meta.target_model) {
            return Ok(false);
        }
        let key = match self.owner_key() {
            Some(key) => key,
            None => return Ok(false),
        };
        let info = self.session.registry().model(&self.meta.target_model)?;
        let id = self.session.identity(record)?;
        let options = FindOptions::new().where_eq(&info.primary_key, id.to_value());
        Ok(self.count_matching(&key, &options).await? > 0)
    }

    /// Keys of the persisted members
    pub async fn ids(&self) -> ModelResult<Vec<PrimaryKey>> {
        Ok(self
            .records(false)
            .await?
            .iter()
            .filter_map(RecordRef::id)
            .collect())
    }

    /// Extra join-row columns loaded or pending for a HABTM member
    pub async fn join_attributes(&self, record: &RecordRef) -> ModelResult<Option<Row>> {
        self.require_habtm("join_attributes")?;
        let target = self.load_target(false).await?;
        Ok(target
            .entries
            .iter()
            .find(|entry| &entry.record == record)
            .and_then(|entry| entry.join.clone()))
    }

    // ---- finds ---------------------------------------------------------

    /// Find within the association scope. Missing ids are an error; a missing
    /// `First` is [`FindResult::NotFound`].
    pub async fn find_with(&self, finder: Finder, options: FindOptions) -> ModelResult<FindResult> {
        let target_model = self.meta.target_model.clone();
        let key = match self.owner_key() {
            Some(key) => key,
            None => {
                return match finder {
                    Finder::Id(id) => Err(ModelError::not_found(target_model, vec![id])),
                    Finder::Ids(ids) if !ids.is_empty() => Err(ModelError::not_found(target_model, ids)),
                    Finder::First => Ok(FindResult::NotFound),
                    Finder::Ids(_) | Finder::All => Ok(FindResult::Many(Vec::new())),
                }
            }
        };
        let primary_key = self.session.registry().model(&target_model)?.primary_key.clone();

        match finder {
            Finder::Id(id) => {
                let options = options
                    .condition(WhereCondition::new(
                        primary_key,
                        QueryOperator::Equal,
                        Some(id.to_value()),
                    ))
                    .limit(1);
                self.fetch(&key, &options)
                    .await?
                    .into_iter()
                    .next()
                    .map(|entry| FindResult::One(entry.record))
                    .ok_or_else(|| ModelError::not_found(target_model, vec![id]))
            }
            Finder::Ids(ids) => {
                let values: Vec<Value> = ids.iter().map(PrimaryKey::to_value).collect();
                let options = options.condition(WhereCondition::from_pair(&primary_key, &Value::Array(values)));
                let records: Vec<RecordRef> = self
                    .fetch(&key, &options)
                    .await?
                    .into_iter()
                    .map(|entry| entry.record)
                    .collect();
                let missing: Vec<PrimaryKey> = ids
                    .into_iter()
                    .filter(|id| !records.iter().any(|r| r.id().as_ref() == Some(id)))
                    .collect();
                if missing.is_empty() {
                    Ok(FindResult::Many(records))
                } else {
                    Err(ModelError::not_found(target_model, missing))
                }
            }
            Finder::First => {
                let options = options.limit(1);
                Ok(self
                    .fetch(&key, &options)
                    .await?
                    .into_iter()
                    .next()
                    .map_or(FindResult::NotFound, |entry| FindResult::One(entry.record)))
            }
            Finder::All => {
                let records = self.fetch(&key, &options).await?;
                Ok(FindResult::Many(records.into_iter().map(|entry| entry.record).collect()))
            }
        }
    }

    pub async fn find(&self, id: impl Into<PrimaryKey>) -> ModelResult<RecordRef> {
        let id = id.into();
        self.find_with(Finder::Id(id.clone()), FindOptions::default())
            .await?
            .into_one()
            .ok_or_else(|| ModelError::not_found(self.meta.target_model.clone(), vec![id]))
    }

    pub async fn find_ids(&self, ids: Vec<PrimaryKey>) -> ModelResult<Vec<RecordRef>> {
        Ok(self.find_with(Finder::Ids(ids), FindOptions::default()).await?.into_many())
    }

    pub async fn find_first(&self, options: FindOptions) -> ModelResult<Option<RecordRef>> {
        Ok(self.find_with(Finder::First, options).await?.into_one())
    }

    pub async fn find_all(&self, options: FindOptions) -> ModelResult<Vec<RecordRef>> {
        Ok(self.find_with(Finder::All, options).await?.into_many())
    }

    /// First member whose columns equal `attributes`, created in the
    /// association when there is none
    pub async fn find_or_create_by(&self, attributes: Value) -> ModelResult<RecordRef> {
        let pairs = match &attributes {
            Value::Object(pairs) => pairs.clone(),
            other => {
                return Err(ModelError::Serialization(format!(
                    "attributes must be an object, got {}",
                    other
                )))
            }
        };
        let options = pairs
            .iter()
            .fold(FindOptions::new(), |options, (column, value)| options.where_eq(column, value.clone()));
        match self.find_first(options).await? {
            Some(record) => Ok(record),
            None => self.create(attributes).await,
        }
    }

    // ---- additions -----------------------------------------------------

    /// Append one record or a list. Everything is type-checked before the
    /// cache changes. On a persisted owner each member is saved (has_many)
    /// or linked through a join row (HABTM) right away; the result is false
    /// when any of those saves failed validation.
    pub async fn push(&self, value: impl Into<AssociationValue>) -> ModelResult<bool> {
        let records = expect_members(self.session.registry(), &self.meta, value.into())?;
        self.append(records.into_iter().map(CollectionEntry::new).collect())
            .await
    }

    pub async fn concat(&self, records: Vec<RecordRef>) -> ModelResult<bool> {
        self.push(records).await
    }

    /// HABTM: append with extra columns for the join row
    pub async fn push_with_attributes(&self, record: &RecordRef, join_attributes: Value) -> ModelResult<bool> {
        self.require_habtm("push_with_attributes")?;
        check_record(self.session.registry(), &self.meta, record)?;
        let join = match join_attributes {
            Value::Object(join) => join,
            Value::Null => Row::new(),
            other => {
                return Err(ModelError::Serialization(format!(
                    "join attributes must be an object, got {}",
                    other
                )))
            }
        };
        self.append(vec![CollectionEntry::with_join(record.clone(), join)])
            .await
    }

    async fn append(&self, entries: Vec<CollectionEntry>) -> ModelResult<bool> {
        let loaded = self.load_target(false).await?;
        let saved = if self.owner_key().is_some() {
            self.session
                .atomically(&self.label("append to"), self.attach_all(&entries))
                .await?
        } else {
            true
        };
        let mut target = self.cached().unwrap_or(loaded);
        target.entries.extend(entries);
        self.store(target);
        Ok(saved)
    }

    async fn attach_all(&self, entries: &[CollectionEntry]) -> ModelResult<bool> {
        let mut saved = true;
        for entry in entries {
            saved &= self.attach(entry).await?;
        }
        Ok(saved)
    }

    /// Write one member through to storage on a persisted owner
    async fn attach(&self, entry: &CollectionEntry) -> ModelResult<bool> {
        let key = self.owner_key().ok_or(ModelError::MissingPrimaryKey)?;
        if self.is_habtm() {
            if entry.record.is_new_record() && !self.session.save(&entry.record).await? {
                return Ok(false);
            }
            self.session.insert_join_row(&self.meta, &key, entry).await?;
            Ok(true)
        } else {
            entry.record.set(&self.meta.foreign_key, key);
            self.session.save(&entry.record).await
        }
    }

    fn new_member(&self, attributes: Value) -> ModelResult<RecordRef> {
        let record = self.session.new_record(&self.meta.target_model, attributes)?;
        if self.meta.kind == RelationshipType::HasMany {
            if let Some(key) = self.owner_key() {
                record.set(&self.meta.foreign_key, key);
            }
        }
        Ok(record)
    }

    /// A new, unsaved member appended to the collection
    pub async fn build(&self, attributes: Value) -> ModelResult<RecordRef> {
        let mut target = self.load_target(false).await?;
        let record = self.new_member(attributes)?;
        target.entries.push(CollectionEntry::new(record.clone()));
        self.store(target);
        Ok(record)
    }

    pub async fn build_many(&self, attributes: Vec<Value>) -> ModelResult<Vec<RecordRef>> {
        let mut records = Vec::with_capacity(attributes.len());
        for attrs in attributes {
            records.push(self.build(attrs).await?);
        }
        Ok(records)
    }

    /// Build, then save when the owner is persisted. Invalid members stay in
    /// the collection unsaved.
    pub async fn create(&self, attributes: Value) -> ModelResult<RecordRef> {
        let record = self.build(attributes).await?;
        if self.owner_key().is_some() {
            let entry = CollectionEntry::new(record.clone());
            let saved = self
                .session
                .atomically(&self.label("create in"), self.attach(&entry))
                .await?;
            if !saved {
                debug!(
                    target: "tether::association",
                    "{}: created member is invalid", self.meta.qualified_name()
                );
            }
        }
        Ok(record)
    }

    pub async fn create_many(&self, attributes: Vec<Value>) -> ModelResult<Vec<RecordRef>> {
        let mut records = Vec::with_capacity(attributes.len());
        for attrs in attributes {
            records.push(self.create(attrs).await?);
        }
        Ok(records)
    }

    // ---- removals ------------------------------------------------------

    /// Remove members. Records that are not loaded members are ignored.
    /// has_many applies the dependency policy, HABTM deletes join rows.
    pub async fn delete(&self, value: impl Into<AssociationValue>) -> ModelResult<()> {
        let records = expect_members(self.session.registry(), &self.meta, value.into())?;
        let mut target = self.load_target(false).await?;
        let removed: Vec<RecordRef> = records
            .into_iter()
            .filter(|record| target.remove(record) > 0)
            .collect();
        if removed.is_empty() {
            return Ok(());
        }
        if self.owner_key().is_some() {
            self.session
                .atomically(
                    &self.label("delete from"),
                    dependency::remove_members(self.session, &self.owner, &self.meta, &removed),
                )
                .await?;
        }
        self.store(target);
        Ok(())
    }

    /// Remove every member, loading first so nothing escapes the policy
    pub async fn clear(&self) -> ModelResult<()> {
        let members = self.load_target(false).await?.records();
        if !members.is_empty() && self.owner_key().is_some() {
            self.session
                .atomically(
                    &self.label("clear"),
                    dependency::remove_members(self.session, &self.owner, &self.meta, &members),
                )
                .await?;
        }
        self.store(CollectionTarget::default());
        Ok(())
    }

    /// Destroy every member through its own destroy path
    pub async fn destroy_all(&self) -> ModelResult<()> {
        let members = self.load_target(false).await?.records();
        let owner_persisted = self.owner_key().is_some();
        self.session
            .atomically(&self.label("destroy all in"), async {
                if self.is_habtm() && owner_persisted {
                    dependency::remove_members(self.session, &self.owner, &self.meta, &members).await?;
                }
                for member in &members {
                    self.session.destroy(member).await?;
                }
                Ok(())
            })
            .await?;
        self.store(CollectionTarget::default());
        Ok(())
    }

    /// Make the collection exactly `value` (a list). Old members missing from
    /// the list are removed per policy, new ones attached.
    pub async fn replace(&self, value: impl Into<AssociationValue>) -> ModelResult<()> {
        let records = expect_list(self.session.registry(), &self.meta, value.into())?;
        let current = self.load_target(false).await?;

        if self.owner_key().is_none() {
            self.store(CollectionTarget::new(
                records.into_iter().map(CollectionEntry::new).collect(),
            ));
            return Ok(());
        }

        let stale: Vec<RecordRef> = current
            .records()
            .into_iter()
            .filter(|record| !records.contains(record))
            .collect();
        let fresh: Vec<CollectionEntry> = records
            .iter()
            .filter(|record| !current.contains(record))
            .cloned()
            .map(CollectionEntry::new)
            .collect();

        let saved = self
            .session
            .atomically(&self.label("replace"), async {
                if !stale.is_empty() {
                    dependency::remove_members(self.session, &self.owner, &self.meta, &stale).await?;
                }
                self.attach_all(&fresh).await
            })
            .await?;
        if !saved {
            debug!(
                target: "tether::association",
                "{}: some replacement members are invalid", self.meta.qualified_name()
            );
        }

        let mut target = current;
        target.entries.retain(|entry| !stale.contains(&entry.record));
        target.entries.extend(fresh);
        self.store(target);
        Ok(())
    }

    /// Replace the members with the target records having `ids`
    pub async fn set_ids(&self, ids: Vec<PrimaryKey>) -> ModelResult<()> {
        let target_model = &self.meta.target_model;
        let info = self.session.registry().model(target_model)?;
        let query = self
            .session
            .scope(target_model)?
            .where_in(&info.primary_key, ids.iter().map(PrimaryKey::to_value).collect());
        let found = self.session.load(target_model, &query).await?;

        let mut ordered = Vec::with_capacity(ids.len());
        let mut missing = Vec::new();
        for id in ids {
            match found.iter().find(|record| record.id().as_ref() == Some(&id)) {
                Some(record) => ordered.push(record.clone()),
                None => missing.push(id),
            }
        }
        if !missing.is_empty() {
            return Err(ModelError::not_found(target_model.clone(), missing));
        }
        self.replace(ordered).await
    }

    fn require_habtm(&self, operation: &str) -> ModelResult<()> {
        if self.is_habtm() {
            Ok(())
        } else {
            Err(ModelError::Relationship(format!(
                "{} is only available on has_and_belongs_to_many ({})",
                operation,
                self.meta.qualified_name()
            )))
        }
    }
}
