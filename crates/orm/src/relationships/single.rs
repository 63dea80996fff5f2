//! Single-reference associations: belongs_to and has_one
//!
//! belongs_to keeps the key on the owner, so assignment only changes the
//! owner's foreign key attribute and nothing is written until the owner is
//! saved. has_one keeps the key on the target; on a persisted owner an
//! assignment writes through immediately, releasing the previous target
//! according to the dependency policy.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::error::{ModelError, ModelResult};
use crate::model::RecordRef;
use crate::query::values_equal;
use crate::session::Session;

use super::dependency;
use super::metadata::{DependentPolicy, RelationshipMetadata, RelationshipType};
use super::proxy::{AssociationCache, AssociationProxy, SingleTarget};
use super::value::{expect_optional, AssociationValue};

pub struct SingleProxy<'s> {
    session: &'s Session,
    owner: RecordRef,
    meta: Arc<RelationshipMetadata>,
}

impl fmt::Debug for SingleProxy<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleProxy")
            .field("association", &self.meta.qualified_name())
            .field("owner", &self.owner)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl AssociationProxy for SingleProxy<'_> {
    fn owner(&self) -> &RecordRef {
        &self.owner
    }

    fn metadata(&self) -> &RelationshipMetadata {
        &self.meta
    }
}

impl<'s> SingleProxy<'s> {
    pub(crate) fn new(session: &'s Session, owner: RecordRef, meta: Arc<RelationshipMetadata>) -> Self {
        Self { session, owner, meta }
    }

    fn cached(&self) -> Option<SingleTarget> {
        match self.owner.cached_association(&self.meta.name) {
            Some(AssociationCache::Single(target)) => Some(target),
            _ => None,
        }
    }

    fn store(&self, target: SingleTarget) {
        self.owner
            .store_association(&self.meta.name, AssociationCache::Single(target));
    }

    fn owner_key(&self) -> Option<Value> {
        if self.owner.is_new_record() {
            return None;
        }
        self.owner.id().map(|id| id.to_value())
    }

    /// The associated record. Cached after the first read; `force_reload`
    /// always queries.
    pub async fn get(&self, force_reload: bool) -> ModelResult<Option<RecordRef>> {
        match self.meta.kind {
            RelationshipType::BelongsTo => self.load_parent(force_reload).await,
            _ => self.load_child(force_reload).await,
        }
    }

    pub async fn reload(&self) -> ModelResult<Option<RecordRef>> {
        self.get(true).await
    }

    async fn load_parent(&self, force_reload: bool) -> ModelResult<Option<RecordRef>> {
        let key = self.owner.get(&self.meta.foreign_key);
        if !force_reload {
            if let Some(cached) = self.cached() {
                let same_key = (cached.loaded_key.is_null() && key.is_null())
                    || values_equal(&cached.loaded_key, &key);
                if cached.dirty || same_key {
                    return Ok(cached.target);
                }
                debug!(
                    target: "tether::association",
                    "{} key changed, reloading", self.meta.qualified_name()
                );
            }
        }

        let target = if key.is_null() {
            None
        } else {
            let info = self.session.registry().model(&self.meta.target_model)?;
            let query = self
                .session
                .association_scope(&self.meta)?
                .where_eq(&info.primary_key, key.clone())
                .limit(1);
            self.session
                .load(&self.meta.target_model, &query)
                .await?
                .into_iter()
                .next()
        };
        self.store(SingleTarget::loaded(target.clone(), key));
        Ok(target)
    }

    async fn load_child(&self, force_reload: bool) -> ModelResult<Option<RecordRef>> {
        if !force_reload {
            if let Some(cached) = self.cached() {
                return Ok(cached.target);
            }
        }

        let target = match self.owner_key() {
            Some(key) => {
                let query = self
                    .session
                    .association_scope(&self.meta)?
                    .where_eq(&self.meta.foreign_key, key)
                    .order_by_clauses(&self.meta.order)
                    .limit(1);
                self.session
                    .load(&self.meta.target_model, &query)
                    .await?
                    .into_iter()
                    .next()
            }
            None => None,
        };
        self.store(SingleTarget::loaded(target.clone(), Value::Null));
        Ok(target)
    }

    /// Assign a record or `nil`. Returns `Ok(false)` when a written-through
    /// has_one target fails validation.
    pub async fn set(&self, value: impl Into<AssociationValue>) -> ModelResult<bool> {
        let target = expect_optional(self.session.registry(), &self.meta, value.into())?;
        match self.meta.kind {
            RelationshipType::BelongsTo => {
                self.assign_parent(target);
                Ok(true)
            }
            _ => self.replace(target, false).await,
        }
    }

    /// A new, unsaved target. belongs_to saves it when the owner is saved;
    /// has_one replaces the current target, which is nullified rather than
    /// destroyed.
    pub async fn build(&self, attributes: Value) -> ModelResult<RecordRef> {
        let record = self.session.new_record(&self.meta.target_model, attributes)?;
        match self.meta.kind {
            RelationshipType::BelongsTo => self.store(SingleTarget::assigned(
                Some(record.clone()),
                self.owner.get(&self.meta.foreign_key),
            )),
            _ => {
                self.replace(Some(record.clone()), true).await?;
            }
        }
        Ok(record)
    }

    /// Build and save the target. An invalid target is returned unsaved.
    pub async fn create(&self, attributes: Value) -> ModelResult<RecordRef> {
        match self.meta.kind {
            RelationshipType::BelongsTo => {
                let record = self.session.create(&self.meta.target_model, attributes).await?;
                self.assign_parent(Some(record.clone()));
                Ok(record)
            }
            _ => {
                let record = self.build(attributes).await?;
                self.session.save(&record).await?;
                Ok(record)
            }
        }
    }

    /// has_one only: a new target linked to the owner, leaving the previous
    /// target's row alone
    pub async fn build_detached(&self, attributes: Value) -> ModelResult<RecordRef> {
        if self.meta.kind != RelationshipType::HasOne {
            return Err(ModelError::Relationship(format!(
                "{} is a {}; only has_one can build without replacing",
                self.meta.qualified_name(),
                self.meta.kind
            )));
        }
        let record = self.session.new_record(&self.meta.target_model, attributes)?;
        if let Some(key) = self.owner_key() {
            record.set(&self.meta.foreign_key, key);
        }
        self.store(SingleTarget::assigned(Some(record.clone()), Value::Null));
        Ok(record)
    }

    pub async fn create_detached(&self, attributes: Value) -> ModelResult<RecordRef> {
        let record = self.build_detached(attributes).await?;
        self.session.save(&record).await?;
        Ok(record)
    }

    fn assign_parent(&self, target: Option<RecordRef>) {
        match &target {
            Some(parent) if !parent.is_new_record() => {
                if let Some(id) = parent.id() {
                    self.owner.set(&self.meta.foreign_key, id.to_value());
                }
            }
            Some(_) => {}
            None => self.owner.set(&self.meta.foreign_key, Value::Null),
        }
        let key = self.owner.get(&self.meta.foreign_key);
        self.store(SingleTarget::assigned(target, key));
    }

    async fn replace(&self, target: Option<RecordRef>, dont_save: bool) -> ModelResult<bool> {
        let current = self.get(false).await?;
        let label = format!("assign {}", self.meta.qualified_name());
        self.session
            .atomically(&label, self.swap(current, target, dont_save))
            .await
    }

    async fn swap(&self, current: Option<RecordRef>, target: Option<RecordRef>, dont_save: bool) -> ModelResult<bool> {
        if let Some(old) = current.as_ref().filter(|old| target.as_ref() != Some(*old)) {
            self.release(old, dont_save).await?;
        }

        let owner_key = self.owner_key();
        if let (Some(record), Some(key)) = (&target, &owner_key) {
            record.set(&self.meta.foreign_key, key.clone());
        }
        self.store(SingleTarget::assigned(target.clone(), Value::Null));

        match (&target, owner_key) {
            (Some(record), Some(_)) if !dont_save => self.session.save(record).await,
            _ => Ok(true),
        }
    }

    /// Detach the previous has_one target
    async fn release(&self, old: &RecordRef, dont_save: bool) -> ModelResult<()> {
        match self.meta.dependent {
            DependentPolicy::Destroy if !dont_save => self.session.destroy(old).await,
            DependentPolicy::DeleteDirect if !dont_save => dependency::delete_row(self.session, old).await,
            _ => {
                old.set(&self.meta.foreign_key, Value::Null);
                if !self.owner.is_new_record() && !old.is_new_record() && !self.session.save(old).await? {
                    debug!(
                        target: "tether::association",
                        "{}: previous target could not be saved after nullifying",
                        self.meta.qualified_name()
                    );
                }
                Ok(())
            }
        }
    }
}
