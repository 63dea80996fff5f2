//! Dependency resolver
//!
//! Cascades an owner's destroy to its has_many/has_one targets according to
//! each association's [`DependentPolicy`], drops HABTM join rows, and
//! disassociates members removed from a collection. Callers run these inside
//! the owner's transaction so a failing step undoes the whole cascade.

use serde_json::Value;
use tracing::debug;

use crate::error::ModelResult;
use crate::model::{RecordRef, Row};
use crate::query::QueryBuilder;
use crate::relationships::registry::ModelInfo;
use crate::session::Session;

use super::collection::CollectionProxy;
use super::metadata::{DependentPolicy, RelationshipMetadata, RelationshipType};
use super::proxy::{AssociationCache, CollectionTarget, SingleTarget};
use super::single::SingleProxy;

/// Apply every association's policy before `owner` is deleted
pub(crate) async fn destroy_dependents(session: &Session, owner: &RecordRef, info: &ModelInfo) -> ModelResult<()> {
    let key = session.identity(owner)?.to_value();
    for meta in &info.associations {
        match meta.kind {
            RelationshipType::HasMany => {
                match meta.dependent {
                    DependentPolicy::None => continue,
                    DependentPolicy::Destroy => {
                        let proxy = CollectionProxy::new(session, owner.clone(), meta.clone());
                        for member in proxy.records(false).await? {
                            session.destroy(&member).await?;
                        }
                    }
                    DependentPolicy::DeleteDirect => {
                        let query = owned_rows(session, meta, &key)?;
                        let deleted = session.backend().delete(&query).await?;
                        debug!(target: "tether::dependency", "{}: deleted {} rows", meta.qualified_name(), deleted);
                    }
                    DependentPolicy::Nullify => nullify_owned(session, owner, meta, &key).await?,
                }
                let cleared = AssociationCache::Collection(CollectionTarget::default());
                session.replace_association(owner, &meta.name, cleared);
            }
            RelationshipType::HasOne => {
                match meta.dependent {
                    DependentPolicy::None => continue,
                    DependentPolicy::Destroy => {
                        let proxy = SingleProxy::new(session, owner.clone(), meta.clone());
                        if let Some(target) = proxy.get(false).await? {
                            session.destroy(&target).await?;
                        }
                    }
                    DependentPolicy::DeleteDirect => {
                        let query = owned_rows(session, meta, &key)?;
                        session.backend().delete(&query).await?;
                    }
                    DependentPolicy::Nullify => nullify_owned(session, owner, meta, &key).await?,
                }
                let cleared = AssociationCache::Single(SingleTarget::loaded(None, Value::Null));
                session.replace_association(owner, &meta.name, cleared);
            }
            RelationshipType::HasAndBelongsToMany => {
                let join = meta.join()?;
                let query = QueryBuilder::new(join.table.clone()).where_eq(&join.owner_key, key.clone());
                let deleted = session.backend().delete(&query).await?;
                debug!(
                    target: "tether::dependency",
                    "{}: removed {} join rows from {}",
                    meta.qualified_name(),
                    deleted,
                    join.table
                );
                let cleared = AssociationCache::Collection(CollectionTarget::default());
                session.replace_association(owner, &meta.name, cleared);
            }
            RelationshipType::BelongsTo => {}
        }
    }
    Ok(())
}

/// Disassociate persisted `members` removed from a collection of `owner`.
/// has_many follows the dependency policy (nullify when none is set); HABTM
/// only deletes join rows.
pub(crate) async fn remove_members(
    session: &Session,
    owner: &RecordRef,
    meta: &RelationshipMetadata,
    members: &[RecordRef],
) -> ModelResult<()> {
    let persisted: Vec<&RecordRef> = members.iter().filter(|m| !m.is_new_record()).collect();
    if persisted.is_empty() {
        return Ok(());
    }
    let key = session.identity(owner)?.to_value();
    let ids: Vec<Value> = persisted
        .iter()
        .filter_map(|m| m.id())
        .map(|id| id.to_value())
        .collect();

    if meta.kind == RelationshipType::HasAndBelongsToMany {
        let join = meta.join()?;
        let query = QueryBuilder::new(join.table.clone())
            .where_eq(&join.owner_key, key)
            .where_in(&join.target_key, ids);
        session.backend().delete(&query).await?;
        return Ok(());
    }

    let target = session.registry().model(&meta.target_model)?;
    let query = session
        .registry()
        .scope(&meta.target_model)?
        .where_eq(&meta.foreign_key, key)
        .where_in(&target.primary_key, ids);
    match meta.dependent {
        DependentPolicy::Destroy => {
            for member in persisted {
                session.destroy(member).await?;
            }
        }
        DependentPolicy::DeleteDirect => {
            session.backend().delete(&query).await?;
        }
        DependentPolicy::Nullify | DependentPolicy::None => {
            session.backend().update(&query, &null_key(meta)).await?;
            for member in persisted {
                member.set(&meta.foreign_key, Value::Null);
            }
        }
    }
    debug!(
        target: "tether::dependency",
        "{}: removed {} members ({})",
        meta.qualified_name(),
        members.len(),
        meta.dependent
    );
    Ok(())
}

/// Delete a record's row without callbacks or cascades
pub(crate) async fn delete_row(session: &Session, record: &RecordRef) -> ModelResult<()> {
    if record.is_new_record() {
        return Ok(());
    }
    let info = session.registry().model(&record.model())?;
    let id = session.identity(record)?;
    let query = QueryBuilder::new(info.table.clone()).where_eq(&info.primary_key, id.to_value());
    session.backend().delete(&query).await?;
    Ok(())
}

fn owned_rows(session: &Session, meta: &RelationshipMetadata, key: &Value) -> ModelResult<QueryBuilder> {
    Ok(session
        .association_scope(meta)?
        .where_eq(&meta.foreign_key, key.clone()))
}

fn null_key(meta: &RelationshipMetadata) -> Row {
    let mut changes = Row::new();
    changes.insert(meta.foreign_key.clone(), Value::Null);
    changes
}

async fn nullify_owned(session: &Session, owner: &RecordRef, meta: &RelationshipMetadata, key: &Value) -> ModelResult<()> {
    let query = owned_rows(session, meta, key)?;
    let updated = session.backend().update(&query, &null_key(meta)).await?;
    debug!(target: "tether::dependency", "{}: nullified {} rows", meta.qualified_name(), updated);

    // keep loaded members consistent with storage
    let cached: Vec<RecordRef> = match owner.cached_association(&meta.name) {
        Some(AssociationCache::Collection(target)) => target.records(),
        Some(AssociationCache::Single(single)) => single.target.into_iter().collect(),
        None => Vec::new(),
    };
    for member in cached {
        member.set(&meta.foreign_key, Value::Null);
    }
    Ok(())
}
