//! Association proxy base protocol
//!
//! Cached association state lives inside the owner [`Record`](crate::model::record::Record),
//! keyed by association name. Proxies are short-lived handles pairing an owner
//! with a descriptor; they read and replace that state. Nothing here talks to
//! the backend.

use serde_json::Value;

use crate::model::{RecordRef, Row};

use super::metadata::RelationshipMetadata;

/// Cached state of one association on one owner. Absent means unloaded.
#[derive(Debug, Clone)]
pub enum AssociationCache {
    Single(SingleTarget),
    Collection(CollectionTarget),
}

/// has_one / belongs_to state
#[derive(Debug, Clone, Default)]
pub struct SingleTarget {
    pub target: Option<RecordRef>,
    /// belongs_to: the owner's foreign key when the target was cached
    pub loaded_key: Value,
    /// Assigned or built since the last load; flushed on owner save
    pub dirty: bool,
}

impl SingleTarget {
    pub fn loaded(target: Option<RecordRef>, loaded_key: Value) -> Self {
        Self {
            target,
            loaded_key,
            dirty: false,
        }
    }

    pub fn assigned(target: Option<RecordRef>, loaded_key: Value) -> Self {
        Self {
            target,
            loaded_key,
            dirty: true,
        }
    }
}

/// One member of a loaded collection
#[derive(Debug, Clone)]
pub struct CollectionEntry {
    pub record: RecordRef,
    /// HABTM: extra join-row columns (loaded, or pending for push_with_attributes)
    pub join: Option<Row>,
}

impl CollectionEntry {
    pub fn new(record: RecordRef) -> Self {
        Self { record, join: None }
    }

    pub fn with_join(record: RecordRef, join: Row) -> Self {
        Self {
            record,
            join: Some(join),
        }
    }
}

/// has_many / HABTM state: ordered members, duplicates allowed
#[derive(Debug, Clone, Default)]
pub struct CollectionTarget {
    pub entries: Vec<CollectionEntry>,
}

impl CollectionTarget {
    pub fn new(entries: Vec<CollectionEntry>) -> Self {
        Self { entries }
    }

    pub fn records(&self) -> Vec<RecordRef> {
        self.entries.iter().map(|e| e.record.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, record: &RecordRef) -> bool {
        self.entries.iter().any(|e| &e.record == record)
    }

    /// Remove every entry equal to `record`; returns how many were removed
    pub fn remove(&mut self, record: &RecordRef) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| &e.record != record);
        before - self.entries.len()
    }
}

/// Shared behaviour of single and collection proxies
pub trait AssociationProxy {
    fn owner(&self) -> &RecordRef;

    fn metadata(&self) -> &RelationshipMetadata;

    /// True once a load, assignment or mutation has populated the cache
    fn is_loaded(&self) -> bool {
        self.owner().cached_association(&self.metadata().name).is_some()
    }

    /// Drop cached state without touching storage
    fn reset(&self) {
        self.owner().reset_association(&self.metadata().name);
    }
}

/// Drop duplicates, keeping first occurrences
pub fn dedupe(records: Vec<RecordRef>) -> Vec<RecordRef> {
    let mut unique: Vec<RecordRef> = Vec::with_capacity(records.len());
    for record in records {
        if !unique.contains(&record) {
            unique.push(record);
        }
    }
    unique
}
