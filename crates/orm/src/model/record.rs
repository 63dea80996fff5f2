//! Dynamic records and shared record handles
//!
//! A [`Record`] is one row of one model plus its in-memory lifecycle state
//! (new/persisted/destroyed, validation errors) and the cached state of its
//! associations. Records are shared through [`RecordRef`] so that a target
//! appended to a collection and the caller's handle observe the same save.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;

use crate::error::FieldError;
use crate::relationships::proxy::AssociationCache;

use super::primary_key::PrimaryKey;

/// A row as stored by a backend: column name to JSON value
pub type Row = serde_json::Map<String, Value>;

/// One model instance
pub struct Record {
    model: String,
    primary_key: String,
    attributes: Row,
    new_record: bool,
    destroyed: bool,
    errors: Vec<FieldError>,
    associations: HashMap<String, AssociationCache>,
}

impl Record {
    pub(crate) fn new(model: &str, primary_key: &str, attributes: Row, new_record: bool) -> Self {
        Self {
            model: model.to_string(),
            primary_key: primary_key.to_string(),
            attributes,
            new_record,
            destroyed: false,
            errors: Vec::new(),
            associations: HashMap::new(),
        }
    }
}

/// Shared, interior-mutable handle to a [`Record`]
#[derive(Clone)]
pub struct RecordRef(Arc<RwLock<Record>>);

impl RecordRef {
    pub(crate) fn new(record: Record) -> Self {
        RecordRef(Arc::new(RwLock::new(record)))
    }

    fn read(&self) -> RwLockReadGuard<'_, Record> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Record> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Name of the model this record was instantiated as
    pub fn model(&self) -> String {
        self.read().model.clone()
    }

    /// Name of the primary key column
    pub fn primary_key_name(&self) -> String {
        self.read().primary_key.clone()
    }

    /// Primary key, if one has been assigned
    pub fn id(&self) -> Option<PrimaryKey> {
        let record = self.read();
        record
            .attributes
            .get(&record.primary_key)
            .and_then(PrimaryKey::from_value)
    }

    /// Attribute value, `null` when absent
    pub fn get(&self, attribute: &str) -> Value {
        self.read()
            .attributes
            .get(attribute)
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Attribute value as a string slice copy, if it is a string
    pub fn get_str(&self, attribute: &str) -> Option<String> {
        self.get(attribute).as_str().map(str::to_string)
    }

    /// Attribute value as an integer, if it is one
    pub fn get_i64(&self, attribute: &str) -> Option<i64> {
        self.get(attribute).as_i64()
    }

    pub fn set(&self, attribute: &str, value: impl Into<Value>) {
        self.write()
            .attributes
            .insert(attribute.to_string(), value.into());
    }

    pub fn has_attribute(&self, attribute: &str) -> bool {
        self.read().attributes.contains_key(attribute)
    }

    /// Snapshot of all attributes
    pub fn attributes(&self) -> Row {
        self.read().attributes.clone()
    }

    pub fn is_new_record(&self) -> bool {
        self.read().new_record
    }

    pub fn is_destroyed(&self) -> bool {
        self.read().destroyed
    }

    /// Validation errors from the last save attempt
    pub fn errors(&self) -> Vec<FieldError> {
        self.read().errors.clone()
    }

    /// First error message recorded on `attribute`
    pub fn error_on(&self, attribute: &str) -> Option<String> {
        self.read()
            .errors
            .iter()
            .find(|e| e.attribute == attribute)
            .map(|e| e.message.clone())
    }

    /// True when both handles point at the same in-memory record
    pub fn ptr_eq(&self, other: &RecordRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Attributes plus the model name, for logging and serialization
    pub fn to_json(&self) -> Value {
        let record = self.read();
        let mut object = record.attributes.clone();
        object.insert("_model".to_string(), Value::String(record.model.clone()));
        Value::Object(object)
    }

    pub(crate) fn set_id(&self, key: &PrimaryKey) {
        let mut record = self.write();
        let column = record.primary_key.clone();
        record.attributes.insert(column, key.to_value());
    }

    pub(crate) fn clear_id(&self) {
        let mut record = self.write();
        let column = record.primary_key.clone();
        record.attributes.remove(&column);
    }

    pub(crate) fn set_new_record(&self, new_record: bool) {
        self.write().new_record = new_record;
    }

    pub(crate) fn mark_destroyed(&self) {
        let mut record = self.write();
        record.destroyed = true;
        record.associations.clear();
    }

    /// Undo [`mark_destroyed`](Self::mark_destroyed) after a rolled-back destroy
    pub(crate) fn clear_destroyed(&self) {
        self.write().destroyed = false;
    }

    pub(crate) fn set_errors(&self, errors: Vec<FieldError>) {
        self.write().errors = errors;
    }

    pub(crate) fn add_error(&self, error: FieldError) {
        self.write().errors.push(error);
    }

    pub(crate) fn replace_attributes(&self, attributes: Row) {
        self.write().attributes = attributes;
    }

    pub(crate) fn cached_association(&self, name: &str) -> Option<AssociationCache> {
        self.read().associations.get(name).cloned()
    }

    pub(crate) fn store_association(&self, name: &str, cache: AssociationCache) {
        self.write().associations.insert(name.to_string(), cache);
    }

    pub(crate) fn reset_association(&self, name: &str) {
        self.write().associations.remove(name);
    }

    pub(crate) fn reset_associations(&self) {
        self.write().associations.clear();
    }
}

/// Two handles are equal when they are the same object, or when both are
/// persisted records of the same model with the same primary key.
impl PartialEq for RecordRef {
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        if self.is_new_record() || other.is_new_record() {
            return false;
        }
        self.model() == other.model() && self.id().is_some() && self.id() == other.id()
    }
}

impl fmt::Debug for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let record = self.read();
        let mut cached: Vec<&String> = record.associations.keys().collect();
        cached.sort();
        f.debug_struct("Record")
            .field("model", &record.model)
            .field("attributes", &record.attributes)
            .field("new_record", &record.new_record)
            .field("destroyed", &record.destroyed)
            .field("cached_associations", &cached)
            .finish()
    }
}
