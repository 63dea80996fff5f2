//! Values assigned to or appended on associations
//!
//! Callers may hand an association anything: a record, a list of records,
//! `nil`, or a primitive. Everything except a record of the right model is an
//! [`AssociationTypeMismatch`](crate::error::ModelError::AssociationTypeMismatch).

use serde_json::Value;

use crate::error::{ModelError, ModelResult};
use crate::model::RecordRef;

use super::metadata::RelationshipMetadata;
use super::registry::Registry;

#[derive(Debug, Clone)]
pub enum AssociationValue {
    Nil,
    Record(RecordRef),
    Many(Vec<RecordRef>),
    Scalar(Value),
}

impl AssociationValue {
    /// Short type name for error messages
    pub fn describe(&self) -> String {
        match self {
            AssociationValue::Nil => "nil".to_string(),
            AssociationValue::Record(record) => record.model(),
            AssociationValue::Many(_) => "Array".to_string(),
            AssociationValue::Scalar(value) => match value {
                Value::Null => "nil".to_string(),
                Value::Bool(_) => "Boolean".to_string(),
                Value::Number(n) if n.is_i64() || n.is_u64() => "Integer".to_string(),
                Value::Number(_) => "Float".to_string(),
                Value::String(_) => "String".to_string(),
                Value::Array(_) => "Array".to_string(),
                Value::Object(_) => "Hash".to_string(),
            },
        }
    }
}

impl From<RecordRef> for AssociationValue {
    fn from(record: RecordRef) -> Self {
        AssociationValue::Record(record)
    }
}

impl From<&RecordRef> for AssociationValue {
    fn from(record: &RecordRef) -> Self {
        AssociationValue::Record(record.clone())
    }
}

impl From<Option<RecordRef>> for AssociationValue {
    fn from(record: Option<RecordRef>) -> Self {
        record.map_or(AssociationValue::Nil, AssociationValue::Record)
    }
}

impl From<Vec<RecordRef>> for AssociationValue {
    fn from(records: Vec<RecordRef>) -> Self {
        AssociationValue::Many(records)
    }
}

impl From<&[RecordRef]> for AssociationValue {
    fn from(records: &[RecordRef]) -> Self {
        AssociationValue::Many(records.to_vec())
    }
}

impl From<Value> for AssociationValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => AssociationValue::Nil,
            other => AssociationValue::Scalar(other),
        }
    }
}

impl From<i64> for AssociationValue {
    fn from(value: i64) -> Self {
        AssociationValue::Scalar(Value::from(value))
    }
}

impl From<&str> for AssociationValue {
    fn from(value: &str) -> Self {
        AssociationValue::Scalar(Value::from(value))
    }
}

/// Reject a record whose model is not the target model or one of its subtypes
pub fn check_record(registry: &Registry, meta: &RelationshipMetadata, record: &RecordRef) -> ModelResult<()> {
    let model = record.model();
    if registry.is_a(&model, &meta.target_model) {
        Ok(())
    } else {
        Err(mismatch(meta, &model))
    }
}

/// A single-reference assignment: `nil` or one record of the target type
pub fn expect_optional(
    registry: &Registry,
    meta: &RelationshipMetadata,
    value: AssociationValue,
) -> ModelResult<Option<RecordRef>> {
    match value {
        AssociationValue::Nil => Ok(None),
        AssociationValue::Record(record) => {
            check_record(registry, meta, &record)?;
            Ok(Some(record))
        }
        other => Err(mismatch(meta, &other.describe())),
    }
}

/// Members for a collection append or delete: one record or a list of records.
/// Every element is checked before anything is returned.
pub fn expect_members(
    registry: &Registry,
    meta: &RelationshipMetadata,
    value: AssociationValue,
) -> ModelResult<Vec<RecordRef>> {
    let records = match value {
        AssociationValue::Record(record) => vec![record],
        AssociationValue::Many(records) => records,
        other => return Err(mismatch(meta, &other.describe())),
    };
    for record in &records {
        check_record(registry, meta, record)?;
    }
    Ok(records)
}

/// The full member list for a collection replacement
pub fn expect_list(
    registry: &Registry,
    meta: &RelationshipMetadata,
    value: AssociationValue,
) -> ModelResult<Vec<RecordRef>> {
    match value {
        AssociationValue::Many(records) => {
            for record in &records {
                check_record(registry, meta, record)?;
            }
            Ok(records)
        }
        other => Err(mismatch(meta, &other.describe())),
    }
}

fn mismatch(meta: &RelationshipMetadata, found: &str) -> ModelError {
    ModelError::AssociationTypeMismatch {
        association: meta.qualified_name(),
        expected: meta.target_model.clone(),
        found: found.to_string(),
    }
}
