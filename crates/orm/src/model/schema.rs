//! Model schema declarations
//!
//! A [`ModelSchema`] describes one model: its table, key, inheritance parent,
//! validations, observers and association declarations. Schemas are handed to
//! a [`RegistryBuilder`](crate::relationships::registry::RegistryBuilder),
//! which resolves and validates them once.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::FieldError;
use crate::events::ModelObserver;
use crate::observers::ObserverRegistry;
use crate::relationships::metadata::RelationshipType;
use crate::relationships::options::AssociationOptions;

use super::primary_key::KeyKind;
use super::record::{RecordRef, Row};

/// Custom validation: returns the errors found on the record
pub type Validator = Arc<dyn Fn(&RecordRef) -> Vec<FieldError> + Send + Sync>;

/// Message used by presence validations
pub const BLANK_MESSAGE: &str = "can't be empty";

#[derive(Clone)]
pub enum Validation {
    /// Attribute must be non-null and, for strings, non-blank
    Presence(String),
    Custom(Validator),
}

impl Validation {
    pub fn check(&self, record: &RecordRef) -> Vec<FieldError> {
        match self {
            Validation::Presence(attribute) => {
                let blank = match record.get(attribute) {
                    Value::Null => true,
                    Value::String(s) => s.trim().is_empty(),
                    _ => false,
                };
                if blank {
                    vec![FieldError::new(attribute.clone(), BLANK_MESSAGE)]
                } else {
                    Vec::new()
                }
            }
            Validation::Custom(check) => check(record),
        }
    }
}

impl fmt::Debug for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Validation::Presence(attribute) => f.debug_tuple("Presence").field(attribute).finish(),
            Validation::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// One association as declared, before resolution
#[derive(Debug, Clone)]
pub struct AssociationDeclaration {
    pub kind: RelationshipType,
    pub name: String,
    /// Option parsing errors are kept and reported when the registry is built
    pub options: Result<AssociationOptions, String>,
}

#[derive(Debug, Clone)]
pub struct ModelSchema {
    pub name: String,
    /// Explicit table; subtypes share the root's table
    pub table: Option<String>,
    pub primary_key: String,
    pub key_kind: KeyKind,
    /// Single-table inheritance parent
    pub parent: Option<String>,
    pub inheritance_column: String,
    pub validations: Vec<Validation>,
    /// Attribute defaults applied to new records
    pub defaults: Row,
    pub observers: ObserverRegistry,
    pub associations: Vec<AssociationDeclaration>,
}

impl ModelSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            primary_key: "id".to_string(),
            key_kind: KeyKind::Integer,
            parent: None,
            inheritance_column: "type".to_string(),
            validations: Vec::new(),
            defaults: Row::new(),
            observers: ObserverRegistry::new(),
            associations: Vec::new(),
        }
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self
    }

    pub fn uuid_keys(mut self) -> Self {
        self.key_kind = KeyKind::Uuid;
        self
    }

    /// Store this model in its parent's table (`Client < Company`)
    pub fn inherits(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn inheritance_column(mut self, column: impl Into<String>) -> Self {
        self.inheritance_column = column.into();
        self
    }

    pub fn validates_presence_of(mut self, attribute: impl Into<String>) -> Self {
        self.validations.push(Validation::Presence(attribute.into()));
        self
    }

    pub fn validates_with<F>(mut self, check: F) -> Self
    where
        F: Fn(&RecordRef) -> Vec<FieldError> + Send + Sync + 'static,
    {
        self.validations.push(Validation::Custom(Arc::new(check)));
        self
    }

    pub fn default_value(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.defaults.insert(attribute.into(), value.into());
        self
    }

    pub fn observer(mut self, observer: Arc<dyn ModelObserver>) -> Self {
        self.observers.register(observer);
        self
    }

    pub fn has_one(self, name: &str, options: AssociationOptions) -> Self {
        self.declare(RelationshipType::HasOne, name, Ok(options))
    }

    pub fn belongs_to(self, name: &str, options: AssociationOptions) -> Self {
        self.declare(RelationshipType::BelongsTo, name, Ok(options))
    }

    pub fn has_many(self, name: &str, options: AssociationOptions) -> Self {
        self.declare(RelationshipType::HasMany, name, Ok(options))
    }

    pub fn has_and_belongs_to_many(self, name: &str, options: AssociationOptions) -> Self {
        self.declare(RelationshipType::HasAndBelongsToMany, name, Ok(options))
    }

    /// Declare with options given as a JSON object
    pub fn associate_json(self, kind: RelationshipType, name: &str, options: Value) -> Self {
        let parsed = AssociationOptions::from_json(&options).map_err(|e| e.to_string());
        self.declare(kind, name, parsed)
    }

    fn declare(
        mut self,
        kind: RelationshipType,
        name: &str,
        options: Result<AssociationOptions, String>,
    ) -> Self {
        self.associations.push(AssociationDeclaration {
            kind,
            name: name.to_string(),
            options,
        });
        self
    }
}
