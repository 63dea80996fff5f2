//! Association declaration options
//!
//! Options arrive either through the typed builder methods or as a JSON object
//! (`{"foreign_key": "client_of", "order": "id"}`). Both paths end in
//! [`AssociationOptions::validate_for`], which rejects keys that make no sense
//! for the association kind.

use serde_json::{Map, Value};

use crate::error::{ModelError, ModelResult};

use super::metadata::{DependentPolicy, RelationshipType};

/// Every option key understood by some association kind
pub const RECOGNIZED_KEYS: &[&str] = &[
    "foreign_key",
    "class_name",
    "join_table",
    "association_foreign_key",
    "order",
    "conditions",
    "dependent",
    "counter_cache",
    "finder_sql",
    "counter_sql",
    "uniq",
];

/// Keys valid for one association kind
pub fn valid_keys(kind: RelationshipType) -> &'static [&'static str] {
    match kind {
        RelationshipType::BelongsTo => &["class_name", "foreign_key", "conditions", "order", "counter_cache"],
        RelationshipType::HasOne => &["class_name", "foreign_key", "conditions", "order", "dependent"],
        RelationshipType::HasMany => &[
            "class_name",
            "foreign_key",
            "conditions",
            "order",
            "dependent",
            "finder_sql",
            "counter_sql",
        ],
        RelationshipType::HasAndBelongsToMany => &[
            "class_name",
            "join_table",
            "foreign_key",
            "association_foreign_key",
            "conditions",
            "order",
            "uniq",
            "finder_sql",
            "counter_sql",
        ],
    }
}

/// Declarative options for one association
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssociationOptions {
    pub foreign_key: Option<String>,
    pub class_name: Option<String>,
    pub join_table: Option<String>,
    pub association_foreign_key: Option<String>,
    /// Order clause, e.g. `"id"` or `"name DESC, id"`
    pub order: Option<String>,
    /// Equality scope: column -> value (`null` means IS NULL, arrays mean IN)
    pub conditions: Map<String, Value>,
    pub dependent: Option<DependentPolicy>,
    pub counter_cache: bool,
    /// Custom counter column; defaults to `<owner plural>_count`
    pub counter_cache_column: Option<String>,
    pub finder_sql: Option<String>,
    pub counter_sql: Option<String>,
    pub uniq: bool,
}

impl AssociationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn foreign_key(mut self, column: impl Into<String>) -> Self {
        self.foreign_key = Some(column.into());
        self
    }

    pub fn class_name(mut self, model: impl Into<String>) -> Self {
        self.class_name = Some(model.into());
        self
    }

    pub fn join_table(mut self, table: impl Into<String>) -> Self {
        self.join_table = Some(table.into());
        self
    }

    pub fn association_foreign_key(mut self, column: impl Into<String>) -> Self {
        self.association_foreign_key = Some(column.into());
        self
    }

    pub fn order(mut self, clause: impl Into<String>) -> Self {
        self.order = Some(clause.into());
        self
    }

    pub fn condition(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.insert(column.into(), value.into());
        self
    }

    pub fn dependent(mut self, policy: DependentPolicy) -> Self {
        self.dependent = Some(policy);
        self
    }

    pub fn counter_cache(mut self) -> Self {
        self.counter_cache = true;
        self
    }

    pub fn counter_cache_column(mut self, column: impl Into<String>) -> Self {
        self.counter_cache = true;
        self.counter_cache_column = Some(column.into());
        self
    }

    pub fn finder_sql(mut self, sql: impl Into<String>) -> Self {
        self.finder_sql = Some(sql.into());
        self
    }

    pub fn counter_sql(mut self, sql: impl Into<String>) -> Self {
        self.counter_sql = Some(sql.into());
        self
    }

    pub fn uniq(mut self) -> Self {
        self.uniq = true;
        self
    }

    /// Parse options from a JSON object. Unknown keys are rejected.
    pub fn from_json(options: &Value) -> ModelResult<Self> {
        let object = match options {
            Value::Null => return Ok(Self::default()),
            Value::Object(object) => object,
            other => {
                return Err(ModelError::Configuration(format!(
                    "association options must be an object, got {}",
                    other
                )))
            }
        };

        let mut parsed = Self::default();
        for (key, value) in object {
            match key.as_str() {
                "foreign_key" => parsed.foreign_key = Some(string_option(key, value)?),
                "class_name" => parsed.class_name = Some(string_option(key, value)?),
                "join_table" => parsed.join_table = Some(string_option(key, value)?),
                "association_foreign_key" => {
                    parsed.association_foreign_key = Some(string_option(key, value)?)
                }
                "order" => parsed.order = Some(string_option(key, value)?),
                "finder_sql" => parsed.finder_sql = Some(string_option(key, value)?),
                "counter_sql" => parsed.counter_sql = Some(string_option(key, value)?),
                "conditions" => match value {
                    Value::Object(conditions) => parsed.conditions = conditions.clone(),
                    other => {
                        return Err(ModelError::Configuration(format!(
                            "conditions must be an object of column/value pairs, got {}",
                            other
                        )))
                    }
                },
                "dependent" => {
                    parsed.dependent = match value {
                        Value::Bool(true) => Some(DependentPolicy::Destroy),
                        Value::Bool(false) | Value::Null => None,
                        Value::String(policy) => Some(policy.parse()?),
                        other => {
                            return Err(ModelError::Configuration(format!(
                                "dependent must be a policy name, got {}",
                                other
                            )))
                        }
                    }
                }
                "counter_cache" => match value {
                    Value::Bool(enabled) => parsed.counter_cache = *enabled,
                    Value::String(column) => {
                        parsed.counter_cache = true;
                        parsed.counter_cache_column = Some(column.clone());
                    }
                    other => {
                        return Err(ModelError::Configuration(format!(
                            "counter_cache must be a boolean or a column name, got {}",
                            other
                        )))
                    }
                },
                "uniq" => parsed.uniq = bool_option(key, value)?,
                unknown => {
                    return Err(ModelError::Configuration(format!(
                        "Unknown key(s): {}",
                        unknown
                    )))
                }
            }
        }
        Ok(parsed)
    }

    /// Keys that carry a value in this option set
    pub fn present_keys(&self) -> Vec<&'static str> {
        let mut keys = Vec::new();
        let flags = [
            ("foreign_key", self.foreign_key.is_some()),
            ("class_name", self.class_name.is_some()),
            ("join_table", self.join_table.is_some()),
            ("association_foreign_key", self.association_foreign_key.is_some()),
            ("order", self.order.is_some()),
            ("conditions", !self.conditions.is_empty()),
            ("dependent", self.dependent.is_some()),
            ("counter_cache", self.counter_cache),
            ("finder_sql", self.finder_sql.is_some()),
            ("counter_sql", self.counter_sql.is_some()),
            ("uniq", self.uniq),
        ];
        for (key, present) in flags {
            if present {
                keys.push(key);
            }
        }
        keys
    }

    /// Reject options that do not apply to `kind`
    pub fn validate_for(&self, kind: RelationshipType, name: &str) -> ModelResult<()> {
        let allowed = valid_keys(kind);
        let invalid: Vec<&str> = self
            .present_keys()
            .into_iter()
            .filter(|key| !allowed.contains(key))
            .collect();
        if invalid.is_empty() {
            return Ok(());
        }
        Err(ModelError::Configuration(format!(
            "Unknown key(s) for {} :{}: {}",
            kind,
            name,
            invalid.join(", ")
        )))
    }
}

fn string_option(key: &str, value: &Value) -> ModelResult<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Ok(s.clone()),
        other => Err(ModelError::Configuration(format!(
            "{} must be a non-empty string, got {}",
            key, other
        ))),
    }
}

fn bool_option(key: &str, value: &Value) -> ModelResult<bool> {
    value.as_bool().ok_or_else(|| {
        ModelError::Configuration(format!("{} must be a boolean, got {}", key, value))
    })
}
