//! Primary Key System - identity values used for record equality and lookups
//!
//! Supports integer and UUID keys, conversion to and from the JSON values
//! stored in rows, and parsing of string ids (`"2"`).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use uuid::Uuid;

/// Primary key types supported by the ORM
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimaryKey {
    /// Auto-incrementing integer primary key
    Integer(i64),
    /// UUID primary key
    Uuid(Uuid),
}

/// How a backend assigns keys to inserted rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyKind {
    #[default]
    Integer,
    Uuid,
}

impl std::fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrimaryKey::Integer(id) => write!(f, "{}", id),
            PrimaryKey::Uuid(id) => write!(f, "{}", id),
        }
    }
}

impl PrimaryKey {
    /// Extract as i64 if this is an Integer primary key
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PrimaryKey::Integer(id) => Some(*id),
            _ => None,
        }
    }

    /// Extract as UUID if this is a UUID primary key
    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            PrimaryKey::Uuid(id) => Some(*id),
            _ => None,
        }
    }

    /// The value stored in a row's key or foreign-key column
    pub fn to_value(&self) -> Value {
        match self {
            PrimaryKey::Integer(id) => Value::from(*id),
            PrimaryKey::Uuid(id) => Value::String(id.to_string()),
        }
    }

    /// Read a key back from a column value. `null` and unparseable values yield `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(PrimaryKey::Integer),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl FromStr for PrimaryKey {
    type Err = crate::error::ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(id) = trimmed.parse::<i64>() {
            return Ok(PrimaryKey::Integer(id));
        }
        Uuid::parse_str(trimmed)
            .map(PrimaryKey::Uuid)
            .map_err(|_| crate::error::ModelError::MissingPrimaryKey)
    }
}

impl From<i64> for PrimaryKey {
    fn from(id: i64) -> Self {
        PrimaryKey::Integer(id)
    }
}

impl From<i32> for PrimaryKey {
    fn from(id: i32) -> Self {
        PrimaryKey::Integer(i64::from(id))
    }
}

impl From<Uuid> for PrimaryKey {
    fn from(id: Uuid) -> Self {
        PrimaryKey::Uuid(id)
    }
}

impl From<PrimaryKey> for Value {
    fn from(key: PrimaryKey) -> Self {
        key.to_value()
    }
}
