//! Relationship Metadata System - resolved, immutable association descriptors

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};
use crate::query::{OrderDirection, WhereCondition};

/// Defines the kind of association between two models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    /// Target holds a foreign key to the owner; zero or one target
    HasOne,
    /// Owner holds a foreign key to the target
    BelongsTo,
    /// Targets hold a foreign key to the owner
    HasMany,
    /// Owner and targets are linked through a join table
    HasAndBelongsToMany,
}

impl RelationshipType {
    /// Returns true if this relationship returns a collection
    pub fn is_collection(self) -> bool {
        matches!(self, Self::HasMany | Self::HasAndBelongsToMany)
    }

    /// Returns true if this relationship requires a join table
    pub fn requires_join_table(self) -> bool {
        matches!(self, Self::HasAndBelongsToMany)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::HasOne => "has_one",
            Self::BelongsTo => "belongs_to",
            Self::HasMany => "has_many",
            Self::HasAndBelongsToMany => "has_and_belongs_to_many",
        }
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens to targets when the owner is destroyed or a target is
/// removed from the association
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependentPolicy {
    /// Leave targets alone; removal from a collection nulls the foreign key
    #[default]
    None,
    /// Destroy each target through its own lifecycle
    Destroy,
    /// Delete target rows directly, skipping their callbacks
    DeleteDirect,
    /// Clear the foreign key on targets
    Nullify,
}

impl DependentPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Destroy => "destroy",
            Self::DeleteDirect => "delete_direct",
            Self::Nullify => "nullify",
        }
    }
}

impl FromStr for DependentPolicy {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "destroy" => Ok(Self::Destroy),
            "delete_direct" | "delete_all" | "exclusively_dependent" => Ok(Self::DeleteDirect),
            "nullify" => Ok(Self::Nullify),
            other => Err(ModelError::Configuration(format!(
                "dependent must be one of none, destroy, delete_direct or nullify (got '{}')",
                other
            ))),
        }
    }
}

impl fmt::Display for DependentPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Join table configuration for has_and_belongs_to_many
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinTableConfig {
    /// The join table name
    pub table: String,
    /// Column referencing the owner
    pub owner_key: String,
    /// Column referencing the target
    pub target_key: String,
}

impl JoinTableConfig {
    pub fn new(table: impl Into<String>, owner_key: impl Into<String>, target_key: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            owner_key: owner_key.into(),
            target_key: target_key.into(),
        }
    }

    pub fn validate(&self) -> ModelResult<()> {
        if self.table.is_empty() {
            return Err(ModelError::Configuration(
                "Join table name cannot be empty".to_string(),
            ));
        }
        if self.owner_key == self.target_key {
            return Err(ModelError::Configuration(format!(
                "Join table '{}' needs two distinct key columns (both are '{}')",
                self.table, self.owner_key
            )));
        }
        Ok(())
    }
}

/// One resolved association of one model.
///
/// Created by the [`Registry`](super::registry::Registry) when it is built and
/// shared by every record of the owning model.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipMetadata {
    pub kind: RelationshipType,

    /// Accessor name (`clients`, `account`)
    pub name: String,

    /// Model that declared the association
    pub owner_model: String,

    /// Model the association points at
    pub target_model: String,

    /// belongs_to: column on the owner. has_one/has_many: column on the
    /// target. HABTM: join column referencing the owner.
    pub foreign_key: String,

    pub join_table: Option<JoinTableConfig>,

    pub order: Vec<(String, OrderDirection)>,

    /// Extra equality scope applied to every load, count and find
    pub conditions: Vec<WhereCondition>,

    pub dependent: DependentPolicy,

    /// belongs_to only: counter column on the target updated on create/destroy
    pub counter_cache: Option<String>,

    pub finder_sql: Option<String>,
    pub counter_sql: Option<String>,

    /// De-duplicate members when loading
    pub uniq: bool,
}

impl RelationshipMetadata {
    pub fn new(
        kind: RelationshipType,
        name: impl Into<String>,
        owner_model: impl Into<String>,
        target_model: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            owner_model: owner_model.into(),
            target_model: target_model.into(),
            foreign_key: foreign_key.into(),
            join_table: None,
            order: Vec::new(),
            conditions: Vec::new(),
            dependent: DependentPolicy::None,
            counter_cache: None,
            finder_sql: None,
            counter_sql: None,
            uniq: false,
        }
    }

    pub fn is_collection(&self) -> bool {
        self.kind.is_collection()
    }

    /// Qualified name used in errors and logs: `Firm.clients`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.owner_model, self.name)
    }

    /// Join table of a has_and_belongs_to_many
    pub fn join(&self) -> ModelResult<&JoinTableConfig> {
        self.join_table.as_ref().ok_or_else(|| {
            ModelError::Relationship(format!("{} has no join table", self.qualified_name()))
        })
    }

    /// Check the resolved descriptor for consistency
    pub fn validate(&self) -> ModelResult<()> {
        if self.foreign_key.is_empty() {
            return Err(ModelError::Configuration(format!(
                "{} has an empty foreign key",
                self.qualified_name()
            )));
        }

        match (&self.join_table, self.kind.requires_join_table()) {
            (None, true) => {
                return Err(ModelError::Configuration(format!(
                    "{} requires a join table",
                    self.qualified_name()
                )))
            }
            (Some(_), false) => {
                return Err(ModelError::Configuration(format!(
                    "{} is a {} and cannot use a join table",
                    self.qualified_name(),
                    self.kind
                )))
            }
            (Some(join), true) => join.validate()?,
            (None, false) => {}
        }

        if self.counter_cache.is_some() && self.kind != RelationshipType::BelongsTo {
            return Err(ModelError::Configuration(format!(
                "counter_cache is only valid on belongs_to ({})",
                self.qualified_name()
            )));
        }

        if self.dependent != DependentPolicy::None
            && matches!(self.kind, RelationshipType::BelongsTo | RelationshipType::HasAndBelongsToMany)
        {
            return Err(ModelError::Configuration(format!(
                "dependent is not valid for {} ({})",
                self.kind,
                self.qualified_name()
            )));
        }

        Ok(())
    }
}
