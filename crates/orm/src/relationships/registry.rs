//! Relationship Registry - resolved model and association metadata
//!
//! Built once from [`ModelSchema`] declarations and immutable afterwards. All
//! declaration errors (unknown option keys, unknown target models, options
//! that do not fit the association kind) surface from
//! [`RegistryBuilder::build`], before any record exists.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{ModelError, ModelResult};
use crate::model::schema::{ModelSchema, Validation};
use crate::model::{KeyKind, Row};
use crate::observers::ObserverRegistry;
use crate::query::{parse_order, QueryBuilder, WhereCondition};

use super::inflector;
use super::metadata::{DependentPolicy, JoinTableConfig, RelationshipMetadata, RelationshipType};
use super::options::AssociationOptions;

/// A model after inheritance has been resolved
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub table: String,
    pub primary_key: String,
    pub key_kind: KeyKind,
    pub parent: Option<String>,
    /// True when the model shares its table with a parent or subtypes
    pub single_table: bool,
    pub inheritance_column: String,
    /// Own validations after inherited ones
    pub validations: Vec<Validation>,
    pub defaults: Row,
    pub observers: ObserverRegistry,
    /// Inherited associations first; a redeclared name replaces the inherited one
    pub associations: Vec<Arc<RelationshipMetadata>>,
}

impl ModelInfo {
    pub fn association(&self, name: &str) -> Option<&Arc<RelationshipMetadata>> {
        self.associations.iter().find(|a| a.name == name)
    }
}

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    schemas: Vec<ModelSchema>,
}

impl RegistryBuilder {
    pub fn model(mut self, schema: ModelSchema) -> Self {
        self.schemas.push(schema);
        self
    }

    pub fn models<I: IntoIterator<Item = ModelSchema>>(mut self, schemas: I) -> Self {
        self.schemas.extend(schemas);
        self
    }

    /// Resolve every model and association
    pub fn build(self) -> ModelResult<Arc<Registry>> {
        let mut by_name: HashMap<String, ModelSchema> = HashMap::new();
        let mut order = Vec::new();
        for schema in self.schemas {
            if by_name.contains_key(&schema.name) {
                return Err(ModelError::Configuration(format!(
                    "Model '{}' is registered twice",
                    schema.name
                )));
            }
            order.push(schema.name.clone());
            by_name.insert(schema.name.clone(), schema);
        }

        for name in &order {
            lineage(&by_name, name)?;
        }

        let mut models = HashMap::new();
        for name in &order {
            let info = resolve_model(&by_name, name)?;
            models.insert(name.clone(), info);
        }

        let registry = Registry { models, order };
        tracing::debug!(
            target: "tether::association",
            "Registry built with {} models",
            registry.order.len()
        );
        Ok(Arc::new(registry))
    }
}

/// Immutable, shareable model and association table
#[derive(Debug)]
pub struct Registry {
    models: HashMap<String, ModelInfo>,
    order: Vec<String>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn model(&self, name: &str) -> ModelResult<&ModelInfo> {
        self.models
            .get(name)
            .ok_or_else(|| ModelError::Configuration(format!("Unknown model '{}'", name)))
    }

    pub fn model_names(&self) -> &[String] {
        &self.order
    }

    pub fn association(&self, model: &str, name: &str) -> ModelResult<Arc<RelationshipMetadata>> {
        self.model(model)?.association(name).cloned().ok_or_else(|| {
            ModelError::Relationship(format!("Association '{}' not found on {}", name, model))
        })
    }

    /// True when `model` is `ancestor` or inherits from it
    pub fn is_a(&self, model: &str, ancestor: &str) -> bool {
        let mut current = Some(model);
        while let Some(name) = current {
            if name == ancestor {
                return true;
            }
            current = self.models.get(name).and_then(|m| m.parent.as_deref());
        }
        false
    }

    /// `model` and every model inheriting from it
    pub fn descendants(&self, model: &str) -> Vec<String> {
        self.order
            .iter()
            .filter(|name| self.is_a(name, model))
            .cloned()
            .collect()
    }

    /// Columns on `model` kept by other models' belongs_to `counter_cache`
    pub fn counter_columns(&self, model: &str) -> Vec<&str> {
        let mut columns: Vec<&str> = self
            .models
            .values()
            .flat_map(|info| info.associations.iter())
            .filter(|meta| self.is_a(model, &meta.target_model))
            .filter_map(|meta| meta.counter_cache.as_deref())
            .collect();
        columns.sort_unstable();
        columns.dedup();
        columns
    }

    /// Base query for `model`: its table, narrowed to the model and its
    /// subtypes when the table is shared with a parent.
    pub fn scope(&self, model: &str) -> ModelResult<QueryBuilder> {
        let info = self.model(model)?;
        let query = QueryBuilder::new(info.table.clone());
        if info.parent.is_some() {
            let names: Vec<Value> = self.descendants(model).into_iter().map(Value::String).collect();
            return Ok(query.where_in(&info.inheritance_column, names));
        }
        Ok(query)
    }

    /// Model to instantiate for a row loaded as `model`
    pub fn model_for_row(&self, model: &str, row: &Row) -> ModelResult<&ModelInfo> {
        let info = self.model(model)?;
        if !info.single_table {
            return Ok(info);
        }
        match row.get(&info.inheritance_column).and_then(Value::as_str) {
            Some(stored) if self.models.contains_key(stored) && self.is_a(stored, model) => self.model(stored),
            _ => Ok(info),
        }
    }
}

fn lineage(schemas: &HashMap<String, ModelSchema>, name: &str) -> ModelResult<Vec<String>> {
    let mut chain = vec![name.to_string()];
    let mut current = schemas.get(name).and_then(|s| s.parent.clone());
    while let Some(parent) = current {
        if chain.contains(&parent) {
            return Err(ModelError::Configuration(format!(
                "Inheritance cycle through '{}'",
                parent
            )));
        }
        let schema = schemas.get(&parent).ok_or_else(|| {
            ModelError::Configuration(format!("Model '{}' inherits unknown model '{}'", name, parent))
        })?;
        chain.push(parent);
        current = schema.parent.clone();
    }
    // root first
    chain.reverse();
    Ok(chain)
}

fn resolve_model(schemas: &HashMap<String, ModelSchema>, name: &str) -> ModelResult<ModelInfo> {
    let chain = lineage(schemas, name)?;
    let root = &schemas[&chain[0]];
    let own = &schemas[name];

    let has_subtypes = schemas.values().any(|s| s.parent.as_deref() == Some(root.name.as_str()));
    let table = root
        .table
        .clone()
        .unwrap_or_else(|| inflector::tableize(&root.name));

    let mut validations = Vec::new();
    let mut defaults = Row::new();
    let mut observers = ObserverRegistry::new();
    let mut associations: Vec<Arc<RelationshipMetadata>> = Vec::new();

    for model in &chain {
        let schema = &schemas[model];
        validations.extend(schema.validations.iter().cloned());
        for (key, value) in &schema.defaults {
            defaults.insert(key.clone(), value.clone());
        }
        observers.extend(&schema.observers);
        for declaration in &schema.associations {
            let options = declaration.options.clone().map_err(|message| {
                ModelError::Configuration(format!(
                    "{} :{} on {}: {}",
                    declaration.kind, declaration.name, model, message
                ))
            })?;
            let meta = resolve_association(schemas, model, declaration.kind, &declaration.name, &options)?;
            associations.retain(|existing| existing.name != meta.name);
            associations.push(Arc::new(meta));
        }
    }

    Ok(ModelInfo {
        name: own.name.clone(),
        table,
        primary_key: root.primary_key.clone(),
        key_kind: root.key_kind,
        parent: own.parent.clone(),
        single_table: has_subtypes || own.parent.is_some(),
        inheritance_column: root.inheritance_column.clone(),
        validations,
        defaults,
        observers,
        associations,
    })
}

fn resolve_association(
    schemas: &HashMap<String, ModelSchema>,
    owner: &str,
    kind: RelationshipType,
    name: &str,
    options: &AssociationOptions,
) -> ModelResult<RelationshipMetadata> {
    options.validate_for(kind, name)?;

    let target = match &options.class_name {
        Some(class_name) => class_name.clone(),
        None if kind.is_collection() => inflector::classify(name),
        None => inflector::camelize(name),
    };
    if !schemas.contains_key(&target) {
        return Err(ModelError::Configuration(format!(
            "{}.{} references unknown model '{}'",
            owner, name, target
        )));
    }

    let foreign_key = match (&options.foreign_key, kind) {
        (Some(column), _) => column.clone(),
        (None, RelationshipType::BelongsTo) => format!("{}_id", name),
        (None, _) => inflector::foreign_key(owner),
    };

    let mut meta = RelationshipMetadata::new(kind, name, owner, target.clone(), foreign_key.clone());

    if kind == RelationshipType::HasAndBelongsToMany {
        let table = match &options.join_table {
            Some(table) => table.clone(),
            None => {
                let mut tables = [table_of(schemas, owner), table_of(schemas, &target)];
                tables.sort();
                tables.join("_")
            }
        };
        let target_key = options
            .association_foreign_key
            .clone()
            .unwrap_or_else(|| inflector::foreign_key(&target));
        meta.join_table = Some(JoinTableConfig::new(table, foreign_key, target_key));
    }

    if let Some(order) = &options.order {
        meta.order = parse_order(order);
    }
    meta.conditions = options
        .conditions
        .iter()
        .map(|(column, value)| WhereCondition::from_pair(column, value))
        .collect();
    meta.dependent = options.dependent.unwrap_or(DependentPolicy::None);
    if options.counter_cache {
        meta.counter_cache = Some(options.counter_cache_column.clone().unwrap_or_else(|| {
            format!("{}_count", inflector::pluralize(&inflector::underscore(owner)))
        }));
    }
    meta.finder_sql = options.finder_sql.clone();
    meta.counter_sql = options.counter_sql.clone();
    meta.uniq = options.uniq;

    meta.validate()?;
    Ok(meta)
}

/// Table for a model, following inheritance to the root
fn table_of(schemas: &HashMap<String, ModelSchema>, model: &str) -> String {
    let mut current = model;
    while let Some(parent) = schemas.get(current).and_then(|s| s.parent.as_deref()) {
        current = parent;
    }
    schemas
        .get(current)
        .and_then(|s| s.table.clone())
        .unwrap_or_else(|| inflector::tableize(current))
}
