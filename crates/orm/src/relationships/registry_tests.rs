//! Registry resolution: defaults derived from names, inheritance and
//! declaration errors surfaced at build time.

use std::sync::Arc;

use serde_json::json;

use super::metadata::{DependentPolicy, JoinTableConfig, RelationshipType};
use super::options::AssociationOptions;
use super::registry::Registry;
use crate::error::ModelError;
use crate::model::{ModelSchema, Row};
use crate::query::OrderDirection;
use crate::testing::{registry, DeletionProbe};

fn fixture_registry() -> Arc<Registry> {
    registry(Arc::new(DeletionProbe::default()))
}

fn build_error(schemas: Vec<ModelSchema>) -> String {
    match Registry::builder().models(schemas).build() {
        Ok(_) => panic!("registry should have been rejected"),
        Err(ModelError::Configuration(message)) => message,
        Err(other) => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_defaults_follow_naming_conventions() {
    let registry = fixture_registry();

    let clients = registry.association("Firm", "clients").unwrap();
    assert_eq!(clients.kind, RelationshipType::HasMany);
    assert_eq!(clients.target_model, "Client");
    assert_eq!(clients.foreign_key, "firm_id");
    assert_eq!(clients.order, vec![("id".to_string(), OrderDirection::Asc)]);

    let firm = registry.association("Account", "firm").unwrap();
    assert_eq!(firm.target_model, "Firm");
    assert_eq!(firm.foreign_key, "firm_id");

    let projects = registry.association("Developer", "projects").unwrap();
    assert_eq!(
        projects.join_table,
        Some(JoinTableConfig::new("developers_projects", "developer_id", "project_id"))
    );
    let developers = registry.association("Project", "developers").unwrap();
    assert_eq!(
        developers.join_table,
        Some(JoinTableConfig::new("developers_projects", "project_id", "developer_id"))
    );
    assert!(developers.uniq);
}

#[test]
fn test_explicit_options_override_defaults() {
    let registry = fixture_registry();
    let clients = registry.association("Firm", "dependent_clients_of_firm").unwrap();
    assert_eq!(clients.foreign_key, "client_of");
    assert_eq!(clients.dependent, DependentPolicy::Destroy);

    let reversed = registry.association("Firm", "clients_of_firm_reversed").unwrap();
    assert_eq!(reversed.order, vec![("id".to_string(), OrderDirection::Desc)]);

    let topic = registry.association("Reply", "topic").unwrap();
    assert_eq!(topic.counter_cache.as_deref(), Some("replies_count"));
}

#[test]
fn test_counter_columns_belong_to_the_counted_model() {
    let registry = fixture_registry();
    assert_eq!(registry.counter_columns("Topic"), vec!["replies_count"]);
    assert!(registry.counter_columns("Reply").is_empty());
    assert!(registry.counter_columns("Firm").is_empty());
}

#[test]
fn test_subtypes_share_root_table_and_inherit() {
    let registry = fixture_registry();
    let client = registry.model("Client").unwrap();
    assert_eq!(client.table, "companies");
    assert!(client.single_table);
    assert_eq!(client.validations.len(), 1);

    let company = registry.model("Company").unwrap();
    assert!(company.single_table);
    assert!(company.parent.is_none());

    assert!(registry.is_a("SpecialProject", "Project"));
    assert!(!registry.is_a("Project", "SpecialProject"));
    assert_eq!(registry.descendants("Project"), vec!["Project".to_string(), "SpecialProject".to_string()]);
}

#[test]
fn test_scope_narrows_subtypes_only() {
    let registry = fixture_registry();
    let scope = registry.scope("Client").unwrap();
    assert_eq!(scope.table(), "companies");
    assert_eq!(scope.conditions().len(), 1);
    assert!(registry.scope("Company").unwrap().conditions().is_empty());
}

#[test]
fn test_model_for_row_uses_stored_type() {
    let registry = fixture_registry();
    let row: Row = json!({ "id": 3, "type": "SpecialProject" }).as_object().cloned().unwrap();
    assert_eq!(registry.model_for_row("Project", &row).unwrap().name, "SpecialProject");

    let unknown: Row = json!({ "id": 4, "type": "Martian" }).as_object().cloned().unwrap();
    assert_eq!(registry.model_for_row("Project", &unknown).unwrap().name, "Project");
}

#[test]
fn test_unknown_option_key_fails_registration() {
    let message = build_error(vec![
        ModelSchema::new("Car").associate_json(RelationshipType::HasMany, "wheels", json!({ "name": "wheels" })),
        ModelSchema::new("Wheel"),
    ]);
    assert!(message.contains("Unknown key"), "{}", message);
}

#[test]
fn test_option_not_valid_for_kind_fails_registration() {
    let message = build_error(vec![
        ModelSchema::new("Car").has_many("wheels", AssociationOptions::new().counter_cache()),
        ModelSchema::new("Wheel"),
    ]);
    assert!(message.contains("counter_cache"), "{}", message);
}

#[test]
fn test_unknown_target_fails_registration() {
    let message = build_error(vec![ModelSchema::new("Car").has_one("engine", AssociationOptions::new())]);
    assert!(message.contains("Engine"), "{}", message);
}

#[test]
fn test_malformed_dependent_fails_registration() {
    let message = build_error(vec![
        ModelSchema::new("Car").associate_json(RelationshipType::HasMany, "wheels", json!({ "dependent": "explode" })),
        ModelSchema::new("Wheel"),
    ]);
    assert!(message.contains("dependent"), "{}", message);
}

#[test]
fn test_inheritance_errors() {
    let message = build_error(vec![ModelSchema::new("Car").inherits("Vehicle")]);
    assert!(message.contains("Vehicle"));

    let message = build_error(vec![
        ModelSchema::new("A").inherits("B"),
        ModelSchema::new("B").inherits("A"),
    ]);
    assert!(message.contains("cycle"));

    let message = build_error(vec![ModelSchema::new("Car"), ModelSchema::new("Car")]);
    assert!(message.contains("twice"));
}

#[test]
fn test_redeclared_association_replaces_inherited() {
    let registry = Registry::builder()
        .model(ModelSchema::new("Project").has_and_belongs_to_many("developers", AssociationOptions::new()))
        .model(
            ModelSchema::new("SpecialProject")
                .inherits("Project")
                .has_and_belongs_to_many("developers", AssociationOptions::new().order("name")),
        )
        .model(ModelSchema::new("Developer"))
        .build()
        .unwrap();
    let special = registry.model("SpecialProject").unwrap();
    assert_eq!(special.associations.len(), 1);
    assert_eq!(special.associations[0].owner_model, "SpecialProject");
    assert!(registry.model("Project").unwrap().associations[0].order.is_empty());
}
