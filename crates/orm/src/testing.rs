//! Shared fixtures: the company/account/developer/project/topic schema,
//! seeded into a fresh in-memory backend for every test.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::backends::{DatabaseBackend, MemoryBackend};
use crate::config::SessionConfig;
use crate::event_error::EventError;
use crate::events::ModelObserver;
use crate::model::{ModelSchema, RecordRef};
use crate::query::values_equal;
use crate::relationships::{AssociationOptions, DependentPolicy, Registry};
use crate::session::Session;

pub const CLIENTS_SQL: &str = "SELECT * FROM companies WHERE client_of = ? ORDER BY id";
pub const CLIENTS_COUNT_SQL: &str = "SELECT COUNT(*) FROM companies WHERE client_of = ?";

/// Counts `deleting` callbacks, and can be told to veto them
#[derive(Debug, Default)]
pub struct DeletionProbe {
    calls: AtomicUsize,
    veto: AtomicUsize,
}

impl DeletionProbe {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Reject every delete from now on
    pub fn veto(&self) {
        self.veto.store(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ModelObserver for DeletionProbe {
    async fn deleting(&self, record: &RecordRef) -> Result<(), EventError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.veto.load(Ordering::SeqCst) > 0 {
            return Err(EventError::propagation_stopped(&format!(
                "{} is protected",
                record.get_str("name").unwrap_or_default()
            )));
        }
        Ok(())
    }
}

pub struct Fixture {
    pub session: Session,
    pub backend: Arc<MemoryBackend>,
    /// Observes every Client delete
    pub client_deletions: Arc<DeletionProbe>,
}

impl Fixture {
    pub async fn firm(&self) -> RecordRef {
        self.session.find("Firm", 1).await.unwrap()
    }

    pub async fn find(&self, model: &str, id: i64) -> RecordRef {
        self.session.find(model, id).await.unwrap()
    }

    pub async fn exists(&self, model: &str, id: i64) -> bool {
        match self.session.find(model, id).await {
            Ok(_) => true,
            Err(error) if error.is_not_found() => false,
            Err(error) => panic!("unexpected error: {}", error),
        }
    }

    pub async fn row_count(&self, table: &str) -> usize {
        self.backend.rows(table).await.len()
    }
}

pub fn schemas(client_deletions: Arc<DeletionProbe>) -> Vec<ModelSchema> {
    let clients = || AssociationOptions::new().class_name("Client").foreign_key("client_of").order("id");
    vec![
        ModelSchema::new("Company").validates_presence_of("name"),
        ModelSchema::new("Firm")
            .inherits("Company")
            .has_many("clients", AssociationOptions::new().order("id"))
            .has_many("clients_of_firm", clients())
            .has_many("clients_of_firm_reversed", clients().order("id DESC"))
            .has_many(
                "dependent_clients_of_firm",
                clients().dependent(DependentPolicy::Destroy),
            )
            .has_many(
                "exclusively_dependent_clients_of_firm",
                clients().dependent(DependentPolicy::DeleteDirect),
            )
            .has_many(
                "nullified_clients_of_firm",
                clients().dependent(DependentPolicy::Nullify),
            )
            .has_many("clients_like_ms", clients().condition("name", "Microsoft"))
            .has_many(
                "clients_using_sql",
                AssociationOptions::new()
                    .class_name("Client")
                    .finder_sql(CLIENTS_SQL)
                    .counter_sql(CLIENTS_COUNT_SQL),
            )
            .has_one("account", AssociationOptions::new().dependent(DependentPolicy::Destroy))
            .has_one("plain_account", AssociationOptions::new().class_name("Account")),
        ModelSchema::new("Client")
            .inherits("Company")
            .belongs_to("firm", AssociationOptions::new().foreign_key("client_of"))
            .belongs_to("firm_with_basic_id", AssociationOptions::new().class_name("Firm").foreign_key("firm_id"))
            .observer(client_deletions),
        ModelSchema::new("Account")
            .validates_presence_of("credit_limit")
            .belongs_to("firm", AssociationOptions::new()),
        ModelSchema::new("Developer")
            .validates_presence_of("name")
            .has_and_belongs_to_many("projects", AssociationOptions::new().order("id"))
            .has_and_belongs_to_many(
                "special_projects",
                AssociationOptions::new()
                    .class_name("SpecialProject")
                    .join_table("developers_projects")
                    .association_foreign_key("project_id"),
            ),
        ModelSchema::new("Project")
            .has_and_belongs_to_many("developers", AssociationOptions::new().order("id").uniq())
            .has_and_belongs_to_many(
                "developers_named_david",
                AssociationOptions::new().class_name("Developer").condition("name", "David"),
            ),
        ModelSchema::new("SpecialProject").inherits("Project"),
        ModelSchema::new("Topic").has_many(
            "replies",
            AssociationOptions::new().order("id").dependent(DependentPolicy::Destroy),
        ),
        ModelSchema::new("Reply")
            .validates_presence_of("content")
            .belongs_to("topic", AssociationOptions::new().counter_cache()),
    ]
}

pub fn memory_backend() -> MemoryBackend {
    MemoryBackend::new()
        .with_table_defaults("developers_projects", json!({ "access_level": 1 }))
        .with_table_defaults("topics", json!({ "replies_count": 0 }))
        .with_finder_sql(CLIENTS_SQL, |view, params| {
            let firm = params.first().cloned().unwrap_or(Value::Null);
            view.rows("companies")
                .iter()
                .filter(|row| row.get("client_of").map_or(false, |key| values_equal(key, &firm)))
                .cloned()
                .collect()
        })
        .with_counter_sql(CLIENTS_COUNT_SQL, |view, params| {
            let firm = params.first().cloned().unwrap_or(Value::Null);
            view.rows("companies")
                .iter()
                .filter(|row| row.get("client_of").map_or(false, |key| values_equal(key, &firm)))
                .count() as u64
        })
}

pub async fn seed(backend: &MemoryBackend) {
    backend
        .seed(
            "companies",
            vec![
                json!({ "id": 1, "type": "Firm", "name": "37signals", "rating": 1 }),
                json!({ "id": 2, "type": "Client", "name": "Summit", "client_of": 1, "firm_id": 1 }),
                json!({ "id": 3, "type": "Client", "name": "Microsoft", "client_of": 1 }),
                json!({ "id": 4, "type": "Firm", "name": "Another Firm", "rating": 3 }),
                json!({ "id": 5, "type": "Client", "name": "Apex", "client_of": 4 }),
                json!({ "id": 6, "type": "Company", "name": "Holding" }),
            ],
        )
        .await
        .unwrap();
    backend
        .seed(
            "accounts",
            vec![
                json!({ "id": 1, "firm_id": 1, "credit_limit": 50 }),
                json!({ "id": 2, "firm_id": null, "credit_limit": 60 }),
            ],
        )
        .await
        .unwrap();
    backend
        .seed(
            "developers",
            vec![
                json!({ "id": 1, "name": "David", "salary": 80000 }),
                json!({ "id": 2, "name": "Jamis", "salary": 150000 }),
                json!({ "id": 3, "name": "Poor Jamis", "salary": 9000 }),
            ],
        )
        .await
        .unwrap();
    backend
        .seed(
            "projects",
            vec![
                json!({ "id": 1, "type": "Project", "name": "Active Record" }),
                json!({ "id": 2, "type": "Project", "name": "Active Controller" }),
                json!({ "id": 3, "type": "SpecialProject", "name": "Special One" }),
            ],
        )
        .await
        .unwrap();
    backend
        .seed(
            "developers_projects",
            vec![
                json!({ "developer_id": 1, "project_id": 1, "access_level": 3, "joined_on": "2004-10-10" }),
                json!({ "developer_id": 1, "project_id": 2, "access_level": 1, "joined_on": "2004-10-10" }),
                json!({ "developer_id": 2, "project_id": 1, "access_level": 1, "joined_on": null }),
            ],
        )
        .await
        .unwrap();
    backend
        .seed(
            "topics",
            vec![
                json!({ "id": 1, "title": "The First Topic", "replies_count": 1 }),
                json!({ "id": 2, "title": "The Second Topic", "replies_count": 0 }),
            ],
        )
        .await
        .unwrap();
    backend
        .seed(
            "replies",
            vec![json!({ "id": 1, "topic_id": 1, "content": "Have a nice day" })],
        )
        .await
        .unwrap();
}

pub fn registry(client_deletions: Arc<DeletionProbe>) -> Arc<Registry> {
    Registry::builder().models(schemas(client_deletions)).build().unwrap()
}

pub async fn fixture() -> Fixture {
    fixture_with(SessionConfig::default()).await
}

pub async fn fixture_with(config: SessionConfig) -> Fixture {
    let client_deletions = Arc::new(DeletionProbe::default());
    let backend = Arc::new(memory_backend());
    seed(&backend).await;
    let dynamic: Arc<dyn DatabaseBackend> = backend.clone();
    let session = Session::with_config(registry(client_deletions.clone()), dynamic, config);
    Fixture {
        session,
        backend,
        client_deletions,
    }
}
