//! has_many and has_and_belongs_to_many proxies against the fixture schema

use serde_json::{json, Value};

use super::collection::{FindOptions, Finder, FindResult};
use super::proxy::AssociationProxy;
use crate::error::ModelError;
use crate::model::{PrimaryKey, RecordRef};
use crate::testing::fixture;

fn ids(records: &[RecordRef]) -> Vec<i64> {
    records.iter().filter_map(|r| r.id().and_then(|id| id.as_i64())).collect()
}

// ---- loading -------------------------------------------------------------

#[tokio::test]
async fn test_loads_in_declared_order_and_caches() {
    let fx = fixture().await;
    let firm = fx.firm().await;
    let clients = fx.session.collection(&firm, "clients_of_firm").unwrap();
    let first = clients.records(false).await.unwrap();
    assert_eq!(ids(&first), vec![2, 3]);

    let again = clients.records(false).await.unwrap();
    assert!(first.iter().zip(&again).all(|(a, b)| a.ptr_eq(b)));

    let reversed = fx.session.collection(&firm, "clients_of_firm_reversed").unwrap();
    assert_eq!(ids(&reversed.records(false).await.unwrap()), vec![3, 2]);
    assert_eq!(reversed.first().await.unwrap().and_then(|r| r.id()), Some(PrimaryKey::Integer(3)));
    assert_eq!(reversed.last().await.unwrap().and_then(|r| r.id()), Some(PrimaryKey::Integer(2)));
}

#[tokio::test]
async fn test_conditions_scope_the_collection() {
    let fx = fixture().await;
    let firm = fx.firm().await;
    let like_ms = fx.session.collection(&firm, "clients_like_ms").unwrap();
    let found = like_ms.records(false).await.unwrap();
    assert_eq!(ids(&found), vec![3]);
    assert_eq!(found[0].get_str("name").as_deref(), Some("Microsoft"));
}

#[tokio::test]
async fn test_size_counts_without_loading() {
    let fx = fixture().await;
    let firm = fx.firm().await;
    let clients = fx.session.collection(&firm, "clients_of_firm").unwrap();
    assert_eq!(clients.size().await.unwrap(), 2);
    assert!(!clients.is_loaded());

    let using_sql = fx.session.collection(&firm, "clients_using_sql").unwrap();
    assert_eq!(using_sql.size().await.unwrap(), 2);
    assert!(!using_sql.is_loaded());
    assert_eq!(ids(&using_sql.records(false).await.unwrap()), vec![2, 3]);

    let topic = fx.find("Topic", 1).await;
    let replies = fx.session.collection(&topic, "replies").unwrap();
    assert_eq!(replies.size().await.unwrap(), 1);
    assert!(!replies.is_loaded());
    assert_eq!(replies.length().await.unwrap(), 1);
    assert!(replies.is_loaded());
}

#[tokio::test]
async fn test_new_owner_collection_is_empty_without_queries() {
    let fx = fixture().await;
    let firm = fx.session.new_record("Firm", json!({ "name": "Empty" })).unwrap();
    let clients = fx.session.collection(&firm, "clients_of_firm").unwrap();
    assert_eq!(clients.size().await.unwrap(), 0);
    assert!(clients.is_empty().await.unwrap());
    assert!(clients.records(false).await.unwrap().is_empty());
}

// ---- additions -----------------------------------------------------------

#[tokio::test]
async fn test_push_writes_through_and_matches_reload_count() {
    let fx = fixture().await;
    let firm = fx.firm().await;
    let clients = fx.session.collection(&firm, "clients_of_firm").unwrap();
    let fresh = fx.session.new_record("Client", json!({ "name": "Fresh" })).unwrap();
    let moved = fx.find("Client", 5).await;

    assert!(clients.push(vec![fresh.clone(), moved.clone()]).await.unwrap());
    assert!(!fresh.is_new_record());
    assert_eq!(fresh.get_i64("client_of"), Some(1));
    assert_eq!(fx.find("Client", 5).await.get_i64("client_of"), Some(1));

    assert_eq!(clients.size().await.unwrap(), 4);
    assert_eq!(clients.records(true).await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_push_rejects_wrong_types_and_leaves_cache_alone() {
    let fx = fixture().await;
    let firm = fx.firm().await;
    let clients = fx.session.collection(&firm, "clients_of_firm").unwrap();
    clients.records(false).await.unwrap();
    let account = fx.find("Account", 1).await;
    let valid = fx.session.new_record("Client", json!({ "name": "Valid" })).unwrap();

    assert!(clients.push(Value::Null).await.unwrap_err().is_type_mismatch());
    assert!(clients.push(1i64).await.unwrap_err().is_type_mismatch());
    assert!(clients.push(&account).await.unwrap_err().is_type_mismatch());
    // one bad element rejects the whole batch
    assert!(clients.push(vec![valid.clone(), account]).await.unwrap_err().is_type_mismatch());

    assert_eq!(clients.length().await.unwrap(), 2);
    assert!(valid.is_new_record());
}

#[tokio::test]
async fn test_push_on_new_owner_is_buffered_until_save() {
    let fx = fixture().await;
    let firm = fx.session.new_record("Firm", json!({ "name": "Buffered" })).unwrap();
    let clients = fx.session.collection(&firm, "clients_of_firm").unwrap();
    let member = fx.session.new_record("Client", json!({ "name": "Member" })).unwrap();

    clients.push(&member).await.unwrap();
    assert_eq!(clients.size().await.unwrap(), 1);
    assert_eq!(fx.session.count("Client").await.unwrap(), 3);

    assert!(fx.session.save(&firm).await.unwrap());
    let key = firm.id().unwrap().to_value();
    let stored: Vec<_> = fx
        .backend
        .rows("companies")
        .await
        .into_iter()
        .filter(|row| row.get("client_of") == Some(&key))
        .collect();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].get("name"), Some(&json!("Member")));
    assert!(!member.is_new_record());
}

#[tokio::test]
async fn test_build_and_create() {
    let fx = fixture().await;
    let firm = fx.firm().await;
    let clients = fx.session.collection(&firm, "clients_of_firm").unwrap();

    let built = clients.build(json!({ "name": "Built" })).await.unwrap();
    assert!(built.is_new_record());
    assert_eq!(built.get_i64("client_of"), Some(1));
    assert_eq!(built.get_str("type").as_deref(), Some("Client"));
    assert_eq!(clients.size().await.unwrap(), 3);

    let many = clients
        .build_many(vec![json!({ "name": "A" }), json!({ "name": "B" })])
        .await
        .unwrap();
    assert_eq!(many.len(), 2);
    assert_eq!(clients.size().await.unwrap(), 5);
    assert_eq!(fx.session.count("Client").await.unwrap(), 3);

    let created = clients.create(json!({ "name": "Created" })).await.unwrap();
    assert!(!created.is_new_record());
    assert_eq!(fx.session.count("Client").await.unwrap(), 4);

    let invalid = clients.create(json!({ "name": "" })).await.unwrap();
    assert!(invalid.is_new_record());
    assert!(clients.include(&invalid).await.unwrap());
    assert_eq!(fx.session.count("Client").await.unwrap(), 4);

    let created = clients
        .create_many(vec![json!({ "name": "C" }), json!({ "name": "D" })])
        .await
        .unwrap();
    assert!(created.iter().all(|r| !r.is_new_record()));
}

#[tokio::test]
async fn test_duplicates_are_kept_and_uniq_is_a_view() {
    let fx = fixture().await;
    let firm = fx.firm().await;
    let clients = fx.session.collection(&firm, "clients_of_firm").unwrap();
    let summit = fx.find("Client", 2).await;
    clients.push(&summit).await.unwrap();

    assert_eq!(clients.length().await.unwrap(), 3);
    assert_eq!(ids(&clients.uniq().await.unwrap()), vec![2, 3]);
    assert_eq!(clients.length().await.unwrap(), 3);
}

// ---- removals ------------------------------------------------------------

#[tokio::test]
async fn test_delete_nullifies_by_default() {
    let fx = fixture().await;
    let firm = fx.firm().await;
    let clients = fx.session.collection(&firm, "clients_of_firm").unwrap();
    let microsoft = fx.find("Client", 3).await;

    clients.delete(&microsoft).await.unwrap();
    assert_eq!(ids(&clients.records(false).await.unwrap()), vec![2]);
    assert!(microsoft.get("client_of").is_null());
    assert!(fx.find("Client", 3).await.get("client_of").is_null());
    assert_eq!(fx.client_deletions.calls(), 0);
    assert_eq!(clients.size().await.unwrap(), 1);
}

#[tokio::test]
async fn test_delete_with_destroy_policy_runs_callbacks() {
    let fx = fixture().await;
    let firm = fx.firm().await;
    let clients = fx.session.collection(&firm, "dependent_clients_of_firm").unwrap();
    let microsoft = fx.find("Client", 3).await;

    clients.delete(&microsoft).await.unwrap();
    assert!(!fx.exists("Client", 3).await);
    assert_eq!(fx.client_deletions.calls(), 1);
}

#[tokio::test]
async fn test_delete_with_delete_direct_skips_callbacks() {
    let fx = fixture().await;
    let firm = fx.firm().await;
    let clients = fx.session.collection(&firm, "exclusively_dependent_clients_of_firm").unwrap();
    let microsoft = fx.find("Client", 3).await;

    clients.delete(&microsoft).await.unwrap();
    assert!(!fx.exists("Client", 3).await);
    assert_eq!(fx.client_deletions.calls(), 0);
}

#[tokio::test]
async fn test_delete_of_non_member_is_a_no_op() {
    let fx = fixture().await;
    let firm = fx.firm().await;
    let clients = fx.session.collection(&firm, "dependent_clients_of_firm").unwrap();
    let apex = fx.find("Client", 5).await;

    clients.delete(&apex).await.unwrap();
    assert!(fx.exists("Client", 5).await);
    assert_eq!(clients.size().await.unwrap(), 2);
}

#[tokio::test]
async fn test_clear_loads_before_removing() {
    let fx = fixture().await;
    let firm = fx.firm().await;
    let clients = fx.session.collection(&firm, "nullified_clients_of_firm").unwrap();
    assert!(!clients.is_loaded());

    clients.clear().await.unwrap();
    assert_eq!(clients.size().await.unwrap(), 0);
    assert!(fx.find("Client", 2).await.get("client_of").is_null());
    assert!(fx.find("Client", 3).await.get("client_of").is_null());
    assert_eq!(clients.records(true).await.unwrap().len(), 0);
}

#[tokio::test]
async fn test_destroy_all_runs_each_destroy() {
    let fx = fixture().await;
    let firm = fx.firm().await;
    let clients = fx.session.collection(&firm, "clients_of_firm").unwrap();
    let members = clients.records(false).await.unwrap();

    clients.destroy_all().await.unwrap();
    assert!(members.iter().all(RecordRef::is_destroyed));
    assert_eq!(fx.client_deletions.calls(), 2);
    assert!(!fx.exists("Client", 2).await);
    assert_eq!(clients.size().await.unwrap(), 0);
}

// ---- replace ---------------------------------------------------------------

#[tokio::test]
async fn test_replace_disassociates_missing_members() {
    let fx = fixture().await;
    let firm = fx.firm().await;
    let clients = fx.session.collection(&firm, "clients_of_firm").unwrap();
    let summit = fx.find("Client", 2).await;
    let apex = fx.find("Client", 5).await;

    clients.replace(vec![summit, apex]).await.unwrap();
    assert_eq!(clients.size().await.unwrap(), 2);
    assert_eq!(ids(&clients.records(false).await.unwrap()), vec![2, 5]);
    assert!(fx.find("Client", 3).await.get("client_of").is_null());
    assert_eq!(fx.find("Client", 5).await.get_i64("client_of"), Some(1));
    assert_eq!(ids(&clients.records(true).await.unwrap()), vec![2, 5]);
}

#[tokio::test]
async fn test_replace_requires_a_list() {
    let fx = fixture().await;
    let firm = fx.firm().await;
    let clients = fx.session.collection(&firm, "clients_of_firm").unwrap();
    let summit = fx.find("Client", 2).await;
    assert!(clients.replace(&summit).await.unwrap_err().is_type_mismatch());
}

#[tokio::test]
async fn test_replace_on_new_owner_stays_in_memory() {
    let fx = fixture().await;
    let firm = fx.session.new_record("Firm", json!({ "name": "Later" })).unwrap();
    let clients = fx.session.collection(&firm, "clients_of_firm").unwrap();
    let summit = fx.find("Client", 2).await;
    fx.backend.clear_writes().await;

    clients.replace(vec![summit]).await.unwrap();
    assert_eq!(clients.size().await.unwrap(), 1);
    assert!(fx.backend.writes().await.is_empty());
    assert_eq!(fx.find("Client", 2).await.get_i64("client_of"), Some(1));
}

#[tokio::test]
async fn test_ids_and_set_ids() {
    let fx = fixture().await;
    let firm = fx.firm().await;
    let clients = fx.session.collection(&firm, "clients_of_firm").unwrap();
    assert_eq!(
        clients.ids().await.unwrap(),
        vec![PrimaryKey::Integer(2), PrimaryKey::Integer(3)]
    );

    clients
        .set_ids(vec![PrimaryKey::Integer(3), PrimaryKey::Integer(5)])
        .await
        .unwrap();
    assert_eq!(ids(&clients.records(true).await.unwrap()), vec![3, 5]);
    assert!(fx.find("Client", 2).await.get("client_of").is_null());

    let err = clients.set_ids(vec![PrimaryKey::Integer(99)]).await.unwrap_err();
    assert!(err.is_not_found());
}

// ---- finds -----------------------------------------------------------------

#[tokio::test]
async fn test_find_is_scoped_to_the_association() {
    let fx = fixture().await;
    let firm = fx.firm().await;
    let clients = fx.session.collection(&firm, "clients_of_firm").unwrap();

    let summit = clients.find(2).await.unwrap();
    assert_eq!(summit.get_str("name").as_deref(), Some("Summit"));
    assert!(clients.find(5).await.unwrap_err().is_not_found());

    let err = clients
        .find_ids(vec![PrimaryKey::Integer(2), PrimaryKey::Integer(9)])
        .await
        .unwrap_err();
    assert!(matches!(err, ModelError::RecordNotFound { ref ids, .. } if ids == &[PrimaryKey::Integer(9)]));

    let both = clients
        .find_ids(vec![PrimaryKey::Integer(3), PrimaryKey::Integer(2)])
        .await
        .unwrap();
    assert_eq!(ids(&both), vec![2, 3]);
}

#[tokio::test]
async fn test_find_with_options() {
    let fx = fixture().await;
    let firm = fx.firm().await;
    let clients = fx.session.collection(&firm, "clients_of_firm").unwrap();

    let last = clients.find_first(FindOptions::new().order("id DESC")).await.unwrap();
    assert_eq!(last.and_then(|r| r.id()), Some(PrimaryKey::Integer(3)));

    let named = clients
        .find_all(FindOptions::new().where_eq("name", "Summit"))
        .await
        .unwrap();
    assert_eq!(ids(&named), vec![2]);

    let missing = clients
        .find_with(Finder::First, FindOptions::new().where_eq("name", "Nobody"))
        .await
        .unwrap();
    assert!(matches!(missing, FindResult::NotFound));

    let via_sql = fx.session.collection(&firm, "clients_using_sql").unwrap();
    let found = via_sql
        .find_all(FindOptions::new().where_eq("name", "Microsoft"))
        .await
        .unwrap();
    assert_eq!(ids(&found), vec![3]);
}

#[tokio::test]
async fn test_find_or_create_by() {
    let fx = fixture().await;
    let firm = fx.firm().await;
    let clients = fx.session.collection(&firm, "clients_of_firm").unwrap();

    let existing = clients.find_or_create_by(json!({ "name": "Microsoft" })).await.unwrap();
    assert_eq!(existing.id(), Some(PrimaryKey::Integer(3)));

    let created = clients.find_or_create_by(json!({ "name": "Brand New" })).await.unwrap();
    assert!(!created.is_new_record());
    assert_eq!(created.get_i64("client_of"), Some(1));
}

#[tokio::test]
async fn test_include_with_and_without_cache() {
    let fx = fixture().await;
    let firm = fx.firm().await;
    let clients = fx.session.collection(&firm, "clients_of_firm").unwrap();
    let summit = fx.find("Client", 2).await;
    let apex = fx.find("Client", 5).await;

    assert!(clients.include(&summit).await.unwrap());
    assert!(!clients.include(&apex).await.unwrap());
    assert!(!clients.is_loaded());

    clients.records(false).await.unwrap();
    assert!(clients.include(&summit).await.unwrap());
    assert!(!clients.include(&apex).await.unwrap());
}

// ---- has_and_belongs_to_many -----------------------------------------------

#[tokio::test]
async fn test_habtm_loads_members_with_join_attributes() {
    let fx = fixture().await;
    let david = fx.find("Developer", 1).await;
    let projects = fx.session.collection(&david, "projects").unwrap();
    let members = projects.records(false).await.unwrap();
    assert_eq!(ids(&members), vec![1, 2]);

    let join = projects.join_attributes(&members[0]).await.unwrap().unwrap();
    assert_eq!(join.get("access_level"), Some(&json!(3)));
    assert_eq!(join.get("joined_on"), Some(&json!("2004-10-10")));
    assert!(!join.contains_key("developer_id"));
    assert_eq!(projects.size().await.unwrap(), 2);
}

#[tokio::test]
async fn test_habtm_push_inserts_join_row() {
    let fx = fixture().await;
    let david = fx.find("Developer", 1).await;
    let projects = fx.session.collection(&david, "projects").unwrap();
    let special = fx.find("Project", 3).await;
    assert_eq!(special.model(), "SpecialProject");

    assert!(projects.push(&special).await.unwrap());
    assert_eq!(fx.row_count("developers_projects").await, 4);

    let reloaded = projects.records(true).await.unwrap();
    assert_eq!(ids(&reloaded), vec![1, 2, 3]);
    let join = projects.join_attributes(&special).await.unwrap().unwrap();
    assert_eq!(join.get("access_level"), Some(&json!(1)));

    let special_projects = fx.session.collection(&david, "special_projects").unwrap();
    assert_eq!(ids(&special_projects.records(false).await.unwrap()), vec![3]);
}

#[tokio::test]
async fn test_habtm_push_with_attributes() {
    let fx = fixture().await;
    let jamis = fx.find("Developer", 2).await;
    let projects = fx.session.collection(&jamis, "projects").unwrap();
    let controller = fx.find("Project", 2).await;

    projects
        .push_with_attributes(&controller, json!({ "access_level": 2, "joined_on": "2005-01-01" }))
        .await
        .unwrap();
    let pending = projects.join_attributes(&controller).await.unwrap().unwrap();
    assert_eq!(pending.get("access_level"), Some(&json!(2)));

    let fresh = fx.session.collection(&jamis, "projects").unwrap();
    fresh.reset();
    let loaded = fresh.records(true).await.unwrap();
    let stored = fresh.join_attributes(&loaded[1]).await.unwrap().unwrap();
    assert_eq!(stored.get("joined_on"), Some(&json!("2005-01-01")));

    let clients = fx.session.collection(&fx.firm().await, "clients_of_firm").unwrap();
    let summit = fx.find("Client", 2).await;
    assert!(matches!(
        clients.push_with_attributes(&summit, json!({})).await.unwrap_err(),
        ModelError::Relationship(_)
    ));
}

#[tokio::test]
async fn test_habtm_rejects_parent_type_for_subtype_collection() {
    let fx = fixture().await;
    let david = fx.find("Developer", 1).await;
    let special_projects = fx.session.collection(&david, "special_projects").unwrap();
    let plain = fx.find("Project", 1).await;
    assert!(special_projects.push(&plain).await.unwrap_err().is_type_mismatch());
}

#[tokio::test]
async fn test_habtm_on_new_owner_saves_members_then_links() {
    let fx = fixture().await;
    let rookie = fx.session.new_record("Developer", json!({ "name": "Rookie" })).unwrap();
    let projects = fx.session.collection(&rookie, "projects").unwrap();
    let fresh = fx.session.new_record("Project", json!({ "name": "Fresh" })).unwrap();
    let existing = fx.find("Project", 1).await;

    projects.push(vec![fresh.clone(), existing]).await.unwrap();
    assert_eq!(fx.row_count("developers_projects").await, 3);
    assert_eq!(fx.row_count("projects").await, 3);

    assert!(fx.session.save(&rookie).await.unwrap());
    assert!(!fresh.is_new_record());
    assert_eq!(fx.row_count("developers_projects").await, 5);
    assert_eq!(projects.records(true).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_habtm_delete_removes_join_rows_only() {
    let fx = fixture().await;
    let david = fx.find("Developer", 1).await;
    let projects = fx.session.collection(&david, "projects").unwrap();
    let record = fx.find("Project", 1).await;

    projects.delete(&record).await.unwrap();
    assert!(fx.exists("Project", 1).await);
    assert_eq!(fx.row_count("developers_projects").await, 2);
    assert_eq!(ids(&projects.records(true).await.unwrap()), vec![2]);

    let jamis = fx.find("Developer", 2).await;
    let jamis_projects = fx.session.collection(&jamis, "projects").unwrap();
    assert_eq!(ids(&jamis_projects.records(false).await.unwrap()), vec![1]);
}

#[tokio::test]
async fn test_habtm_uniq_option_and_conditions() {
    let fx = fixture().await;
    fx.backend
        .seed(
            "developers_projects",
            vec![json!({ "developer_id": 1, "project_id": 1, "access_level": 1 })],
        )
        .await
        .unwrap();
    let record = fx.find("Project", 1).await;

    let developers = fx.session.collection(&record, "developers").unwrap();
    assert_eq!(ids(&developers.records(false).await.unwrap()), vec![1, 2]);
    assert_eq!(developers.size().await.unwrap(), 2);

    let davids = fx.session.collection(&record, "developers_named_david").unwrap();
    assert_eq!(ids(&davids.records(false).await.unwrap()), vec![1, 1]);
    assert_eq!(ids(&davids.uniq().await.unwrap()), vec![1]);
}

#[tokio::test]
async fn test_habtm_destroy_all_and_clear() {
    let fx = fixture().await;
    let jamis = fx.find("Developer", 2).await;
    fx.session.collection(&jamis, "projects").unwrap().clear().await.unwrap();
    assert!(fx.exists("Project", 1).await);
    assert_eq!(fx.row_count("developers_projects").await, 2);

    let david = fx.find("Developer", 1).await;
    let projects = fx.session.collection(&david, "projects").unwrap();
    projects.destroy_all().await.unwrap();
    assert!(!fx.exists("Project", 1).await);
    assert!(!fx.exists("Project", 2).await);
    assert_eq!(fx.row_count("developers_projects").await, 0);
    assert!(projects.is_empty().await.unwrap());
}
