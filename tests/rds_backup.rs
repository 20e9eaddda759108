//! RDS backups: compound import and creation against a busy instance

mod common;

use common::{builtin_provider, context, rds_path};
use serde_json::{json, Value};
use tfotc::provider::PlanAction;
use tfotc::resources::rds_backup::TYPE_NAME;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn backup(status: &str) -> Value {
    json!({
        "id": "bk-2",
        "instance_id": "inst-1",
        "name": "nightly",
        "description": "",
        "status": status,
        "begin_time": "2026-01-01T02:00:00+0000",
        "end_time": "2026-01-01T02:10:00+0000",
        "size": 2048.5,
        "type": "manual",
        "databases": []
    })
}

async fn mount_backups(server: &MockServer, backups: Vec<Value>, times: Option<u64>) {
    let mock = Mock::given(method("GET"))
        .and(path(rds_path("backups")))
        .and(query_param("instance_id", "inst-1"))
        .and(query_param("backup_id", "bk-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "backups": backups })));
    let mock = match times {
        Some(n) => mock.up_to_n_times(n),
        None => mock,
    };
    mock.mount(server).await;
}

#[tokio::test]
async fn test_compound_import() {
    let server = MockServer::start().await;
    mount_backups(&server, vec![backup("COMPLETED")], None).await;

    let provider = builtin_provider(&server.uri());
    let outcome = provider.import(&context(&provider), TYPE_NAME, "inst-1/bk-2").await;
    assert!(!outcome.has_errors(), "{}", outcome.diagnostics);

    let state = outcome.state_json();
    assert_eq!(state["id"], "bk-2");
    assert_eq!(state["instance_id"], "inst-1");
    assert_eq!(state["name"], "nightly");
    assert_eq!(state["size"], 2048.5);

    // Imported state plans no change against the matching configuration
    let config = json!({"instance_id": "inst-1", "name": "nightly"});
    let plan = provider.plan(TYPE_NAME, Some(&state), Some(&config)).unwrap();
    assert_eq!(plan.action, PlanAction::NoOp, "{:?}", plan.changes);
}

#[tokio::test]
async fn test_import_of_missing_backup_fails() {
    let server = MockServer::start().await;
    mount_backups(&server, vec![], None).await;

    let provider = builtin_provider(&server.uri());
    let outcome = provider.import(&context(&provider), TYPE_NAME, "inst-1/bk-2").await;
    assert!(outcome.has_errors());
    assert!(outcome.state.is_none());
    assert!(outcome.diagnostics.to_string().contains("non-existent"));
}

#[tokio::test]
async fn test_malformed_import_id() {
    let provider = builtin_provider("http://127.0.0.1:9");
    let outcome = provider.import(&context(&provider), TYPE_NAME, "bk-2").await;
    assert!(outcome.has_errors());
    assert!(outcome.state.is_none());
}

#[tokio::test]
async fn test_create_waits_for_busy_instance() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(rds_path("backups")))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error_code": "DBS.201202",
            "error_msg": "The DB instance is being backed up."
        })))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(rds_path("backups")))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({ "backup": backup("BUILDING") })))
        .expect(1)
        .mount(&server)
        .await;

    // Parent instance quiesces after one poll
    Mock::given(method("GET"))
        .and(path(rds_path("instances")))
        .and(query_param("id", "inst-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "instances": [{"id": "inst-1", "status": "BACKING UP"}]
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(rds_path("instances")))
        .and(query_param("id", "inst-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "instances": [{"id": "inst-1", "status": "ACTIVE"}]
        })))
        .mount(&server)
        .await;

    mount_backups(&server, vec![backup("BUILDING")], Some(1)).await;
    mount_backups(&server, vec![backup("COMPLETED")], None).await;

    let provider = builtin_provider(&server.uri());
    let config = json!({"instance_id": "inst-1", "name": "nightly"});
    let plan = provider.plan(TYPE_NAME, None, Some(&config)).unwrap();
    let outcome = provider.apply(&context(&provider), &plan).await;
    assert!(!outcome.has_errors(), "{}", outcome.diagnostics);

    let state = outcome.state_json();
    assert_eq!(state["id"], "bk-2");
    assert_eq!(state["status"], "COMPLETED");
}
