//! KMS key resource and data source against a mocked KMS v1.0 API

mod common;

use common::{builtin_provider, context, kms_path};
use serde_json::{json, Value};
use tfotc::provider::PlanAction;
use tfotc::resources::{data_kms_key, kms_key};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn key(id: &str, alias: &str, state: &str) -> Value {
    json!({
        "key_id": id,
        "domain_id": "d-1",
        "key_alias": alias,
        "realm": "eu-de",
        "key_description": "",
        "creation_date": "1700000000000",
        "scheduled_deletion_date": "",
        "key_state": state,
        "default_key_flag": "0",
        "key_type": "1",
        "expiration_time": "",
        "origin": "kms"
    })
}

fn key_info(id: &str, alias: &str, state: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "key_info": key(id, alias, state) }))
}

async fn mount_describe(server: &MockServer, state: &str, times: Option<u64>) {
    let mock = Mock::given(method("POST"))
        .and(path(kms_path("kms/describe-key")))
        .and(body_partial_json(json!({"key_id": "k-1"})))
        .respond_with(key_info("k-1", "app-key", state));
    let mock = match times {
        Some(n) => mock.up_to_n_times(n),
        None => mock,
    };
    mock.mount(server).await;
}

fn prior_state() -> Value {
    json!({
        "id": "k-1",
        "key_alias": "app-key",
        "key_description": "",
        "realm": "eu-de",
        "pending_days": "7",
        "is_enabled": true,
        "key_id": "k-1",
        "key_state": "2"
    })
}

#[tokio::test]
async fn test_create_waits_for_enabled_key() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(kms_path("kms/create-key")))
        .and(body_partial_json(json!({"key_alias": "app-key"})))
        .respond_with(key_info("k-1", "app-key", "1"))
        .expect(1)
        .mount(&server)
        .await;
    mount_describe(&server, "1", Some(1)).await;
    mount_describe(&server, "2", None).await;
    Mock::given(method("POST"))
        .and(path(kms_path("kms/k-1/tags/action")))
        .and(body_partial_json(json!({"action": "create"})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(kms_path("kms/k-1/tags")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"tags": [{"key": "env", "value": "test"}]})))
        .mount(&server)
        .await;

    let provider = builtin_provider(&server.uri());
    let config = json!({"key_alias": "app-key", "tags": {"env": "test"}});
    let plan = provider.plan(kms_key::TYPE_NAME, None, Some(&config)).unwrap();
    let outcome = provider.apply(&context(&provider), &plan).await;
    assert!(!outcome.has_errors(), "{}", outcome.diagnostics);

    let state = outcome.state_json();
    assert_eq!(state["id"], "k-1");
    assert_eq!(state["key_state"], "2");
    assert_eq!(state["is_enabled"], true);
    assert_eq!(state["pending_days"], "7");
    assert_eq!(state["tags"]["env"], "test");

    let again = provider.plan(kms_key::TYPE_NAME, Some(&state), Some(&config)).unwrap();
    assert_eq!(again.action, PlanAction::NoOp, "{:?}", again.changes);
}

#[tokio::test]
async fn test_disable_in_place() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(kms_path("kms/disable-key")))
        .and(body_partial_json(json!({"key_id": "k-1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"key_info": {"key_id": "k-1", "key_state": "3"}})))
        .expect(1)
        .mount(&server)
        .await;
    mount_describe(&server, "3", None).await;
    Mock::given(method("GET"))
        .and(path(kms_path("kms/k-1/tags")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"tags": []})))
        .mount(&server)
        .await;

    let provider = builtin_provider(&server.uri());
    let config = json!({"key_alias": "app-key", "is_enabled": false});
    let plan = provider.plan(kms_key::TYPE_NAME, Some(&prior_state()), Some(&config)).unwrap();
    assert_eq!(plan.action, PlanAction::Update);

    let outcome = provider.apply(&context(&provider), &plan).await;
    assert!(!outcome.has_errors(), "{}", outcome.diagnostics);
    assert_eq!(outcome.state_json()["is_enabled"], false);
}

#[tokio::test]
async fn test_delete_schedules_deletion_with_pending_days() {
    let server = MockServer::start().await;

    mount_describe(&server, "2", Some(1)).await;
    Mock::given(method("POST"))
        .and(path(kms_path("kms/schedule-key-deletion")))
        .and(body_partial_json(json!({"key_id": "k-1", "pending_days": "7"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"key_state": "4"})))
        .expect(1)
        .mount(&server)
        .await;
    mount_describe(&server, "4", None).await;

    let provider = builtin_provider(&server.uri());
    let plan = provider.plan(kms_key::TYPE_NAME, Some(&prior_state()), None).unwrap();
    let outcome = provider.apply(&context(&provider), &plan).await;
    assert!(!outcome.has_errors(), "{}", outcome.diagnostics);
    assert!(outcome.state.is_none());
}

#[tokio::test]
async fn test_key_pending_deletion_reads_as_gone() {
    let server = MockServer::start().await;
    mount_describe(&server, "4", None).await;

    let provider = builtin_provider(&server.uri());
    let outcome = provider.read(&context(&provider), kms_key::TYPE_NAME, &prior_state()).await;
    assert!(!outcome.has_errors(), "{}", outcome.diagnostics);
    assert!(outcome.state.is_none());
}

/// Two pages of keys; the second is requested with the first page's marker
async fn mount_key_pages(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(kms_path("kms/list-keys")))
        .and(body_partial_json(json!({"marker": "m-1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "key_details": [key("k-3", "app-key", "2")],
            "next_marker": "",
            "truncated": "false"
        })))
        .expect(1..)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path(kms_path("kms/list-keys")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "key_details": [key("k-1", "web-key", "2"), key("k-2", "old-key", "3")],
            "next_marker": "m-1",
            "truncated": "true"
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_data_source_finds_key_on_later_page() {
    let server = MockServer::start().await;
    mount_key_pages(&server).await;

    let provider = builtin_provider(&server.uri());
    let outcome = provider
        .read_data_source(&context(&provider), data_kms_key::TYPE_NAME, &json!({"key_alias": "app-key"}))
        .await;
    assert!(!outcome.has_errors(), "{}", outcome.diagnostics);

    let state = outcome.state_json();
    assert_eq!(state["id"], "k-3");
    assert_eq!(state["key_id"], "k-3");
    assert_eq!(state["domain_id"], "d-1");
}

#[tokio::test]
async fn test_data_source_rejects_ambiguous_query() {
    let server = MockServer::start().await;
    mount_key_pages(&server).await;

    let provider = builtin_provider(&server.uri());
    let outcome = provider
        .read_data_source(&context(&provider), data_kms_key::TYPE_NAME, &json!({"key_state": "2"}))
        .await;
    assert!(outcome.has_errors());
    assert!(outcome.diagnostics.to_string().contains("returned 2 results"));
}

#[tokio::test]
async fn test_data_source_without_match() {
    let server = MockServer::start().await;
    mount_key_pages(&server).await;

    let provider = builtin_provider(&server.uri());
    let outcome = provider
        .read_data_source(&context(&provider), data_kms_key::TYPE_NAME, &json!({"key_alias": "missing"}))
        .await;
    assert!(outcome.has_errors());
    assert!(outcome.diagnostics.to_string().contains("no results"));
}
