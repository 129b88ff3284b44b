#![allow(clippy::unwrap_used)]
// Integration tests for `HttpTransport` using wiremock.

use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::json;
use tokio_test::assert_ok;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tasklane_api::{
    Error, HttpTransport, TaskQuery, TaskStatus, TaskUpdate, Transport, TransportConfig,
};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, HttpTransport) {
    let server = MockServer::start().await;
    let key = SecretString::from("test-key".to_owned());
    let transport =
        HttpTransport::from_api_key(&server.uri(), &key, &TransportConfig::default()).unwrap();
    (server, transport)
}

fn task_json(id: &str, title: &str) -> serde_json::Value {
    json!({
        "id": id,
        "project_id": "p-1",
        "title": title,
        "status": "open",
        "priority": 2,
        "created_at": "2026-01-05T10:00:00Z",
        "updated_at": "2026-01-06T10:00:00Z"
    })
}

// ── Tasks ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_list_tasks_sends_filters_and_auth() {
    let (server, transport) = setup().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/tasks"))
        .and(header("apikey", "test-key"))
        .and(header("authorization", "Bearer test-key"))
        .and(query_param("project_id", "eq.p-1"))
        .and(query_param("status", "neq.closed"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([task_json("t-1", "First"), task_json("t-2", "Second")])),
        )
        .mount(&server)
        .await;

    let tasks = transport
        .list_tasks(&TaskQuery::for_project("p-1"))
        .await
        .unwrap();

    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0].id, "t-1");
    assert_eq!(tasks[1].title, "Second");
    assert_eq!(tasks[0].priority, Some(2));
}

#[tokio::test]
async fn test_get_task_not_found_on_empty_result() {
    let (server, transport) = setup().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/tasks"))
        .and(query_param("id", "eq.missing"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let result = transport.get_task("missing").await;
    assert!(
        matches!(result, Err(Error::NotFound { resource: "task", .. })),
        "expected NotFound, got: {result:?}"
    );
}

#[tokio::test]
async fn test_update_task_patches_only_set_fields() {
    let (server, transport) = setup().await;

    let mut updated = task_json("t-1", "First");
    updated["status"] = json!("done");

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/tasks"))
        .and(query_param("id", "eq.t-1"))
        .and(header("prefer", "return=representation"))
        .and(body_json(json!({ "status": "done" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([updated])))
        .mount(&server)
        .await;

    let update = TaskUpdate {
        status: Some(TaskStatus::Done),
        ..TaskUpdate::default()
    };
    let task = transport.update_task("t-1", &update).await.unwrap();
    assert_eq!(task.status, TaskStatus::Done);
}

#[tokio::test]
async fn test_delete_task() {
    let (server, transport) = setup().await;

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/tasks"))
        .and(query_param("id", "eq.t-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    assert_ok!(transport.delete_task("t-1").await);
}

// ── Projects ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_list_and_get_projects() {
    let (server, transport) = setup().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/projects"))
        .and(query_param("id", "eq.p-1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{ "id": "p-1", "name": "Roadmap" }])),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/projects"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "p-1", "name": "Roadmap" },
            { "id": "p-2", "name": "Support", "archived": true }
        ])))
        .mount(&server)
        .await;

    let project = transport.get_project("p-1").await.unwrap();
    assert_eq!(project.name, "Roadmap");

    let projects = transport.list_projects().await.unwrap();
    assert_eq!(projects.len(), 2);
    assert!(projects[1].archived);
}

// ── Errors ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_server_error_keeps_status_in_message() {
    let (server, transport) = setup().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/"))
        .respond_with(ResponseTemplate::new(503).set_body_string(""))
        .mount(&server)
        .await;

    let err = transport.health_check().await.unwrap_err();
    assert_eq!(err.status(), Some(503));
    assert_eq!(err.to_string(), "HTTP 503: Service Unavailable");
}

#[tokio::test]
async fn test_unauthorized_maps_to_authentication() {
    let (server, transport) = setup().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/projects"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({ "message": "Invalid API key" })),
        )
        .mount(&server)
        .await;

    let result = transport.list_projects().await;
    match result {
        Err(Error::Authentication { message }) => assert_eq!(message, "Invalid API key"),
        other => panic!("expected Authentication error, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_body_is_deserialization_error() {
    let (server, transport) = setup().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/projects"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
        .mount(&server)
        .await;

    let result = transport.list_projects().await;
    assert!(matches!(result, Err(Error::Deserialization { .. })));
}

#[tokio::test]
async fn test_health_check_ok() {
    let (server, transport) = setup().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    assert_ok!(transport.health_check().await);
}
