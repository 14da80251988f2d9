//! HTTP API integration tests

mod helpers;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use fo_inbox::{build_router, AppState};
use helpers::{test_settings, ScriptedAssistant, TestVault};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::util::ServiceExt;

async fn create_test_app() -> (TestVault, Router) {
    let vault = TestVault::new(test_settings(), ScriptedAssistant::default()).await;
    let app = build_router(AppState::new(vault.inbox.clone()));
    (vault, app)
}

async fn send(app: &Router, method: Method, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn test_health_endpoint() {
    let (_vault, app) = create_test_app().await;

    let (status, json) = send(&app, Method::GET, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["module"], "fo-inbox");
    assert!(json.get("last_error").is_none());
}

#[tokio::test]
async fn test_stats_on_empty_inbox() {
    let (_vault, app) = create_test_app().await;

    let (status, json) = send(&app, Method::GET, "/inbox/stats").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["queue"]["total"], 0);
    assert_eq!(json["media"]["active"], 0);
    assert_eq!(json["records"]["completed"], 0);
}

#[tokio::test]
async fn test_backlog_then_records() {
    let (vault, app) = create_test_app().await;
    vault.drop_file("api.md", "Queued through the HTTP endpoint.");

    let (status, json) = send(&app, Method::POST, "/inbox/backlog").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["queued"], 1);

    vault.inbox.wait_until_settled().await;

    let (status, json) = send(&app, Method::GET, "/inbox/records").await;
    assert_eq!(status, StatusCode::OK);
    let records = json.as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["original_name"], "api.md");
    assert_eq!(records[0]["status"], "completed");

    let id = records[0]["id"].as_str().unwrap().to_string();
    let (status, json) = send(&app, Method::GET, &format!("/inbox/records/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["id"], id.as_str());

    let (status, json) = send(&app, Method::GET, "/inbox/records/errors").await;
    assert_eq!(status, StatusCode::OK);
    assert!(json.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_record_lookup_rejects_bad_hash() {
    let (_vault, app) = create_test_app().await;

    let (status, _) = send(&app, Method::GET, "/inbox/records/not-a-hash").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, Method::GET, "/inbox/records/0123456789ab").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_pause_and_resume() {
    let (vault, app) = create_test_app().await;

    let (status, json) = send(&app, Method::POST, "/inbox/pause").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["paused"], true);

    vault.drop_file("held.md", "Waits while the queue is paused.");
    send(&app, Method::POST, "/inbox/backlog").await;
    let (_, stats) = send(&app, Method::GET, "/inbox/stats").await;
    assert_eq!(stats["queue"]["queued"], 1);
    assert_eq!(stats["queue"]["processing"], 0);

    let (_, json) = send(&app, Method::POST, "/inbox/resume").await;
    assert_eq!(json["paused"], false);
    vault.inbox.wait_until_settled().await;

    let (_, stats) = send(&app, Method::GET, "/inbox/stats").await;
    assert_eq!(stats["queue"]["completed"], 1);
}
