use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use elector_engine::LeaderObserver;
use elector_sidecar::{status_router, LeaderData};
use std::sync::Arc;
use tower::ServiceExt;

async fn get(app: axum::Router, uri: &str) -> (StatusCode, Option<LeaderData>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).expect("request"))
        .await
        .expect("response");

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    (status, serde_json::from_slice(&bytes).ok())
}

#[tokio::test]
async fn test_unknown_leader_is_empty_name() {
    let observer = Arc::new(LeaderObserver::new());
    let (status, body) = get(status_router(observer, "/"), "/").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Some(LeaderData { name: String::new() }));
}

#[tokio::test]
async fn test_reports_observed_leader() {
    let observer = Arc::new(LeaderObserver::new());
    observer.set_leader("node-a");

    let (status, body) = get(status_router(Arc::clone(&observer), "/"), "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.unwrap().name, "node-a");

    observer.set_leader("node-b");
    let (_, body) = get(status_router(observer, "/"), "/").await;
    assert_eq!(body.unwrap().name, "node-b");
}

#[tokio::test]
async fn test_configured_path() {
    let observer = Arc::new(LeaderObserver::new());
    observer.set_leader("node-a");

    let (status, body) = get(status_router(Arc::clone(&observer), "leader"), "/leader").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.unwrap().name, "node-a");

    let (status, _) = get(status_router(observer, "/leader"), "/").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_only_get_is_routed() {
    let observer = Arc::new(LeaderObserver::new());
    let response = status_router(observer, "/")
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_response_is_json_object_with_name() {
    let observer = Arc::new(LeaderObserver::new());
    observer.set_leader("node-a");

    let response = status_router(observer, "/")
        .oneshot(Request::builder().uri("/").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");

    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value, serde_json::json!({ "name": "node-a" }));
}
