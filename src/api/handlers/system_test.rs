//! Integration tests for the health endpoint.

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use crate::api::{AppState, create_router};
use crate::db::test_support::test_db;
use crate::realtime::ChangeNotifier;

/// Helper to parse JSON response body
async fn json_body(response: axum::response::Response) -> Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

fn health_request() -> Request<Body> {
    Request::builder().uri("/health").body(Body::empty()).unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn health_reports_ready_pool() {
    let (db, _dir) = test_db().await;
    let notifier = ChangeNotifier::new();
    let _subscriber = notifier.subscribe();
    let app = create_router(AppState::new(db, notifier));

    let response = app.oneshot(health_request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"]["state"], "ready");
    assert_eq!(body["database"]["capacity"], 4);
    assert_eq!(body["database"]["borrowed"], 0);
    assert_eq!(body["active_subscribers"], 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn health_degraded_after_pool_closed() {
    let (db, _dir) = test_db().await;
    db.pool().close().await;
    let app = create_router(AppState::new(db, ChangeNotifier::new()));

    let response = app.oneshot(health_request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["database"]["state"], "closed");
    assert_eq!(body["active_subscribers"], 0);
}
