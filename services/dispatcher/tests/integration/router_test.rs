use std::collections::BTreeMap;

use axum::body::Body;
use http::{Request, StatusCode};
use sea_orm::{DatabaseBackend, DatabaseConnection, MockDatabase, Value};
use tower::ServiceExt;

use herald_core::middleware::CORRELATION_ID_HEADER;
use herald_dispatcher::router::build_router;
use herald_dispatcher::state::AppState;

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn disconnected() -> AppState {
    AppState::new(DatabaseConnection::Disconnected)
}

// ── health ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn should_answer_healthz_with_a_correlation_id() {
    let response = build_router(disconnected())
        .oneshot(get("/healthz"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(CORRELATION_ID_HEADER));
}

#[tokio::test]
async fn should_echo_an_incoming_correlation_id() {
    let request = Request::builder()
        .uri("/healthz")
        .header(CORRELATION_ID_HEADER, "corr-42")
        .body(Body::empty())
        .unwrap();

    let response = build_router(disconnected()).oneshot(request).await.unwrap();

    assert_eq!(response.headers()[CORRELATION_ID_HEADER], "corr-42");
}

#[tokio::test]
async fn should_report_not_ready_without_a_database() {
    let response = build_router(disconnected())
        .oneshot(get("/readyz"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

// ── stats ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn should_serve_outbox_counts_per_status() {
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([vec![
            BTreeMap::from([
                ("status", Value::from("NEW")),
                ("count", Value::from(3i64)),
            ]),
            BTreeMap::from([
                ("status", Value::from("PUBLISHED")),
                ("count", Value::from(12i64)),
            ]),
        ]])
        .into_connection();

    let response = build_router(AppState::new(db))
        .oneshot(get("/outbox/stats"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(
        json,
        serde_json::json!({
            "new": 3,
            "in_progress": 0,
            "published": 12,
            "failed": 0,
        })
    );
}

#[tokio::test]
async fn should_answer_unknown_routes_with_a_json_404() {
    let response = build_router(disconnected())
        .oneshot(get("/outbox/events"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["kind"], "NOT_FOUND");
}

#[tokio::test]
async fn should_map_a_failed_stats_query_to_500() {
    let response = build_router(disconnected())
        .oneshot(get("/outbox/stats"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}
