use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use axum::Json;
use serde_json::{json, Value};
use tower::ServiceExt;

use super::common::*;
use crate::ranking::router::{apply_handler, reload_handler, ChangesBody};
use crate::ranking::RankingService;

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).expect("request builds")
}

fn post_json(uri: &str, payload: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload.to_string()))
        .expect("request builds")
}

#[tokio::test]
async fn rankings_route_filters_by_role() {
    let (service, _) = build_service();
    let router = router_with(service);

    let response = router
        .oneshot(get("/api/rankings?roles=QA,%20Design"))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["count"], 2);
    assert_eq!(payload["rows"][0]["alias"], "qa01");
    assert_eq!(payload["rows"][0]["mismatch"], true);
}

#[tokio::test]
async fn roles_route_reports_counts() {
    let (service, _) = build_service();

    let response = router_with(service)
        .oneshot(get("/api/roles"))
        .await
        .expect("route executes");

    let payload = read_json_body(response).await;
    assert_eq!(payload["roles"], json!(["Dev", "QA"]));
    assert_eq!(payload["counts_by_role"]["Dev"], 4);
}

#[tokio::test]
async fn percentiles_route_validates_role_and_basis() {
    let (service, _) = build_service();
    let router = router_with(service);

    let ok = router
        .clone()
        .oneshot(get("/api/percentiles?basis=rank&role=Dev"))
        .await
        .expect("route executes");
    assert_eq!(ok.status(), StatusCode::OK);
    let payload = read_json_body(ok).await;
    assert_eq!(payload["basis"], "rank");
    assert_eq!(payload["roles"]["Dev"].as_array().map(Vec::len), Some(10));

    let unknown_role = router
        .clone()
        .oneshot(get("/api/percentiles?role=Design"))
        .await
        .expect("route executes");
    assert_eq!(unknown_role.status(), StatusCode::NOT_FOUND);
    let payload = read_json_body(unknown_role).await;
    assert_eq!(payload["error"]["code"], "unknown_role");

    let bad_basis = router
        .oneshot(get("/api/percentiles?basis=median"))
        .await
        .expect("route executes");
    assert_eq!(bad_basis.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn preview_route_returns_proposal() {
    let (service, _) = build_service();

    let response = router_with(service)
        .oneshot(post_json(
            "/api/adjust/preview",
            json!({ "alias": "DEV03", "selected_metrics": ["Delivery", "Quality"], "percent": 5.0 }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["alias"], "dev03");
    assert_eq!(payload["direction"], "up");
    assert_eq!(payload["target_rank"], 1);
    assert_eq!(payload["fully_achieved"], true);
    assert!(payload["diff"].as_array().is_some_and(|diff| diff.len() == 2));
}

#[tokio::test]
async fn preview_route_rejects_zero_weight_selection() {
    let (service, _) = build_service();

    let response = router_with(service)
        .oneshot(post_json(
            "/api/adjust/preview",
            json!({ "alias": "dev03", "selected_metrics": ["Testing"] }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let payload = read_json_body(response).await;
    assert_eq!(payload["error"]["code"], "zero_weight_selection");
}

#[tokio::test]
async fn validate_route_reports_rank_shift() {
    let (service, _) = build_service();

    let response = router_with(service)
        .oneshot(post_json(
            "/api/adjust/validate",
            json!({ "alias": "dev04", "changes": { "Delivery": 80.0, "Quality": 80.0 } }),
        ))
        .await
        .expect("route executes");

    let payload = read_json_body(response).await;
    assert_eq!(payload["before"], 3);
    assert_eq!(payload["after"], 2);
    assert_eq!(payload["within_one_level"], true);
}

#[tokio::test]
async fn apply_route_returns_recomputed_rankings() {
    let (service, store) = build_service();

    let response = router_with(service)
        .oneshot(post_json(
            "/api/adjust/apply",
            json!({ "alias": "dev03", "changes": { "Delivery": 95.0 } }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["ok"], true);
    assert!(payload["updated_at"].is_string());
    assert_eq!(payload["rankings"].as_array().map(Vec::len), Some(6));
    assert_eq!(
        store
            .current()
            .score_by_name(&crate::ranking::Alias::new("dev03"), "Delivery"),
        Some(95.0)
    );
}

#[tokio::test]
async fn apply_handler_returns_retryable_conflict() {
    let service = Arc::new(service_with(ConflictStore));
    let body: ChangesBody =
        serde_json::from_value(json!({ "alias": "dev03", "changes": { "Delivery": 95.0 } }))
            .expect("body parses");

    let response = apply_handler::<ConflictStore>(State(service), Json(body)).await;

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let payload = read_json_body(response).await;
    assert_eq!(payload["error"]["code"], "conflict");
    assert_eq!(payload["error"]["retryable"], true);
}

#[tokio::test]
async fn reload_handler_lists_validation_findings() {
    let service: Arc<RankingService<BrokenStore>> = Arc::new(service_with(BrokenStore));

    let response = reload_handler::<BrokenStore>(State(service)).await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let payload = read_json_body(response).await;
    assert_eq!(payload["error"]["code"], "validation_failed");
    assert_eq!(
        payload["error"]["findings"][0]["kind"],
        "missing_role_weight"
    );
}
