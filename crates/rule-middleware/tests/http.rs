use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use rule_engine::{builtin_packs, EngineConfig, RuleEngine};
use rule_middleware::{enforce_rules, MiddlewareConfig, RuleMiddleware, AUTHENTICATION_REQUIRED};
use serde_json::Value;
use tower::ServiceExt;

fn gate() -> (Router, Arc<RuleEngine>) {
    gate_with(MiddlewareConfig::default())
}

fn gate_with(config: MiddlewareConfig) -> (Router, Arc<RuleEngine>) {
    let engine = RuleEngine::new(EngineConfig::default());
    for pack in builtin_packs() {
        engine.register_pack(pack.as_ref());
    }
    let engine = Arc::new(engine);
    let rules = Arc::new(RuleMiddleware::new(Arc::clone(&engine), config).unwrap());

    let app = Router::new()
        .route("/api/health", get(|| async { "ok" }))
        .route("/api/feed", get(|| async { "[]" }))
        .route(
            "/api/content",
            get(|| async { "[]" }).post(|body: String| async move { body }),
        )
        .route("/api/admin/users", get(|| async { "users" }))
        .layer(axum::middleware::from_fn_with_state(rules, enforce_rules));
    (app, engine)
}

fn post_json(uri: &str, body: &'static str) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .header("user-agent", "PlayNite/2.1")
        .body(Body::from(body))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::get(uri)
        .header("user-agent", "PlayNite/2.1")
        .body(Body::empty())
        .unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_check_bypasses_rules() {
    let (app, engine) = gate();
    let response = app.oneshot(get_request("/api/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(engine.stats().executions, 0);
}

#[tokio::test]
async fn untitled_content_is_rejected() {
    let (app, _) = gate();
    let response = app.oneshot(post_json("/api/content", "{}")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = json_body(response).await;
    assert_eq!(body["error"], "Request validation failed");
    let errors = body["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["field"], "title");
    assert_eq!(errors[0]["ruleId"], "content-title-required");
}

#[tokio::test]
async fn content_listing_is_not_a_submission() {
    let (app, _) = gate();
    let response = app.oneshot(get_request("/api/content?limit=20")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn valid_content_reaches_the_handler_with_its_body() {
    let (app, _) = gate();
    let payload = r#"{"title":"Beach day","media_type":"image","tags":["summer"]}"#;
    let response = app.oneshot(post_json("/api/content", payload)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], payload.as_bytes());
}

#[tokio::test]
async fn script_in_description_is_blocked() {
    let (app, _) = gate();
    let payload = r#"{"title":"Hi","description":"<script>alert(1)</script>"}"#;
    let response = app.oneshot(post_json("/api/content", payload)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = json_body(response).await;
    let codes: Vec<&str> = body["errors"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|e| e["code"].as_str())
        .collect();
    assert!(codes.contains(&"XSS_DETECTED"), "codes: {codes:?}");
}

#[tokio::test]
async fn identical_requests_hit_the_cache() {
    let (app, engine) = gate();
    for _ in 0..2 {
        let response = app.clone().oneshot(get_request("/api/feed?limit=20")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert!(engine.stats().cache_hits >= 2, "stats: {:?}", engine.stats());
}

#[tokio::test]
async fn admin_area_requires_authentication() {
    let (app, _) = gate();
    let response = app.oneshot(get_request("/api/admin/users")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = json_body(response).await;
    assert_eq!(body["errors"][0]["code"], AUTHENTICATION_REQUIRED);
    assert_eq!(body["errors"].as_array().unwrap().len(), 1, "errors: {}", body["errors"]);
}

#[tokio::test]
async fn encoded_script_in_query_is_blocked() {
    let (app, _) = gate();
    let response = app
        .oneshot(get_request("/api/feed?q=%3Cscript%3Ealert(1)%3C/script%3E"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = json_body(response).await;
    assert_eq!(body["errors"][0]["code"], "XSS_DETECTED");
}

#[tokio::test]
async fn oversized_body_is_payload_too_large() {
    let (app, engine) = gate_with(MiddlewareConfig {
        max_body_bytes: 16,
        ..MiddlewareConfig::default()
    });
    let payload = r#"{"title":"a title well past sixteen bytes"}"#;
    let response = app.clone().oneshot(post_json("/api/content", payload)).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(json_body(response).await["error"], "Request body too large");
    assert_eq!(engine.stats().executions, 0);

    let declared = Request::post("/api/content")
        .header("content-type", "application/json")
        .header("content-length", "1048576")
        .body(Body::from("{}"))
        .unwrap();
    let response = app.oneshot(declared).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}
