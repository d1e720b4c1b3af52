use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::info;

use audit_log::{AuditEntry, AuditEventType, AuditSink, AuditSource};
use rule_engine::{builtin_packs, RuleCategory, RuleContext, RuleEngine, ValidationResult};
use rule_middleware::{enforce_rules, RuleMiddleware};

use crate::config::Config;

pub const COMPONENT: &str = "playnite-gate";

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RuleEngine>,
    pub rules: Arc<RuleMiddleware>,
    pub audit: AuditSink,
}

/// Build the engine from the built-in packs (when enabled) followed by the
/// configured YAML packs and any extra packs given on the command line.
pub fn build_engine(cfg: &Config, extra_packs: &[PathBuf]) -> Result<RuleEngine> {
    let engine = RuleEngine::new(cfg.engine.clone());

    if cfg.rule_packs.builtin {
        for pack in builtin_packs() {
            let added = engine.register_pack(pack.as_ref());
            info!(category = %pack.category(), rules = added, "built-in rule pack registered");
        }
    }

    for path in cfg.rule_packs.files.iter().chain(extra_packs) {
        let set = rule_engine::loader::load_rule_pack(path)
            .with_context(|| format!("failed to load rule pack {}", path.display()))?;
        let added = engine.register_rules(set.rules);
        info!(path = %path.display(), rules = added, "rule pack loaded");
    }

    Ok(engine)
}

/// The gateway's HTTP surface, with every route behind the rule layer.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/rules/stats", get(stats))
        .route("/api/rules/cache/clear", post(clear_cache))
        .route("/api/validate/{category}", post(validate))
        .route("/api/content", post(accept))
        .route("/api/business", post(accept))
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&state.rules),
            enforce_rules,
        ))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn stats(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "engine": state.engine.stats(),
        "middleware": state.rules.stats(),
        "audit": {
            "enabled": state.audit.is_enabled(),
            "dropped": state.audit.dropped(),
        },
    }))
}

async fn clear_cache(State(state): State<AppState>) -> Json<Value> {
    let entries = state.engine.stats().cache_entries;
    state.engine.clear_cache();
    info!(entries, "rule result cache cleared");
    state.audit.record(AuditEntry::new(
        AuditEventType::CacheCleared,
        AuditSource::new(COMPONENT),
        json!({ "entries": entries }),
    ));
    Json(json!({ "cleared": entries }))
}

/// Evaluate a posted JSON document against one category.
async fn validate(
    State(state): State<AppState>,
    Path(category): Path<String>,
    Json(data): Json<Value>,
) -> Response {
    let category = match category.parse::<RuleCategory>() {
        Ok(category) => category,
        Err(err) => {
            return (StatusCode::NOT_FOUND, Json(json!({ "error": err.to_string() }))).into_response()
        }
    };

    let context = Arc::new(RuleContext::with_data(data));
    let results = state.engine.execute_rules(context, category).await;
    let validation = ValidationResult::merge(results.iter().map(|r| &r.validation));
    Json(json!({
        "category": category,
        "validation": validation,
        "results": results,
    }))
    .into_response()
}

/// Stand-in for the platform handlers: anything that gets past the rule
/// layer is accepted as-is.
async fn accept(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    (StatusCode::CREATED, Json(json!({ "accepted": body })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use rule_engine::{EngineConfig, UserContext};
    use rule_middleware::{IdentityProvider, MiddlewareConfig, ADMIN_REQUIRED};
    use std::io::Write;
    use tower::ServiceExt;

    /// `root` is an admin, every other token a regular user.
    struct AdminIdentity;

    #[async_trait]
    impl IdentityProvider for AdminIdentity {
        async fn resolve(&self, token: &str) -> Option<UserContext> {
            let role = if token == "root" { "admin" } else { "user" };
            Some(UserContext {
                id: format!("u-{token}"),
                role: role.into(),
                ..UserContext::default()
            })
        }
    }

    fn app(identity: Option<Arc<dyn IdentityProvider>>) -> (Router, Arc<RuleEngine>) {
        let engine = Arc::new(build_engine(&Config::default(), &[]).unwrap());
        let mut rules = RuleMiddleware::new(Arc::clone(&engine), MiddlewareConfig::default()).unwrap();
        if let Some(identity) = identity {
            rules = rules.with_identity(identity);
        }
        let state = AppState {
            engine: Arc::clone(&engine),
            rules: Arc::new(rules),
            audit: AuditSink::disabled(),
        };
        (router(state), engine)
    }

    fn request(method: &str, uri: &str, token: Option<&str>, body: &'static str) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("user-agent", "gate-tests")
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(Body::from(body)).unwrap()
    }

    async fn json_of(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn builtin_packs_are_registered_by_default() {
        let engine = build_engine(&Config::default(), &[]).unwrap();
        assert!(engine.rule_count() > 0);
        assert!(!engine.rules_by_category(RuleCategory::Content).is_empty());
    }

    #[test]
    fn yaml_packs_extend_the_engine() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
version: "1.0"
rules:
  - id: sku-format
    name: SKU format
    category: validation
    conditions:
      - field: sku
        operator: regex
        value: "^[A-Z]{{3}}-[0-9]+$"
        logical_operator: not
      - field: sku
        operator: exists
    actions:
      - type: reject
        target: sku
"#
        )
        .unwrap();

        let mut cfg = Config::default();
        cfg.rule_packs.builtin = false;
        let engine = build_engine(&cfg, &[file.path().to_path_buf()]).unwrap();
        assert_eq!(engine.rule_count(), 1);
        assert!(engine.rule("sku-format").is_some());
    }

    #[test]
    fn broken_pack_fails_startup() {
        let err = build_engine(&Config::default(), &[PathBuf::from("/no/such/pack.yaml")]).unwrap_err();
        assert!(err.to_string().contains("failed to load rule pack"), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn health_is_open() {
        let (app, engine) = app(None);
        let response = app.oneshot(request("GET", "/api/health", None, "")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_of(response).await["status"], "ok");
        assert_eq!(engine.stats().executions, 0);
    }

    #[tokio::test]
    async fn validate_endpoint_reports_findings() {
        let (app, _) = app(None);
        let response = app
            .oneshot(request("POST", "/api/validate/content", None, "{}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_of(response).await;
        assert_eq!(body["category"], "content");
        assert_eq!(body["validation"]["isValid"], false);
        assert_eq!(body["validation"]["errors"][0]["field"], "title");
    }

    #[tokio::test]
    async fn validate_rejects_unknown_category() {
        let (app, _) = app(None);
        let response = app
            .oneshot(request("POST", "/api/validate/moderation", None, "{}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn content_goes_through_the_gate() {
        let (app, _) = app(None);
        let rejected = app
            .clone()
            .oneshot(request("POST", "/api/content", None, "{}"))
            .await
            .unwrap();
        assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);

        let accepted = app
            .oneshot(request("POST", "/api/content", None, r#"{"title":"Sunset"}"#))
            .await
            .unwrap();
        assert_eq!(accepted.status(), StatusCode::CREATED);
        assert_eq!(json_of(accepted).await["accepted"]["title"], "Sunset");
    }

    #[tokio::test]
    async fn cache_clear_is_admin_only() {
        let (app, _) = app(Some(Arc::new(AdminIdentity)));

        let denied = app
            .clone()
            .oneshot(request("POST", "/api/rules/cache/clear", Some("guest"), ""))
            .await
            .unwrap();
        assert_eq!(denied.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_of(denied).await["errors"][0]["code"], ADMIN_REQUIRED);

        let cleared = app
            .oneshot(request("POST", "/api/rules/cache/clear", Some("root"), ""))
            .await
            .unwrap();
        assert_eq!(cleared.status(), StatusCode::OK);
        assert!(json_of(cleared).await["cleared"].is_u64());
    }

    #[tokio::test]
    async fn stats_need_a_bearer_token() {
        let (app, _) = app(None);
        let anonymous = app
            .clone()
            .oneshot(request("GET", "/api/rules/stats", None, ""))
            .await
            .unwrap();
        assert_eq!(anonymous.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(request("GET", "/api/rules/stats", Some("any"), ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_of(response).await;
        assert!(body["engine"]["executions"].as_u64().unwrap() > 0);
        assert_eq!(body["audit"]["enabled"], false);
    }
}
