//! # rule-middleware
//!
//! Runs the [`rule_engine`] in front of PlayNite's HTTP handlers. Each request
//! is turned into a [`RuleContext`](rule_engine::RuleContext), the categories
//! its path calls for are evaluated concurrently, and the findings are reduced
//! to a single [`RuleOutcome`]. Failed requests are answered with `400` and
//! never reach the handler; responses are checked afterwards against the
//! performance rules without holding up the client.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use axum::{routing::post, Router};
//! use rule_engine::{builtin_packs, EngineConfig, RuleEngine};
//! use rule_middleware::{enforce_rules, MiddlewareConfig, RuleMiddleware};
//!
//! # fn example() -> Result<(), rule_middleware::MiddlewareError> {
//! let engine = RuleEngine::new(EngineConfig::default());
//! for pack in builtin_packs() {
//!     engine.register_pack(pack.as_ref());
//! }
//! let rules = Arc::new(RuleMiddleware::new(Arc::new(engine), MiddlewareConfig::default())?);
//!
//! let app: Router = Router::new()
//!     .route("/api/content", post(|| async { "created" }))
//!     .layer(axum::middleware::from_fn_with_state(rules, enforce_rules));
//! # Ok(())
//! # }
//! ```

pub mod identity;
mod layer;
mod middleware;
pub mod request;
pub mod routing;

pub use identity::{
    IdentityProvider, PanelAccess, PanelType, Permission, PlaceholderIdentity, StaticPanelAccess,
    UserRole,
};
pub use layer::{enforce_rules, Rejection};
pub use middleware::{
    MiddlewareConfig, MiddlewareError, MiddlewareStats, RuleMiddleware, RuleOutcome,
    ADMIN_REQUIRED, AUTHENTICATION_REQUIRED, MIDDLEWARE_RULE_ID, PROCESSING_ERROR,
    RESPONSE_PROCESSING_ERROR,
};
pub use request::{InboundRequest, OutboundResponse};
pub use routing::{CategoryRouter, RouteConfig};
