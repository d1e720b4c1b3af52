use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use audit_log::{AuditEntry, AuditSink, AuditSource, EvaluationRecord};
use chrono::Utc;
use futures_util::future::join_all;
use futures_util::FutureExt;
use rule_engine::{
    ContextMetadata, RequestContext, ResponseContext, RuleCategory, RuleContext, RuleEngine,
    RuleExecutionResult, Severity, UserContext, ValidationError, ValidationResult,
    ValidationWarning,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::identity::{
    bearer_token, IdentityProvider, PanelAccess, PlaceholderIdentity, StaticPanelAccess, UserRole,
};
use crate::request::{parse_body, InboundRequest, OutboundResponse};
use crate::routing::{default_routes, CategoryRouter, PathSet, RouteConfig};

pub const PROCESSING_ERROR: &str = "PROCESSING_ERROR";
pub const RESPONSE_PROCESSING_ERROR: &str = "RESPONSE_PROCESSING_ERROR";
pub const AUTHENTICATION_REQUIRED: &str = "AUTHENTICATION_REQUIRED";
pub const ADMIN_REQUIRED: &str = "ADMIN_REQUIRED";

/// Rule id on findings the middleware produces itself.
pub const MIDDLEWARE_RULE_ID: &str = "rule-middleware";

#[derive(Debug, Error)]
pub enum MiddlewareError {
    #[error("invalid path pattern in `{setting}`: {source}")]
    InvalidPathPattern {
        setting: &'static str,
        #[source]
        source: globset::Error,
    },

    #[error("invalid request target `{uri}`: {source}")]
    InvalidUri {
        uri: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to read request body: {0}")]
    BodyRead(String),

    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("rule evaluation panicked: {0}")]
    Panicked(String),
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiddlewareConfig {
    #[serde(default = "default_categories")]
    pub enabled_categories: Vec<RuleCategory>,
    #[serde(default = "default_true")]
    pub enable_request_logging: bool,
    #[serde(default = "default_true")]
    pub enable_response_logging: bool,
    #[serde(default = "default_true")]
    pub enable_metrics: bool,
    /// Requests matching these globs bypass rule evaluation entirely.
    #[serde(default = "default_skip_paths")]
    pub skip_paths: Vec<String>,
    #[serde(default = "default_require_auth_paths")]
    pub require_auth_paths: Vec<String>,
    #[serde(default = "default_admin_only_paths")]
    pub admin_only_paths: Vec<String>,
    #[serde(default = "default_routes")]
    pub routes: Vec<RouteConfig>,
    /// Largest request body the axum layer buffers.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            enabled_categories: default_categories(),
            enable_request_logging: true,
            enable_response_logging: true,
            enable_metrics: true,
            skip_paths: default_skip_paths(),
            require_auth_paths: default_require_auth_paths(),
            admin_only_paths: default_admin_only_paths(),
            routes: default_routes(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_categories() -> Vec<RuleCategory> {
    RuleCategory::ALL.to_vec()
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_skip_paths() -> Vec<String> {
    strings(&["/api/health", "/_next/static/**", "/static/**", "/favicon.ico"])
}

fn default_require_auth_paths() -> Vec<String> {
    strings(&["/api/admin", "/api/admin/**", "/api/rules/**"])
}

fn default_admin_only_paths() -> Vec<String> {
    strings(&["/api/admin", "/api/admin/**", "/api/rules/cache/clear"])
}

fn default_max_body_bytes() -> usize {
    64 * 1024 * 1024
}

// ---------------------------------------------------------------------------
// Outcome and stats
// ---------------------------------------------------------------------------

/// Aggregated verdict for one request or response.
///
/// Serializes as `{ isValid, errors, warnings }`; the remaining fields are
/// for the caller only.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleOutcome {
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
    /// Categories that were evaluated, in evaluation order.
    #[serde(skip)]
    pub categories: Vec<RuleCategory>,
    #[serde(skip)]
    pub results: Vec<RuleExecutionResult>,
    /// The context the request was evaluated with, for the response pass.
    #[serde(skip)]
    pub context: Option<Arc<RuleContext>>,
    /// True when the path was skipped and no rules ran.
    #[serde(skip)]
    pub skipped: bool,
}

impl RuleOutcome {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::from_validation(ValidationResult::valid())
        }
    }

    fn from_validation(validation: ValidationResult) -> Self {
        Self {
            is_valid: validation.is_valid,
            errors: validation.errors,
            warnings: validation.warnings,
            categories: Vec::new(),
            results: Vec::new(),
            context: None,
            skipped: false,
        }
    }

    /// Single synthetic error standing in for a failed evaluation.
    fn fault(code: &str, err: &MiddlewareError) -> Self {
        Self::from_validation(ValidationResult::from_findings(
            vec![finding(code, "", err.to_string())],
            Vec::new(),
        ))
    }
}

fn finding(code: &str, field: &str, message: String) -> ValidationError {
    ValidationError {
        rule_id: MIDDLEWARE_RULE_ID.to_string(),
        field: field.to_string(),
        message,
        code: code.to_string(),
        severity: Severity::Error,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MiddlewareStats {
    pub requests_processed: u64,
    pub requests_skipped: u64,
    pub requests_rejected: u64,
    pub responses_processed: u64,
    pub processing_errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    requests_processed: AtomicU64,
    requests_skipped: AtomicU64,
    requests_rejected: AtomicU64,
    responses_processed: AtomicU64,
    processing_errors: AtomicU64,
}

// ---------------------------------------------------------------------------
// RuleMiddleware
// ---------------------------------------------------------------------------

/// Adapts requests and responses into rule contexts, runs the categories the
/// routing table selects, and reduces the results to one verdict.
pub struct RuleMiddleware {
    engine: Arc<RuleEngine>,
    config: MiddlewareConfig,
    router: CategoryRouter,
    skip_paths: PathSet,
    require_auth_paths: PathSet,
    admin_only_paths: PathSet,
    identity: Arc<dyn IdentityProvider>,
    panels: Arc<dyn PanelAccess>,
    audit: AuditSink,
    counters: Counters,
}

impl std::fmt::Debug for RuleMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleMiddleware")
            .field("config", &self.config)
            .field("audit", &self.audit.is_enabled())
            .finish()
    }
}

impl RuleMiddleware {
    /// Compiles the configured path globs. Identity defaults to
    /// [`PlaceholderIdentity`], panel access to [`StaticPanelAccess`], and
    /// auditing is off until [`with_audit`](Self::with_audit).
    pub fn new(engine: Arc<RuleEngine>, config: MiddlewareConfig) -> Result<Self, MiddlewareError> {
        let paths = |setting: &'static str, patterns: &[String]| {
            PathSet::new(patterns).map_err(|source| MiddlewareError::InvalidPathPattern { setting, source })
        };
        Ok(Self {
            skip_paths: paths("skip_paths", &config.skip_paths)?,
            require_auth_paths: paths("require_auth_paths", &config.require_auth_paths)?,
            admin_only_paths: paths("admin_only_paths", &config.admin_only_paths)?,
            router: CategoryRouter::new(config.routes.clone(), config.enabled_categories.clone()),
            engine,
            config,
            identity: Arc::new(PlaceholderIdentity),
            panels: Arc::new(StaticPanelAccess::default()),
            audit: AuditSink::disabled(),
            counters: Counters::default(),
        })
    }

    pub fn with_identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_panel_access(mut self, panels: Arc<dyn PanelAccess>) -> Self {
        self.panels = panels;
        self
    }

    pub fn with_audit(mut self, audit: AuditSink) -> Self {
        self.audit = audit;
        self
    }

    pub fn engine(&self) -> &Arc<RuleEngine> {
        &self.engine
    }

    pub fn config(&self) -> &MiddlewareConfig {
        &self.config
    }

    pub fn should_skip(&self, path: &str) -> bool {
        self.skip_paths.is_match(path)
    }

    pub fn stats(&self) -> MiddlewareStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MiddlewareStats {
            requests_processed: load(&self.counters.requests_processed),
            requests_skipped: load(&self.counters.requests_skipped),
            requests_rejected: load(&self.counters.requests_rejected),
            responses_processed: load(&self.counters.responses_processed),
            processing_errors: load(&self.counters.processing_errors),
        }
    }

    // -- Request side ---------------------------------------------------------

    /// Evaluate an inbound request. Never fails: faults become a single
    /// `PROCESSING_ERROR` finding.
    pub async fn process_request(&self, request: &InboundRequest) -> RuleOutcome {
        self.process_request_with(request, None).await
    }

    /// As [`process_request`](Self::process_request), but evaluates a
    /// caller-built context instead of deriving one from the request.
    pub async fn process_request_with(
        &self,
        request: &InboundRequest,
        context: Option<RuleContext>,
    ) -> RuleOutcome {
        let path = request.normalized_path();
        let path = path.as_str();
        if self.should_skip(path) {
            self.count(&self.counters.requests_skipped);
            debug!(path, "rule evaluation skipped");
            return RuleOutcome::skipped();
        }

        let started = Instant::now();
        let outcome = match AssertUnwindSafe(self.evaluate_request(request, path, context))
            .catch_unwind()
            .await
        {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => self.fault(PROCESSING_ERROR, err),
            Err(panic) => self.fault(PROCESSING_ERROR, MiddlewareError::Panicked(panic_message(&*panic))),
        };
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        self.count(&self.counters.requests_processed);
        if !outcome.is_valid {
            self.count(&self.counters.requests_rejected);
        }
        if self.config.enable_request_logging {
            log_outcome("request", &request.method, path, None, &outcome, elapsed_ms);
        }
        self.audit(&request.method, path, None, &outcome);
        outcome
    }

    async fn evaluate_request(
        &self,
        request: &InboundRequest,
        path: &str,
        supplied: Option<RuleContext>,
    ) -> Result<RuleOutcome, MiddlewareError> {
        let context = match supplied {
            Some(context) => context,
            None => self.build_context(request).await?,
        };
        let context = Arc::new(context);

        let mut errors = self.access_errors(path, context.user.as_ref());
        let categories = self.router.select(path, context.user.is_some());
        let results: Vec<RuleExecutionResult> = join_all(
            categories
                .iter()
                .map(|&category| self.engine.execute_rules(Arc::clone(&context), category)),
        )
        .await
        .into_iter()
        .flatten()
        .collect();

        let merged = ValidationResult::merge(results.iter().map(|r| &r.validation));
        errors.extend(merged.errors);
        let validation = ValidationResult::from_findings(errors, merged.warnings);

        Ok(RuleOutcome {
            categories,
            results,
            context: Some(context),
            ..RuleOutcome::from_validation(validation)
        })
    }

    /// Build the evaluation context for a request.
    pub async fn build_context(&self, request: &InboundRequest) -> Result<RuleContext, MiddlewareError> {
        let url = request.url().map_err(|source| MiddlewareError::InvalidUri {
            uri: request.uri.clone(),
            source,
        })?;
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let decoded_query = pairs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        let query = pairs.into_iter().collect();

        let user = self.resolve_user(request).await;
        let data = parse_body(request.content_type(), &request.body).await;
        let request_id = request
            .header_value("x-request-id")
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Ok(RuleContext {
            user,
            request: Some(RequestContext {
                method: request.method.to_ascii_uppercase(),
                url: url.to_string(),
                path: url.path().to_string(),
                query,
                decoded_query,
                headers: request.headers.clone(),
                content_type: request.content_type().map(str::to_string),
                content_length: request.content_length(),
            }),
            response: None,
            data,
            metadata: ContextMetadata {
                timestamp: Utc::now(),
                client_ip: request.client_ip(),
                user_agent: request.header_value("user-agent").map(str::to_string),
                request_id: Some(request_id),
            },
        })
    }

    async fn resolve_user(&self, request: &InboundRequest) -> Option<UserContext> {
        let token = request.header_value("authorization").and_then(bearer_token)?;
        let mut user = self.identity.resolve(token).await?;
        let Ok(role) = user.role.parse::<UserRole>() else {
            return Some(user);
        };
        if user.permissions.is_empty() {
            user.permissions = self
                .panels
                .permissions_for(role)
                .iter()
                .map(|p| p.as_str().to_string())
                .collect();
        }
        if user.panels.is_empty() {
            user.panels = self
                .panels
                .panels_for(&user.id, role)
                .iter()
                .map(|p| p.as_str().to_string())
                .collect();
        }
        Some(user)
    }

    fn access_errors(&self, path: &str, user: Option<&UserContext>) -> Vec<ValidationError> {
        if user.is_none() && self.require_auth_paths.is_match(path) {
            return vec![finding(
                AUTHENTICATION_REQUIRED,
                "authorization",
                format!("authentication is required for {path}"),
            )];
        }
        let is_admin = user.is_some_and(|u| self.panels.is_admin_role(&u.role));
        if !is_admin && self.admin_only_paths.is_match(path) {
            return vec![finding(
                ADMIN_REQUIRED,
                "user.role",
                format!("administrator access is required for {path}"),
            )];
        }
        Vec::new()
    }

    // -- Response side --------------------------------------------------------

    /// Run performance rules over a finished response. Observational: the
    /// outcome is logged and audited, and callers must not block on it.
    pub async fn process_response(
        &self,
        response: &OutboundResponse,
        context: Option<Arc<RuleContext>>,
    ) -> RuleOutcome {
        if !self.config.enabled_categories.contains(&RuleCategory::Performance) {
            return RuleOutcome::skipped();
        }

        let (method, path) = context
            .as_ref()
            .and_then(|c| c.request.as_ref())
            .map(|r| (r.method.clone(), r.path.clone()))
            .unwrap_or_default();

        let started = Instant::now();
        let outcome = match AssertUnwindSafe(self.evaluate_response(response, context))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => self.fault(
                RESPONSE_PROCESSING_ERROR,
                MiddlewareError::Panicked(panic_message(&*panic)),
            ),
        };
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        self.count(&self.counters.responses_processed);
        if self.config.enable_response_logging {
            log_outcome("response", &method, &path, Some(response.status), &outcome, elapsed_ms);
        }
        self.audit(&method, &path, Some(response.status), &outcome);
        outcome
    }

    async fn evaluate_response(
        &self,
        response: &OutboundResponse,
        context: Option<Arc<RuleContext>>,
    ) -> RuleOutcome {
        let mut context = context.map(|c| RuleContext::clone(&c)).unwrap_or_default();
        context.response = Some(ResponseContext {
            status: response.status,
            duration_ms: response.duration_ms,
            content_length: response.content_length,
        });
        let context = Arc::new(context);

        let results = self
            .engine
            .execute_rules(Arc::clone(&context), RuleCategory::Performance)
            .await;
        let validation = ValidationResult::merge(results.iter().map(|r| &r.validation));
        RuleOutcome {
            categories: vec![RuleCategory::Performance],
            results,
            context: Some(context),
            ..RuleOutcome::from_validation(validation)
        }
    }

    // -- Helpers --------------------------------------------------------------

    fn fault(&self, code: &str, err: MiddlewareError) -> RuleOutcome {
        self.count(&self.counters.processing_errors);
        error!(code, %err, "rule middleware fault");
        RuleOutcome::fault(code, &err)
    }

    fn count(&self, counter: &AtomicU64) {
        if self.config.enable_metrics {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn audit(&self, method: &str, path: &str, status: Option<u16>, outcome: &RuleOutcome) {
        if !self.audit.is_enabled() {
            return;
        }
        let mut source = AuditSource::new(MIDDLEWARE_RULE_ID);
        if let Some(context) = &outcome.context {
            source = source.client_ip(context.metadata.client_ip.clone());
            if let Some(id) = &context.metadata.request_id {
                source = source.request_id(id.clone());
            }
            if let Some(user) = &context.user {
                source = source.user_id(user.id.clone());
            }
        }
        let record = EvaluationRecord {
            path: path.to_string(),
            method: method.to_string(),
            status,
            is_valid: outcome.is_valid,
            error_count: outcome.errors.len(),
            warning_count: outcome.warnings.len(),
            categories: outcome.categories.iter().map(|c| c.to_string()).collect(),
        };
        self.audit.record(AuditEntry::evaluation(source, record));
    }
}

fn log_outcome(
    phase: &'static str,
    method: &str,
    path: &str,
    status: Option<u16>,
    outcome: &RuleOutcome,
    elapsed_ms: f64,
) {
    let errors = outcome.errors.len();
    let warnings = outcome.warnings.len();
    let categories = outcome
        .categories
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(",");

    if errors > 0 {
        warn!(phase, method, path, ?status, errors, warnings, %categories, elapsed_ms, "rule validation failed");
    } else if warnings > 0 {
        info!(phase, method, path, ?status, errors, warnings, %categories, elapsed_ms, "rule validation passed with warnings");
    } else {
        debug!(phase, method, path, ?status, %categories, elapsed_ms, "rule validation passed");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
