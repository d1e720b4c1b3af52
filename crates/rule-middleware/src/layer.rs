use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::CONTENT_LENGTH;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use serde_json::json;
use tracing::warn;

use crate::middleware::{MiddlewareError, RuleMiddleware, RuleOutcome};
use crate::request::{InboundRequest, OutboundResponse};

/// Body of the 400 returned for a request that failed validation.
#[derive(Debug)]
pub struct Rejection(pub RuleOutcome);

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let body = json!({
            "error": "Request validation failed",
            "errors": self.0.errors,
            "warnings": self.0.warnings,
        });
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}

impl IntoResponse for MiddlewareError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            MiddlewareError::BodyTooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "Rule evaluation unavailable"),
        };
        let body = json!({
            "error": error,
            "details": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

/// Buffer a request body of at most `limit` bytes.
async fn read_body(headers: &HeaderMap, body: Body, limit: usize) -> Result<Bytes, MiddlewareError> {
    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    if declared.is_some_and(|len| len > limit as u64) {
        return Err(MiddlewareError::BodyTooLarge { limit });
    }

    let mut stream = body.into_data_stream();
    let mut buffer = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| MiddlewareError::BodyRead(err.to_string()))?;
        if buffer.len() + chunk.len() > limit {
            return Err(MiddlewareError::BodyTooLarge { limit });
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer.freeze())
}

/// axum middleware: buffer the body, evaluate the request, and either reject
/// it or hand it on. The response pass runs in the background once the inner
/// service has answered.
///
/// ```ignore
/// let app = Router::new()
///     .route("/api/content", post(create))
///     .layer(axum::middleware::from_fn_with_state(rules.clone(), enforce_rules));
/// ```
pub async fn enforce_rules(
    State(rules): State<Arc<RuleMiddleware>>,
    request: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let (parts, body) = request.into_parts();
    let bytes = match read_body(&parts.headers, body, rules.config().max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(path = %parts.uri.path(), %err, "request rejected before evaluation");
            return err.into_response();
        }
    };

    let inbound = InboundRequest::from_parts(&parts, bytes.clone());
    let outcome = rules.process_request(&inbound).await;
    if !outcome.is_valid {
        return Rejection(outcome).into_response();
    }

    let response = next.run(Request::from_parts(parts, Body::from(bytes))).await;
    if outcome.skipped {
        return response;
    }

    let summary = OutboundResponse::from_response(&response, started.elapsed().as_secs_f64() * 1000.0);
    let context = outcome.context;
    tokio::spawn(async move {
        rules.process_response(&summary, context).await;
    });
    response
}
