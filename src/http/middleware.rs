//! Request middleware: request IDs, response hardening, API key
//! authentication, the admin guard and admission.

use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{debug, error, info_span, trace, warn, Span};

use super::state::AppState;
use crate::auth::{mask_api_key, ApiKey, AuthRejection, API_KEY_HEADER};
use crate::config::FailurePolicy;
use crate::error::GateError;
use crate::ratelimit::Decision;

/// Header carrying the request ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Header carrying the handling time, e.g. `0.004s`.
pub const RESPONSE_TIME_HEADER: &str = "x-response-time";

/// Rate limit key used when neither an API key nor a peer address is known.
const UNKNOWN_CLIENT: &str = "unknown";

/// The ID of the current request, echoed back on the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// Tag every request with an ID, reusing one supplied by an upstream proxy.
pub async fn request_id(mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(String::from)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    req.extensions_mut().insert(RequestId(id.clone()));
    let mut response = next.run(req).await;

    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Span for one request, opened by the trace layer.
///
/// Runs inside `request_id`, so the ID is already in the extensions.
pub fn request_span(req: &Request) -> Span {
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .map_or("-", |id| id.0.as_str());
    let api_key = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| "anonymous".to_string(), mask_api_key);
    let client = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| UNKNOWN_CLIENT.to_string(), |ConnectInfo(addr)| addr.ip().to_string());

    info_span!(
        "request",
        method = %req.method(),
        path = %req.uri().path(),
        request_id = %request_id,
        api_key = %api_key,
        client = %client
    )
}

/// Stamp the handling time on every response.
pub async fn response_time(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let mut response = next.run(req).await;

    let elapsed = format!("{:.3}s", start.elapsed().as_secs_f64());
    if let Ok(value) = HeaderValue::from_str(&elapsed) {
        response.headers_mut().insert(RESPONSE_TIME_HEADER, value);
    }
    response
}

/// Add the browser hardening headers to every response.
pub async fn security_headers(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(header::X_XSS_PROTECTION, HeaderValue::from_static("1; mode=block"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        HeaderName::from_static("permissions-policy"),
        HeaderValue::from_static("geolocation=(), microphone=(), camera=(), payment=()"),
    );
    response
}

/// Validate `X-API-Key` and attach the caller's identity.
pub async fn authenticate(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let presented = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    match state.auth.authenticate(presented) {
        Ok(Some(key)) => {
            trace!(api_key = %key.masked(), "Authenticated request");
            req.extensions_mut().insert(key);
        }
        Ok(None) => {}
        Err(rejection) => {
            debug!(reason = rejection.message(), "Rejected unauthenticated request");
            return rejection_response(rejection);
        }
    }

    next.run(req).await
}

/// Only let admin keys through. Admin requests bypass the admission gate.
pub async fn require_admin(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let presented = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    if let Err(rejection) = state.auth.authorize_admin(presented) {
        warn!(
            reason = rejection.message(),
            api_key = %presented.map_or_else(|| "none".to_string(), mask_api_key),
            "Rejected admin request"
        );
        return rejection_response(rejection);
    }

    next.run(req).await
}

fn rejection_response(rejection: AuthRejection) -> Response {
    let detail = Json(json!({ "detail": rejection.message() }));
    match rejection {
        AuthRejection::Missing | AuthRejection::Invalid => (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "ApiKey")],
            detail,
        )
            .into_response(),
        AuthRejection::Forbidden => (StatusCode::FORBIDDEN, detail).into_response(),
    }
}

/// Admission gate, run once per request before the handler.
///
/// Rejected requests get a 429 carrying `Retry-After`; admitted ones reach
/// the handler with the decision in their extensions. Both carry the rate
/// limit headers on the way out.
pub async fn admit(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let key = rate_limit_key(&req);

    let decision = match state.limiter.check_rate_limit(&key).await {
        Ok(decision) => decision,
        Err(err) => match state.on_store_error {
            FailurePolicy::Open => {
                warn!(error = %err, "Rate limiter unavailable, admitting request");
                Decision::bypass()
            }
            FailurePolicy::Closed => {
                error!(error = %err, "Rate limiter unavailable, rejecting request");
                return err.into_response();
            }
        },
    };

    if !decision.allowed {
        debug!(
            client = %mask_api_key(&key),
            retry_after = decision.retry_after(),
            "Request over rate limit"
        );
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "detail": decision.rejection_message() })),
        )
            .into_response();
        apply_rate_limit_headers(&decision, response.headers_mut());
        return response;
    }

    req.extensions_mut().insert(decision.clone());
    let mut response = next.run(req).await;
    apply_rate_limit_headers(&decision, response.headers_mut());
    response
}

/// Copy a decision's rate limit headers onto a response.
pub fn apply_rate_limit_headers(decision: &Decision, headers: &mut HeaderMap) {
    for (name, value) in decision.headers() {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            headers.insert(name, value);
        }
    }
}

/// Authenticated API key, else peer IP, else a fixed placeholder.
fn rate_limit_key(req: &Request) -> String {
    if let Some(key) = req.extensions().get::<ApiKey>() {
        return key.as_str().to_string();
    }
    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }
    UNKNOWN_CLIENT.to_string()
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let (status, detail) = if self.is_store_fault() {
            (StatusCode::SERVICE_UNAVAILABLE, "Rate limiter unavailable")
        } else {
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}
