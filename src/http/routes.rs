//! Routes served by the gate.

use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{delete, get};
use axum::{Extension, Json, Router};
use serde::Serialize;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tower_http::LatencyUnit;
use tracing::{info, Level};

use super::middleware::{
    admit, authenticate, request_id, request_span, require_admin, response_time, security_headers,
};
use super::state::AppState;
use crate::auth::ApiKey;
use crate::error::GateError;
use crate::ratelimit::Decision;

/// Build the router.
///
/// `/health` is open. `/v1/quota` is authenticated first and then passes
/// through the admission gate. The admin routes take admin keys only, skip
/// the gate, and are not mounted at all when no admin key is configured.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/v1/quota", get(quota))
        .route_layer(from_fn_with_state(state.clone(), admit))
        .route_layer(from_fn_with_state(state.clone(), authenticate));

    let mut app = Router::new().route("/health", get(health)).merge(protected);

    if state.auth.has_admin_keys() {
        let admin = Router::new()
            .route("/admin/rate-limits", delete(reset_all))
            .route("/admin/rate-limits/{key}", delete(reset_key))
            .route_layer(from_fn_with_state(state.clone(), require_admin));
        app = app.merge(admin);
    }

    let trace = TraceLayer::new_for_http()
        .make_span_with(request_span)
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(
            DefaultOnResponse::new()
                .level(Level::INFO)
                .latency_unit(LatencyUnit::Millis),
        );

    app.layer(from_fn(response_time))
        .layer(trace)
        .layer(from_fn(security_headers))
        .layer(from_fn(request_id))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    backend: &'static str,
    rate_limiting: bool,
    auth_required: bool,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        backend: state.limiter.name(),
        rate_limiting: state.limiter.is_enabled(),
        auth_required: state.auth.is_required(),
    })
}

#[derive(Debug, Serialize)]
struct QuotaResponse {
    client: String,
    #[serde(flatten)]
    decision: Decision,
}

/// Report the caller's quota as seen by the gate for this request.
async fn quota(Extension(decision): Extension<Decision>, req: Request) -> Json<QuotaResponse> {
    let client = req
        .extensions()
        .get::<ApiKey>()
        .map(ApiKey::masked)
        .unwrap_or_else(|| "anonymous".to_string());

    Json(QuotaResponse { client, decision })
}

async fn reset_all(State(state): State<AppState>) -> Result<StatusCode, GateError> {
    state.limiter.reset(None).await?;
    info!("Reset rate limits for all clients");
    Ok(StatusCode::NO_CONTENT)
}

async fn reset_key(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<StatusCode, GateError> {
    state.limiter.reset(Some(&key)).await?;
    info!(client = %crate::auth::mask_api_key(&key), "Reset rate limit for client");
    Ok(StatusCode::NO_CONTENT)
}
