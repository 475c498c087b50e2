//! Axum router wiring: HTTP/JSON transcoding of the RPC surface.
//!
//! Every RPC is reachable as POST `/v1/<Operation>` with a JSON body;
//! `GET /v1/HealthCheck` is accepted as an alias. `/metrics` serves the
//! Prometheus text exposition.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tokio::time::Instant;

use gubernator_core::error::GubernatorError;
use gubernator_core::types::{GetRateLimitsReq, GetRateLimitsResp};

use crate::service::{RateLimitService, DEFAULT_RPC_DEADLINE};

#[derive(Clone)]
pub struct AppState {
    service: Arc<RateLimitService>,
}

impl AppState {
    pub fn new(service: Arc<RateLimitService>) -> Self {
        Self { service }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/GetRateLimits", post(get_rate_limits))
        .route("/v1/GetPeerRateLimits", post(get_peer_rate_limits))
        .route("/v1/HealthCheck", get(health_check).post(health_check))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn get_rate_limits(
    State(state): State<AppState>,
    Json(req): Json<GetRateLimitsReq>,
) -> Response {
    let deadline = Instant::now() + DEFAULT_RPC_DEADLINE;
    match state.service.get_rate_limits(req.requests, deadline).await {
        Ok(responses) => Json(GetRateLimitsResp { responses }).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn get_peer_rate_limits(
    State(state): State<AppState>,
    Json(req): Json<GetRateLimitsReq>,
) -> Response {
    match state.service.get_peer_rate_limits(req.requests) {
        Ok(responses) => Json(GetRateLimitsResp { responses }).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn health_check(State(state): State<AppState>) -> Response {
    Json(state.service.health_check()).into_response()
}

async fn metrics(State(state): State<AppState>) -> Response {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.service.metrics().render(),
    )
        .into_response()
}

fn error_response(e: &GubernatorError) -> Response {
    let code = match e {
        GubernatorError::Deadline => StatusCode::GATEWAY_TIMEOUT,
        GubernatorError::Validation(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (code, e.to_string()).into_response()
}
