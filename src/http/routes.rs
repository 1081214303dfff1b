// SPDX-License-Identifier: Apache-2.0, MIT

//! Route handlers. Kept thin: extract, call a controller/dispatcher, map the
//! result to a response.

use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;

use crate::error::GatewayError;
use crate::models::Metrics;
use crate::registration::RegisterRequest;

use super::auth_extract::AuthenticatedNode;
use super::AppState;

fn now() -> i64 {
    Utc::now().timestamp()
}

pub fn rpc_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(dispatch_rpc))
        .route("/rpc", post(dispatch_rpc))
}

pub fn node_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/nodes/register", post(register))
        .route("/api/v1/nodes/ping", post(ping))
        .route("/api/v1/nodes/metrics", post(submit_metrics))
}

pub fn ops_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/metrics", get(render_telemetry))
        .route("/healthz", get(healthz))
}

async fn dispatch_rpc(State(state): State<Arc<AppState>>, body: axum::body::Bytes) -> Response {
    let reply = state.dispatcher.dispatch(&body, now()).await;
    Json(reply).into_response()
}

async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<Response, GatewayError> {
    let response = state.registration.register(req, now()).await?;
    Ok(Json(response).into_response())
}

async fn ping(
    State(state): State<Arc<AppState>>,
    AuthenticatedNode(claims): AuthenticatedNode,
) -> Result<Response, GatewayError> {
    state.ping.ping(&claims.node_id, now()).await?;
    Ok(axum::http::StatusCode::OK.into_response())
}

async fn submit_metrics(
    State(state): State<Arc<AppState>>,
    AuthenticatedNode(claims): AuthenticatedNode,
    Json(metrics): Json<Metrics>,
) -> Result<Response, GatewayError> {
    state.metrics.submit(&claims.node_id, metrics).await?;
    Ok(axum::http::StatusCode::OK.into_response())
}

async fn render_telemetry(State(state): State<Arc<AppState>>) -> Response {
    let active = state
        .node_repo
        .get_active_nodes()
        .await
        .map(|nodes| nodes.len() as i64)
        .unwrap_or(0);
    state.telemetry.set_active_nodes(active);
    state.telemetry.render().into_response()
}

async fn healthz() -> &'static str {
    "ok"
}
