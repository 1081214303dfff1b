// SPDX-License-Identifier: Apache-2.0, MIT

//! Router assembly and shared application state. Handlers stay thin: they
//! extract, delegate to a controller/dispatcher, and convert the result.

mod auth_extract;
mod routes;

use std::sync::Arc;

use axum::Router;
use tower_http::sensitive_headers::SetSensitiveRequestHeadersLayer;
use tower_http::trace::TraceLayer;

use crate::auth::AuthSecret;
use crate::dispatcher::Dispatcher;
use crate::penalty::PenaltyScheduler;
use crate::ping::{MetricsController, PingController};
use crate::recorder::Recorder;
use crate::registration::RegistrationController;
use crate::repo::NodeRepo;
use crate::telemetry::SharedTelemetry;
use crate::whitelist::Whitelist;

pub struct AppState {
    pub node_repo: Arc<dyn NodeRepo>,
    pub auth: AuthSecret,
    pub dispatcher: Arc<Dispatcher>,
    pub registration: Arc<RegistrationController>,
    pub ping: Arc<PingController>,
    pub metrics: Arc<MetricsController>,
    pub penalty: Arc<PenaltyScheduler>,
    pub telemetry: SharedTelemetry,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_repo: Arc<dyn NodeRepo>,
        auth: AuthSecret,
        whitelist: Whitelist,
        tunnel_server_address: String,
        recorder: Recorder,
        penalty: Arc<PenaltyScheduler>,
        ping_controller: Arc<PingController>,
        metrics_controller: Arc<MetricsController>,
        telemetry: SharedTelemetry,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(node_repo.clone(), recorder, telemetry.clone()));
        let registration = Arc::new(RegistrationController::new(
            node_repo.clone(),
            auth.clone(),
            whitelist,
            tunnel_server_address,
        ));
        Self {
            node_repo,
            auth,
            dispatcher,
            registration,
            ping: ping_controller,
            metrics: metrics_controller,
            penalty,
            telemetry,
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::rpc_routes())
        .merge(routes::node_routes())
        .merge(routes::ops_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(SetSensitiveRequestHeadersLayer::new([
            axum::http::header::AUTHORIZATION,
        ]))
}
