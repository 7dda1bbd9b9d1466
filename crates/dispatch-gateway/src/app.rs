use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::http::operator_stub::{op_send, op_stream, OperatorStubState};
use crate::runtime::Runtime;

/// Shared state for every HTTP handler this process exposes.
pub struct AppState {
    pub runtime: Arc<Runtime>,
    pub operator_stub: Arc<OperatorStubState>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let op_routes = Router::new()
        .route("/op", get(op_stream).post(op_send))
        .with_state(state.operator_stub.clone());

    let health_routes = Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .with_state(state);

    op_routes.merge(health_routes).layer(TraceLayer::new_for_http())
}
