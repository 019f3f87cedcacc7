pub mod health;
pub mod webhook;

use crate::state::AppState;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/inbound/prometheus", post(webhook::prometheus_inbound))
        .route("/inbound/victoriametrics", post(webhook::victoriametrics_inbound))
        .route("/inbound/elasticsearch", post(webhook::elasticsearch_inbound))
        .route("/inbound/doris", post(webhook::doris_inbound))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
