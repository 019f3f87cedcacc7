use crate::error::AppError;
use crate::state::AppState;
use crate::webhook::{self, normalize};
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub struct IngressQuery {
    pub source_id: Option<i64>,
}

fn require_source_id(query: &IngressQuery) -> Result<i64, AppError> {
    query.source_id.ok_or_else(|| AppError::bad_request("source_id query parameter is required"))
}

pub async fn prometheus_inbound(
    State(state): State<AppState>,
    Query(query): Query<IngressQuery>,
    Json(payload): Json<normalize::AlertmanagerPayload>,
) -> Result<Json<Value>, AppError> {
    alertmanager_inbound(state, query, payload, "prometheus").await
}

pub async fn victoriametrics_inbound(
    State(state): State<AppState>,
    Query(query): Query<IngressQuery>,
    Json(payload): Json<normalize::AlertmanagerPayload>,
) -> Result<Json<Value>, AppError> {
    alertmanager_inbound(state, query, payload, "victoriametrics").await
}

async fn alertmanager_inbound(
    state: AppState,
    query: IngressQuery,
    payload: normalize::AlertmanagerPayload,
    source_type: &str,
) -> Result<Json<Value>, AppError> {
    let source_id = require_source_id(&query)?;
    let alerts = payload.alerts.into_iter().map(Into::into).collect();
    let outcome = webhook::ingest(&state.store, &state.notify, source_id, source_type, alerts).await;
    Ok(Json(json!({ "received": outcome.received, "created": outcome.created })))
}

pub async fn elasticsearch_inbound(
    State(state): State<AppState>,
    Query(query): Query<IngressQuery>,
    Json(payload): Json<normalize::GenericPayload>,
) -> Result<Json<Value>, AppError> {
    generic_inbound(state, query, payload, "elasticsearch").await
}

pub async fn doris_inbound(
    State(state): State<AppState>,
    Query(query): Query<IngressQuery>,
    Json(payload): Json<normalize::GenericPayload>,
) -> Result<Json<Value>, AppError> {
    generic_inbound(state, query, payload, "doris").await
}

async fn generic_inbound(
    state: AppState,
    query: IngressQuery,
    payload: normalize::GenericPayload,
    source_type: &str,
) -> Result<Json<Value>, AppError> {
    let source_id = require_source_id(&query)?;
    let alerts = payload.alerts.into_iter().map(Into::into).collect();
    let outcome = webhook::ingest(&state.store, &state.notify, source_id, source_type, alerts).await;
    Ok(Json(json!({ "received": outcome.received, "created": outcome.created })))
}
