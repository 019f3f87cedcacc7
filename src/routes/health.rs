use crate::error::{AppError, map_db_error};
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};
use sqlx::PgPool;

pub async fn healthz(State(pool): State<PgPool>) -> Result<Json<Value>, AppError> {
    sqlx::query("SELECT 1").execute(&pool).await.map_err(|err| {
        let (status, message) = map_db_error(err);
        AppError::new(status, message)
    })?;
    Ok(Json(json!({ "status": "ok" })))
}
