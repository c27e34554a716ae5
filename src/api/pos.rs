use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde_json::Value;

use super::AppState;
use crate::error::ApiError;

pub fn routes() -> Router<AppState> {
    Router::new().route("/params", get(params))
}

async fn params(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let params = state
        .chain
        .pos_params()
        .await
        .ok_or_else(|| ApiError::Unavailable("POS parameters temporarily unavailable".into()))?;
    Ok(Json(params))
}
