use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};

use super::AppState;
use crate::error::ApiError;
use crate::rpc::PGF_ADDRESS;

pub fn routes() -> Router<AppState> {
    Router::new().route("/treasury", get(treasury))
}

async fn treasury(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let balance = state.chain.pgf_balance().await.ok_or_else(|| {
        ApiError::Unavailable("PGF treasury balance temporarily unavailable".into())
    })?;
    Ok(Json(json!({
        "address": PGF_ADDRESS,
        "balance": balance.to_string(),
    })))
}
