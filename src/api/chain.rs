use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};

use super::AppState;
use crate::error::ApiError;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/token/supplies", get(token_supplies))
        .route("/tx/count", get(tx_count))
}

async fn token_supplies(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let supplies = state
        .chain
        .token_supplies()
        .await
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            ApiError::Unavailable("Token supply data temporarily unavailable".into())
        })?;
    Ok(Json(json!({
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        "supplies": supplies,
    })))
}

async fn tx_count(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let stats = state.chain.chain_statistics().await.ok_or_else(|| {
        ApiError::Unavailable("Chain statistics temporarily unavailable".into())
    })?;
    Ok(Json(json!({
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        "count": stats.transaction_count,
        "unique_addresses": stats.unique_address_count,
    })))
}
