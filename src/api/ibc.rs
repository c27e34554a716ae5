use anyhow::anyhow;
use axum::extract::{Query, State};
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use futures::future::try_join_all;
use serde_json::{json, Value};

use super::masp::WindowQuery;
use super::AppState;
use crate::error::ApiError;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/txs", get(transactions))
        .route("/count", get(counts))
        .route("/aggregates", get(aggregates))
}

async fn transactions(
    State(state): State<AppState>,
    Query(window): Query<WindowQuery>,
) -> Result<Json<Value>, ApiError> {
    let (start, end, resolution) = window.validate()?;
    let buckets = state.store.ibc_transactions(start, end, resolution).await?;
    Ok(Json(json!(buckets)))
}

async fn counts(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let assets = state.chain.asset_list().await;
    if assets.is_empty() {
        return Err(ApiError::Internal(anyhow!("failed to fetch asset list")));
    }

    let counts = try_join_all(assets.iter().map(|asset| {
        let store = state.store.clone();
        async move { store.ibc_counts_for_token(&asset.address).await }
    }))
    .await?;
    Ok(Json(json!(counts)))
}

async fn aggregates(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let assets = state.chain.asset_list().await;
    if assets.is_empty() {
        return Err(ApiError::Internal(anyhow!("failed to fetch asset list")));
    }

    let now = Utc::now();
    let per_token = try_join_all(assets.iter().map(|asset| {
        let store = state.store.clone();
        async move { store.ibc_aggregates_for_token(&asset.address, now).await }
    }))
    .await?;

    let flattened: Vec<_> = per_token.into_iter().flatten().collect();
    Ok(Json(json!(flattened)))
}
