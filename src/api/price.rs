use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde_json::json;

use super::AppState;

pub const ATTRIBUTION: &str = "Price data by CoinGecko";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/all/price", get(all_prices))
        .route("/:asset/price", get(asset_price))
}

/// Price responses carry the attribution CoinGecko's terms require, on
/// errors as well as successes.
fn price_error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({ "error": message, "attribution": ATTRIBUTION })),
    )
        .into_response()
}

async fn all_prices(State(state): State<AppState>) -> Response {
    let prices = state.prices.all_prices().await;
    if prices.is_empty() {
        return price_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "Price data temporarily unavailable",
        );
    }
    Json(json!({
        "attribution": ATTRIBUTION,
        "price": prices,
    }))
    .into_response()
}

async fn asset_price(State(state): State<AppState>, Path(asset): Path<String>) -> Response {
    let asset = asset.trim().to_lowercase();
    if asset.is_empty() {
        return price_error(StatusCode::BAD_REQUEST, "Asset parameter is required");
    }
    match state.prices.price(&asset).await {
        Some(price) => Json(json!({
            "attribution": ATTRIBUTION,
            "price": price,
        }))
        .into_response(),
        None => price_error(StatusCode::NOT_FOUND, "Asset not found"),
    }
}
