pub mod chain;
pub mod ibc;
pub mod masp;
pub mod pgf;
pub mod pos;
pub mod price;
pub mod rate_limit;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::middleware;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::config::Config;
use crate::services::{ChainService, MaspStore, PriceService};

pub use rate_limit::{rate_limit_middleware, RateLimiter};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub prices: Arc<PriceService>,
    pub chain: Arc<ChainService>,
    pub store: Arc<dyn MaspStore>,
}

/// Assembles the full application: every data route under `/api/v1`, a
/// liveness probe at `/health`, permissive CORS, and the rate limiter in
/// front of everything.
pub fn router(state: AppState, limiter: Arc<RateLimiter>) -> Router {
    let api = Router::new()
        .merge(price::routes())
        .merge(chain::routes())
        .nest("/masp", masp::routes())
        .nest("/ibc", ibc::routes())
        .nest("/pos", pos::routes())
        .nest("/pgf", pgf::routes());

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api)
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not Found" })))
}
