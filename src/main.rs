use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use masp_metrics_api::api::{self, AppState, RateLimiter};
use masp_metrics_api::config::{Config, RATE_LIMIT_WINDOW};
use masp_metrics_api::decoder::{AbciDecoder, BorshDecoder, MockDecoder};
use masp_metrics_api::services::{ChainService, MaspStore, MockStore, PgStore, PriceService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Arc::new(Config::from_env()?);
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;

    let decoder: Arc<dyn AbciDecoder> = if config.db_mock_mode {
        Arc::new(MockDecoder)
    } else {
        Arc::new(BorshDecoder)
    };

    // A dead database at startup is fatal; everything after this point
    // degrades to stale caches and 503s instead of exiting.
    let store: Arc<dyn MaspStore> = if config.db_mock_mode {
        info!("Mock mode enabled, using fixture-backed store");
        Arc::new(MockStore::new())
    } else {
        let db = config
            .db
            .as_ref()
            .context("database configuration is required (DB_USER/DB_HOST/DB_NAME/DB_PASSWORD)")?;
        Arc::new(PgStore::connect(db).await?)
    };

    let prices = Arc::new(PriceService::new(http.clone(), config.clone()));
    let chain = Arc::new(ChainService::new(
        http,
        config.clone(),
        decoder,
        store.clone(),
    ));
    prices.start();
    chain.start();

    let limiter = Arc::new(RateLimiter::new(config.request_limit, RATE_LIMIT_WINDOW));
    let app = api::router(
        AppState {
            config: config.clone(),
            prices,
            chain,
            store,
        },
        limiter,
    );

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.serve_port)).await?;
    info!("Server running on port {}", config.serve_port);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
