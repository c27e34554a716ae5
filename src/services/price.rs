use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config::{Config, PRICE_BATCH_PAUSE, PRICE_BATCH_SIZE};
use crate::error::FetchError;
use crate::poller::spawn_poller;
use crate::registry;
use crate::retry::{with_retry, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceQuote {
    pub id: String,
    pub usd: f64,
}

#[derive(Debug, Deserialize)]
struct SimplePrice {
    usd: Option<f64>,
}

/// Polls CoinGecko for USD prices of every registry asset with a price feed
/// id, in small batches. Successful entries are merged into the price map;
/// a failed batch leaves its previous entries untouched.
pub struct PriceService {
    http: reqwest::Client,
    config: Arc<Config>,
    policy: RetryPolicy,
    prices: RwLock<HashMap<String, f64>>,
}

impl PriceService {
    pub fn new(http: reqwest::Client, config: Arc<Config>) -> Self {
        Self {
            http,
            config,
            policy: RetryPolicy::default(),
            prices: RwLock::new(HashMap::new()),
        }
    }

    /// Spawns the price poller with an immediate first cycle.
    pub fn start(self: &Arc<Self>) {
        let service = Arc::clone(self);
        let interval = Duration::from_secs(self.config.refresh_secs);
        spawn_poller("prices", interval, move || {
            let service = Arc::clone(&service);
            async move { service.refresh().await }
        });
    }

    pub async fn refresh(&self) {
        let assets = registry::fetch_asset_list(&self.http, &self.config.asset_list_url).await;
        let ids: Vec<String> = assets
            .iter()
            .filter_map(|a| a.price_feed_id())
            .map(str::to_owned)
            .collect();
        info!("Attempting to fetch prices for {} assets", ids.len());

        let mut failed = Vec::new();
        for (i, batch) in ids.chunks(PRICE_BATCH_SIZE).enumerate() {
            if i > 0 {
                sleep(PRICE_BATCH_PAUSE).await;
            }
            if !self.fetch_batch_with_retry(batch).await {
                failed.extend_from_slice(batch);
            }
        }

        if failed.is_empty() {
            info!("Successfully fetched all prices");
        } else {
            warn!(
                "Failed to fetch prices for {} assets: {}",
                failed.len(),
                failed.join(",")
            );
        }
    }

    /// Fetches one batch with retry and merges what came back. Returns false
    /// when the batch failed outright or any asset in it had no price.
    async fn fetch_batch_with_retry(&self, batch: &[String]) -> bool {
        let label = format!("price batch {}", batch.join(","));
        let Some(data) = with_retry(self.policy, &label, || self.fetch_batch(batch)).await else {
            return false;
        };

        let mut all_present = true;
        let mut prices = self.prices.write().await;
        for id in batch {
            match data.get(id).and_then(|p| p.usd) {
                Some(usd) => {
                    prices.insert(id.to_lowercase(), usd);
                }
                None => {
                    all_present = false;
                    error!("No price data received for {id}");
                }
            }
        }
        all_present
    }

    async fn fetch_batch(&self, batch: &[String]) -> Result<HashMap<String, SimplePrice>, FetchError> {
        let mut request = self
            .http
            .get(format!("{}/simple/price", self.config.coingecko_base_url))
            .query(&[("ids", batch.join(",")), ("vs_currencies", "usd".into())])
            .header("accept", "application/json");
        if let Some(key) = &self.config.coingecko_api_key {
            request = request.header("api-key", key);
        }
        let data = request
            .send()
            .await?
            .error_for_status()?
            .json::<HashMap<String, SimplePrice>>()
            .await?;
        Ok(data)
    }

    /// Case-insensitive lookup; unknown assets are `None`, never an error.
    pub async fn price(&self, asset: &str) -> Option<PriceQuote> {
        let prices = self.prices.read().await;
        prices.get(&asset.to_lowercase()).map(|usd| PriceQuote {
            id: asset.to_string(),
            usd: *usd,
        })
    }

    pub async fn all_prices(&self) -> Vec<PriceQuote> {
        let prices = self.prices.read().await;
        let mut quotes: Vec<PriceQuote> = prices
            .iter()
            .map(|(id, usd)| PriceQuote {
                id: id.clone(),
                usd: *usd,
            })
            .collect();
        quotes.sort_by(|a, b| a.id.cmp(&b.id));
        quotes
    }

    /// Direct cache write, used to seed state in tests and mock mode.
    pub async fn set_price(&self, id: &str, usd: f64) {
        self.prices.write().await.insert(id.to_lowercase(), usd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> PriceService {
        let config = Arc::new(Config {
            refresh_secs: 300,
            request_limit: 100,
            serve_port: 5337,
            coingecko_api_key: None,
            coingecko_base_url: "http://localhost:0".into(),
            asset_list_url: "http://localhost:0/assets.json".into(),
            namada_rpc_url: "http://localhost:0".into(),
            nam_token_address: "tnam1nam".into(),
            db: None,
            db_mock_mode: true,
        });
        PriceService::new(reqwest::Client::new(), config)
    }

    #[tokio::test]
    async fn unknown_asset_returns_none() {
        let svc = service();
        assert_eq!(svc.price("dogwifhat").await, None);
    }

    #[tokio::test]
    async fn lookup_is_case_insensitive_and_echoes_requested_id() {
        let svc = service();
        svc.set_price("bitcoin", 50_000.0).await;
        let quote = svc.price("Bitcoin").await.unwrap();
        assert_eq!(quote.id, "Bitcoin");
        assert_eq!(quote.usd, 50_000.0);
    }

    #[tokio::test]
    async fn all_prices_lists_every_entry() {
        let svc = service();
        svc.set_price("btc", 50_000.0).await;
        svc.set_price("atom", 9.5).await;
        let all = svc.all_prices().await;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "atom");
        assert_eq!(all[1].id, "btc");
    }
}
