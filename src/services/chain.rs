use std::sync::Arc;

use serde::Serialize;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::cache::MetricCell;
use crate::config::{Config, ASSET_PACING_DELAY, CHAIN_REFRESH_INTERVAL};
use crate::decoder::{AbciDecoder, PosParams, RewardToken};
use crate::error::FetchError;
use crate::poller::spawn_poller;
use crate::registry::{self, AssetDescriptor};
use crate::retry::{with_retry, RetryPolicy};
use crate::rpc::{self, RpcClient, PGF_ADDRESS};
use crate::services::store::{ChainStatistics, MaspStore};

const SECONDS_PER_DAY: u64 = 86_400;
/// Average block time assumed when projecting heights into the past.
const SECONDS_PER_BLOCK: u64 = 7;

/// Minted supply of one token at the current and three historical heights.
/// `None` holes mark timeframes whose query or decode failed.
#[derive(Debug, Clone, Serialize)]
pub struct SupplySnapshot {
    pub address: String,
    pub supplies: SupplyTimeframes,
}

#[derive(Debug, Clone, Serialize)]
pub struct SupplyTimeframes {
    pub current: Option<String>,
    #[serde(rename = "1dAgo")]
    pub one_day_ago: Option<String>,
    #[serde(rename = "7dAgo")]
    pub seven_days_ago: Option<String>,
    #[serde(rename = "30dAgo")]
    pub thirty_days_ago: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InflationDatum {
    pub address: String,
    pub last_locked: Option<String>,
    pub last_inflation: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoricalHeights {
    pub current: u64,
    pub one_day_ago: u64,
    pub seven_days_ago: u64,
    pub thirty_days_ago: u64,
}

pub fn historical_heights(current: u64) -> HistoricalHeights {
    let blocks_per_day = SECONDS_PER_DAY / SECONDS_PER_BLOCK;
    HistoricalHeights {
        current,
        one_day_ago: current.saturating_sub(blocks_per_day),
        seven_days_ago: current.saturating_sub(blocks_per_day * 7),
        thirty_days_ago: current.saturating_sub(blocks_per_day * 30),
    }
}

/// Polls the node RPC for everything the dashboard shows about the chain:
/// token supplies, MASP reward parameters, epoch, inflation, the PGF
/// treasury, and DB-derived chain statistics. Each category lives in its own
/// cache slot and refreshes on its own poller.
pub struct ChainService {
    rpc: RpcClient,
    http: reqwest::Client,
    config: Arc<Config>,
    decoder: Arc<dyn AbciDecoder>,
    store: Arc<dyn MaspStore>,
    policy: RetryPolicy,
    token_supplies: MetricCell<Vec<SupplySnapshot>>,
    reward_tokens: MetricCell<Vec<RewardToken>>,
    total_rewards: MetricCell<u128>,
    masp_epoch: MetricCell<u64>,
    masp_inflation: MetricCell<Vec<InflationDatum>>,
    pgf_balance: MetricCell<u128>,
    chain_stats: MetricCell<ChainStatistics>,
}

impl ChainService {
    pub fn new(
        http: reqwest::Client,
        config: Arc<Config>,
        decoder: Arc<dyn AbciDecoder>,
        store: Arc<dyn MaspStore>,
    ) -> Self {
        let rpc = RpcClient::new(http.clone(), config.namada_rpc_url.clone());
        Self {
            rpc,
            http,
            config,
            decoder,
            store,
            policy: RetryPolicy::default(),
            token_supplies: MetricCell::new(),
            reward_tokens: MetricCell::new(),
            total_rewards: MetricCell::new(),
            masp_epoch: MetricCell::new(),
            masp_inflation: MetricCell::new(),
            pgf_balance: MetricCell::new(),
            chain_stats: MetricCell::new(),
        }
    }

    /// Spawns one poller per cache slot, each with an immediate first run.
    pub fn start(self: &Arc<Self>) {
        macro_rules! poll {
            ($label:literal, $method:ident) => {{
                let service = Arc::clone(self);
                spawn_poller($label, CHAIN_REFRESH_INTERVAL, move || {
                    let service = Arc::clone(&service);
                    async move { service.$method().await }
                });
            }};
        }
        poll!("token supplies", refresh_token_supplies);
        poll!("reward tokens", refresh_reward_tokens);
        poll!("total rewards", refresh_total_rewards);
        poll!("masp epoch", refresh_masp_epoch);
        poll!("masp inflation", refresh_masp_inflation);
        poll!("pgf balance", refresh_pgf_balance);
        poll!("chain statistics", refresh_chain_statistics);
    }

    pub async fn asset_list(&self) -> Vec<AssetDescriptor> {
        registry::fetch_asset_list(&self.http, &self.config.asset_list_url).await
    }

    async fn latest_block_height(&self) -> Option<u64> {
        with_retry(self.policy, "latest block", || self.rpc.latest_block_height()).await
    }

    /// One retried ABCI query + amount decode. `Ok(None)` (no data at the
    /// path) is a result, not a retryable failure.
    async fn query_amount(&self, path: &str, height: Option<u64>) -> Option<u128> {
        with_retry(self.policy, path, || async {
            match self.rpc.abci_query(path, height).await? {
                Some(value) => Ok(Some(self.decoder.decode_amount(&value)?)),
                None => Ok(None),
            }
        })
        .await
        .flatten()
    }

    /// Minted supply of one token at one height. The effective NAM supply
    /// excludes the PGF treasury balance.
    async fn fetch_token_supply(&self, token: &str, height: u64) -> Option<u128> {
        let supply = self
            .query_amount(&rpc::minted_supply_path(token), Some(height))
            .await?;
        if token == self.config.nam_token_address {
            let pgf = self
                .query_amount(&rpc::balance_path(token, PGF_ADDRESS), Some(height))
                .await?;
            return Some(supply.saturating_sub(pgf));
        }
        Some(supply)
    }

    pub async fn refresh_token_supplies(&self) {
        info!("Fetching all token supplies");
        let Some(current) = self.latest_block_height().await else {
            error!("Error fetching token supplies: failed to fetch latest block height");
            return;
        };
        let heights = historical_heights(current);

        let assets = self.asset_list().await;
        if assets.is_empty() {
            error!("Error fetching token supplies: failed to fetch asset list");
            return;
        }

        let mut snapshots = Vec::with_capacity(assets.len());
        for (i, asset) in assets.iter().enumerate() {
            if i > 0 {
                sleep(ASSET_PACING_DELAY).await;
            }
            let (current, one_day_ago, seven_days_ago, thirty_days_ago) = tokio::join!(
                self.fetch_token_supply(&asset.address, heights.current),
                self.fetch_token_supply(&asset.address, heights.one_day_ago),
                self.fetch_token_supply(&asset.address, heights.seven_days_ago),
                self.fetch_token_supply(&asset.address, heights.thirty_days_ago),
            );
            snapshots.push(SupplySnapshot {
                address: asset.address.clone(),
                supplies: SupplyTimeframes {
                    current: current.map(|v| v.to_string()),
                    one_day_ago: one_day_ago.map(|v| v.to_string()),
                    seven_days_ago: seven_days_ago.map(|v| v.to_string()),
                    thirty_days_ago: thirty_days_ago.map(|v| v.to_string()),
                },
            });
        }
        self.token_supplies.store(snapshots).await;
    }

    pub async fn refresh_reward_tokens(&self) {
        info!("Fetching reward tokens");
        let decoded = with_retry(self.policy, "masp reward tokens", || async {
            let value = self
                .rpc
                .abci_query(rpc::MASP_REWARD_TOKENS_PATH, None)
                .await?
                .ok_or_else(|| FetchError::BadResponse("no reward tokens data".into()))?;
            Ok(self.decoder.decode_reward_tokens(&value)?)
        })
        .await;
        if let Some(tokens) = decoded {
            self.reward_tokens.store(tokens).await;
        }
    }

    pub async fn refresh_total_rewards(&self) {
        info!("Fetching total rewards");
        if let Some(amount) = self.query_amount(&rpc::max_total_rewards_path(), None).await {
            self.total_rewards.store(amount).await;
        }
    }

    pub async fn refresh_masp_epoch(&self) {
        info!("Fetching MASP epoch");
        let decoded = with_retry(self.policy, "masp epoch", || async {
            let value = self
                .rpc
                .abci_query(rpc::MASP_EPOCH_PATH, None)
                .await?
                .ok_or_else(|| FetchError::BadResponse("no MASP epoch data".into()))?;
            Ok(self.decoder.decode_epoch(&value)?)
        })
        .await;
        if let Some(epoch) = decoded {
            self.masp_epoch.store(epoch).await;
        }
    }

    pub async fn refresh_masp_inflation(&self) {
        info!("Fetching MASP inflation data");
        let assets = self.asset_list().await;
        if assets.is_empty() {
            error!("Error fetching MASP inflation: failed to fetch asset list");
            return;
        }

        let mut data = Vec::with_capacity(assets.len());
        for (i, asset) in assets.iter().enumerate() {
            if i > 0 {
                sleep(ASSET_PACING_DELAY).await;
            }
            let inflation_path = rpc::last_inflation_path(&asset.address);
            let locked_path = rpc::last_locked_path(&asset.address);
            let (last_inflation, last_locked) = tokio::join!(
                self.query_amount(&inflation_path, None),
                self.query_amount(&locked_path, None),
            );
            if last_inflation.is_none() || last_locked.is_none() {
                warn!("No inflation data for token {}", asset.address);
            }
            data.push(InflationDatum {
                address: asset.address.clone(),
                last_locked: last_locked.map(|v| v.to_string()),
                last_inflation: last_inflation.map(|v| v.to_string()),
            });
        }
        self.masp_inflation.store(data).await;
    }

    pub async fn refresh_pgf_balance(&self) {
        info!("Fetching PGF treasury balance");
        let path = rpc::balance_path(&self.config.nam_token_address, PGF_ADDRESS);
        if let Some(balance) = self.query_amount(&path, None).await {
            self.pgf_balance.store(balance).await;
        }
    }

    pub async fn refresh_chain_statistics(&self) {
        match self.store.chain_statistics().await {
            Ok(stats) => self.chain_stats.store(stats).await,
            Err(err) => error!("Error refreshing chain statistics: {err:#}"),
        }
    }

    /// POS parameters are fetched per request rather than cached; they change
    /// rarely and the query is cheap.
    pub async fn pos_params(&self) -> Option<PosParams> {
        with_retry(self.policy, "pos params", || async {
            let value = self
                .rpc
                .abci_query(rpc::POS_PARAMS_PATH, None)
                .await?
                .ok_or_else(|| FetchError::BadResponse("no POS params data".into()))?;
            Ok(self.decoder.decode_pos_params(&value)?)
        })
        .await
    }

    pub async fn token_supplies(&self) -> Option<Vec<SupplySnapshot>> {
        self.token_supplies.load().await
    }

    pub async fn reward_tokens(&self) -> Option<Vec<RewardToken>> {
        self.reward_tokens.load().await
    }

    pub async fn total_rewards(&self) -> Option<u128> {
        self.total_rewards.load().await
    }

    pub async fn masp_epoch(&self) -> Option<u64> {
        self.masp_epoch.load().await
    }

    pub async fn masp_inflation(&self) -> Option<Vec<InflationDatum>> {
        self.masp_inflation.load().await
    }

    pub async fn pgf_balance(&self) -> Option<u128> {
        self.pgf_balance.load().await
    }

    pub async fn chain_statistics(&self) -> Option<ChainStatistics> {
        self.chain_stats.load().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn historical_heights_project_backwards_at_seven_second_blocks() {
        let heights = historical_heights(1_000_000);
        assert_eq!(heights.current, 1_000_000);
        assert_eq!(heights.one_day_ago, 1_000_000 - 86_400 / 7);
        assert_eq!(heights.seven_days_ago, 1_000_000 - 86_400 / 7 * 7);
        assert_eq!(heights.thirty_days_ago, 1_000_000 - 86_400 / 7 * 30);
    }

    #[test]
    fn historical_heights_saturate_for_young_chains() {
        let heights = historical_heights(100);
        assert_eq!(heights.current, 100);
        assert_eq!(heights.thirty_days_ago, 0);
    }
}
