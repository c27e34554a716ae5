use serde_json::Value;

use crate::error::FetchError;

/// Public goods funding treasury account.
pub const PGF_ADDRESS: &str = "tnam1pgqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqkhgajr";
/// The shielded pool account.
pub const MASP_ADDRESS: &str = "tnam1pcqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqzmefah";
/// Internal multitoken account under which per-token storage lives.
pub const MULTITOKEN_ADDRESS: &str = "tnam1pyqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqej6juv";

/// Thin CometBFT RPC client for the two endpoints the service uses.
#[derive(Clone)]
pub struct RpcClient {
    http: reqwest::Client,
    base_url: String,
}

impl RpcClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    pub async fn latest_block_height(&self) -> Result<u64, FetchError> {
        let body: Value = self
            .http
            .get(format!("{}/status", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        body["result"]["sync_info"]["latest_block_height"]
            .as_str()
            .and_then(|h| h.parse().ok())
            .ok_or_else(|| FetchError::BadResponse("missing latest_block_height".into()))
    }

    /// Runs an ABCI query and returns the base64 value, or `None` when the
    /// node has no data at that path/height. The storage path is quoted in
    /// the query string, as the node expects.
    pub async fn abci_query(
        &self,
        path: &str,
        height: Option<u64>,
    ) -> Result<Option<String>, FetchError> {
        let mut request = self
            .http
            .get(format!("{}/abci_query", self.base_url))
            .query(&[("path", format!("\"{path}\""))]);
        if let Some(height) = height {
            request = request.query(&[("height", height.to_string())]);
        }
        let body: Value = request.send().await?.error_for_status()?.json().await?;
        Ok(body["result"]["response"]["value"]
            .as_str()
            .filter(|v| !v.is_empty())
            .map(str::to_owned))
    }
}

pub const MASP_REWARD_TOKENS_PATH: &str = "/shell/masp_reward_tokens";
pub const MASP_EPOCH_PATH: &str = "/shell/masp_epoch";
pub const POS_PARAMS_PATH: &str = "/vp/pos/pos_params";

pub fn minted_supply_path(token: &str) -> String {
    format!("/shell/value/#{MULTITOKEN_ADDRESS}/#{token}/balance/minted")
}

pub fn balance_path(token: &str, owner: &str) -> String {
    format!("/shell/value/#{MULTITOKEN_ADDRESS}/#{token}/balance/#{owner}")
}

pub fn last_inflation_path(token: &str) -> String {
    format!("/shell/value/#{MULTITOKEN_ADDRESS}/#{token}/parameters/last_inflation")
}

pub fn last_locked_path(token: &str) -> String {
    format!("/shell/value/#{MULTITOKEN_ADDRESS}/#{token}/parameters/last_locked_amount")
}

pub fn max_total_rewards_path() -> String {
    format!("/shell/value/#{MASP_ADDRESS}/max_total_rewards")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_paths_embed_well_known_accounts() {
        let path = minted_supply_path("tnam1token");
        assert_eq!(
            path,
            format!("/shell/value/#{MULTITOKEN_ADDRESS}/#tnam1token/balance/minted")
        );
        assert!(balance_path("tnam1token", PGF_ADDRESS).ends_with(&format!("balance/#{PGF_ADDRESS}")));
        assert!(max_total_rewards_path().contains(MASP_ADDRESS));
    }
}
