use serde::{Deserialize, Serialize};
use tracing::error;

/// One asset from the chain registry. Read-only reference data, refreshed
/// alongside the other polls rather than cached separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetDescriptor {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub coingecko_id: Option<String>,
    #[serde(default)]
    pub denom_units: Vec<DenomUnit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenomUnit {
    pub denom: String,
    #[serde(default)]
    pub exponent: u32,
}

impl AssetDescriptor {
    /// Exponent of the display denomination (the largest listed unit).
    pub fn display_exponent(&self) -> Option<u32> {
        self.denom_units.iter().map(|u| u.exponent).max()
    }

    /// CoinGecko id, filtered the way the price poller needs it: present and
    /// non-blank.
    pub fn price_feed_id(&self) -> Option<&str> {
        self.coingecko_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct AssetList {
    #[serde(default)]
    assets: Vec<AssetDescriptor>,
}

/// Fetches the registry asset list. Failures log and return an empty list so
/// a registry outage degrades the dependent polls instead of aborting them.
pub async fn fetch_asset_list(client: &reqwest::Client, url: &str) -> Vec<AssetDescriptor> {
    match try_fetch(client, url).await {
        Ok(assets) => assets,
        Err(err) => {
            error!("Error fetching asset list: {err}");
            Vec::new()
        }
    }
}

async fn try_fetch(client: &reqwest::Client, url: &str) -> reqwest::Result<Vec<AssetDescriptor>> {
    let list: AssetList = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(list.assets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_feed_id_filters_blank_entries() {
        let mut asset: AssetDescriptor = serde_json::from_value(serde_json::json!({
            "address": "tnam1abc",
            "symbol": "OSMO",
            "coingecko_id": "osmosis"
        }))
        .unwrap();
        assert_eq!(asset.price_feed_id(), Some("osmosis"));

        asset.coingecko_id = Some("   ".into());
        assert_eq!(asset.price_feed_id(), None);

        asset.coingecko_id = None;
        assert_eq!(asset.price_feed_id(), None);
    }

    #[test]
    fn display_exponent_takes_largest_unit() {
        let asset: AssetDescriptor = serde_json::from_value(serde_json::json!({
            "address": "tnam1abc",
            "symbol": "NAM",
            "denom_units": [
                { "denom": "namnam", "exponent": 0 },
                { "denom": "nam", "exponent": 6 }
            ]
        }))
        .unwrap();
        assert_eq!(asset.display_exponent(), Some(6));
    }
}
