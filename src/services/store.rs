//! Seam over the namada-indexer Postgres database: one trait with a real
//! sqlx-backed store and a deterministic mock used in mock mode and tests.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::info;

use crate::config::DbConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBalance {
    #[serde(rename = "tokenAddress")]
    pub token_address: String,
    #[serde(rename = "minDenomAmount")]
    pub min_denom_amount: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolTransaction {
    pub id: i64,
    pub token_address: String,
    // Naive because that is how Postgres renders timestamps inside json_agg.
    pub timestamp: NaiveDateTime,
    pub raw_amount: String,
    pub inner_tx_id: Option<String>,
}

/// Inflows and outflows inside one time bucket of the MASP pool history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolFlows {
    #[serde(rename = "in")]
    pub inflow: Vec<PoolTransaction>,
    #[serde(rename = "out")]
    pub outflow: Vec<PoolTransaction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IbcTransaction {
    pub token_address: String,
    pub source: String,
    pub target: String,
    pub raw_amount: String,
    pub id: String,
    pub wrapper_id: String,
    pub timestamp: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IbcBucket {
    pub bucket: usize,
    pub shielded_in: Vec<IbcTransaction>,
    pub shielded_out: Vec<IbcTransaction>,
    pub transparent_in: Vec<IbcTransaction>,
    pub transparent_out: Vec<IbcTransaction>,
}

impl IbcBucket {
    fn empty(bucket: usize) -> Self {
        Self {
            bucket,
            shielded_in: Vec::new(),
            shielded_out: Vec::new(),
            transparent_in: Vec::new(),
            transparent_out: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaspTxCounts {
    pub shielding_transfer: i64,
    pub unshielding_transfer: i64,
    pub shielded_transfer: i64,
    pub ibc_shielding_transfer: i64,
    pub ibc_unshielding_transfer: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IbcTokenCounts {
    pub token_address: String,
    pub shielded_in: i64,
    pub shielded_out: i64,
    pub transparent_in: i64,
    pub transparent_out: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IbcAggregate {
    #[serde(rename = "tokenAddress")]
    pub token_address: String,
    #[serde(rename = "timeWindow")]
    pub time_window: String,
    pub kind: String,
    #[serde(rename = "totalAmount")]
    pub total_amount: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainStatistics {
    pub transaction_count: i64,
    pub unique_address_count: i64,
}

/// Number of resolution-sized buckets needed to cover `[start, end)`.
pub fn bucket_count(start: DateTime<Utc>, end: DateTime<Utc>, resolution_hours: f64) -> usize {
    let window_hours = (end - start).num_milliseconds() as f64 / 3_600_000.0;
    (window_hours / resolution_hours).ceil().max(0.0) as usize
}

#[async_trait]
pub trait MaspStore: Send + Sync {
    /// MASP pool flows bucketed by `resolution_hours`, keyed `"{offset}hr"`.
    async fn masp_pool_transactions(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        resolution_hours: f64,
    ) -> Result<Value>;

    /// Latest balance per token held by `owner` at or before `height`
    /// (height 0 means the latest indexed state).
    async fn balances_at_height(&self, owner: &str, height: u64) -> Result<Vec<TokenBalance>>;

    async fn balances_at_time(
        &self,
        owner: &str,
        time: DateTime<Utc>,
    ) -> Result<Vec<TokenBalance>>;

    async fn masp_tx_counts(&self) -> Result<MaspTxCounts>;

    async fn ibc_transactions(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        resolution_hours: f64,
    ) -> Result<Vec<IbcBucket>>;

    async fn ibc_counts_for_token(&self, token: &str) -> Result<IbcTokenCounts>;

    async fn ibc_aggregates_for_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<IbcAggregate>>;

    async fn chain_statistics(&self) -> Result<ChainStatistics>;
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connects and probes the database; a failed probe is fatal at startup.
    pub async fn connect(db: &DbConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&db.connection_url())
            .await
            .context("failed to connect to analytics database")?;
        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .context("database connection probe failed")?;
        info!("Database connection established successfully");
        Ok(Self { pool })
    }
}

#[async_trait]
impl MaspStore for PgStore {
    async fn masp_pool_transactions(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        resolution_hours: f64,
    ) -> Result<Value> {
        let query = r#"
            WITH transactions AS (
                SELECT
                    mp.*,
                    FLOOR(EXTRACT(EPOCH FROM (mp.timestamp - $1::timestamp))/3600/$3::numeric)::int8 as bucket_index
                FROM public.masp_pool mp
                WHERE mp.timestamp BETWEEN $1 AND $2
            )
            SELECT
                bucket_index,
                direction,
                json_agg(
                    json_build_object(
                        'id', id,
                        'token_address', token_address,
                        'timestamp', timestamp,
                        'raw_amount', raw_amount::text,
                        'inner_tx_id', inner_tx_id
                    )
                ) as transactions
            FROM transactions
            GROUP BY bucket_index, direction
            ORDER BY bucket_index, direction;
        "#;

        let rows = sqlx::query(query)
            .bind(start.naive_utc())
            .bind(end.naive_utc())
            .bind(resolution_hours)
            .fetch_all(&self.pool)
            .await?;

        let num_buckets = bucket_count(start, end, resolution_hours);
        let mut buckets: Vec<PoolFlows> = (0..num_buckets).map(|_| PoolFlows::default()).collect();

        for row in rows {
            let index: i64 = row.get("bucket_index");
            let direction: String = row.get("direction");
            let transactions: Value = row.get("transactions");
            let transactions: Vec<PoolTransaction> = serde_json::from_value(transactions)?;
            if let Some(flows) = buckets.get_mut(index as usize) {
                if direction == "in" {
                    flows.inflow = transactions;
                } else {
                    flows.outflow = transactions;
                }
            }
        }

        Ok(keyed_pool_buckets(&buckets, resolution_hours))
    }

    async fn balances_at_height(&self, owner: &str, height: u64) -> Result<Vec<TokenBalance>> {
        let query = r#"
            SELECT DISTINCT ON (token)
                token as token_address,
                raw_amount::text as min_denom_amount
            FROM public.balance_changes
            WHERE owner = $1 AND ($2 = 0 OR height <= $2)
            ORDER BY token, height DESC;
        "#;
        let rows = sqlx::query(query)
            .bind(owner)
            .bind(height as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| TokenBalance {
                token_address: row.get("token_address"),
                min_denom_amount: row.get("min_denom_amount"),
            })
            .collect())
    }

    async fn balances_at_time(
        &self,
        owner: &str,
        time: DateTime<Utc>,
    ) -> Result<Vec<TokenBalance>> {
        let query = r#"
            SELECT DISTINCT ON (bc.token)
                bc.token as token_address,
                bc.raw_amount::text as min_denom_amount
            FROM public.balance_changes bc
            JOIN public.blocks b ON b.height = bc.height
            WHERE bc.owner = $1 AND b.timestamp <= $2::timestamp
            ORDER BY bc.token, bc.height DESC;
        "#;
        let rows = sqlx::query(query)
            .bind(owner)
            .bind(time.naive_utc())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| TokenBalance {
                token_address: row.get("token_address"),
                min_denom_amount: row.get("min_denom_amount"),
            })
            .collect())
    }

    async fn masp_tx_counts(&self) -> Result<MaspTxCounts> {
        let query = r#"
            SELECT
                COUNT(*) FILTER (WHERE kind = 'shielding_transfer') as shielding_transfer,
                COUNT(*) FILTER (WHERE kind = 'unshielding_transfer') as unshielding_transfer,
                COUNT(*) FILTER (WHERE kind = 'shielded_transfer') as shielded_transfer,
                COUNT(*) FILTER (WHERE kind = 'ibc_shielding_transfer') as ibc_shielding_transfer,
                COUNT(*) FILTER (WHERE kind = 'ibc_unshielding_transfer') as ibc_unshielding_transfer
            FROM public.inner_transactions
            WHERE kind IN (
                'shielding_transfer',
                'unshielding_transfer',
                'shielded_transfer',
                'ibc_shielding_transfer',
                'ibc_unshielding_transfer'
            )
            AND exit_code = 'applied';
        "#;
        let row = sqlx::query(query).fetch_one(&self.pool).await?;
        Ok(MaspTxCounts {
            shielding_transfer: row.get("shielding_transfer"),
            unshielding_transfer: row.get("unshielding_transfer"),
            shielded_transfer: row.get("shielded_transfer"),
            ibc_shielding_transfer: row.get("ibc_shielding_transfer"),
            ibc_unshielding_transfer: row.get("ibc_unshielding_transfer"),
        })
    }

    async fn ibc_transactions(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        resolution_hours: f64,
    ) -> Result<Vec<IbcBucket>> {
        let query = r#"
            WITH transactions AS (
                SELECT
                    ita.*,
                    FLOOR(EXTRACT(EPOCH FROM (ita.timestamp - $1::timestamp))/3600/$3::numeric)::int8 as bucket_index,
                    CASE
                        WHEN kind = 'ibc_shielding_transfer' THEN 'shielded_in'
                        WHEN kind = 'ibc_unshielding_transfer' THEN 'shielded_out'
                        WHEN kind = 'ibc_transparent_transfer' AND direction = 'in' THEN 'transparent_in'
                        WHEN kind = 'ibc_transparent_transfer' AND direction = 'out' THEN 'transparent_out'
                    END as tx_type
                FROM public.ibc_transactions_applied ita
                WHERE ita.timestamp BETWEEN $1 AND $2
            )
            SELECT
                bucket_index,
                tx_type,
                json_agg(
                    json_build_object(
                        'token_address', token_address,
                        'source', source,
                        'target', target,
                        'raw_amount', raw_amount::text,
                        'id', id,
                        'wrapper_id', wrapper_id,
                        'timestamp', timestamp
                    )
                ) as transactions
            FROM transactions
            WHERE tx_type IS NOT NULL
            GROUP BY bucket_index, tx_type
            ORDER BY bucket_index, tx_type;
        "#;

        let rows = sqlx::query(query)
            .bind(start.naive_utc())
            .bind(end.naive_utc())
            .bind(resolution_hours)
            .fetch_all(&self.pool)
            .await?;

        let num_buckets = bucket_count(start, end, resolution_hours);
        let mut buckets: Vec<IbcBucket> = (0..num_buckets).map(IbcBucket::empty).collect();

        for row in rows {
            let index: i64 = row.get("bucket_index");
            let tx_type: String = row.get("tx_type");
            let transactions: Value = row.get("transactions");
            let transactions: Vec<IbcTransaction> = serde_json::from_value(transactions)?;
            if let Some(bucket) = buckets.get_mut(index as usize) {
                match tx_type.as_str() {
                    "shielded_in" => bucket.shielded_in = transactions,
                    "shielded_out" => bucket.shielded_out = transactions,
                    "transparent_in" => bucket.transparent_in = transactions,
                    "transparent_out" => bucket.transparent_out = transactions,
                    _ => {}
                }
            }
        }

        Ok(buckets)
    }

    async fn ibc_counts_for_token(&self, token: &str) -> Result<IbcTokenCounts> {
        let query = r#"
            SELECT
                COUNT(*) FILTER (WHERE kind = 'ibc_shielding_transfer') as shielded_in,
                COUNT(*) FILTER (WHERE kind = 'ibc_unshielding_transfer') as shielded_out,
                COUNT(*) FILTER (WHERE kind = 'ibc_transparent_transfer' AND direction = 'in') as transparent_in,
                COUNT(*) FILTER (WHERE kind = 'ibc_transparent_transfer' AND direction = 'out') as transparent_out
            FROM public.ibc_transactions_applied
            WHERE token_address = $1;
        "#;
        let row = sqlx::query(query).bind(token).fetch_one(&self.pool).await?;
        Ok(IbcTokenCounts {
            token_address: token.to_string(),
            shielded_in: row.get("shielded_in"),
            shielded_out: row.get("shielded_out"),
            transparent_in: row.get("transparent_in"),
            transparent_out: row.get("transparent_out"),
        })
    }

    async fn ibc_aggregates_for_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<IbcAggregate>> {
        let query = r#"
            WITH transaction_kinds AS (
                SELECT
                    token_address,
                    raw_amount,
                    timestamp,
                    CASE
                        WHEN kind = 'ibc_shielding_transfer' THEN 'shieldedIn'
                        WHEN kind = 'ibc_unshielding_transfer' THEN 'shieldedOut'
                        WHEN kind = 'ibc_transparent_transfer' AND direction = 'in' THEN 'transparentIn'
                        WHEN kind = 'ibc_transparent_transfer' AND direction = 'out' THEN 'transparentOut'
                    END as kind
                FROM public.ibc_transactions_applied
                WHERE token_address = $1
            ),
            time_windows AS (
                SELECT
                    token_address,
                    kind,
                    SUM(raw_amount) FILTER (WHERE timestamp >= $2::timestamp) as one_day,
                    SUM(raw_amount) FILTER (WHERE timestamp >= $3::timestamp) as seven_days,
                    SUM(raw_amount) FILTER (WHERE timestamp >= $4::timestamp) as thirty_days,
                    SUM(raw_amount) as all_time
                FROM transaction_kinds
                WHERE kind IS NOT NULL
                GROUP BY token_address, kind
            )
            SELECT token_address, 'oneDay' as time_window, kind,
                   COALESCE(one_day::text, '0') as total_amount
            FROM time_windows
            UNION ALL
            SELECT token_address, 'sevenDays' as time_window, kind,
                   COALESCE(seven_days::text, '0') as total_amount
            FROM time_windows
            UNION ALL
            SELECT token_address, 'thirtyDays' as time_window, kind,
                   COALESCE(thirty_days::text, '0') as total_amount
            FROM time_windows
            UNION ALL
            SELECT token_address, 'allTime' as time_window, kind,
                   COALESCE(all_time::text, '0') as total_amount
            FROM time_windows
            ORDER BY token_address, time_window, kind;
        "#;

        let one_day_ago = now - Duration::days(1);
        let seven_days_ago = now - Duration::days(7);
        let thirty_days_ago = now - Duration::days(30);

        let rows = sqlx::query(query)
            .bind(token)
            .bind(one_day_ago.naive_utc())
            .bind(seven_days_ago.naive_utc())
            .bind(thirty_days_ago.naive_utc())
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| IbcAggregate {
                token_address: row.get("token_address"),
                time_window: row.get("time_window"),
                kind: row.get("kind"),
                total_amount: row.get("total_amount"),
            })
            .collect())
    }

    async fn chain_statistics(&self) -> Result<ChainStatistics> {
        let counts = sqlx::query(
            "SELECT COUNT(*) as transaction_count FROM public.inner_transactions WHERE exit_code = 'applied';",
        )
        .fetch_one(&self.pool)
        .await?;
        let addresses = sqlx::query(
            "SELECT COUNT(DISTINCT owner) as unique_address_count FROM public.balance_changes;",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(ChainStatistics {
            transaction_count: counts.get("transaction_count"),
            unique_address_count: addresses.get("unique_address_count"),
        })
    }
}

/// Renders pool buckets as the `{"0hr": {...}, "4hr": {...}}` object shape
/// clients already consume. Integral resolutions drop the fractional part of
/// the key.
fn keyed_pool_buckets(buckets: &[PoolFlows], resolution_hours: f64) -> Value {
    let mut out = serde_json::Map::new();
    for (i, flows) in buckets.iter().enumerate() {
        let offset = i as f64 * resolution_hours;
        let key = if offset.fract() == 0.0 {
            format!("{}hr", offset as i64)
        } else {
            format!("{offset}hr")
        };
        out.insert(key, json!(flows));
    }
    Value::Object(out)
}

/// Fixture-backed store for DB_MOCK_MODE and tests. Values are deterministic
/// so route output can be asserted exactly.
pub struct MockStore;

impl MockStore {
    pub fn new() -> Self {
        Self
    }

    fn fixture_balances() -> Vec<TokenBalance> {
        vec![
            TokenBalance {
                token_address: "tnam1q9gr66cvu4hrzm0sd5kmlnjje82gs3xlfg3v6nu7".into(),
                min_denom_amount: "1500000000".into(),
            },
            TokenBalance {
                token_address: "tnam1p5z8ruwyu7ha8urhq2l0dhpk2f5dv3ts7uyf2n75".into(),
                min_denom_amount: "250000".into(),
            },
        ]
    }
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MaspStore for MockStore {
    async fn masp_pool_transactions(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        resolution_hours: f64,
    ) -> Result<Value> {
        let num_buckets = bucket_count(start, end, resolution_hours);
        let buckets: Vec<PoolFlows> = (0..num_buckets).map(|_| PoolFlows::default()).collect();
        Ok(keyed_pool_buckets(&buckets, resolution_hours))
    }

    async fn balances_at_height(&self, _owner: &str, _height: u64) -> Result<Vec<TokenBalance>> {
        Ok(Self::fixture_balances())
    }

    async fn balances_at_time(
        &self,
        _owner: &str,
        _time: DateTime<Utc>,
    ) -> Result<Vec<TokenBalance>> {
        Ok(Self::fixture_balances())
    }

    async fn masp_tx_counts(&self) -> Result<MaspTxCounts> {
        Ok(MaspTxCounts {
            shielding_transfer: 120,
            unshielding_transfer: 45,
            shielded_transfer: 300,
            ibc_shielding_transfer: 18,
            ibc_unshielding_transfer: 7,
        })
    }

    async fn ibc_transactions(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        resolution_hours: f64,
    ) -> Result<Vec<IbcBucket>> {
        let num_buckets = bucket_count(start, end, resolution_hours);
        Ok((0..num_buckets).map(IbcBucket::empty).collect())
    }

    async fn ibc_counts_for_token(&self, token: &str) -> Result<IbcTokenCounts> {
        Ok(IbcTokenCounts {
            token_address: token.to_string(),
            shielded_in: 4,
            shielded_out: 2,
            transparent_in: 9,
            transparent_out: 5,
        })
    }

    async fn ibc_aggregates_for_token(
        &self,
        token: &str,
        _now: DateTime<Utc>,
    ) -> Result<Vec<IbcAggregate>> {
        let mut rows = Vec::new();
        for window in ["allTime", "oneDay", "sevenDays", "thirtyDays"] {
            for kind in ["shieldedIn", "shieldedOut", "transparentIn", "transparentOut"] {
                rows.push(IbcAggregate {
                    token_address: token.to_string(),
                    time_window: window.to_string(),
                    kind: kind.to_string(),
                    total_amount: "0".to_string(),
                });
            }
        }
        Ok(rows)
    }

    async fn chain_statistics(&self) -> Result<ChainStatistics> {
        Ok(ChainStatistics {
            transaction_count: 48_213,
            unique_address_count: 1_734,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn bucket_count_rounds_up() {
        let start = t("2024-03-24T00:00:00Z");
        assert_eq!(bucket_count(start, t("2024-03-24T00:00:00Z"), 4.0), 0);
        assert_eq!(bucket_count(start, t("2024-03-24T04:00:00Z"), 4.0), 1);
        assert_eq!(bucket_count(start, t("2024-03-24T05:00:00Z"), 4.0), 2);
        assert_eq!(bucket_count(start, t("2024-03-25T00:00:00Z"), 4.0), 6);
    }

    #[test]
    fn pool_bucket_keys_follow_offsets() {
        let buckets = vec![PoolFlows::default(), PoolFlows::default()];
        let keyed = keyed_pool_buckets(&buckets, 4.0);
        let keys: Vec<&String> = keyed.as_object().unwrap().keys().collect();
        assert_eq!(keys, ["0hr", "4hr"]);

        let keyed = keyed_pool_buckets(&buckets, 1.5);
        let keys: Vec<&String> = keyed.as_object().unwrap().keys().collect();
        assert_eq!(keys, ["0hr", "1.5hr"]);
    }

    #[tokio::test]
    async fn mock_store_buckets_match_window() {
        let store = MockStore::new();
        let buckets = store
            .ibc_transactions(t("2024-03-24T00:00:00Z"), t("2024-03-25T00:00:00Z"), 6.0)
            .await
            .unwrap();
        assert_eq!(buckets.len(), 4);
        assert_eq!(buckets[3].bucket, 3);
        assert!(buckets[0].shielded_in.is_empty());
    }
}
