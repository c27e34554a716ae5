use axum::extract::{Query, State};
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use futures::future::try_join_all;
use serde::Deserialize;
use serde_json::{json, Value};

use super::AppState;
use crate::error::ApiError;
use crate::rpc::MASP_ADDRESS;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/reward_tokens", get(reward_tokens))
        .route("/total_rewards", get(total_rewards))
        .route("/epoch", get(masp_epoch))
        .route("/inflation", get(masp_inflation))
        .route("/txs", get(pool_transactions))
        .route("/balances/all", get(balances_all))
        .route("/balances/series", get(balances_series))
        .route("/count", get(tx_counts))
}

/// startTime/endTime/resolution triple shared by the windowed endpoints.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowQuery {
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub resolution: Option<String>,
}

impl WindowQuery {
    pub fn validate(&self) -> Result<(DateTime<Utc>, DateTime<Utc>, f64), ApiError> {
        let (Some(start), Some(end), Some(resolution)) =
            (&self.start_time, &self.end_time, &self.resolution)
        else {
            return Err(ApiError::BadRequest(
                "Missing required parameters: startTime, endTime, resolution".into(),
            ));
        };
        let start = parse_iso_time(start)?;
        let end = parse_iso_time(end)?;
        let resolution: f64 = resolution.parse().map_err(|_| {
            ApiError::BadRequest("Invalid resolution. Must be a positive number".into())
        })?;
        if !resolution.is_finite() || resolution <= 0.0 {
            return Err(ApiError::BadRequest(
                "Invalid resolution. Must be a positive number".into(),
            ));
        }
        Ok((start, end, resolution))
    }
}

pub fn parse_iso_time(raw: &str) -> Result<DateTime<Utc>, ApiError> {
    raw.parse().map_err(|_| {
        ApiError::BadRequest(
            "Invalid date format. Use ISO 8601 format (e.g., 2024-03-24T00:00:00Z)".into(),
        )
    })
}

/// Tick timestamps for a balance series: the start is always the first tick,
/// intermediate ticks step by the resolution, and the end boundary is
/// appended when the last step lands short of it. `start == end` therefore
/// yields exactly one tick.
pub fn series_timestamps(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    resolution_hours: f64,
) -> Vec<DateTime<Utc>> {
    let window_hours = (end - start).num_milliseconds() as f64 / 3_600_000.0;
    let num_ticks = (window_hours / resolution_hours).ceil() as i64;

    let mut ticks = vec![start];
    for i in 1..num_ticks {
        let offset_ms = (i as f64 * resolution_hours * 3_600_000.0) as i64;
        ticks.push(start + Duration::milliseconds(offset_ms));
    }
    if *ticks.last().expect("at least the start tick") != end {
        ticks.push(end);
    }
    ticks
}

async fn reward_tokens(State(state): State<AppState>) -> Json<Value> {
    let reward_tokens = state.chain.reward_tokens().await;
    Json(json!({ "rewardTokens": reward_tokens }))
}

async fn total_rewards(State(state): State<AppState>) -> Json<Value> {
    let total_rewards = state.chain.total_rewards().await.map(|v| v.to_string());
    Json(json!({ "totalRewards": total_rewards }))
}

async fn masp_epoch(State(state): State<AppState>) -> Json<Value> {
    let masp_epoch = state.chain.masp_epoch().await;
    Json(json!({ "maspEpoch": masp_epoch }))
}

async fn masp_inflation(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let data = state
        .chain
        .masp_inflation()
        .await
        .filter(|d| !d.is_empty())
        .ok_or_else(|| {
            ApiError::Unavailable("MASP inflation data temporarily unavailable".into())
        })?;
    Ok(Json(json!({
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        "data": data,
    })))
}

async fn pool_transactions(
    State(state): State<AppState>,
    Query(window): Query<WindowQuery>,
) -> Result<Json<Value>, ApiError> {
    let (start, end, resolution) = window.validate()?;
    let buckets = state
        .store
        .masp_pool_transactions(start, end, resolution)
        .await?;
    Ok(Json(buckets))
}

#[derive(Debug, Deserialize)]
pub struct BalancesAllQuery {
    pub height: Option<String>,
    pub time: Option<String>,
}

async fn balances_all(
    State(state): State<AppState>,
    Query(query): Query<BalancesAllQuery>,
) -> Result<Json<Value>, ApiError> {
    if let Some(raw) = &query.height {
        let height: u64 = raw.parse().map_err(|_| {
            ApiError::BadRequest("Invalid height. Must be a non-negative number".into())
        })?;
        let balances = state.store.balances_at_height(MASP_ADDRESS, height).await?;
        return Ok(Json(json!(balances)));
    }
    if let Some(raw) = &query.time {
        let time = parse_iso_time(raw)?;
        let balances = state.store.balances_at_time(MASP_ADDRESS, time).await?;
        return Ok(Json(json!(balances)));
    }
    // Neither given: latest indexed state.
    let balances = state.store.balances_at_height(MASP_ADDRESS, 0).await?;
    Ok(Json(json!(balances)))
}

async fn balances_series(
    State(state): State<AppState>,
    Query(window): Query<WindowQuery>,
) -> Result<Json<Value>, ApiError> {
    let (start, end, resolution) = window.validate()?;
    let ticks = series_timestamps(start, end, resolution);

    let series = try_join_all(ticks.into_iter().map(|timestamp| {
        let store = state.store.clone();
        async move {
            let balances = store.balances_at_time(MASP_ADDRESS, timestamp).await?;
            Ok::<_, anyhow::Error>(json!({
                "timestamp": timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
                "balances": balances,
            }))
        }
    }))
    .await?;

    Ok(Json(json!({
        "owner": MASP_ADDRESS,
        "series": series,
    })))
}

async fn tx_counts(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let counts = state.store.masp_tx_counts().await?;
    Ok(Json(json!(counts)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn series_with_equal_bounds_has_exactly_one_tick() {
        let at = t("2024-03-24T00:00:00Z");
        let ticks = series_timestamps(at, at, 4.0);
        assert_eq!(ticks, vec![at]);
    }

    #[test]
    fn series_ticks_step_by_resolution_and_include_end() {
        let start = t("2024-03-24T00:00:00Z");
        let end = t("2024-03-24T10:00:00Z");
        let ticks = series_timestamps(start, end, 4.0);
        assert_eq!(
            ticks,
            vec![
                start,
                t("2024-03-24T04:00:00Z"),
                t("2024-03-24T08:00:00Z"),
                end,
            ]
        );
    }

    #[test]
    fn series_end_not_duplicated_when_resolution_divides_window() {
        let start = t("2024-03-24T00:00:00Z");
        let end = t("2024-03-24T08:00:00Z");
        let ticks = series_timestamps(start, end, 4.0);
        assert_eq!(ticks, vec![start, t("2024-03-24T04:00:00Z"), end]);
    }

    #[test]
    fn window_query_rejects_missing_and_bad_params() {
        let missing = WindowQuery {
            start_time: Some("2024-03-24T00:00:00Z".into()),
            end_time: None,
            resolution: Some("4".into()),
        };
        assert!(missing.validate().is_err());

        let bad_date = WindowQuery {
            start_time: Some("yesterday".into()),
            end_time: Some("2024-03-24T00:00:00Z".into()),
            resolution: Some("4".into()),
        };
        assert!(bad_date.validate().is_err());

        let bad_resolution = WindowQuery {
            start_time: Some("2024-03-24T00:00:00Z".into()),
            end_time: Some("2024-03-25T00:00:00Z".into()),
            resolution: Some("-2".into()),
        };
        assert!(bad_resolution.validate().is_err());

        let ok = WindowQuery {
            start_time: Some("2024-03-24T00:00:00Z".into()),
            end_time: Some("2024-03-25T00:00:00Z".into()),
            resolution: Some("1.5".into()),
        };
        let (start, end, resolution) = ok.validate().unwrap();
        assert!(start < end);
        assert_eq!(resolution, 1.5);
    }
}
