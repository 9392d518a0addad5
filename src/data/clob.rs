use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::DataSource;
use crate::models::{MarketTrade, PricePoint};

const DEFAULT_CLOB_BASE: &str = "https://clob.polymarket.com";
// The CLOB allows 1000 requests per 10s window; stay comfortably under.
const RATE_LIMIT_PER_SEC: u32 = 80;
const MAX_RETRIES: u32 = 3;

// Type alias for the rate limiter to simplify signatures
type ClobRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Settings for [`ClobHistoryClient`].
#[derive(Debug, Clone)]
pub struct DataClientConfig {
    pub base_url: String,
    /// Root of the on-disk JSON cache.
    pub cache_dir: PathBuf,
    /// Price bar resolution in minutes.
    pub fidelity: u32,
}

impl Default for DataClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_CLOB_BASE.to_string(),
            cache_dir: PathBuf::from("backtest-cache"),
            fidelity: 1,
        }
    }
}

/// Rate-limited CLOB price-history client with an on-disk JSON cache.
///
/// Cloneable to share across tasks; all clones share one rate limiter.
#[derive(Clone)]
pub struct ClobHistoryClient {
    client: Client,
    config: DataClientConfig,
    rate_limiter: Arc<ClobRateLimiter>,
}

/// Response from /prices-history
#[derive(Debug, Deserialize)]
struct HistoryResponse {
    history: Vec<HistoryPoint>,
}

#[derive(Debug, Deserialize)]
struct HistoryPoint {
    /// Unix seconds.
    t: i64,
    /// Price; occasionally drifts just outside [0,1] upstream.
    p: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedSeries {
    points: Vec<PricePoint>,
}

impl ClobHistoryClient {
    pub fn new(config: DataClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        let quota = Quota::per_second(NonZeroU32::new(RATE_LIMIT_PER_SEC).unwrap());
        let rate_limiter = Arc::new(RateLimiter::direct(quota));

        Ok(Self {
            client,
            config,
            rate_limiter,
        })
    }

    /// Fetch the price history for a token, serving from the cache when
    /// the same window was fetched before.
    pub async fn price_history(
        &self,
        token_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PricePoint>> {
        let cache_path = self.cache_path(token_id, start, end);
        if let Some(cached) = read_cache(&cache_path) {
            tracing::debug!("Cache hit for {} ({:?})", token_id, cache_path);
            return Ok(cached);
        }

        let url = format!(
            "{}/prices-history?market={}&startTs={}&endTs={}&fidelity={}",
            self.config.base_url,
            token_id,
            start.timestamp(),
            end.timestamp(),
            self.config.fidelity
        );

        let response = self.request_with_retry(&url).await?;
        let body: HistoryResponse = response
            .json()
            .await
            .context("Failed to parse price history response")?;

        let mut points: Vec<PricePoint> = body
            .history
            .into_iter()
            .filter_map(|h| {
                let timestamp = DateTime::<Utc>::from_timestamp(h.t, 0)?;
                Some(PricePoint {
                    timestamp,
                    price: h.p.clamp(0.0, 1.0),
                })
            })
            .collect();
        points.sort_by_key(|p| p.timestamp);
        points.dedup_by_key(|p| p.timestamp);

        tracing::info!("Fetched {} price bars for {}", points.len(), token_id);
        write_cache(&cache_path, &points);
        Ok(points)
    }

    /// Make a rate-limited request with retry and exponential backoff on
    /// 429s, server errors and network failures.
    async fn request_with_retry(&self, url: &str) -> Result<reqwest::Response> {
        for attempt in 1..=MAX_RETRIES {
            self.rate_limiter.until_ready().await;

            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let backoff_secs = 2u64.pow(attempt);
                        tracing::warn!(
                            "CLOB returned {}, backing off {}s (attempt {}/{})",
                            status,
                            backoff_secs,
                            attempt,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(std::time::Duration::from_secs(backoff_secs)).await;
                        continue;
                    }

                    // Other client errors are not retryable.
                    let error_text = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown error".to_string());
                    anyhow::bail!("CLOB API error ({}): {}", status, error_text);
                }
                Err(e) if attempt < MAX_RETRIES => {
                    let backoff_secs = 2u64.pow(attempt);
                    tracing::warn!(
                        "Network error: {}, retrying in {}s (attempt {}/{})",
                        e,
                        backoff_secs,
                        attempt,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(backoff_secs)).await;
                }
                Err(e) => anyhow::bail!("Network error after {} retries: {}", MAX_RETRIES, e),
            }
        }

        anyhow::bail!("Failed after {} retries", MAX_RETRIES)
    }

    fn cache_path(&self, token_id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> PathBuf {
        self.config.cache_dir.join("prices").join(format!(
            "{}_{}_{}_f{}.json",
            token_id,
            start.timestamp(),
            end.timestamp(),
            self.config.fidelity
        ))
    }
}

fn read_cache(path: &Path) -> Option<Vec<PricePoint>> {
    let raw = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str::<CachedSeries>(&raw) {
        Ok(cached) => Some(cached.points),
        Err(e) => {
            tracing::warn!("Discarding unreadable cache file {:?}: {}", path, e);
            None
        }
    }
}

fn write_cache(path: &Path, points: &[PricePoint]) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::warn!("Failed to create cache directory {:?}: {}", parent, e);
            return;
        }
    }
    let series = CachedSeries {
        points: points.to_vec(),
    };
    match serde_json::to_string(&series) {
        Ok(json) => {
            if let Err(e) = std::fs::write(path, json) {
                tracing::warn!("Failed to write cache file {:?}: {}", path, e);
            }
        }
        Err(e) => tracing::warn!("Failed to serialize cache for {:?}: {}", path, e),
    }
}

#[async_trait]
impl DataSource for ClobHistoryClient {
    async fn load_price_series(
        &self,
        token_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> crate::Result<Vec<PricePoint>> {
        Ok(self.price_history(token_id, start, end).await?)
    }

    async fn load_trade_series(
        &self,
        _token_id: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> crate::Result<Vec<MarketTrade>> {
        // /data/trades needs an authenticated session; without one the
        // engine falls back to synthesizing trades from price steps.
        Err(anyhow::anyhow!("trade history requires an authenticated CLOB session").into())
    }
}
