// Historical market data sources
pub mod clob;
pub mod synthetic;

pub use clob::{ClobHistoryClient, DataClientConfig};
pub use synthetic::{MarketScenario, SyntheticDataGenerator, SyntheticDataSource};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{MarketTrade, PricePoint};

/// Supplier of historical market data for one token.
///
/// Implementations return price series that ascend by timestamp with
/// duplicates removed and prices inside [0, 1].
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn load_price_series(
        &self,
        token_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PricePoint>>;

    /// Historical public trades for the window. Often unavailable
    /// (auth-gated upstream); callers treat an error as "no trade data"
    /// and fall back to synthesizing trades from price steps.
    async fn load_trade_series(
        &self,
        token_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MarketTrade>>;
}
