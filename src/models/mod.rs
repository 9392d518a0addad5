use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BacktestError, Result};

/// A single historical price observation.
///
/// Prediction-market prices are outcome probabilities, so price ∈ [0, 1].
/// Series are ordered ascending by timestamp with unique timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of an order held by the simulated exchange.
///
/// `Rejected` is assigned only at creation and is terminal; `Live`
/// transitions only to `Filled` or `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Live,
    Filled,
    Cancelled,
    Rejected,
}

/// An order tracked by the simulated exchange. Orders are never deleted;
/// ids come from a deterministic per-exchange counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: u64,
    pub token_id: String,
    pub side: Side,
    pub size: f64,
    /// `None` for market orders.
    pub limit_price: Option<f64>,
    pub status: OrderStatus,
    pub filled_size: f64,
    pub created_at: DateTime<Utc>,
}

/// Validated order submission arguments.
///
/// Replaces loosely-typed order dictionaries with an explicit struct: a
/// missing limit price means a market order, and both size and limit
/// price are checked at construction.
#[derive(Debug, Clone)]
pub struct OrderTicket {
    pub token_id: String,
    pub side: Side,
    pub size: f64,
    pub limit_price: Option<f64>,
}

impl OrderTicket {
    /// Market order: fills immediately at the current price adjusted for
    /// slippage.
    pub fn market(token_id: impl Into<String>, side: Side, size: f64) -> Result<Self> {
        if size <= 0.0 || !size.is_finite() {
            return Err(BacktestError::Configuration(format!(
                "order size must be positive and finite, got {size}"
            )));
        }
        Ok(Self {
            token_id: token_id.into(),
            side,
            size,
            limit_price: None,
        })
    }

    /// Limit order: fills at the limit price when crossed, otherwise rests.
    pub fn limit(
        token_id: impl Into<String>,
        side: Side,
        size: f64,
        limit_price: f64,
    ) -> Result<Self> {
        if size <= 0.0 || !size.is_finite() {
            return Err(BacktestError::Configuration(format!(
                "order size must be positive and finite, got {size}"
            )));
        }
        if !(0.0..=1.0).contains(&limit_price) || limit_price == 0.0 {
            return Err(BacktestError::Configuration(format!(
                "limit price must lie in (0, 1], got {limit_price}"
            )));
        }
        Ok(Self {
            token_id: token_id.into(),
            side,
            size,
            limit_price: Some(limit_price),
        })
    }

    pub fn is_market(&self) -> bool {
        self.limit_price.is_none()
    }
}

/// One fill appended to the exchange ledger. Immutable once recorded,
/// ordered by timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,
    pub token_id: String,
    pub side: Side,
    pub size: f64,
    pub price: f64,
    pub fee: f64,
    /// Realized deviation from the unadjusted price, as a fraction.
    pub slippage: f64,
}

/// A public market trade, loaded from history or synthesized from price
/// steps when no trade series is available.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketTrade {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub size: f64,
    pub side: Side,
}

/// Net position in one token.
///
/// Created lazily on the first fill, mutated only by fills, never
/// deleted. Size may go negative: an unmargined short, not risk-checked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub token_id: String,
    pub size: f64,
    /// Size-weighted average of increasing fills.
    pub avg_entry_price: f64,
    /// Accumulated only on decreasing fills, at the pre-fill average entry.
    pub realized_pnl: f64,
}

impl Position {
    pub(crate) fn new(token_id: String) -> Self {
        Self {
            token_id,
            size: 0.0,
            avg_entry_price: 0.0,
            realized_pnl: 0.0,
        }
    }
}

/// One point on the equity curve, appended once per simulated tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    /// cash + Σ size · current price over held positions.
    pub equity: f64,
    pub cash: f64,
    pub position_value: f64,
}
