use chrono::{DateTime, Utc};
use std::collections::VecDeque;

use super::Strategy;
use crate::error::Result;
use crate::exchange::SimulatedExchange;
use crate::models::{OrderStatus, OrderTicket, Side};

/// Mean reversion strategy
///
/// Tracks a rolling mean of the midpoint. When the price dips below the
/// entry band it rests a bid further down and waits for the matcher to
/// cross it; when the price recovers above the exit band it closes the
/// position with a market sell. A resting bid that the market runs away
/// from is cancelled.
///
/// Exercises both fill paths of the exchange: resting limit orders
/// matched at their limit price with the maker fee, and immediate market
/// orders paying slippage and the taker fee.
pub struct MeanReversionStrategy {
    token_id: String,
    config: MeanReversionConfig,
    window: VecDeque<f64>,
    resting_bid: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct MeanReversionConfig {
    /// Rolling window length for the mean.
    pub ma_period: usize,

    /// Fractional distance below the mean that counts as oversold
    /// (0.05 = 5% below).
    pub entry_band: f64,

    /// Fractional distance above the mean that triggers the exit.
    pub exit_band: f64,

    /// Order size in contracts.
    pub order_size: f64,
}

impl Default for MeanReversionConfig {
    fn default() -> Self {
        Self {
            ma_period: 20,
            entry_band: 0.05,
            exit_band: 0.02,
            order_size: 100.0,
        }
    }
}

impl MeanReversionStrategy {
    pub fn new(token_id: impl Into<String>, config: MeanReversionConfig) -> Self {
        Self {
            token_id: token_id.into(),
            config,
            window: VecDeque::new(),
            resting_bid: None,
        }
    }

    fn rolling_mean(&self) -> Option<f64> {
        if self.window.len() < self.config.ma_period {
            return None;
        }
        Some(self.window.iter().sum::<f64>() / self.window.len() as f64)
    }
}

impl Strategy for MeanReversionStrategy {
    fn name(&self) -> &str {
        "MeanReversion"
    }

    fn on_tick(&mut self, exchange: &mut SimulatedExchange, _now: DateTime<Utc>) -> Result<()> {
        let mid = exchange.midpoint(&self.token_id)?;
        self.window.push_back(mid);
        if self.window.len() > self.config.ma_period {
            self.window.pop_front();
        }
        let Some(mean) = self.rolling_mean() else {
            return Ok(());
        };

        // Forget the resting bid once the matcher or a cancel resolved it.
        if let Some(id) = self.resting_bid {
            if exchange.order(id).map(|o| o.status) != Some(OrderStatus::Live) {
                self.resting_bid = None;
            }
        }

        // Pull a bid the market has run away from.
        if let Some(id) = self.resting_bid {
            if mid >= mean {
                exchange.cancel(id);
                self.resting_bid = None;
            }
        }

        let held = exchange
            .position(&self.token_id)
            .map(|p| p.size)
            .unwrap_or(0.0);

        if held > 0.0 && mid >= mean * (1.0 + self.config.exit_band) {
            let ticket = OrderTicket::market(self.token_id.as_str(), Side::Sell, held)?;
            exchange.submit(ticket)?;
            return Ok(());
        }

        if held <= 0.0 && self.resting_bid.is_none() && mid <= mean * (1.0 - self.config.entry_band)
        {
            let bid = (mid * (1.0 - self.config.entry_band / 2.0)).clamp(0.01, 0.99);
            let ticket =
                OrderTicket::limit(self.token_id.as_str(), Side::Buy, self.config.order_size, bid)?;
            let order = exchange.submit(ticket)?;
            if order.status == OrderStatus::Live {
                self.resting_bid = Some(order.id);
            }
        }

        Ok(())
    }
}
