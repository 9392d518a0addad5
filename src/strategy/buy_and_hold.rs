use chrono::{DateTime, Utc};

use super::Strategy;
use crate::error::Result;
use crate::exchange::SimulatedExchange;
use crate::models::{OrderStatus, OrderTicket, Side};

/// Buy-and-hold baseline strategy
///
/// Commits a fixed fraction of starting cash with one market buy on the
/// first tick that has a visible price, then holds to the end of the
/// window. Used as a baseline to compare active strategies against.
pub struct BuyAndHoldStrategy {
    token_id: String,
    allocation: f64,
    entered: bool,
}

impl BuyAndHoldStrategy {
    /// `allocation` is the fraction of cash committed on entry, clamped
    /// to [0, 1].
    pub fn new(token_id: impl Into<String>, allocation: f64) -> Self {
        Self {
            token_id: token_id.into(),
            allocation: allocation.clamp(0.0, 1.0),
            entered: false,
        }
    }
}

impl Strategy for BuyAndHoldStrategy {
    fn name(&self) -> &str {
        "BuyAndHold"
    }

    fn on_tick(&mut self, exchange: &mut SimulatedExchange, _now: DateTime<Utc>) -> Result<()> {
        if self.entered {
            return Ok(());
        }

        let price = exchange.price_at(&self.token_id)?;
        // Sized just under the allocation so slippage and fee still fit.
        let size = exchange.cash() * self.allocation / price * 0.99;
        if size <= 0.0 {
            return Ok(());
        }

        let ticket = OrderTicket::market(self.token_id.as_str(), Side::Buy, size)?;
        let order = exchange.submit(ticket)?;
        if order.status == OrderStatus::Filled {
            self.entered = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::ExchangeConfig;
    use crate::models::PricePoint;
    use chrono::{Duration, TimeZone};

    fn exchange_over(prices: &[f64]) -> (SimulatedExchange, Vec<DateTime<Utc>>) {
        let start = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let series: Vec<PricePoint> = prices
            .iter()
            .enumerate()
            .map(|(i, price)| PricePoint {
                timestamp: start + Duration::minutes(i as i64),
                price: *price,
            })
            .collect();
        let ticks = series.iter().map(|p| p.timestamp).collect();

        let config = ExchangeConfig {
            slippage_pct: 0.0,
            ..ExchangeConfig::default()
        };
        let mut exchange = SimulatedExchange::new(10_000.0, config);
        exchange.load_price_series("tok", series);
        (exchange, ticks)
    }

    #[test]
    fn test_enters_once_and_holds() {
        let (mut exchange, ticks) = exchange_over(&[0.50, 0.55, 0.60]);
        let mut strategy = BuyAndHoldStrategy::new("tok", 0.5);

        for tick in ticks {
            exchange.advance_time(tick);
            exchange.match_pending();
            strategy.on_tick(&mut exchange, tick).unwrap();
        }

        // A single entry fill, still held at the end.
        assert_eq!(exchange.ledger().len(), 1);
        assert_eq!(exchange.ledger()[0].side, Side::Buy);
        let position = exchange.position("tok").unwrap();
        assert!(position.size > 0.0);
        assert!(exchange.equity() > 10_000.0);
    }

    #[test]
    fn test_zero_allocation_never_trades() {
        let (mut exchange, ticks) = exchange_over(&[0.50, 0.55]);
        let mut strategy = BuyAndHoldStrategy::new("tok", 0.0);

        for tick in ticks {
            exchange.advance_time(tick);
            strategy.on_tick(&mut exchange, tick).unwrap();
        }

        assert!(exchange.ledger().is_empty());
        assert_eq!(exchange.cash(), 10_000.0);
    }
}
