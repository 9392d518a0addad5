use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::error::{BacktestError, Result};
use crate::models::{
    MarketTrade, Order, OrderStatus, OrderTicket, Position, PricePoint, Side, TradeRecord,
};

/// Fee, slippage and synthetic order-book parameters.
///
/// The spread/depth shape is a placeholder heuristic rather than a model
/// of real microstructure; the fields are configurable defaults, not
/// load-bearing contracts.
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    /// Slippage applied to market fills (0.001 = 0.1%).
    pub slippage_pct: f64,
    /// Fee rate for orders resting until filled.
    pub maker_fee: f64,
    /// Fee rate for orders executed immediately against the book.
    pub taker_fee: f64,
    /// Full synthetic spread around the last price (0.02 = 2%).
    pub book_spread: f64,
    /// Synthetic book levels per side.
    pub book_levels: usize,
    /// Price widening per level beyond the half-spread.
    pub book_level_increment: f64,
    /// Notional at the top level; level i carries depth / (i + 1).
    pub book_depth: f64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            slippage_pct: 0.001,
            maker_fee: 0.0,
            taker_fee: 0.0,
            book_spread: 0.02,
            book_levels: 5,
            book_level_increment: 0.01,
            book_depth: 1000.0,
        }
    }
}

/// One level of the synthetic order book.
#[derive(Debug, Clone, Serialize)]
pub struct BookLevel {
    pub price: f64,
    pub size: f64,
}

/// Synthetic depth snapshot derived purely from the latest visible price.
#[derive(Debug, Clone, Serialize)]
pub struct OrderBookSnapshot {
    pub token_id: String,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

/// Per-token detail inside a [`PortfolioSummary`].
#[derive(Debug, Clone, Serialize)]
pub struct PositionDetail {
    pub size: f64,
    pub avg_entry_price: f64,
    pub realized_pnl: f64,
    pub current_price: Option<f64>,
}

/// Snapshot of the portfolio at the current simulated time.
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioSummary {
    pub cash: f64,
    pub equity: f64,
    pub positions: HashMap<String, PositionDetail>,
    pub open_orders: usize,
    pub total_trades: usize,
}

// Synthetic-trade fallback: a price step must move at least this much to
// count as a trade, and its size scales with the move magnitude.
const SYNTHETIC_TRADE_MIN_MOVE: f64 = 1e-4;
const SYNTHETIC_TRADE_SIZE_SCALE: f64 = 10_000.0;
const SYNTHETIC_TRADE_LOOKBACK: usize = 100;
const SYNTHETIC_TRADE_LIMIT: usize = 50;

/// In-memory exchange replaying historical prices.
///
/// Every query is gated by the simulated clock: a value returned at time
/// T derives only from data stamped at or before T. The exchange holds
/// simulated cash, positions, all orders ever submitted and the fill
/// ledger; it is exclusively owned by one replay loop at a time.
pub struct SimulatedExchange {
    config: ExchangeConfig,
    price_series: HashMap<String, Vec<PricePoint>>,
    trade_series: HashMap<String, Vec<MarketTrade>>,
    current_time: DateTime<Utc>,
    cash: f64,
    positions: HashMap<String, Position>,
    orders: BTreeMap<u64, Order>,
    ledger: Vec<TradeRecord>,
    next_order_id: u64,
}

impl SimulatedExchange {
    pub fn new(initial_capital: f64, config: ExchangeConfig) -> Self {
        Self {
            config,
            price_series: HashMap::new(),
            trade_series: HashMap::new(),
            current_time: DateTime::<Utc>::MIN_UTC,
            cash: initial_capital,
            positions: HashMap::new(),
            orders: BTreeMap::new(),
            ledger: Vec::new(),
            next_order_id: 0,
        }
    }

    /// Register the historical price series for a token. The series must
    /// ascend by timestamp with duplicates removed.
    pub fn load_price_series(&mut self, token_id: impl Into<String>, series: Vec<PricePoint>) {
        self.price_series.insert(token_id.into(), series);
    }

    /// Register a historical public-trade series for a token. Without one,
    /// `recent_trades` falls back to synthesizing trades from price steps.
    pub fn load_trade_series(&mut self, token_id: impl Into<String>, trades: Vec<MarketTrade>) {
        self.trade_series.insert(token_id.into(), trades);
    }

    /// Advance the simulation clock. The replay loop calls this before any
    /// query or match for the tick; there is no rollback.
    pub fn advance_time(&mut self, t: DateTime<Utc>) {
        self.current_time = t;
    }

    pub fn current_time(&self) -> DateTime<Utc> {
        self.current_time
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn position(&self, token_id: &str) -> Option<&Position> {
        self.positions.get(token_id)
    }

    pub fn order(&self, order_id: u64) -> Option<&Order> {
        self.orders.get(&order_id)
    }

    /// The append-only fill ledger, ordered by timestamp.
    pub fn ledger(&self) -> &[TradeRecord] {
        &self.ledger
    }

    /// Latest price stamped at or before the current simulated time.
    pub fn price_at(&self, token_id: &str) -> Result<f64> {
        let series = self
            .price_series
            .get(token_id)
            .ok_or_else(|| BacktestError::NoPriceData {
                token_id: token_id.to_string(),
            })?;
        let visible = series.partition_point(|p| p.timestamp <= self.current_time);
        if visible == 0 {
            return Err(BacktestError::NoPriceData {
                token_id: token_id.to_string(),
            });
        }
        Ok(series[visible - 1].price)
    }

    /// Side-adjusted quote: buyers pay half the configured spread above
    /// the last price, sellers receive half below it.
    pub fn quote(&self, token_id: &str, side: Side) -> Result<f64> {
        let base = self.price_at(token_id)?;
        let half_spread = self.config.book_spread / 2.0;
        Ok(match side {
            Side::Buy => base * (1.0 + half_spread),
            Side::Sell => base * (1.0 - half_spread),
        })
    }

    pub fn midpoint(&self, token_id: &str) -> Result<f64> {
        self.price_at(token_id)
    }

    /// Deterministic synthetic depth around the latest visible price.
    pub fn order_book(&self, token_id: &str) -> Result<OrderBookSnapshot> {
        let base = self.price_at(token_id)?;
        let half_spread = self.config.book_spread / 2.0;

        let mut bids = Vec::with_capacity(self.config.book_levels);
        let mut asks = Vec::with_capacity(self.config.book_levels);
        for level in 0..self.config.book_levels {
            let offset = half_spread + level as f64 * self.config.book_level_increment;
            let size = self.config.book_depth / (level as f64 + 1.0);
            bids.push(BookLevel {
                price: base * (1.0 - offset),
                size,
            });
            asks.push(BookLevel {
                price: base * (1.0 + offset),
                size,
            });
        }

        Ok(OrderBookSnapshot {
            token_id: token_id.to_string(),
            bids,
            asks,
        })
    }

    /// Submit an order.
    ///
    /// Market orders execute immediately at the current price adjusted by
    /// slippage (buyers pay more, sellers receive less) with the taker
    /// fee. A crossable limit order executes at its limit price, not
    /// slippage-adjusted, with the taker fee; anything else rests `Live`
    /// until [`Self::match_pending`] crosses it. A BUY the cash balance
    /// cannot cover comes back `Rejected` with no state change.
    pub fn submit(&mut self, ticket: OrderTicket) -> Result<&Order> {
        let id = self.next_order_id;
        self.next_order_id += 1;

        match ticket.limit_price {
            None => {
                let base = self.price_at(&ticket.token_id)?;
                let exec_price = match ticket.side {
                    Side::Buy => base * (1.0 + self.config.slippage_pct),
                    Side::Sell => base * (1.0 - self.config.slippage_pct),
                };
                self.execute(id, ticket, exec_price)
            }
            Some(limit) => {
                let current = self.price_at(&ticket.token_id)?;
                let crossable = match ticket.side {
                    Side::Buy => limit >= current,
                    Side::Sell => limit <= current,
                };
                if crossable {
                    self.execute(id, ticket, limit)
                } else {
                    let order = Order {
                        id,
                        token_id: ticket.token_id,
                        side: ticket.side,
                        size: ticket.size,
                        limit_price: Some(limit),
                        status: OrderStatus::Live,
                        filled_size: 0.0,
                        created_at: self.current_time,
                    };
                    self.orders.insert(id, order);
                    Ok(&self.orders[&id])
                }
            }
        }
    }

    /// Immediate execution path shared by market and crossable limit
    /// orders. Applies the taker fee; rejects buys that exceed cash.
    fn execute(&mut self, id: u64, ticket: OrderTicket, price: f64) -> Result<&Order> {
        let fee = ticket.size * price * self.config.taker_fee;
        let mut order = Order {
            id,
            token_id: ticket.token_id.clone(),
            side: ticket.side,
            size: ticket.size,
            limit_price: ticket.limit_price,
            status: OrderStatus::Filled,
            filled_size: ticket.size,
            created_at: self.current_time,
        };

        if ticket.side == Side::Buy && self.cash < ticket.size * price + fee {
            tracing::debug!(
                "Rejecting buy of {:.4} {} @ {:.4}: cost exceeds cash {:.2}",
                ticket.size,
                ticket.token_id,
                price,
                self.cash
            );
            order.status = OrderStatus::Rejected;
            order.filled_size = 0.0;
            self.orders.insert(id, order);
            return Ok(&self.orders[&id]);
        }

        self.apply_fill(&ticket.token_id, ticket.side, ticket.size, price, fee);
        self.orders.insert(id, order);
        Ok(&self.orders[&id])
    }

    /// Fill any resting limit orders crossed by the current price. Called
    /// once per tick after `advance_time`. Fills are all-or-nothing at the
    /// limit price with the maker fee, scanned in creation order. A buy
    /// the cash balance cannot cover stays `Live` (`Rejected` is assigned
    /// only at creation) and is retried on later ticks.
    pub fn match_pending(&mut self) -> Vec<u64> {
        let live: Vec<u64> = self
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Live)
            .map(|o| o.id)
            .collect();

        let mut filled = Vec::new();
        for id in live {
            let (token_id, side, remaining, limit) = {
                let order = &self.orders[&id];
                let Some(limit) = order.limit_price else {
                    continue;
                };
                (
                    order.token_id.clone(),
                    order.side,
                    order.size - order.filled_size,
                    limit,
                )
            };

            let Ok(current) = self.price_at(&token_id) else {
                continue;
            };
            let crossed = match side {
                Side::Buy => current <= limit,
                Side::Sell => current >= limit,
            };
            if !crossed {
                continue;
            }

            let fee = remaining * limit * self.config.maker_fee;
            if side == Side::Buy && self.cash < remaining * limit + fee {
                tracing::warn!(
                    "Order {} crossed at {:.4} but cash {:.2} cannot cover it, leaving live",
                    id,
                    limit,
                    self.cash
                );
                continue;
            }

            self.apply_fill(&token_id, side, remaining, limit, fee);
            if let Some(order) = self.orders.get_mut(&id) {
                order.status = OrderStatus::Filled;
                order.filled_size = order.size;
            }
            filled.push(id);
        }

        filled
    }

    /// Fill accounting shared by immediate executions and matched limit
    /// orders. Callers have already verified cash for buys.
    ///
    /// BUY recomputes the size-weighted average entry; SELL realizes PnL
    /// against the pre-fill average for at most the long size held, and
    /// may take the position negative.
    fn apply_fill(&mut self, token_id: &str, side: Side, size: f64, price: f64, fee: f64) {
        let base = self.price_at(token_id).unwrap_or(price);
        let slippage = if base > 0.0 {
            (price - base).abs() / base
        } else {
            0.0
        };

        match side {
            Side::Buy => self.cash -= size * price + fee,
            Side::Sell => self.cash += size * price - fee,
        }

        let position = self
            .positions
            .entry(token_id.to_string())
            .or_insert_with(|| Position::new(token_id.to_string()));

        match side {
            Side::Buy => {
                let total_cost = position.avg_entry_price * position.size + price * size;
                position.size += size;
                if position.size > 0.0 {
                    position.avg_entry_price = total_cost / position.size;
                }
            }
            Side::Sell => {
                if position.size > 0.0 {
                    position.realized_pnl +=
                        (price - position.avg_entry_price) * size.min(position.size);
                }
                position.size -= size;
            }
        }

        self.ledger.push(TradeRecord {
            timestamp: self.current_time,
            token_id: token_id.to_string(),
            side,
            size,
            price,
            fee,
            slippage,
        });
    }

    /// Cancel a live order. Returns false for unknown ids and for orders
    /// that are no longer live.
    pub fn cancel(&mut self, order_id: u64) -> bool {
        match self.orders.get_mut(&order_id) {
            Some(order) if order.status == OrderStatus::Live => {
                order.status = OrderStatus::Cancelled;
                true
            }
            _ => false,
        }
    }

    /// Cancel every live order, returning the cancelled ids.
    pub fn cancel_all(&mut self) -> Vec<u64> {
        let mut cancelled = Vec::new();
        for order in self.orders.values_mut() {
            if order.status == OrderStatus::Live {
                order.status = OrderStatus::Cancelled;
                cancelled.push(order.id);
            }
        }
        cancelled
    }

    /// Cash plus the mark-to-market value of every position. A token with
    /// no visible price yet contributes nothing.
    pub fn equity(&self) -> f64 {
        let mut equity = self.cash;
        for position in self.positions.values() {
            if position.size != 0.0 {
                let price = self.price_at(&position.token_id).unwrap_or(0.0);
                equity += position.size * price;
            }
        }
        equity
    }

    /// Snapshot of cash, equity, per-token positions, live order count and
    /// total fills.
    pub fn portfolio_summary(&self) -> PortfolioSummary {
        let positions = self
            .positions
            .iter()
            .map(|(token_id, p)| {
                (
                    token_id.clone(),
                    PositionDetail {
                        size: p.size,
                        avg_entry_price: p.avg_entry_price,
                        realized_pnl: p.realized_pnl,
                        current_price: self.price_at(token_id).ok(),
                    },
                )
            })
            .collect();

        PortfolioSummary {
            cash: self.cash,
            equity: self.equity(),
            positions,
            open_orders: self
                .orders
                .values()
                .filter(|o| o.status == OrderStatus::Live)
                .count(),
            total_trades: self.ledger.len(),
        }
    }

    /// Market trades visible at the current simulated time.
    ///
    /// Serves the loaded trade series when one exists; otherwise turns
    /// each sufficiently large price step into one synthetic trade, sized
    /// proportional to the move with the side set by its direction.
    pub fn recent_trades(&self, token_id: &str) -> Vec<MarketTrade> {
        if let Some(trades) = self.trade_series.get(token_id) {
            let visible = trades.partition_point(|t| t.timestamp <= self.current_time);
            let start = visible.saturating_sub(SYNTHETIC_TRADE_LIMIT);
            return trades[start..visible].to_vec();
        }
        self.synthesize_trades(token_id)
    }

    fn synthesize_trades(&self, token_id: &str) -> Vec<MarketTrade> {
        let Some(series) = self.price_series.get(token_id) else {
            return Vec::new();
        };
        let visible = series.partition_point(|p| p.timestamp <= self.current_time);
        let start = visible.saturating_sub(SYNTHETIC_TRADE_LOOKBACK);

        let mut trades = Vec::new();
        let mut prev: Option<f64> = None;
        for point in &series[start..visible] {
            if let Some(prev_price) = prev {
                let step = point.price - prev_price;
                if step.abs() > SYNTHETIC_TRADE_MIN_MOVE {
                    trades.push(MarketTrade {
                        timestamp: point.timestamp,
                        price: point.price,
                        size: step.abs() * SYNTHETIC_TRADE_SIZE_SCALE,
                        side: if step > 0.0 { Side::Buy } else { Side::Sell },
                    });
                }
            }
            prev = Some(point.price);
        }

        let excess = trades.len().saturating_sub(SYNTHETIC_TRADE_LIMIT);
        trades.split_off(excess)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn ts(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn series(prices: &[f64]) -> Vec<PricePoint> {
        prices
            .iter()
            .enumerate()
            .map(|(i, price)| PricePoint {
                timestamp: ts(i as i64),
                price: *price,
            })
            .collect()
    }

    fn zero_fee_exchange(prices: &[f64]) -> SimulatedExchange {
        let config = ExchangeConfig {
            slippage_pct: 0.0,
            maker_fee: 0.0,
            taker_fee: 0.0,
            ..ExchangeConfig::default()
        };
        let mut exchange = SimulatedExchange::new(10_000.0, config);
        exchange.load_price_series("tok", series(prices));
        exchange
    }

    #[test]
    fn test_no_lookahead_in_price_queries() {
        let exchange = {
            let mut ex = zero_fee_exchange(&[0.50, 0.60, 0.70]);
            ex.advance_time(ts(1));
            ex
        };

        // Only data stamped at or before the clock is visible.
        assert_eq!(exchange.price_at("tok").unwrap(), 0.60);
        assert_eq!(exchange.midpoint("tok").unwrap(), 0.60);
        let book = exchange.order_book("tok").unwrap();
        assert!(book.asks[0].price > 0.60 && book.bids[0].price < 0.60);
    }

    #[test]
    fn test_price_before_first_bar_fails() {
        let mut exchange = zero_fee_exchange(&[0.50]);
        exchange.advance_time(ts(0) - Duration::minutes(5));
        assert!(matches!(
            exchange.price_at("tok"),
            Err(BacktestError::NoPriceData { .. })
        ));
        // Equity treats the missing contribution as zero instead.
        assert_eq!(exchange.equity(), 10_000.0);
    }

    #[test]
    fn test_buy_then_sell_round_trip_accounting() {
        let mut exchange = zero_fee_exchange(&[0.50, 0.60]);
        exchange.advance_time(ts(0));

        let buy = OrderTicket::market("tok", Side::Buy, 100.0).unwrap();
        let order = exchange.submit(buy).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert!((exchange.cash() - 9_950.0).abs() < 1e-9);

        let position = exchange.position("tok").unwrap();
        assert!((position.size - 100.0).abs() < 1e-9);
        assert!((position.avg_entry_price - 0.50).abs() < 1e-9);

        exchange.advance_time(ts(1));
        let sell = OrderTicket::market("tok", Side::Sell, 100.0).unwrap();
        exchange.submit(sell).unwrap();

        assert!((exchange.cash() - 10_010.0).abs() < 1e-9);
        let position = exchange.position("tok").unwrap();
        assert!(position.size.abs() < 1e-9);
        assert!((position.realized_pnl - 10.0).abs() < 1e-9);
        assert!((exchange.equity() - 10_010.0).abs() < 1e-9);
    }

    #[test]
    fn test_market_buy_pays_slippage_and_taker_fee() {
        let config = ExchangeConfig {
            slippage_pct: 0.01,
            taker_fee: 0.001,
            ..ExchangeConfig::default()
        };
        let mut exchange = SimulatedExchange::new(10_000.0, config);
        exchange.load_price_series("tok", series(&[0.50]));
        exchange.advance_time(ts(0));

        exchange
            .submit(OrderTicket::market("tok", Side::Buy, 100.0).unwrap())
            .unwrap();

        let trade = &exchange.ledger()[0];
        assert!((trade.price - 0.505).abs() < 1e-12);
        assert!((trade.fee - 100.0 * 0.505 * 0.001).abs() < 1e-12);
        assert!((trade.slippage - 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_resting_limit_fills_at_limit_price() {
        let mut exchange = zero_fee_exchange(&[0.50, 0.45, 0.38]);
        exchange.advance_time(ts(0));

        let ticket = OrderTicket::limit("tok", Side::Buy, 100.0, 0.40).unwrap();
        let order_id = {
            let order = exchange.submit(ticket).unwrap();
            assert_eq!(order.status, OrderStatus::Live);
            order.id
        };

        exchange.advance_time(ts(1));
        assert!(exchange.match_pending().is_empty());

        exchange.advance_time(ts(2));
        let filled = exchange.match_pending();
        assert_eq!(filled, vec![order_id]);

        let order = exchange.order(order_id).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        // Fills at the limit price, not the (better) current price.
        assert!((exchange.ledger()[0].price - 0.40).abs() < 1e-12);
        assert!((exchange.cash() - (10_000.0 - 40.0)).abs() < 1e-9);
    }

    #[test]
    fn test_crossable_limit_fills_immediately_at_limit() {
        let mut exchange = zero_fee_exchange(&[0.50]);
        exchange.advance_time(ts(0));

        let ticket = OrderTicket::limit("tok", Side::Buy, 100.0, 0.55).unwrap();
        let order = exchange.submit(ticket).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert!((exchange.ledger()[0].price - 0.55).abs() < 1e-12);
    }

    #[test]
    fn test_insufficient_funds_rejects_without_state_change() {
        let mut exchange = zero_fee_exchange(&[0.50]);
        exchange.advance_time(ts(0));

        let ticket = OrderTicket::market("tok", Side::Buy, 1_000_000.0).unwrap();
        let order = exchange.submit(ticket).unwrap();
        assert_eq!(order.status, OrderStatus::Rejected);
        assert_eq!(order.filled_size, 0.0);

        assert_eq!(exchange.cash(), 10_000.0);
        assert!(exchange.position("tok").is_none());
        assert!(exchange.ledger().is_empty());
    }

    #[test]
    fn test_submit_then_cancel_leaves_state_unchanged() {
        let mut exchange = zero_fee_exchange(&[0.50]);
        exchange.advance_time(ts(0));

        let ticket = OrderTicket::limit("tok", Side::Buy, 100.0, 0.30).unwrap();
        let order_id = exchange.submit(ticket).unwrap().id;
        assert!(exchange.cancel(order_id));

        assert_eq!(exchange.cash(), 10_000.0);
        assert!(exchange.position("tok").is_none());
        assert!(exchange.ledger().is_empty());
        assert_eq!(
            exchange.order(order_id).unwrap().status,
            OrderStatus::Cancelled
        );

        // Cancelled orders do not fill later.
        exchange.advance_time(ts(0) + Duration::minutes(10));
        assert!(exchange.match_pending().is_empty());
    }

    #[test]
    fn test_cancel_unknown_order_is_not_found() {
        let mut exchange = zero_fee_exchange(&[0.50]);
        assert!(!exchange.cancel(999));
    }

    #[test]
    fn test_cancel_all_only_touches_live_orders() {
        let mut exchange = zero_fee_exchange(&[0.50]);
        exchange.advance_time(ts(0));

        exchange
            .submit(OrderTicket::market("tok", Side::Buy, 10.0).unwrap())
            .unwrap();
        let resting = exchange
            .submit(OrderTicket::limit("tok", Side::Buy, 10.0, 0.30).unwrap())
            .unwrap()
            .id;
        let resting_too = exchange
            .submit(OrderTicket::limit("tok", Side::Sell, 10.0, 0.90).unwrap())
            .unwrap()
            .id;

        let cancelled = exchange.cancel_all();
        assert_eq!(cancelled, vec![resting, resting_too]);
        assert_eq!(exchange.portfolio_summary().open_orders, 0);
    }

    #[test]
    fn test_sell_beyond_position_opens_short() {
        let mut exchange = zero_fee_exchange(&[0.50]);
        exchange.advance_time(ts(0));

        exchange
            .submit(OrderTicket::market("tok", Side::Sell, 40.0).unwrap())
            .unwrap();

        let position = exchange.position("tok").unwrap();
        assert!((position.size + 40.0).abs() < 1e-9);
        // Nothing realized: there was no long to close against.
        assert_eq!(position.realized_pnl, 0.0);
        assert!((exchange.cash() - 10_020.0).abs() < 1e-9);
    }

    #[test]
    fn test_partial_close_realizes_only_closed_size() {
        let mut exchange = zero_fee_exchange(&[0.50, 0.60]);
        exchange.advance_time(ts(0));
        exchange
            .submit(OrderTicket::market("tok", Side::Buy, 100.0).unwrap())
            .unwrap();

        exchange.advance_time(ts(1));
        exchange
            .submit(OrderTicket::market("tok", Side::Sell, 30.0).unwrap())
            .unwrap();

        let position = exchange.position("tok").unwrap();
        assert!((position.size - 70.0).abs() < 1e-9);
        assert!((position.realized_pnl - 3.0).abs() < 1e-9);
        assert!((position.avg_entry_price - 0.50).abs() < 1e-9);
    }

    #[test]
    fn test_match_pending_skips_buy_it_cannot_fund() {
        let config = ExchangeConfig {
            slippage_pct: 0.0,
            ..ExchangeConfig::default()
        };
        let mut exchange = SimulatedExchange::new(50.0, config);
        exchange.load_price_series("tok", series(&[0.50, 0.60, 0.30]));
        exchange.advance_time(ts(0));

        let order_id = exchange
            .submit(OrderTicket::limit("tok", Side::Buy, 1_000.0, 0.40).unwrap())
            .unwrap()
            .id;

        exchange.advance_time(ts(2));
        assert!(exchange.match_pending().is_empty());
        assert_eq!(exchange.order(order_id).unwrap().status, OrderStatus::Live);
        assert_eq!(exchange.cash(), 50.0);
    }

    #[test]
    fn test_order_book_shape() {
        let mut exchange = zero_fee_exchange(&[0.50]);
        exchange.advance_time(ts(0));

        let book = exchange.order_book("tok").unwrap();
        assert_eq!(book.bids.len(), 5);
        assert_eq!(book.asks.len(), 5);

        // Levels widen away from the touch and shrink in size.
        for i in 1..book.bids.len() {
            assert!(book.bids[i].price < book.bids[i - 1].price);
            assert!(book.asks[i].price > book.asks[i - 1].price);
            assert!(book.bids[i].size < book.bids[i - 1].size);
        }
        assert!((book.asks[0].price - 0.50 * 1.01).abs() < 1e-12);
        assert!((book.bids[0].price - 0.50 * 0.99).abs() < 1e-12);
    }

    #[test]
    fn test_quote_applies_half_spread() {
        let mut exchange = zero_fee_exchange(&[0.50]);
        exchange.advance_time(ts(0));

        assert!((exchange.quote("tok", Side::Buy).unwrap() - 0.505).abs() < 1e-12);
        assert!((exchange.quote("tok", Side::Sell).unwrap() - 0.495).abs() < 1e-12);
    }

    #[test]
    fn test_synthesized_trades_follow_price_steps() {
        let mut exchange = zero_fee_exchange(&[0.50, 0.52, 0.52, 0.47]);
        exchange.advance_time(ts(3));

        let trades = exchange.recent_trades("tok");
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].side, Side::Buy);
        assert_eq!(trades[1].side, Side::Sell);
        // Larger move, larger synthetic size.
        assert!(trades[1].size > trades[0].size);
    }

    #[test]
    fn test_synthesized_trades_respect_clock() {
        let mut exchange = zero_fee_exchange(&[0.50, 0.52, 0.47]);
        exchange.advance_time(ts(1));

        let trades = exchange.recent_trades("tok");
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].side, Side::Buy);
    }

    #[test]
    fn test_loaded_trade_series_is_time_gated() {
        let mut exchange = zero_fee_exchange(&[0.50, 0.52]);
        exchange.load_trade_series(
            "tok",
            vec![
                MarketTrade {
                    timestamp: ts(0),
                    price: 0.50,
                    size: 10.0,
                    side: Side::Buy,
                },
                MarketTrade {
                    timestamp: ts(5),
                    price: 0.52,
                    size: 10.0,
                    side: Side::Buy,
                },
            ],
        );

        exchange.advance_time(ts(1));
        assert_eq!(exchange.recent_trades("tok").len(), 1);
    }

    #[test]
    fn test_portfolio_summary_counts() {
        let mut exchange = zero_fee_exchange(&[0.50]);
        exchange.advance_time(ts(0));

        exchange
            .submit(OrderTicket::market("tok", Side::Buy, 10.0).unwrap())
            .unwrap();
        exchange
            .submit(OrderTicket::limit("tok", Side::Sell, 10.0, 0.90).unwrap())
            .unwrap();

        let summary = exchange.portfolio_summary();
        assert_eq!(summary.open_orders, 1);
        assert_eq!(summary.total_trades, 1);
        assert!((summary.cash - 9_995.0).abs() < 1e-9);
        assert!((summary.equity - 10_000.0).abs() < 1e-9);
        let detail = &summary.positions["tok"];
        assert_eq!(detail.current_price, Some(0.50));
    }

    #[test]
    fn test_order_ids_are_sequential() {
        let mut exchange = zero_fee_exchange(&[0.50]);
        exchange.advance_time(ts(0));

        let first = exchange
            .submit(OrderTicket::market("tok", Side::Buy, 1.0).unwrap())
            .unwrap()
            .id;
        let second = exchange
            .submit(OrderTicket::limit("tok", Side::Buy, 1.0, 0.30).unwrap())
            .unwrap()
            .id;
        assert_eq!(second, first + 1);
    }
}
