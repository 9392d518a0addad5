use chrono::{DateTime, NaiveDate, Utc};
use serde::{Serialize, Serializer};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};

use crate::models::{EquityPoint, Side, TradeRecord};

const TRADING_DAYS_PER_YEAR: f64 = 252.0;
const SORTINO_CAP: f64 = 100.0;
const KELLY_CAP: f64 = 0.5;

/// A ratio that loses its denominator in degenerate runs.
///
/// Explicit variant instead of IEEE infinity so serialized results stay
/// portable across numeric representations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RatioOutcome {
    Value(f64),
    Unbounded,
}

impl RatioOutcome {
    pub fn value(&self) -> Option<f64> {
        match self {
            RatioOutcome::Value(v) => Some(*v),
            RatioOutcome::Unbounded => None,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        matches!(self, RatioOutcome::Unbounded)
    }

    fn to_json(self, decimals: i32) -> serde_json::Value {
        match self {
            RatioOutcome::Value(v) => json!(round_to(v, decimals)),
            RatioOutcome::Unbounded => json!("unbounded"),
        }
    }
}

impl Serialize for RatioOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RatioOutcome::Value(v) => serializer.serialize_f64(*v),
            RatioOutcome::Unbounded => serializer.serialize_str("unbounded"),
        }
    }
}

impl std::fmt::Display for RatioOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RatioOutcome::Value(v) => write!(f, "{:.3}", v),
            RatioOutcome::Unbounded => f.write_str("unbounded"),
        }
    }
}

/// Complete performance statistics for one backtest run.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestMetrics {
    // Time period
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub trading_days: i64,

    // Returns
    pub initial_capital: f64,
    pub final_equity: f64,
    pub total_return_pct: f64,
    pub annualized_return_pct: f64,

    // Risk metrics
    pub sharpe_ratio: f64,
    pub sortino_ratio: RatioOutcome,
    pub calmar_ratio: RatioOutcome,
    pub max_drawdown_pct: f64,
    pub avg_drawdown_pct: f64,
    pub max_drawdown_duration_days: i64,

    // Trade statistics (per round trip)
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate_pct: f64,
    pub profit_factor: RatioOutcome,
    pub avg_trade_return_pct: f64,
    pub avg_winning_trade_pct: f64,
    pub avg_losing_trade_pct: f64,
    pub largest_win_pct: f64,
    pub largest_loss_pct: f64,

    // Volume
    pub total_volume: f64,
    pub total_fees: f64,

    // Sizing
    pub kelly_fraction: f64,
}

/// Computes [`BacktestMetrics`] from a finished equity curve and ledger.
///
/// Both inputs must already ascend by timestamp, which the replay engine
/// guarantees.
pub struct MetricsCalculator<'a> {
    equity_curve: &'a [EquityPoint],
    trades: &'a [TradeRecord],
    initial_capital: f64,
    /// Annual risk-free rate used by Sharpe and Sortino.
    risk_free_rate: f64,
}

impl<'a> MetricsCalculator<'a> {
    pub fn new(
        equity_curve: &'a [EquityPoint],
        trades: &'a [TradeRecord],
        initial_capital: f64,
        risk_free_rate: f64,
    ) -> Self {
        Self {
            equity_curve,
            trades,
            initial_capital,
            risk_free_rate,
        }
    }

    pub fn calculate(&self) -> BacktestMetrics {
        let (Some(first), Some(last)) = (self.equity_curve.first(), self.equity_curve.last())
        else {
            return self.empty();
        };

        let start_date = first.timestamp;
        let end_date = last.timestamp;
        let trading_days = (end_date - start_date).num_days().max(1);

        let final_equity = last.equity;
        let total_return = (final_equity - self.initial_capital) / self.initial_capital;
        let annualized_return = annualize_return(total_return, trading_days);

        let daily_returns = self.daily_returns();
        let sharpe = self.sharpe(&daily_returns);
        let sortino = self.sortino(&daily_returns);
        let (max_drawdown, avg_drawdown, max_dd_duration) = self.drawdowns();
        let calmar = calmar(annualized_return, max_drawdown);

        let stats = trade_stats(self.trades);
        let total_volume: f64 = self.trades.iter().map(|t| t.size * t.price).sum();
        let total_fees: f64 = self.trades.iter().map(|t| t.fee).sum();

        BacktestMetrics {
            start_date,
            end_date,
            trading_days,
            initial_capital: self.initial_capital,
            final_equity,
            total_return_pct: total_return * 100.0,
            annualized_return_pct: annualized_return * 100.0,
            sharpe_ratio: sharpe,
            sortino_ratio: sortino,
            calmar_ratio: calmar,
            max_drawdown_pct: max_drawdown * 100.0,
            avg_drawdown_pct: avg_drawdown * 100.0,
            max_drawdown_duration_days: max_dd_duration,
            total_trades: stats.total,
            winning_trades: stats.winning,
            losing_trades: stats.losing,
            win_rate_pct: stats.win_rate * 100.0,
            profit_factor: stats.profit_factor,
            avg_trade_return_pct: stats.avg_return * 100.0,
            avg_winning_trade_pct: stats.avg_win * 100.0,
            avg_losing_trade_pct: stats.avg_loss * 100.0,
            largest_win_pct: stats.largest_win * 100.0,
            largest_loss_pct: stats.largest_loss * 100.0,
            total_volume,
            total_fees,
            kelly_fraction: stats.kelly_fraction(),
        }
    }

    fn empty(&self) -> BacktestMetrics {
        let now = Utc::now();
        BacktestMetrics {
            start_date: now,
            end_date: now,
            trading_days: 0,
            initial_capital: self.initial_capital,
            final_equity: self.initial_capital,
            total_return_pct: 0.0,
            annualized_return_pct: 0.0,
            sharpe_ratio: 0.0,
            sortino_ratio: RatioOutcome::Value(0.0),
            calmar_ratio: RatioOutcome::Value(0.0),
            max_drawdown_pct: 0.0,
            avg_drawdown_pct: 0.0,
            max_drawdown_duration_days: 0,
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            win_rate_pct: 0.0,
            profit_factor: RatioOutcome::Value(0.0),
            avg_trade_return_pct: 0.0,
            avg_winning_trade_pct: 0.0,
            avg_losing_trade_pct: 0.0,
            largest_win_pct: 0.0,
            largest_loss_pct: 0.0,
            total_volume: 0.0,
            total_fees: 0.0,
            kelly_fraction: 0.0,
        }
    }

    /// Collapse the equity curve to one value per calendar date (last
    /// observation wins), then take simple percentage changes between
    /// consecutive dates. The first day is measured against the initial
    /// capital.
    fn daily_returns(&self) -> Vec<f64> {
        let mut daily: BTreeMap<NaiveDate, f64> = BTreeMap::new();
        for point in self.equity_curve {
            daily.insert(point.timestamp.date_naive(), point.equity);
        }

        let mut returns = Vec::with_capacity(daily.len());
        let mut prev = self.initial_capital;
        for equity in daily.values() {
            if prev > 0.0 {
                returns.push((equity - prev) / prev);
            }
            prev = *equity;
        }
        returns
    }

    /// Annualized Sharpe ratio over daily returns. Requires at least two
    /// returns and a non-zero sample deviation, else 0.
    fn sharpe(&self, daily_returns: &[f64]) -> f64 {
        if daily_returns.len() < 2 {
            return 0.0;
        }
        let n = daily_returns.len() as f64;
        let mean = daily_returns.iter().sum::<f64>() / n;
        let daily_rf = self.risk_free_rate / TRADING_DAYS_PER_YEAR;

        let variance = daily_returns
            .iter()
            .map(|r| (r - mean).powi(2))
            .sum::<f64>()
            / (n - 1.0);
        let std_dev = variance.sqrt();
        if std_dev == 0.0 {
            return 0.0;
        }

        (mean - daily_rf) / std_dev * TRADING_DAYS_PER_YEAR.sqrt()
    }

    /// Annualized Sortino ratio. The denominator is the root-mean-square
    /// of returns clipped below the daily risk-free rate (population
    /// divisor). A zero denominator is 0 when the mean sits at or under
    /// the risk-free rate and Unbounded above it; finite results are
    /// capped at 100.
    fn sortino(&self, daily_returns: &[f64]) -> RatioOutcome {
        if daily_returns.len() < 2 {
            return RatioOutcome::Value(0.0);
        }
        let n = daily_returns.len() as f64;
        let mean = daily_returns.iter().sum::<f64>() / n;
        let daily_rf = self.risk_free_rate / TRADING_DAYS_PER_YEAR;

        let downside_variance = daily_returns
            .iter()
            .map(|r| (r - daily_rf).min(0.0).powi(2))
            .sum::<f64>()
            / n;
        let downside_dev = downside_variance.sqrt();

        if downside_dev == 0.0 {
            return if mean <= daily_rf {
                RatioOutcome::Value(0.0)
            } else {
                RatioOutcome::Unbounded
            };
        }

        let annualized = (mean - daily_rf) / downside_dev * TRADING_DAYS_PER_YEAR.sqrt();
        RatioOutcome::Value(annualized.min(SORTINO_CAP))
    }

    /// Max and mean drawdown over every point not setting a new peak,
    /// plus the longest peak-to-recovery span in days. An unresolved
    /// final drawdown is measured to the last timestamp.
    fn drawdowns(&self) -> (f64, f64, i64) {
        let Some(first) = self.equity_curve.first() else {
            return (0.0, 0.0, 0);
        };

        let mut peak = first.equity;
        let mut max_drawdown = 0.0f64;
        let mut drawdown_sum = 0.0;
        let mut drawdown_count = 0usize;
        let mut drawdown_start: Option<DateTime<Utc>> = None;
        let mut max_duration = 0i64;

        for point in self.equity_curve {
            if point.equity > peak {
                peak = point.equity;
                if let Some(start) = drawdown_start.take() {
                    max_duration = max_duration.max((point.timestamp - start).num_days());
                }
            } else {
                let drawdown = if peak > 0.0 {
                    (peak - point.equity) / peak
                } else {
                    0.0
                };
                max_drawdown = max_drawdown.max(drawdown);
                drawdown_sum += drawdown;
                drawdown_count += 1;
                if drawdown_start.is_none() {
                    drawdown_start = Some(point.timestamp);
                }
            }
        }

        if let (Some(start), Some(last)) = (drawdown_start, self.equity_curve.last()) {
            max_duration = max_duration.max((last.timestamp - start).num_days());
        }

        let avg_drawdown = if drawdown_count > 0 {
            drawdown_sum / drawdown_count as f64
        } else {
            0.0
        };

        (max_drawdown, avg_drawdown, max_duration)
    }
}

/// (1 + r)^(365/days) − 1. Zero-length periods annualize to 0; losses at
/// or past −100% stay −1 so fractional powers of negative bases never
/// arise.
fn annualize_return(total_return: f64, days: i64) -> f64 {
    if days <= 0 {
        return 0.0;
    }
    if total_return <= -1.0 {
        return -1.0;
    }
    (1.0 + total_return).powf(365.0 / days as f64) - 1.0
}

/// Calmar = annualized return / max drawdown; with no drawdown the ratio
/// is 0 for flat-or-negative returns and Unbounded for positive ones.
fn calmar(annualized_return: f64, max_drawdown: f64) -> RatioOutcome {
    if max_drawdown == 0.0 {
        if annualized_return <= 0.0 {
            RatioOutcome::Value(0.0)
        } else {
            RatioOutcome::Unbounded
        }
    } else {
        RatioOutcome::Value(annualized_return / max_drawdown)
    }
}

/// Reduce the ledger to per-round-trip percentage returns with a
/// same-token stack: a BUY pushes an entry, a SELL pops the most recent
/// BUY into `(exit − entry) / entry`, and a SELL with no BUY on top opens
/// a naive short instead. The short handling is a simplification kept
/// from the reference behavior, not exact for interleaved multi-entry
/// sequences.
fn round_trips(trades: &[TradeRecord]) -> Vec<f64> {
    let mut stacks: HashMap<&str, Vec<(f64, Side)>> = HashMap::new();
    let mut returns = Vec::new();

    for trade in trades {
        let stack = stacks.entry(trade.token_id.as_str()).or_default();
        match trade.side {
            Side::Buy => stack.push((trade.price, Side::Buy)),
            Side::Sell => match stack.last() {
                Some(&(entry_price, Side::Buy)) => {
                    stack.pop();
                    returns.push((trade.price - entry_price) / entry_price);
                }
                _ => stack.push((trade.price, Side::Sell)),
            },
        }
    }

    returns
}

#[derive(Debug, Clone)]
struct TradeStats {
    total: usize,
    winning: usize,
    losing: usize,
    win_rate: f64,
    profit_factor: RatioOutcome,
    avg_return: f64,
    avg_win: f64,
    /// Mean of losing returns; negative when losses exist.
    avg_loss: f64,
    largest_win: f64,
    largest_loss: f64,
}

impl TradeStats {
    /// Kelly fraction from win rate and average win/loss magnitudes,
    /// clamped to [0, 0.5]; 0 when there is no average win.
    fn kelly_fraction(&self) -> f64 {
        if self.avg_win == 0.0 {
            return 0.0;
        }
        let avg_loss = self.avg_loss.abs();
        let kelly = (self.win_rate * self.avg_win - (1.0 - self.win_rate) * avg_loss)
            / self.avg_win;
        kelly.clamp(0.0, KELLY_CAP)
    }
}

fn trade_stats(trades: &[TradeRecord]) -> TradeStats {
    let trips = round_trips(trades);
    if trips.is_empty() {
        // Fills that never closed a round trip still count as activity.
        return TradeStats {
            total: trades.len(),
            winning: 0,
            losing: 0,
            win_rate: 0.0,
            profit_factor: RatioOutcome::Value(0.0),
            avg_return: 0.0,
            avg_win: 0.0,
            avg_loss: 0.0,
            largest_win: 0.0,
            largest_loss: 0.0,
        };
    }

    let wins: Vec<f64> = trips.iter().copied().filter(|r| *r > 0.0).collect();
    let losses: Vec<f64> = trips.iter().copied().filter(|r| *r < 0.0).collect();

    let gross_profit: f64 = wins.iter().sum();
    let gross_loss: f64 = losses.iter().map(|r| r.abs()).sum();

    let profit_factor = if gross_loss > 0.0 {
        RatioOutcome::Value(gross_profit / gross_loss)
    } else if gross_profit > 0.0 {
        RatioOutcome::Unbounded
    } else {
        RatioOutcome::Value(0.0)
    };

    TradeStats {
        total: trips.len(),
        winning: wins.len(),
        losing: losses.len(),
        win_rate: wins.len() as f64 / trips.len() as f64,
        profit_factor,
        avg_return: trips.iter().sum::<f64>() / trips.len() as f64,
        avg_win: if wins.is_empty() {
            0.0
        } else {
            gross_profit / wins.len() as f64
        },
        avg_loss: if losses.is_empty() {
            0.0
        } else {
            losses.iter().sum::<f64>() / losses.len() as f64
        },
        largest_win: wins.iter().copied().fold(0.0, f64::max),
        largest_loss: losses.iter().copied().fold(0.0, f64::min),
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

impl BacktestMetrics {
    /// Grouped summary with fixed rounding: two decimals for percentages
    /// and currency, three for ratios, four for fees.
    pub fn summary(&self) -> serde_json::Value {
        json!({
            "period": {
                "start": self.start_date.to_rfc3339(),
                "end": self.end_date.to_rfc3339(),
                "trading_days": self.trading_days,
            },
            "returns": {
                "initial_capital": round_to(self.initial_capital, 2),
                "final_equity": round_to(self.final_equity, 2),
                "total_return_pct": round_to(self.total_return_pct, 2),
                "annualized_return_pct": round_to(self.annualized_return_pct, 2),
            },
            "risk": {
                "sharpe_ratio": round_to(self.sharpe_ratio, 3),
                "sortino_ratio": self.sortino_ratio.to_json(3),
                "calmar_ratio": self.calmar_ratio.to_json(3),
                "max_drawdown_pct": round_to(self.max_drawdown_pct, 2),
                "avg_drawdown_pct": round_to(self.avg_drawdown_pct, 2),
                "max_drawdown_duration_days": self.max_drawdown_duration_days,
            },
            "trades": {
                "total": self.total_trades,
                "winning": self.winning_trades,
                "losing": self.losing_trades,
                "win_rate_pct": round_to(self.win_rate_pct, 2),
                "profit_factor": self.profit_factor.to_json(3),
                "avg_trade_return_pct": round_to(self.avg_trade_return_pct, 2),
                "avg_winning_trade_pct": round_to(self.avg_winning_trade_pct, 2),
                "avg_losing_trade_pct": round_to(self.avg_losing_trade_pct, 2),
                "largest_win_pct": round_to(self.largest_win_pct, 2),
                "largest_loss_pct": round_to(self.largest_loss_pct, 2),
            },
            "volume": {
                "total_volume": round_to(self.total_volume, 2),
                "total_fees": round_to(self.total_fees, 4),
            },
            "kelly_fraction": round_to(self.kelly_fraction, 3),
        })
    }

    /// Print a formatted report to stdout
    pub fn print_report(&self) {
        println!("\n╔═══════════════════════════════════════════════════════╗");
        println!("║             BACKTEST PERFORMANCE REPORT               ║");
        println!("╚═══════════════════════════════════════════════════════╝\n");

        println!(
            "PERIOD: {} → {} ({} days)",
            self.start_date.format("%Y-%m-%d"),
            self.end_date.format("%Y-%m-%d"),
            self.trading_days
        );

        println!("\n📊 RETURNS");
        println!("  Initial Capital:       ${:.2}", self.initial_capital);
        println!("  Final Equity:          ${:.2}", self.final_equity);
        println!("  Total Return:          {:+.2}%", self.total_return_pct);
        println!(
            "  Annualized Return:     {:+.2}%",
            self.annualized_return_pct
        );

        println!("\n⚠️  RISK");
        println!("  Sharpe Ratio:          {:.3}", self.sharpe_ratio);
        println!("  Sortino Ratio:         {}", self.sortino_ratio);
        println!("  Calmar Ratio:          {}", self.calmar_ratio);
        println!("  Max Drawdown:          {:.2}%", self.max_drawdown_pct);
        println!("  Avg Drawdown:          {:.2}%", self.avg_drawdown_pct);
        println!(
            "  Max DD Duration:       {} days",
            self.max_drawdown_duration_days
        );

        println!("\n📈 TRADES");
        println!("  Round Trips:           {}", self.total_trades);
        println!(
            "  Winning:               {} ({:.1}%)",
            self.winning_trades, self.win_rate_pct
        );
        println!("  Losing:                {}", self.losing_trades);
        println!("  Profit Factor:         {}", self.profit_factor);
        println!("  Avg Trade Return:      {:+.2}%", self.avg_trade_return_pct);
        println!(
            "  Avg Win / Avg Loss:    {:+.2}% / {:+.2}%",
            self.avg_winning_trade_pct, self.avg_losing_trade_pct
        );
        println!(
            "  Largest Win / Loss:    {:+.2}% / {:+.2}%",
            self.largest_win_pct, self.largest_loss_pct
        );

        println!("\n💰 VOLUME & FEES");
        println!("  Total Volume:          ${:.2}", self.total_volume);
        println!("  Total Fees:            ${:.4}", self.total_fees);

        println!("\n🎯 SIZING");
        println!("  Kelly Fraction:        {:.3}", self.kelly_fraction);

        println!("\n═══════════════════════════════════════════════════════\n");
    }
}
