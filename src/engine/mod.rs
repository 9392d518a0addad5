use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::data::DataSource;
use crate::error::{BacktestError, Result};
use crate::exchange::{ExchangeConfig, PortfolioSummary, SimulatedExchange};
use crate::metrics::{BacktestMetrics, MetricsCalculator};
use crate::models::{EquityPoint, MarketTrade, PricePoint, TradeRecord};
use crate::strategy::Strategy;

/// Warn below this fraction of expected bars; the run still proceeds.
const MIN_COVERAGE: f64 = 0.8;
const PROGRESS_LOG_INTERVAL: usize = 1000;

/// Configuration for one backtest run.
#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub token_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub initial_capital: f64,
    /// Simulation resolution; also sizes the warmup window.
    pub time_step: Duration,
    /// Lead-in periods fetched before `start` to prime stateful
    /// strategies; excluded from scored results.
    pub warmup_periods: u32,
    /// Annual risk-free rate fed into Sharpe/Sortino.
    pub risk_free_rate: f64,
    pub exchange: ExchangeConfig,
}

impl BacktestConfig {
    pub fn new(token_id: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            token_id: token_id.into(),
            start,
            end,
            initial_capital: 10_000.0,
            time_step: Duration::minutes(1),
            warmup_periods: 60,
            risk_free_rate: 0.05,
            exchange: ExchangeConfig::default(),
        }
    }
}

/// Everything a finished run produces, consumed by report rendering.
pub struct BacktestResult {
    pub id: Uuid,
    pub config: BacktestConfig,
    pub metrics: BacktestMetrics,
    pub equity_curve: Vec<EquityPoint>,
    pub trades: Vec<TradeRecord>,
    pub final_portfolio: PortfolioSummary,
    /// Degraded-but-completed conditions; always returned, never dropped.
    pub warnings: Vec<String>,
}

/// Replay orchestrator: owns the simulation clock, drives the exchange
/// tick by tick, invokes the strategy and records the equity curve.
///
/// One tick fully completes (advance → match → strategy → record) before
/// the next begins; given identical inputs the run is deterministic. The
/// strategy callback runs synchronously with no timeout: an unbounded
/// callback stalls the run.
pub struct BacktestEngine {
    config: BacktestConfig,
    price_data: Option<Vec<PricePoint>>,
    trade_data: Option<Vec<MarketTrade>>,
    strategy: Option<Box<dyn Strategy>>,
    warnings: Vec<String>,
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig) -> Self {
        Self {
            config,
            price_data: None,
            trade_data: None,
            strategy: None,
            warnings: Vec::new(),
        }
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Warnings accumulated so far (data coverage etc).
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Fetch the price series, plus the trade series when available, for
    /// the configured window extended backwards by the warmup.
    pub async fn load_data(&mut self, source: &dyn DataSource) -> Result<()> {
        let warmup = self.config.time_step * self.config.warmup_periods as i32;
        let fetch_start = self.config.start - warmup;

        tracing::info!(
            "Loading {} from {} to {} ({} warmup periods)",
            self.config.token_id,
            fetch_start,
            self.config.end,
            self.config.warmup_periods
        );

        let prices = source
            .load_price_series(&self.config.token_id, fetch_start, self.config.end)
            .await?;
        if prices.is_empty() {
            return Err(BacktestError::Data(format!(
                "no price data available for {}",
                self.config.token_id
            )));
        }

        let expected_bars = (self.config.end - self.config.start).num_seconds() as f64
            / self.config.time_step.num_seconds().max(1) as f64;
        let coverage = if expected_bars > 0.0 {
            prices.len() as f64 / expected_bars
        } else {
            0.0
        };
        tracing::info!(
            "Data coverage: {:.1}% ({} bars)",
            coverage * 100.0,
            prices.len()
        );
        if coverage < MIN_COVERAGE {
            self.warnings
                .push(format!("Low data coverage: {:.1}%", coverage * 100.0));
        }

        match source
            .load_trade_series(&self.config.token_id, fetch_start, self.config.end)
            .await
        {
            Ok(trades) => self.trade_data = Some(trades),
            Err(e) => {
                tracing::warn!("Could not load trade series: {}", e);
                self.trade_data = None;
            }
        }

        self.price_data = Some(prices);
        Ok(())
    }

    /// Install the strategy invoked once per tick.
    pub fn set_strategy(&mut self, strategy: Box<dyn Strategy>) {
        self.strategy = Some(strategy);
    }

    /// Run the simulation over every loaded timestamp inside the scored
    /// window. A strategy failure on one tick is recorded as a warning
    /// tagged with that timestamp and never aborts the run.
    pub fn run(&mut self) -> Result<BacktestResult> {
        let prices = self.price_data.clone().ok_or_else(|| {
            BacktestError::Configuration("data not loaded, call load_data first".to_string())
        })?;
        let mut strategy = self.strategy.take().ok_or_else(|| {
            BacktestError::Configuration("strategy not set, call set_strategy first".to_string())
        })?;

        let mut exchange =
            SimulatedExchange::new(self.config.initial_capital, self.config.exchange.clone());
        exchange.load_price_series(self.config.token_id.as_str(), prices.clone());
        if let Some(trades) = &self.trade_data {
            exchange.load_trade_series(self.config.token_id.as_str(), trades.clone());
        }

        let ticks: Vec<DateTime<Utc>> = prices
            .iter()
            .map(|p| p.timestamp)
            .filter(|ts| *ts >= self.config.start && *ts <= self.config.end)
            .collect();
        tracing::info!(
            "Simulating {} ticks with strategy {}",
            ticks.len(),
            strategy.name()
        );

        let mut warnings = self.warnings.clone();
        let mut equity_curve = Vec::with_capacity(ticks.len());

        for (i, ts) in ticks.iter().enumerate() {
            exchange.advance_time(*ts);

            let filled = exchange.match_pending();
            if !filled.is_empty() {
                tracing::debug!("Filled {} resting orders at {}", filled.len(), ts);
            }

            if let Err(e) = strategy.on_tick(&mut exchange, *ts) {
                tracing::error!("Strategy error at {}: {}", ts, e);
                warnings.push(format!("Strategy error at {}: {}", ts, e));
            }

            let equity = exchange.equity();
            let cash = exchange.cash();
            equity_curve.push(EquityPoint {
                timestamp: *ts,
                equity,
                cash,
                position_value: equity - cash,
            });

            if i > 0 && i % PROGRESS_LOG_INTERVAL == 0 {
                tracing::info!("Progress: {}/{} ticks", i, ticks.len());
            }
        }

        self.strategy = Some(strategy);

        let trades = exchange.ledger().to_vec();
        let metrics = MetricsCalculator::new(
            &equity_curve,
            &trades,
            self.config.initial_capital,
            self.config.risk_free_rate,
        )
        .calculate();

        tracing::info!(
            "Backtest complete: {} fills, total return {:.2}%",
            trades.len(),
            metrics.total_return_pct
        );

        Ok(BacktestResult {
            id: Uuid::new_v4(),
            config: self.config.clone(),
            metrics,
            equity_curve,
            trades,
            final_portfolio: exchange.portfolio_summary(),
            warnings,
        })
    }
}
