use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use polysim::data::{DataSource, MarketScenario, SyntheticDataSource};
use polysim::models::{MarketTrade, OrderStatus, OrderTicket, PricePoint, Side};
use polysim::strategy::{FnStrategy, MeanReversionConfig, MeanReversionStrategy};
use polysim::{BacktestConfig, BacktestEngine, RatioOutcome, Result};

/// Serves a fixed in-memory series, window-filtered like a real source.
struct FixedSource {
    prices: Vec<PricePoint>,
}

#[async_trait]
impl DataSource for FixedSource {
    async fn load_price_series(
        &self,
        _token_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PricePoint>> {
        Ok(self
            .prices
            .iter()
            .copied()
            .filter(|p| p.timestamp >= start && p.timestamp <= end)
            .collect())
    }

    async fn load_trade_series(
        &self,
        _token_id: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<MarketTrade>> {
        Err(anyhow::anyhow!("no trade history").into())
    }
}

fn day(offset: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap() + Duration::days(offset)
}

fn daily_source(prices: &[f64]) -> FixedSource {
    FixedSource {
        prices: prices
            .iter()
            .enumerate()
            .map(|(i, price)| PricePoint {
                timestamp: day(i as i64),
                price: *price,
            })
            .collect(),
    }
}

fn daily_config(bars: usize) -> BacktestConfig {
    let mut config = BacktestConfig::new("tok", day(0), day(bars as i64 - 1));
    config.time_step = Duration::days(1);
    config.warmup_periods = 0;
    config.exchange.slippage_pct = 0.0;
    config
}

#[tokio::test]
async fn test_full_pipeline_buy_low_sell_high() {
    let _ = tracing_subscriber::fmt().with_env_filter("polysim=debug").try_init();

    // Two daily bars: buy 100 @ 0.50, sell 100 @ 0.60, no fees.
    let source = daily_source(&[0.50, 0.60]);
    let mut engine = BacktestEngine::new(daily_config(2));
    engine.load_data(&source).await.unwrap();

    let mut tick = 0usize;
    engine.set_strategy(Box::new(FnStrategy::new("scripted", move |exchange, _| {
        match tick {
            0 => {
                exchange.submit(OrderTicket::market("tok", Side::Buy, 100.0)?)?;
            }
            1 => {
                exchange.submit(OrderTicket::market("tok", Side::Sell, 100.0)?)?;
            }
            _ => {}
        }
        tick += 1;
        Ok(())
    })));

    let result = engine.run().unwrap();

    // Exchange accounting.
    assert!((result.final_portfolio.cash - 10_010.0).abs() < 1e-9);
    assert!((result.final_portfolio.equity - 10_010.0).abs() < 1e-9);
    let position = &result.final_portfolio.positions["tok"];
    assert!(position.size.abs() < 1e-9);
    assert!((position.realized_pnl - 10.0).abs() < 1e-9);

    // Ledger.
    assert_eq!(result.trades.len(), 2);
    assert_eq!(result.trades[0].side, Side::Buy);
    assert_eq!(result.trades[1].side, Side::Sell);

    // Metrics: one +20% round trip, +0.10% total return.
    let metrics = &result.metrics;
    assert_eq!(metrics.total_trades, 1);
    assert_eq!(metrics.winning_trades, 1);
    assert!((metrics.avg_winning_trade_pct - 20.0).abs() < 1e-9);
    assert!((metrics.total_return_pct - 0.10).abs() < 1e-9);
    assert!(metrics.profit_factor.is_unbounded());
    // Single win with no losses pushes Kelly to its cap.
    assert!((metrics.kelly_fraction - 0.5).abs() < 1e-12);
    assert!(result.warnings.is_empty());
}

#[tokio::test]
async fn test_resting_limit_order_fills_at_its_price() {
    // Price walks down through the resting bid two ticks after placement.
    let source = daily_source(&[0.50, 0.45, 0.38, 0.42]);
    let mut engine = BacktestEngine::new(daily_config(4));
    engine.load_data(&source).await.unwrap();

    let mut placed = false;
    engine.set_strategy(Box::new(FnStrategy::new("patient-bid", move |exchange, _| {
        if !placed {
            let order = exchange.submit(OrderTicket::limit("tok", Side::Buy, 100.0, 0.40)?)?;
            assert_eq!(order.status, OrderStatus::Live);
            placed = true;
        }
        Ok(())
    })));

    let result = engine.run().unwrap();

    assert_eq!(result.trades.len(), 1);
    let fill = &result.trades[0];
    // Filled exactly at the limit, not the lower market price.
    assert!((fill.price - 0.40).abs() < 1e-12);
    assert_eq!(fill.timestamp, day(2));
    assert!((result.final_portfolio.cash - (10_000.0 - 40.0)).abs() < 1e-9);
}

#[tokio::test]
async fn test_low_coverage_run_completes_with_warning() {
    // Expecting ~100 daily bars, supplying 70.
    let prices: Vec<f64> = (0..70).map(|i| 0.5 + (i % 7) as f64 * 0.001).collect();
    let source = daily_source(&prices);

    let mut config = BacktestConfig::new("tok", day(0), day(100));
    config.time_step = Duration::days(1);
    config.warmup_periods = 0;

    let mut engine = BacktestEngine::new(config);
    engine.load_data(&source).await.unwrap();
    engine.set_strategy(Box::new(FnStrategy::new("noop", |_, _| Ok(()))));

    let result = engine.run().unwrap();
    assert!(result
        .warnings
        .iter()
        .any(|w| w.contains("Low data coverage")));
    assert_eq!(result.equity_curve.len(), 70);
}

#[tokio::test]
async fn test_synthetic_pipeline_is_deterministic() {
    let run = || async {
        let source = SyntheticDataSource::new(MarketScenario::Sideways, 5, 42);
        let mut config = BacktestConfig::new("SYNTH", day(0), day(7));
        config.time_step = Duration::minutes(5);
        config.warmup_periods = 0;

        let mut engine = BacktestEngine::new(config);
        engine.load_data(&source).await.unwrap();
        engine.set_strategy(Box::new(MeanReversionStrategy::new(
            "SYNTH",
            MeanReversionConfig {
                ma_period: 12,
                entry_band: 0.02,
                exit_band: 0.01,
                order_size: 100.0,
            },
        )));
        engine.run().unwrap()
    };

    let first = run().await;
    let second = run().await;

    assert_eq!(first.equity_curve.len(), second.equity_curve.len());
    assert_eq!(first.trades.len(), second.trades.len());
    let last_a = first.equity_curve.last().unwrap();
    let last_b = second.equity_curve.last().unwrap();
    assert_eq!(last_a.equity, last_b.equity);
    assert_eq!(
        first.metrics.total_return_pct,
        second.metrics.total_return_pct
    );
}

#[tokio::test]
async fn test_drawdown_scenario_produces_drawdown_metrics() {
    let source = SyntheticDataSource::new(MarketScenario::DrawdownTest, 5, 42);
    let mut config = BacktestConfig::new("SYNTH", day(0), day(7));
    config.time_step = Duration::minutes(5);
    config.warmup_periods = 0;

    let mut engine = BacktestEngine::new(config);
    engine.load_data(&source).await.unwrap();

    // Hold through the collapse: drawdown must show up in the metrics.
    let mut entered = false;
    engine.set_strategy(Box::new(FnStrategy::new("hold", move |exchange, _| {
        if !entered {
            let price = exchange.price_at("SYNTH")?;
            let size = exchange.cash() * 0.9 / price;
            exchange.submit(OrderTicket::market("SYNTH", Side::Buy, size)?)?;
            entered = true;
        }
        Ok(())
    })));

    let result = engine.run().unwrap();
    let metrics = &result.metrics;

    assert!(metrics.max_drawdown_pct > 10.0);
    assert!(metrics.avg_drawdown_pct > 0.0);
    assert!(metrics.max_drawdown_duration_days >= 1);
    // A real drawdown keeps Calmar finite, whatever its sign.
    assert!(matches!(metrics.calmar_ratio, RatioOutcome::Value(_)));
}

#[tokio::test]
async fn test_strategy_panic_free_error_isolation_end_to_end() {
    let source = daily_source(&[0.5, 0.5, 0.5, 0.5, 0.5]);
    let mut engine = BacktestEngine::new(daily_config(5));
    engine.load_data(&source).await.unwrap();

    // Queries for an unknown token fail every tick; the run still
    // finishes with one warning per tick.
    engine.set_strategy(Box::new(FnStrategy::new("lost", |exchange, _| {
        exchange.price_at("unknown-token")?;
        Ok(())
    })));

    let result = engine.run().unwrap();
    assert_eq!(result.equity_curve.len(), 5);
    assert_eq!(
        result
            .warnings
            .iter()
            .filter(|w| w.contains("Strategy error"))
            .count(),
        5
    );
    // The portfolio never moved.
    assert_eq!(result.final_portfolio.cash, 10_000.0);
}
