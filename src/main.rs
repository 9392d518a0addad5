use chrono::{Duration, Utc};
use clap::{Parser, ValueEnum};

use polysim::data::{
    ClobHistoryClient, DataClientConfig, MarketScenario, SyntheticDataSource,
};
use polysim::strategy::{
    BuyAndHoldStrategy, MeanReversionConfig, MeanReversionStrategy, Strategy,
};
use polysim::{BacktestConfig, BacktestEngine, ExchangeConfig, Result};

/// Replay historical prediction-market prices through a simulated
/// exchange and report strategy performance.
#[derive(Parser)]
#[command(name = "polysim", version, about)]
struct Cli {
    /// CLOB token id to fetch history for; omit to run a synthetic scenario
    #[arg(long)]
    token_id: Option<String>,

    /// Synthetic scenario used when no token id is given
    #[arg(long, value_enum, default_value = "sideways")]
    scenario: Scenario,

    /// Strategy to evaluate
    #[arg(long, value_enum, default_value = "mean-reversion")]
    strategy: StrategyKind,

    /// Days of history to simulate
    #[arg(long, default_value_t = 30)]
    days: i64,

    /// Bar resolution in minutes
    #[arg(long, default_value_t = 5)]
    step_minutes: i64,

    /// Starting cash
    #[arg(long, default_value_t = 10_000.0)]
    capital: f64,

    /// Market-order slippage (0.001 = 0.1%)
    #[arg(long, default_value_t = 0.001)]
    slippage: f64,

    /// Taker fee rate
    #[arg(long, default_value_t = 0.0)]
    taker_fee: f64,

    /// Maker fee rate
    #[arg(long, default_value_t = 0.0)]
    maker_fee: f64,

    /// Annual risk-free rate used by Sharpe/Sortino
    #[arg(long, default_value_t = 0.05)]
    risk_free_rate: f64,

    /// Seed for the synthetic generator
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Print the grouped JSON summary instead of the report
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Scenario {
    Uptrend,
    Downtrend,
    Sideways,
    Volatile,
    WithGaps,
    DrawdownTest,
}

impl From<Scenario> for MarketScenario {
    fn from(scenario: Scenario) -> Self {
        match scenario {
            Scenario::Uptrend => MarketScenario::Uptrend,
            Scenario::Downtrend => MarketScenario::Downtrend,
            Scenario::Sideways => MarketScenario::Sideways,
            Scenario::Volatile => MarketScenario::Volatile,
            Scenario::WithGaps => MarketScenario::WithGaps,
            Scenario::DrawdownTest => MarketScenario::DrawdownTest,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyKind {
    BuyAndHold,
    MeanReversion,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();

    let end = Utc::now();
    let start = end - Duration::days(cli.days);
    let token_id = cli.token_id.clone().unwrap_or_else(|| "SYNTH".to_string());

    let mut config = BacktestConfig::new(token_id.as_str(), start, end);
    config.initial_capital = cli.capital;
    config.time_step = Duration::minutes(cli.step_minutes);
    config.risk_free_rate = cli.risk_free_rate;
    config.exchange = ExchangeConfig {
        slippage_pct: cli.slippage,
        taker_fee: cli.taker_fee,
        maker_fee: cli.maker_fee,
        ..ExchangeConfig::default()
    };

    let mut engine = BacktestEngine::new(config);

    if cli.token_id.is_some() {
        tracing::info!("📡 Fetching {} history from the CLOB", token_id);
        let client = ClobHistoryClient::new(DataClientConfig::default())?;
        engine.load_data(&client).await?;
    } else {
        tracing::info!("🔬 Generating synthetic {:?} scenario", cli.scenario);
        let source = SyntheticDataSource::new(cli.scenario.into(), cli.step_minutes, cli.seed);
        engine.load_data(&source).await?;
    }

    engine.set_strategy(build_strategy(cli.strategy, token_id.as_str()));

    let result = engine.run()?;

    if cli.json {
        match serde_json::to_string_pretty(&result.metrics.summary()) {
            Ok(json) => println!("{}", json),
            Err(e) => tracing::error!("Failed to serialize summary: {}", e),
        }
    } else {
        result.metrics.print_report();
    }

    for warning in &result.warnings {
        tracing::warn!("⚠️  {}", warning);
    }

    Ok(())
}

fn build_strategy(kind: StrategyKind, token_id: &str) -> Box<dyn Strategy> {
    match kind {
        StrategyKind::BuyAndHold => Box::new(BuyAndHoldStrategy::new(token_id, 0.95)),
        StrategyKind::MeanReversion => Box::new(MeanReversionStrategy::new(
            token_id,
            MeanReversionConfig::default(),
        )),
    }
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter("polysim=info")
        .init();
}
