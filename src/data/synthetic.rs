use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::DataSource;
use crate::error::Result;
use crate::models::{MarketTrade, PricePoint};

// Generated probabilities stay strictly inside the open interval.
const PRICE_FLOOR: f64 = 0.01;
const PRICE_CEIL: f64 = 0.99;

/// Market scenario types for synthetic data generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketScenario {
    /// Steady drift toward certainty with noise
    Uptrend,
    /// Steady drift toward zero with noise
    Downtrend,
    /// Mean-reverting chop around the starting probability
    Sideways,
    /// Large swings (±5% per bar)
    Volatile,
    /// Contains time gaps (missing bars)
    WithGaps,
    /// Slight rise, then a sharp collapse
    DrawdownTest,
}

/// Generates reproducible synthetic probability series for backtesting.
///
/// All randomness in the crate lives here, behind a fixed seed; the
/// replay path itself is deterministic.
pub struct SyntheticDataGenerator {
    rng: StdRng,
    base_price: f64,
}

impl SyntheticDataGenerator {
    /// Create a new generator with a seed for reproducibility
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            base_price: 0.5,
        }
    }

    /// Generate a price series for a specific market scenario.
    ///
    /// # Arguments
    /// * `scenario` - The market scenario to simulate
    /// * `start_time` - Timestamp of the first bar
    /// * `num_points` - Number of bars to generate
    /// * `interval_minutes` - Minutes between bars
    pub fn generate(
        &mut self,
        scenario: MarketScenario,
        start_time: DateTime<Utc>,
        num_points: usize,
        interval_minutes: i64,
    ) -> Vec<PricePoint> {
        match scenario {
            MarketScenario::Uptrend => {
                self.generate_trend(start_time, num_points, interval_minutes, 0.02)
            }
            MarketScenario::Downtrend => {
                self.generate_trend(start_time, num_points, interval_minutes, -0.02)
            }
            MarketScenario::Sideways => {
                self.generate_sideways(start_time, num_points, interval_minutes)
            }
            MarketScenario::Volatile => {
                self.generate_volatile(start_time, num_points, interval_minutes)
            }
            MarketScenario::WithGaps => {
                self.generate_with_gaps(start_time, num_points, interval_minutes)
            }
            MarketScenario::DrawdownTest => {
                self.generate_drawdown(start_time, num_points, interval_minutes)
            }
        }
    }

    /// Drifting market: `daily_drift` per day with ±0.1% noise.
    fn generate_trend(
        &mut self,
        start_time: DateTime<Utc>,
        num_points: usize,
        interval_minutes: i64,
        daily_drift: f64,
    ) -> Vec<PricePoint> {
        let mut points = Vec::with_capacity(num_points);
        let mut current_price = self.base_price;

        let drift_per_interval = daily_drift / (24.0 * 60.0 / interval_minutes as f64);

        for i in 0..num_points {
            let timestamp = start_time + Duration::minutes(i as i64 * interval_minutes);

            let drift = current_price * drift_per_interval;
            let noise = current_price * self.rng.gen_range(-0.001..0.001);
            current_price = (current_price + drift + noise).clamp(PRICE_FLOOR, PRICE_CEIL);

            points.push(PricePoint {
                timestamp,
                price: current_price,
            });
        }

        points
    }

    /// Sideways market: mean-reverting random walk around the base price.
    fn generate_sideways(
        &mut self,
        start_time: DateTime<Utc>,
        num_points: usize,
        interval_minutes: i64,
    ) -> Vec<PricePoint> {
        let mut points = Vec::with_capacity(num_points);
        let mut current_price = self.base_price;
        let mean_price = self.base_price;

        for i in 0..num_points {
            let timestamp = start_time + Duration::minutes(i as i64 * interval_minutes);

            // 10% pull back to the mean plus ±1% noise.
            let reversion = (mean_price - current_price) * 0.1;
            let noise = current_price * self.rng.gen_range(-0.01..0.01);
            current_price = (current_price + reversion + noise).clamp(PRICE_FLOOR, PRICE_CEIL);

            points.push(PricePoint {
                timestamp,
                price: current_price,
            });
        }

        points
    }

    /// Volatile market: large random swings.
    fn generate_volatile(
        &mut self,
        start_time: DateTime<Utc>,
        num_points: usize,
        interval_minutes: i64,
    ) -> Vec<PricePoint> {
        let mut points = Vec::with_capacity(num_points);
        let mut current_price = self.base_price;

        for i in 0..num_points {
            let timestamp = start_time + Duration::minutes(i as i64 * interval_minutes);

            let change = current_price * self.rng.gen_range(-0.05..0.05);
            current_price = (current_price + change).clamp(PRICE_FLOOR, PRICE_CEIL);

            points.push(PricePoint {
                timestamp,
                price: current_price,
            });
        }

        points
    }

    /// Series with time gaps: every 50th bar is dropped and leaves a hole.
    fn generate_with_gaps(
        &mut self,
        start_time: DateTime<Utc>,
        num_points: usize,
        interval_minutes: i64,
    ) -> Vec<PricePoint> {
        let mut points = Vec::with_capacity(num_points);
        let mut current_price = self.base_price;
        let mut slot = 0i64;

        for i in 0..num_points {
            if i % 50 == 49 {
                slot += 2;
                continue;
            }

            let timestamp = start_time + Duration::minutes(slot * interval_minutes);
            let change = current_price * self.rng.gen_range(-0.01..0.01);
            current_price = (current_price + change).clamp(PRICE_FLOOR, PRICE_CEIL);

            points.push(PricePoint {
                timestamp,
                price: current_price,
            });

            slot += 1;
        }

        points
    }

    /// Drawdown scenario: gentle rise for the first half, then a steady
    /// collapse of roughly 25% over the second half.
    fn generate_drawdown(
        &mut self,
        start_time: DateTime<Utc>,
        num_points: usize,
        interval_minutes: i64,
    ) -> Vec<PricePoint> {
        let mut points = Vec::with_capacity(num_points);
        let mut current_price = self.base_price;

        for i in 0..num_points {
            let timestamp = start_time + Duration::minutes(i as i64 * interval_minutes);

            if i < num_points / 2 {
                let change = current_price * self.rng.gen_range(-0.005..0.01);
                current_price += change;
            } else {
                let drop_rate = -0.25 / (num_points as f64 / 2.0);
                let drop = current_price * drop_rate;
                let noise = current_price * self.rng.gen_range(-0.005..0.005);
                current_price += drop + noise;
            }
            current_price = current_price.clamp(PRICE_FLOOR, PRICE_CEIL);

            points.push(PricePoint {
                timestamp,
                price: current_price,
            });
        }

        points
    }
}

/// [`DataSource`] serving a generated scenario, for offline runs and
/// tests. Each load builds a fresh generator from the seed, so the same
/// configuration always yields the same series.
pub struct SyntheticDataSource {
    scenario: MarketScenario,
    interval_minutes: i64,
    seed: u64,
}

impl SyntheticDataSource {
    pub fn new(scenario: MarketScenario, interval_minutes: i64, seed: u64) -> Self {
        Self {
            scenario,
            interval_minutes,
            seed,
        }
    }
}

#[async_trait]
impl DataSource for SyntheticDataSource {
    async fn load_price_series(
        &self,
        _token_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PricePoint>> {
        let minutes = (end - start).num_minutes().max(0);
        let num_points = (minutes / self.interval_minutes.max(1)) as usize + 1;
        let mut generator = SyntheticDataGenerator::new(self.seed);
        Ok(generator.generate(self.scenario, start, num_points, self.interval_minutes))
    }

    async fn load_trade_series(
        &self,
        _token_id: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<MarketTrade>> {
        Err(anyhow::anyhow!("synthetic source does not produce a trade series").into())
    }
}
