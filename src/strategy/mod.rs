// Trading strategy interface and reference strategies
pub mod buy_and_hold;
pub mod mean_reversion;

pub use buy_and_hold::BuyAndHoldStrategy;
pub use mean_reversion::{MeanReversionConfig, MeanReversionStrategy};

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::exchange::SimulatedExchange;

/// Per-tick trading logic driven by the replay engine.
///
/// The engine calls `on_tick` after advancing the clock and matching
/// resting orders; the strategy reads prices, quotes and the book through
/// the exchange handle and submits or cancels orders on it. Returning an
/// error abandons only the current tick.
pub trait Strategy: Send {
    fn name(&self) -> &str;

    fn on_tick(&mut self, exchange: &mut SimulatedExchange, now: DateTime<Utc>) -> Result<()>;
}

/// Adapter turning a closure into a [`Strategy`].
pub struct FnStrategy<F> {
    name: String,
    tick: F,
}

impl<F> FnStrategy<F>
where
    F: FnMut(&mut SimulatedExchange, DateTime<Utc>) -> Result<()> + Send,
{
    pub fn new(name: impl Into<String>, tick: F) -> Self {
        Self {
            name: name.into(),
            tick,
        }
    }
}

impl<F> Strategy for FnStrategy<F>
where
    F: FnMut(&mut SimulatedExchange, DateTime<Utc>) -> Result<()> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn on_tick(&mut self, exchange: &mut SimulatedExchange, now: DateTime<Utc>) -> Result<()> {
        (self.tick)(exchange, now)
    }
}
