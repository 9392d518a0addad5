use thiserror::Error;

/// Errors surfaced by the backtesting core.
///
/// Insufficient funds on a BUY is deliberately not represented here: the
/// exchange stores the order as `Rejected` and hands it back as a normal
/// result instead of failing the call.
#[derive(Error, Debug)]
pub enum BacktestError {
    /// Engine misuse: data not loaded or strategy not set before `run`,
    /// or an order ticket that fails validation.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Empty or unusable source series at load time.
    #[error("Data error: {0}")]
    Data(String),

    /// No price exists at or before the current simulated time.
    #[error("No price data for {token_id} at or before current simulated time")]
    NoPriceData { token_id: String },

    /// Failure raised by the per-tick strategy callback. Recorded as a
    /// timestamped warning by the replay loop, never fatal to the run.
    #[error("Strategy error: {0}")]
    Strategy(String),

    /// Errors bubbling up from the data-loading layer.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, BacktestError>;
