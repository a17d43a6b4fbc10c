// Error taxonomy for the scalping engine.
// Ingestion failures never cross into the engine as errors; they surface as
// missing data and are handled by the evaluation path's presence checks.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Indicator computation needs more history. Caller retries with more points.
    #[error("insufficient data: need at least {required} points, have {available}")]
    InsufficientData { required: usize, available: usize },

    /// A stream dropped; the session supervisor schedules a reconnect.
    #[error("stream disconnected: {0}")]
    StreamDisconnected(String),

    /// An order never reached the venue or was refused. The slot is
    /// rolled back, no retry.
    #[error("order submission failed: {0}")]
    OrderSubmissionFailed(String),

    /// Ticker, trade or account data missing or unusable for this cycle.
    /// Skip, not fatal.
    #[error("invalid market state: {0}")]
    InvalidMarketState(&'static str),
}
