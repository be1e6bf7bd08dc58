//! Error types for backoff configuration

use thiserror::Error;

/// Errors raised while validating or parsing a backoff configuration
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BackoffError {
    /// Exponential multiplier is not a positive, finite number
    #[error("Invalid multiplier {0}: must be a positive finite number")]
    InvalidMultiplier(f64),

    /// Jitter factor outside of [0, 1]
    #[error("Invalid jitter factor {0}: must be between 0.0 and 1.0")]
    InvalidJitter(f64),

    /// Strategy name that does not map to a built-in strategy
    #[error("Unknown backoff strategy: {0}")]
    UnknownStrategy(String),
}
