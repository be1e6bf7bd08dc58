//! Attempt Core Backoff: Pure-logic delay policies for retrying work
//!
//! # Overview
//!
//! This crate answers one question for the attempt engine: *how long should we
//! wait before trying again?* It includes:
//!
//! - **Strategies**: fixed, linear, exponential, fibonacci, decorrelated jitter
//!   and explicit delay lists, all behind the [`RetryStrategy`] trait
//! - **Presets**: [`Backoff`], a serializable description of a strategy that can
//!   be loaded from configuration and turned into a fresh strategy per run
//! - **Delay Calculator**: [`DelayCalculator`], which picks the delay source by
//!   precedence and applies bounded jitter
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of:
//! - Runtimes, timers or sleeping
//! - The units of work being retried
//! - Hooks, events or reporting
//!
//! Delays are plain millisecond counts. The caller decides how to wait.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Retry Engine                    │
//! └─────────────┬───────────────────────────┘
//!               │ calculate(attempt, error)
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Delay Calculator                  │
//! │  callback → list → strategy → fixed     │  ← first match wins
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Jitter                            │  ← ± ⌊delay × factor⌋
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//!         delay in milliseconds (≥ 0)
//! ```
//!
//! # Usage Example
//!
//! ```
//! use attempt_core_backoff::{Backoff, DelayCalculator, DelayPlan};
//!
//! let plan = DelayPlan::default().with_backoff(&Backoff::Exponential {
//!     base_ms: 100,
//!     multiplier: 2.0,
//!     max_ms: 30_000,
//! });
//!
//! // One calculator per run: stateful strategies never leak between runs
//! let mut calculator = DelayCalculator::new(&plan);
//! let delays: Vec<u64> = (1..=4).map(|n| calculator.calculate(n, None)).collect();
//! assert_eq!(delays, vec![100, 200, 400, 800]);
//! ```

pub mod calculator;
pub mod error;
pub mod preset;
pub mod strategy;

// Re-export main types for convenience
pub use calculator::{apply_jitter, Delay, DelayCalculator, DelayFn, DelayPlan};
pub use error::BackoffError;
pub use preset::Backoff;
pub use strategy::{
    ArrayDelay, DecorrelatedJitter, ExponentialBackoff, FibonacciBackoff, FixedDelay,
    LinearBackoff, RetryStrategy,
};

/// Default ceiling applied by the built-in strategies (milliseconds)
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Default base delay used by the built-in strategies (milliseconds)
pub const DEFAULT_BASE_DELAY_MS: u64 = 100;

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use attempt_core_backoff::prelude::*;
/// ```
pub mod prelude {
    pub use super::calculator::{Delay, DelayCalculator, DelayPlan};
    pub use super::error::BackoffError;
    pub use super::preset::Backoff;
    pub use super::strategy::RetryStrategy;
}
