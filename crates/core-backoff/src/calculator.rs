//! Delay calculation: source precedence plus jitter
//!
//! The calculator decides the wait after a failed attempt. The first configured
//! source wins:
//!
//! 1. a custom callback, given `(attempt, error)`
//! 2. an explicit delay list, clamped to its last entry
//! 3. a retry strategy
//! 4. the plain fixed delay
//!
//! Jitter is applied to whichever source produced the delay.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use rand::Rng;

use crate::preset::Backoff;
use crate::strategy::{ArrayDelay, RetryStrategy};

/// Custom delay callback: `(attempt, error) -> milliseconds`.
///
/// Negative results are treated as "no wait".
pub type DelayFn = Arc<dyn Fn(u32, Option<&(dyn Error + 'static)>) -> i64 + Send + Sync>;

/// Plain delay configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delay {
    /// Same delay for every attempt
    Fixed(u64),
    /// Explicit per-attempt delays; the last entry repeats
    List(Vec<u64>),
}

impl Default for Delay {
    fn default() -> Self {
        Delay::Fixed(0)
    }
}

impl Delay {
    /// Delay handed to strategies as their fallback base
    pub fn base(&self) -> u64 {
        match self {
            Delay::Fixed(ms) => *ms,
            Delay::List(delays) => delays.first().copied().unwrap_or(0),
        }
    }

    /// True when no delay has been configured
    pub fn is_zero(&self) -> bool {
        match self {
            Delay::Fixed(ms) => *ms == 0,
            Delay::List(delays) => delays.is_empty(),
        }
    }
}

/// Everything needed to build a [`DelayCalculator`].
///
/// A plan is shared and immutable; each run builds its own calculator from it.
#[derive(Clone, Default)]
pub struct DelayPlan {
    pub delay: Delay,
    pub strategy: Option<Arc<dyn RetryStrategy>>,
    pub callback: Option<DelayFn>,
    jitter: f64,
}

impl fmt::Debug for DelayPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayPlan")
            .field("delay", &self.delay)
            .field("strategy", &self.strategy)
            .field("callback", &self.callback.as_ref().map(|_| "<callback>"))
            .field("jitter", &self.jitter)
            .finish()
    }
}

impl DelayPlan {
    pub fn with_delay(mut self, delay: Delay) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_strategy<S: RetryStrategy + 'static>(mut self, strategy: S) -> Self {
        self.strategy = Some(Arc::new(strategy));
        self
    }

    pub fn with_backoff(mut self, backoff: &Backoff) -> Self {
        self.strategy = Some(Arc::from(backoff.strategy()));
        self
    }

    pub fn with_callback(mut self, callback: DelayFn) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Set the jitter factor, clamped to `[0, 1]`
    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.set_jitter(factor);
        self
    }

    pub fn set_jitter(&mut self, factor: f64) {
        self.jitter = if factor.is_nan() {
            0.0
        } else {
            factor.clamp(0.0, 1.0)
        };
    }

    pub fn jitter(&self) -> f64 {
        self.jitter
    }
}

/// Run-scoped delay calculator
pub struct DelayCalculator {
    delay: Delay,
    strategy: Option<Box<dyn RetryStrategy>>,
    callback: Option<DelayFn>,
    jitter: f64,
}

impl fmt::Debug for DelayCalculator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayCalculator")
            .field("delay", &self.delay)
            .field("strategy", &self.strategy)
            .field("callback", &self.callback.as_ref().map(|_| "<callback>"))
            .field("jitter", &self.jitter)
            .finish()
    }
}

impl DelayCalculator {
    /// Build a calculator with a fresh strategy instance
    pub fn new(plan: &DelayPlan) -> Self {
        Self {
            delay: plan.delay.clone(),
            strategy: plan.strategy.as_ref().map(|template| template.fresh()),
            callback: plan.callback.clone(),
            jitter: plan.jitter,
        }
    }

    /// Delay in milliseconds after the given failed attempt
    pub fn calculate(&mut self, attempt: u32, error: Option<&(dyn Error + 'static)>) -> u64 {
        let base = self.delay.base();

        let delay = if let Some(callback) = &self.callback {
            callback(attempt, error).max(0) as u64
        } else if let Delay::List(delays) = &self.delay {
            ArrayDelay::lookup(delays, attempt).unwrap_or(base)
        } else if let Some(strategy) = self.strategy.as_mut() {
            strategy.delay(attempt, base)
        } else {
            base
        };

        apply_jitter(delay, self.jitter, &mut rand::rng())
    }

    /// Attempt-count verdict of the configured strategy, if any
    pub fn strategy_allows_retry(
        &self,
        error: &(dyn Error + 'static),
        attempt: u32,
        max_attempts: u32,
    ) -> Option<bool> {
        self.strategy
            .as_ref()
            .map(|strategy| strategy.should_retry(error, attempt, max_attempts))
    }
}

/// Randomize `delay` by a uniform offset in `[-⌊delay × factor⌋, +⌊delay × factor⌋]`.
///
/// The result never goes below zero.
pub fn apply_jitter<R: Rng + ?Sized>(delay: u64, factor: f64, rng: &mut R) -> u64 {
    if factor <= 0.0 || delay == 0 {
        return delay;
    }

    // i128 keeps delays above i64::MAX from wrapping
    let amount = ((delay as f64 * factor.min(1.0)) as i128).min(delay as i128);
    if amount <= 0 {
        return delay;
    }

    let offset = rng.random_range(-amount..=amount);
    (delay as i128 + offset).clamp(0, u64::MAX as i128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{ExponentialBackoff, FixedDelay};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::io;

    #[test]
    fn test_fixed_delay_without_strategy() {
        let plan = DelayPlan::default().with_delay(Delay::Fixed(250));
        let mut calculator = DelayCalculator::new(&plan);
        assert_eq!(calculator.calculate(1, None), 250);
        assert_eq!(calculator.calculate(5, None), 250);
    }

    #[test]
    fn test_zero_delay_by_default() {
        let mut calculator = DelayCalculator::new(&DelayPlan::default());
        assert_eq!(calculator.calculate(3, None), 0);
    }

    #[test]
    fn test_list_beats_strategy() {
        let plan = DelayPlan::default()
            .with_delay(Delay::List(vec![10, 20]))
            .with_strategy(ExponentialBackoff::default());
        let mut calculator = DelayCalculator::new(&plan);
        let delays: Vec<u64> = (1..=4).map(|n| calculator.calculate(n, None)).collect();
        assert_eq!(delays, vec![10, 20, 20, 20]);
    }

    #[test]
    fn test_callback_beats_everything() {
        let plan = DelayPlan::default()
            .with_delay(Delay::List(vec![10, 20]))
            .with_strategy(ExponentialBackoff::default())
            .with_callback(Arc::new(|attempt, _| i64::from(attempt) * 7));
        let mut calculator = DelayCalculator::new(&plan);
        assert_eq!(calculator.calculate(3, None), 21);
    }

    #[test]
    fn test_callback_sees_error_and_negative_means_zero() {
        let plan = DelayPlan::default().with_callback(Arc::new(|_, error| match error {
            Some(e) if e.to_string().contains("slow down") => 5_000,
            _ => -20,
        }));
        let mut calculator = DelayCalculator::new(&plan);

        let throttled = io::Error::other("slow down");
        assert_eq!(calculator.calculate(1, Some(&throttled)), 5_000);
        assert_eq!(calculator.calculate(1, None), 0);
    }

    #[test]
    fn test_strategy_receives_fixed_delay_as_base() {
        let plan = DelayPlan::default()
            .with_delay(Delay::Fixed(40))
            .with_strategy(FixedDelay::new(0));
        let mut calculator = DelayCalculator::new(&plan);
        assert_eq!(calculator.calculate(2, None), 40);
    }

    #[test]
    fn test_jitter_is_clamped() {
        assert_eq!(DelayPlan::default().with_jitter(4.0).jitter(), 1.0);
        assert_eq!(DelayPlan::default().with_jitter(-1.0).jitter(), 0.0);
        assert_eq!(DelayPlan::default().with_jitter(f64::NAN).jitter(), 0.0);
    }

    #[test]
    fn test_jitter_bounds() {
        let mut rng = StdRng::seed_from_u64(42);
        for (delay, factor) in [(1_000u64, 0.1f64), (100, 0.5), (7, 0.3), (3, 1.0)] {
            let spread = (delay as f64 * factor) as u64;
            for _ in 0..500 {
                let jittered = apply_jitter(delay, factor, &mut rng);
                assert!(jittered >= delay.saturating_sub(spread));
                assert!(jittered <= delay + spread);
            }
        }
    }

    #[test]
    fn test_jitter_noop_cases() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(apply_jitter(0, 0.5, &mut rng), 0);
        assert_eq!(apply_jitter(500, 0.0, &mut rng), 500);
        // ⌊3 × 0.1⌋ = 0, nothing to randomize
        assert_eq!(apply_jitter(3, 0.1, &mut rng), 3);
    }

    #[test]
    fn test_jitter_bounds_for_huge_delays() {
        let mut rng = StdRng::seed_from_u64(11);
        for delay in [u64::MAX - 10, u64::MAX, i64::MAX as u64 + 1] {
            let spread = (delay as f64 * 0.1) as u64;
            for _ in 0..200 {
                let jittered = apply_jitter(delay, 0.1, &mut rng);
                assert!(jittered >= delay - spread, "{} below bound for {}", jittered, delay);
            }
        }
        // Full jitter on the largest delay stays in range
        for _ in 0..200 {
            let _ = apply_jitter(u64::MAX, 1.0, &mut rng);
        }
    }

    #[test]
    fn test_each_calculator_gets_fresh_strategy() {
        let plan = DelayPlan::default().with_backoff(&Backoff::DecorrelatedJitter {
            base_ms: 100,
            max_ms: 30_000,
        });

        let mut first = DelayCalculator::new(&plan);
        for attempt in 1..8 {
            first.calculate(attempt, None);
        }

        // A new run starts from the base again; second draw is bounded by 3 × base
        let mut second = DelayCalculator::new(&plan);
        assert_eq!(second.calculate(1, None), 100);
        let next = second.calculate(2, None);
        assert!((100..=300).contains(&next));
    }

    #[test]
    fn test_strategy_allows_retry() {
        let error = io::Error::other("boom");
        let without = DelayCalculator::new(&DelayPlan::default());
        assert_eq!(without.strategy_allows_retry(&error, 1, 3), None);

        let with = DelayCalculator::new(&DelayPlan::default().with_backoff(&Backoff::default()));
        assert_eq!(with.strategy_allows_retry(&error, 1, 3), Some(true));
        assert_eq!(with.strategy_allows_retry(&error, 3, 3), Some(false));
    }
}
