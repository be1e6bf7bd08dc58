//! Backoff strategies
//!
//! Every strategy maps an attempt number (1-based) to a delay in milliseconds
//! and decides, by attempt count alone, whether another attempt is allowed.
//! Higher-level retry rules (never/always-retry lists, predicates) live in the
//! engine and take precedence over [`RetryStrategy::should_retry`].
//!
//! Strategies may carry run-scoped state ([`DecorrelatedJitter`] remembers its
//! previous delay). Callers obtain a clean instance for every run through
//! [`RetryStrategy::fresh`].

use std::error::Error;
use std::fmt;

use rand::Rng;

use crate::{DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_DELAY_MS};

/// Policy computing the wait between attempts
pub trait RetryStrategy: fmt::Debug + Send + Sync {
    /// Delay in milliseconds after the given failed attempt.
    ///
    /// `base_delay` is the plain delay configured next to the strategy; built-in
    /// strategies use it only when their own base is zero.
    fn delay(&mut self, attempt: u32, base_delay: u64) -> u64;

    /// Attempt-count gate: another attempt is allowed while `attempt < max_attempts`
    fn should_retry(&self, _error: &(dyn Error + 'static), attempt: u32, max_attempts: u32) -> bool {
        attempt < max_attempts
    }

    /// A clean instance of this strategy for a new run
    fn fresh(&self) -> Box<dyn RetryStrategy>;
}

fn effective_base(own: u64, fallback: u64) -> u64 {
    if own > 0 {
        own
    } else {
        fallback
    }
}

/// Same delay after every attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelay {
    pub delay_ms: u64,
}

impl FixedDelay {
    pub fn new(delay_ms: u64) -> Self {
        Self { delay_ms }
    }
}

impl Default for FixedDelay {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY_MS)
    }
}

impl RetryStrategy for FixedDelay {
    fn delay(&mut self, _attempt: u32, base_delay: u64) -> u64 {
        effective_base(self.delay_ms, base_delay)
    }

    fn fresh(&self) -> Box<dyn RetryStrategy> {
        Box::new(*self)
    }
}

/// `base + increment × (attempt - 1)`, capped at `max_ms`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearBackoff {
    pub base_ms: u64,
    pub increment_ms: u64,
    pub max_ms: u64,
}

impl LinearBackoff {
    pub fn new(base_ms: u64, increment_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms,
            increment_ms,
            max_ms,
        }
    }
}

impl Default for LinearBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY_MS, DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_DELAY_MS)
    }
}

impl RetryStrategy for LinearBackoff {
    fn delay(&mut self, attempt: u32, base_delay: u64) -> u64 {
        let base = effective_base(self.base_ms, base_delay);
        let steps = u64::from(attempt.saturating_sub(1));
        base.saturating_add(self.increment_ms.saturating_mul(steps))
            .min(self.max_ms)
    }

    fn fresh(&self) -> Box<dyn RetryStrategy> {
        Box::new(*self)
    }
}

/// `base × multiplier^(attempt - 1)`, truncated and capped at `max_ms`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialBackoff {
    pub base_ms: u64,
    pub multiplier: f64,
    pub max_ms: u64,
}

impl ExponentialBackoff {
    pub fn new(base_ms: u64, multiplier: f64, max_ms: u64) -> Self {
        Self {
            base_ms,
            multiplier,
            max_ms,
        }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY_MS, 2.0, DEFAULT_MAX_DELAY_MS)
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn delay(&mut self, attempt: u32, base_delay: u64) -> u64 {
        let base = effective_base(self.base_ms, base_delay);
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        // Float-to-int casts saturate, so overflow lands on u64::MAX before the cap
        let delay = (base as f64 * self.multiplier.powi(exponent)) as u64;
        delay.min(self.max_ms)
    }

    fn fresh(&self) -> Box<dyn RetryStrategy> {
        Box::new(*self)
    }
}

/// `base × fib(attempt)` with `fib(1) = fib(2) = 1`, capped at `max_ms`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FibonacciBackoff {
    pub base_ms: u64,
    pub max_ms: u64,
}

impl FibonacciBackoff {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self { base_ms, max_ms }
    }

    /// n-th fibonacci number, saturating instead of overflowing
    pub fn fibonacci(n: u32) -> u64 {
        let (mut previous, mut current) = (1u64, 1u64);
        for _ in 2..n {
            let next = previous.saturating_add(current);
            previous = current;
            current = next;
        }
        current
    }
}

impl Default for FibonacciBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_DELAY_MS)
    }
}

impl RetryStrategy for FibonacciBackoff {
    fn delay(&mut self, attempt: u32, base_delay: u64) -> u64 {
        let base = effective_base(self.base_ms, base_delay);
        base.saturating_mul(Self::fibonacci(attempt)).min(self.max_ms)
    }

    fn fresh(&self) -> Box<dyn RetryStrategy> {
        Box::new(*self)
    }
}

/// AWS-style decorrelated jitter.
///
/// Attempt 1 waits `base`; every later attempt draws uniformly from
/// `[base, previous × 3]`, capped at `max_ms`, and remembers the draw.
/// The remembered delay is run-scoped: use [`RetryStrategy::fresh`] per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecorrelatedJitter {
    pub base_ms: u64,
    pub max_ms: u64,
    previous_ms: u64,
}

impl DecorrelatedJitter {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms,
            max_ms,
            previous_ms: base_ms,
        }
    }

    /// Delay drawn on the most recent call
    pub fn previous_delay(&self) -> u64 {
        self.previous_ms
    }

    fn next_with<R: Rng + ?Sized>(&mut self, attempt: u32, base_delay: u64, rng: &mut R) -> u64 {
        let base = effective_base(self.base_ms, base_delay);

        if attempt <= 1 {
            self.previous_ms = base;
            return base;
        }

        let upper = base.max(self.previous_ms.saturating_mul(3));
        let delay = rng.random_range(base..=upper).min(self.max_ms);
        self.previous_ms = delay;
        delay
    }
}

impl Default for DecorrelatedJitter {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_DELAY_MS)
    }
}

impl RetryStrategy for DecorrelatedJitter {
    fn delay(&mut self, attempt: u32, base_delay: u64) -> u64 {
        self.next_with(attempt, base_delay, &mut rand::rng())
    }

    fn fresh(&self) -> Box<dyn RetryStrategy> {
        Box::new(Self::new(self.base_ms, self.max_ms))
    }
}

/// Explicit delay list; the last entry repeats once attempts run past the end
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayDelay {
    pub delays_ms: Vec<u64>,
}

impl ArrayDelay {
    pub fn new(delays_ms: Vec<u64>) -> Self {
        Self { delays_ms }
    }

    /// `delays[min(attempt - 1, len - 1)]`, or `None` for an empty list
    pub fn lookup(delays_ms: &[u64], attempt: u32) -> Option<u64> {
        let last = delays_ms.len().checked_sub(1)?;
        let index = (attempt.saturating_sub(1) as usize).min(last);
        delays_ms.get(index).copied()
    }
}

impl Default for ArrayDelay {
    fn default() -> Self {
        Self::new(vec![100, 200, 400])
    }
}

impl RetryStrategy for ArrayDelay {
    fn delay(&mut self, attempt: u32, base_delay: u64) -> u64 {
        Self::lookup(&self.delays_ms, attempt).unwrap_or(base_delay)
    }

    fn fresh(&self) -> Box<dyn RetryStrategy> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::io;

    fn io_error() -> io::Error {
        io::Error::other("boom")
    }

    #[test]
    fn test_fixed_delay() {
        let mut strategy = FixedDelay::new(250);
        assert_eq!(strategy.delay(1, 0), 250);
        assert_eq!(strategy.delay(7, 0), 250);

        // Zero falls back to the configured base delay
        let mut zero = FixedDelay::new(0);
        assert_eq!(zero.delay(3, 40), 40);
    }

    #[test]
    fn test_linear_backoff() {
        let mut strategy = LinearBackoff::new(100, 50, 300);
        let delays: Vec<u64> = (1..=6).map(|n| strategy.delay(n, 0)).collect();
        assert_eq!(delays, vec![100, 150, 200, 250, 300, 300]);
    }

    #[test]
    fn test_exponential_backoff() {
        let mut strategy = ExponentialBackoff::new(100, 2.0, 30_000);
        let delays: Vec<u64> = (1..=4).map(|n| strategy.delay(n, 0)).collect();
        assert_eq!(delays, vec![100, 200, 400, 800]);
    }

    #[test]
    fn test_exponential_backoff_caps_and_truncates() {
        let mut strategy = ExponentialBackoff::new(100, 2.0, 1_000);
        assert_eq!(strategy.delay(10, 0), 1_000);
        assert_eq!(strategy.delay(u32::MAX, 0), 1_000);

        let mut fractional = ExponentialBackoff::new(10, 1.5, 30_000);
        // 10 × 1.5² = 22.5
        assert_eq!(fractional.delay(3, 0), 22);
    }

    #[test]
    fn test_fibonacci_backoff() {
        let mut strategy = FibonacciBackoff::new(100, 30_000);
        let delays: Vec<u64> = (1..=6).map(|n| strategy.delay(n, 0)).collect();
        assert_eq!(delays, vec![100, 100, 200, 300, 500, 800]);
        assert_eq!(strategy.delay(200, 0), 30_000);
    }

    #[test]
    fn test_fibonacci_sequence() {
        let values: Vec<u64> = (1..=8).map(FibonacciBackoff::fibonacci).collect();
        assert_eq!(values, vec![1, 1, 2, 3, 5, 8, 13, 21]);
        assert_eq!(FibonacciBackoff::fibonacci(500), u64::MAX);
    }

    #[test]
    fn test_decorrelated_jitter_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut strategy = DecorrelatedJitter::new(100, 30_000);

        assert_eq!(strategy.next_with(1, 0, &mut rng), 100);
        for attempt in 2..50 {
            let previous = strategy.previous_delay();
            let delay = strategy.next_with(attempt, 0, &mut rng);
            assert!(delay >= 100, "delay {} below base", delay);
            assert!(delay <= (previous * 3).min(30_000), "delay {} above bound", delay);
            assert_eq!(strategy.previous_delay(), delay);
        }
    }

    #[test]
    fn test_decorrelated_jitter_first_attempt_resets() {
        let mut strategy = DecorrelatedJitter::new(100, 30_000);
        for attempt in 1..10 {
            strategy.delay(attempt, 0);
        }
        assert_eq!(strategy.delay(1, 0), 100);
        assert_eq!(strategy.previous_delay(), 100);
    }

    #[test]
    fn test_decorrelated_jitter_fresh_instance_is_clean() {
        let mut strategy = DecorrelatedJitter::new(100, 30_000);
        for attempt in 1..10 {
            strategy.delay(attempt, 0);
        }

        let mut fresh = strategy.fresh();
        assert_eq!(fresh.delay(1, 0), 100);
    }

    #[test]
    fn test_array_delay_clamps_to_last_entry() {
        let mut strategy = ArrayDelay::new(vec![100, 200, 300]);
        assert_eq!(strategy.delay(1, 0), 100);
        assert_eq!(strategy.delay(2, 0), 200);
        for attempt in 3..20 {
            assert_eq!(strategy.delay(attempt, 0), 300);
        }
    }

    #[test]
    fn test_array_delay_empty_uses_base() {
        let mut strategy = ArrayDelay::new(Vec::new());
        assert_eq!(strategy.delay(4, 75), 75);
    }

    #[test]
    fn test_should_retry_is_attempt_gate() {
        let strategy = ExponentialBackoff::default();
        let error = io_error();
        assert!(strategy.should_retry(&error, 1, 3));
        assert!(strategy.should_retry(&error, 2, 3));
        assert!(!strategy.should_retry(&error, 3, 3));
    }
}
