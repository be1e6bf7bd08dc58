/*!
 * Fluent configuration of a unit of work
 *
 * Every call consumes the builder and returns it, so configuration is a
 * single expression. Nothing runs until [`AttemptBuilder::build`] freezes the
 * configuration into an [`Attempt`].
 */

use std::error::Error as StdError;
use std::future::Future;
use std::sync::Arc;

use attempt_core_backoff::{
    BackoffError, DecorrelatedJitter, Delay, DelayPlan, ExponentialBackoff, FibonacciBackoff,
    FixedDelay, LinearBackoff, RetryStrategy,
};
use tracing::debug;

use crate::config::Defaults;
use crate::context::AttemptContext;
use crate::descriptor::{Attempt, Descriptor, Gate};
use crate::engine::Engine;
use crate::error::AttemptError;
use crate::hooks::{CatchHandler, Condition, ExceptionHandler, Hooks, RetryPredicate};
use crate::outcome::Outcome;
use crate::policy::ErrorMatcher;
use crate::unit::{Payload, Resolved, UnitRef, UnitRegistry};

/// Mutable configuration of one unit of work
pub struct AttemptBuilder<T, I = ()> {
    engine: Engine,
    input: I,
    primaries: Vec<UnitRef<T, I>>,
    fallbacks: Vec<UnitRef<T, I>>,
    registry: Option<Arc<UnitRegistry<T, I>>>,
    max_retries: u32,
    delay: DelayPlan,
    config_error: Option<AttemptError>,
    retry_if: Option<RetryPredicate>,
    retry_unless: Option<RetryPredicate>,
    never_retry: Vec<ErrorMatcher>,
    always_retry: Vec<ErrorMatcher>,
    gate: Option<Gate>,
    catch: Vec<CatchHandler>,
    exception_handler: Option<Arc<dyn ExceptionHandler>>,
    hooks: Hooks<T>,
    throw: bool,
    quiet: bool,
    events_enabled: bool,
}

impl<T: Payload, I: Payload> AttemptBuilder<T, I> {
    pub(crate) fn new(engine: Engine, input: I, primaries: Vec<UnitRef<T, I>>) -> Self {
        Self {
            engine,
            input,
            primaries,
            fallbacks: Vec::new(),
            registry: None,
            max_retries: 0,
            delay: DelayPlan::default(),
            config_error: None,
            retry_if: None,
            retry_unless: None,
            never_retry: Vec::new(),
            always_retry: Vec::new(),
            gate: None,
            catch: Vec::new(),
            exception_handler: None,
            hooks: Hooks::default(),
            throw: false,
            quiet: false,
            events_enabled: true,
        }
    }

    /// Keep the first configuration error; it surfaces from `build()`
    fn invalid(mut self, error: AttemptError) -> Self {
        if self.config_error.is_none() {
            self.config_error = Some(error);
        }
        self
    }

    /// Input handed to the unit (and to fallbacks) on every execution
    pub fn with(mut self, input: I) -> Self {
        self.input = input;
        self
    }

    /// Retries after the first attempt; `retry(2)` allows three executions
    pub fn retry(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    // ---- Delays and backoff ----

    /// Fixed delay in milliseconds, also the base delay handed to strategies
    pub fn delay(mut self, ms: u64) -> Self {
        self.delay = self.delay.with_delay(Delay::Fixed(ms));
        self
    }

    /// Explicit per-attempt delays; the last one repeats
    pub fn delays(mut self, delays_ms: Vec<u64>) -> Self {
        self.delay = self.delay.with_delay(Delay::List(delays_ms));
        self
    }

    /// Use a named preset from the engine's policy table
    pub fn backoff(mut self, name: &str) -> Self {
        let preset = self.engine.policy().preset(name).cloned();
        match preset {
            Some(backoff) => match backoff.validate() {
                Ok(()) => {
                    self.delay = self.delay.with_backoff(&backoff);
                    self
                }
                Err(e) => self.invalid(e.into()),
            },
            None => self.invalid(BackoffError::UnknownStrategy(name.to_string()).into()),
        }
    }

    pub fn exponential_backoff(self, base_ms: u64, max_ms: u64, multiplier: f64) -> Self {
        if !multiplier.is_finite() || multiplier <= 0.0 {
            return self.invalid(BackoffError::InvalidMultiplier(multiplier).into());
        }
        self.using_strategy(ExponentialBackoff::new(base_ms, multiplier, max_ms))
    }

    pub fn linear_backoff(self, base_ms: u64, increment_ms: u64, max_ms: u64) -> Self {
        self.using_strategy(LinearBackoff::new(base_ms, increment_ms, max_ms))
    }

    pub fn fibonacci_backoff(self, base_ms: u64, max_ms: u64) -> Self {
        self.using_strategy(FibonacciBackoff::new(base_ms, max_ms))
    }

    pub fn decorrelated_jitter(self, base_ms: u64, max_ms: u64) -> Self {
        self.using_strategy(DecorrelatedJitter::new(base_ms, max_ms))
    }

    pub fn fixed_delay(self, ms: u64) -> Self {
        self.using_strategy(FixedDelay::new(ms))
    }

    pub fn using_strategy<S: RetryStrategy + 'static>(mut self, strategy: S) -> Self {
        self.delay = self.delay.with_strategy(strategy);
        self
    }

    /// Jitter factor, clamped to `[0, 1]`
    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.delay.set_jitter(factor);
        self
    }

    /// Compute delays with a callback; negative results mean no wait
    pub fn delay_using<F>(mut self, callback: F) -> Self
    where
        F: Fn(u32, Option<&(dyn StdError + 'static)>) -> i64 + Send + Sync + 'static,
    {
        self.delay = self.delay.with_callback(Arc::new(callback));
        self
    }

    // ---- Fallbacks ----

    pub fn fallback<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.fallbacks.push(UnitRef::function(f));
        self
    }

    /// A fallback looked up by name in the registry given to `resolve_with`
    pub fn fallback_named(mut self, name: impl Into<String>) -> Self {
        self.fallbacks.push(UnitRef::named(name));
        self
    }

    pub fn fallback_unit(mut self, unit: UnitRef<T, I>) -> Self {
        self.fallbacks.push(unit);
        self
    }

    pub fn resolve_with(mut self, registry: Arc<UnitRegistry<T, I>>) -> Self {
        self.registry = Some(registry);
        self
    }

    // ---- Error handling ----

    /// Called with the typed error whenever an attempt fails with `E` somewhere in its chain
    pub fn catch<E, F>(mut self, handler: F) -> Self
    where
        E: StdError + Send + Sync + 'static,
        F: Fn(&E, &AttemptContext) + Send + Sync + 'static,
    {
        self.catch.push(CatchHandler {
            matcher: Some(ErrorMatcher::of::<E>()),
            callback: Arc::new(move |error: &anyhow::Error, ctx: &AttemptContext| {
                if let Some(typed) = error.chain().find_map(|cause| cause.downcast_ref::<E>()) {
                    handler(typed, ctx);
                }
            }),
        });
        self
    }

    pub fn catch_matching<F>(mut self, matcher: ErrorMatcher, handler: F) -> Self
    where
        F: Fn(&anyhow::Error, &AttemptContext) + Send + Sync + 'static,
    {
        self.catch.push(CatchHandler {
            matcher: Some(matcher),
            callback: Arc::new(handler),
        });
        self
    }

    pub fn catch_all<F>(mut self, handler: F) -> Self
    where
        F: Fn(&anyhow::Error, &AttemptContext) + Send + Sync + 'static,
    {
        self.catch.push(CatchHandler {
            matcher: None,
            callback: Arc::new(handler),
        });
        self
    }

    pub fn exception_handler(mut self, handler: Arc<dyn ExceptionHandler>) -> Self {
        self.exception_handler = Some(handler);
        self
    }

    // ---- Retry eligibility ----

    pub fn retry_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&anyhow::Error, u32) -> bool + Send + Sync + 'static,
    {
        self.retry_if = Some(Arc::new(predicate));
        self
    }

    pub fn retry_unless<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&anyhow::Error, u32) -> bool + Send + Sync + 'static,
    {
        self.retry_unless = Some(Arc::new(predicate));
        self
    }

    pub fn never_retry<E>(self) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.never_retry_matching(ErrorMatcher::of::<E>())
    }

    pub fn always_retry<E>(self) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.always_retry_matching(ErrorMatcher::of::<E>())
    }

    pub fn never_retry_matching(mut self, matcher: ErrorMatcher) -> Self {
        self.never_retry.push(matcher);
        self
    }

    pub fn always_retry_matching(mut self, matcher: ErrorMatcher) -> Self {
        self.always_retry.push(matcher);
        self
    }

    // ---- Condition gate ----

    pub fn when(self, condition: bool) -> Self {
        self.gate(Arc::new(move || condition), false)
    }

    pub fn when_fn<F>(self, condition: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.gate(Arc::new(condition), false)
    }

    pub fn unless(self, condition: bool) -> Self {
        self.gate(Arc::new(move || condition), true)
    }

    pub fn unless_fn<F>(self, condition: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.gate(Arc::new(condition), true)
    }

    fn gate(mut self, condition: Condition, negated: bool) -> Self {
        self.gate = Some(Gate { condition, negated });
        self
    }

    // ---- Failure policy ----

    /// Re-raise the terminal error from `run()` (ignored when `quiet` is set)
    pub fn throw_on_failure(mut self) -> Self {
        self.throw = true;
        self
    }

    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    // ---- Lifecycle hooks ----

    pub fn on_retry<F>(mut self, hook: F) -> Self
    where
        F: Fn(&AttemptContext, Option<&anyhow::Error>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.hooks.on_retry.push(Arc::new(hook));
        self
    }

    /// Called with the fallback label and the triggering error, before the fallback runs
    pub fn on_fallback<F>(mut self, hook: F) -> Self
    where
        F: Fn(&AttemptContext, &str, &anyhow::Error) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.hooks.on_fallback.push(Arc::new(hook));
        self
    }

    pub fn on_success<F>(mut self, hook: F) -> Self
    where
        F: Fn(&AttemptContext, &T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.hooks.on_success.push(Arc::new(hook));
        self
    }

    pub fn on_failure<F>(mut self, hook: F) -> Self
    where
        F: Fn(&AttemptContext, Option<&anyhow::Error>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.hooks.on_failure.push(Arc::new(hook));
        self
    }

    pub fn finally<F>(mut self, hook: F) -> Self
    where
        F: Fn(&AttemptContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.hooks.finally.push(Arc::new(hook));
        self
    }

    /// Run after the surrounding unit of work completes (see [`crate::defer`])
    pub fn defer<F>(mut self, hook: F) -> Self
    where
        F: Fn(&AttemptContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.hooks.defer.push(Arc::new(hook));
        self
    }

    pub fn without_events(mut self) -> Self {
        self.events_enabled = false;
        self
    }

    pub fn with_events(mut self) -> Self {
        self.events_enabled = true;
        self
    }

    // ---- Defaults ----

    /// Apply configured defaults: retries, base delay, backoff preset and jitter
    pub fn apply_defaults(mut self, defaults: &Defaults) -> Self {
        self.max_retries = defaults.max_retries;
        self.delay = self.delay.with_delay(Delay::Fixed(defaults.delay_ms));
        self.delay.set_jitter(defaults.jitter);

        match defaults.backoff.as_deref() {
            None | Some("") | Some("none") => {
                self.delay.strategy = None;
                self
            }
            Some(name) => self.backoff(name),
        }
    }

    /// Apply the defaults of the engine's policy table
    pub fn with_defaults(self) -> Self {
        let defaults = self.engine.policy().defaults.clone();
        self.apply_defaults(&defaults)
    }

    // ---- Freezing and terminals ----

    /// Resolve every unit reference and freeze the configuration
    pub fn build(mut self) -> Result<Attempt<T, I>, AttemptError> {
        if let Some(error) = self.config_error.take() {
            return Err(error);
        }

        let mut primaries = std::mem::take(&mut self.primaries).into_iter();
        let first = primaries
            .next()
            .ok_or_else(|| AttemptError::Resolution("no unit of work configured".to_string()))?;
        let alternatives: Vec<UnitRef<T, I>> = primaries.collect();

        let primary = first.resolve(self.registry.as_deref())?;
        if primary.is_fallback_only() {
            return Err(AttemptError::Resolution(format!(
                "unit '{}' can only be used as a fallback",
                primary.label.as_deref().unwrap_or("<fallbackable>")
            )));
        }

        if let Some(configure) = primary.configure.clone() {
            debug!(unit = primary.label.as_deref().unwrap_or("<unit>"), "Applying unit configuration");
            self = configure.configure(self);
            if let Some(error) = self.config_error.take() {
                return Err(error);
            }
        }

        let registry = self.registry.take();
        let chain = alternatives
            .into_iter()
            .chain(std::mem::take(&mut self.fallbacks))
            .enumerate()
            .map(|(index, unit)| -> Result<(String, Resolved<T, I>), AttemptError> {
                let resolved = unit.resolve(registry.as_deref())?;
                let label = resolved
                    .label
                    .clone()
                    .unwrap_or_else(|| resolved.default_label(index + 1));
                Ok((label, resolved))
            })
            .collect::<Result<Vec<_>, AttemptError>>()?;

        let descriptor = Descriptor {
            input: self.input,
            primary,
            fallbacks: chain,
            max_attempts: self.max_retries.saturating_add(1),
            delay: self.delay,
            retry_if: self.retry_if,
            retry_unless: self.retry_unless,
            never_retry: self.never_retry,
            always_retry: self.always_retry,
            gate: self.gate,
            catch: self.catch,
            exception_handler: self.exception_handler,
            hooks: self.hooks,
            throw: self.throw,
            quiet: self.quiet,
            events_enabled: self.events_enabled,
        };

        Ok(Attempt::new(descriptor, self.engine))
    }

    pub async fn run(self) -> Result<Outcome<T>, AttemptError> {
        self.build()?.run().await
    }

    pub async fn value(self) -> Result<Option<T>, AttemptError> {
        self.build()?.value().await
    }

    pub async fn then<U, F>(self, f: F) -> Result<U, AttemptError>
    where
        F: FnOnce(Option<T>) -> U,
    {
        self.build()?.then(f).await
    }

    pub async fn value_or_fail(self) -> Result<T, AttemptError> {
        self.build()?.value_or_fail().await
    }
}
