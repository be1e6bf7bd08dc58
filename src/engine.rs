/*!
 * Retry/fallback resolution engine
 *
 * The engine drives one frozen descriptor through its attempts:
 *
 * 1. Condition gate (may short-circuit to a `skipped` outcome)
 * 2. Primary attempts, with retry eligibility and delays between them
 * 3. The fallback chain, in order, once the primary is exhausted
 * 4. Finalization hooks, on every exit path
 *
 * Everything ambient (presets, never/always-retry lists, the events switch)
 * comes from the injected [`PolicyTable`].
 */

use std::fmt;
use std::future::Future;
use std::panic::{resume_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use attempt_core_backoff::DelayCalculator;
use futures::FutureExt;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::builder::AttemptBuilder;
use crate::compose::{Concurrent, Pipeline, Race};
use crate::context::{AttemptContext, Resolution};
use crate::defer::DeferredSink;
use crate::descriptor::Descriptor;
use crate::error::{std_error, SharedError, ALL_FAILED_MESSAGE};
use crate::events::{AttemptEvent, EventSink, TracingEventSink};
use crate::hooks::{isolate, ErrorReporter, TracingReporter};
use crate::outcome::Outcome;
use crate::policy::PolicyTable;
use crate::sleep::{Sleeper, TokioSleeper};
use crate::unit::{Payload, UnitRef};

/// Entry point: owns the policy table and the external collaborators
#[derive(Clone)]
pub struct Engine {
    policy: Arc<PolicyTable>,
    events: Arc<dyn EventSink>,
    deferred: Option<Arc<dyn DeferredSink>>,
    reporter: Arc<dyn ErrorReporter>,
    sleeper: Arc<dyn Sleeper>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(PolicyTable::default())
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("policy", &self.policy)
            .field("deferred", &self.deferred.is_some())
            .finish()
    }
}

impl Engine {
    pub fn new(policy: PolicyTable) -> Self {
        Self {
            policy: Arc::new(policy),
            events: Arc::new(TracingEventSink),
            deferred: None,
            reporter: Arc::new(TracingReporter),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    pub fn with_deferred_sink(mut self, sink: Arc<dyn DeferredSink>) -> Self {
        self.deferred = Some(sink);
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn policy(&self) -> &PolicyTable {
        &self.policy
    }

    /// Start configuring a unit of work from an async closure
    pub fn attempt<T, F, Fut>(&self, f: F) -> AttemptBuilder<T, ()>
    where
        T: Payload,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        AttemptBuilder::new(self.clone(), (), vec![UnitRef::function(move |()| f())])
    }

    /// Start configuring a unit of work that receives `input` on every execution
    pub fn attempt_with<T, I, F, Fut>(&self, input: I, f: F) -> AttemptBuilder<T, I>
    where
        T: Payload,
        I: Payload,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        AttemptBuilder::new(self.clone(), input, vec![UnitRef::function(f)])
    }

    /// Start configuring a unit of work from a unit reference
    pub fn attempt_unit<T, I>(&self, unit: UnitRef<T, I>) -> AttemptBuilder<T, I>
    where
        T: Payload,
        I: Payload + Default,
    {
        self.attempt_unit_with(I::default(), unit)
    }

    pub fn attempt_unit_with<T, I>(&self, input: I, unit: UnitRef<T, I>) -> AttemptBuilder<T, I>
    where
        T: Payload,
        I: Payload,
    {
        AttemptBuilder::new(self.clone(), input, vec![unit])
    }

    /// Ordered alternative primaries: the first is retried, the rest run ahead of the fallbacks
    pub fn attempt_any<T, I>(&self, units: Vec<UnitRef<T, I>>) -> AttemptBuilder<T, I>
    where
        T: Payload,
        I: Payload + Default,
    {
        AttemptBuilder::new(self.clone(), I::default(), units)
    }

    pub fn concurrent<T: Payload>(&self) -> Concurrent<T> {
        Concurrent::new(self.clone())
    }

    pub fn race<T: Payload>(&self) -> Race<T> {
        Race::new(self.clone())
    }

    pub fn pipeline<T: Payload>(&self) -> Pipeline<T> {
        Pipeline::new(self.clone())
    }

    /// Run a descriptor to its terminal outcome.
    ///
    /// Finalization hooks run on every exit path, including when this future
    /// is dropped mid-run. A panic escaping the run (from a catch handler) is
    /// re-raised after finalization.
    pub(crate) async fn drive<T: Payload, I: Payload>(&self, descriptor: &Descriptor<T, I>) -> Outcome<T> {
        let span = info_span!(
            "attempt.run",
            max_attempts = descriptor.max_attempts,
            fallbacks = descriptor.fallbacks.len()
        );
        let mut guard = Finalization {
            engine: self,
            descriptor,
            ctx: AttemptContext::new(descriptor.max_attempts),
            pending: true,
        };

        let result = AssertUnwindSafe(self.execute(descriptor, &mut guard.ctx))
            .catch_unwind()
            .instrument(span)
            .await;

        guard.finish();

        match result {
            Ok(outcome) => outcome,
            Err(panic) => resume_unwind(panic),
        }
    }

    async fn execute<T: Payload, I: Payload>(
        &self,
        descriptor: &Descriptor<T, I>,
        ctx: &mut AttemptContext,
    ) -> Outcome<T> {
        if let Some(gate) = &descriptor.gate {
            if !gate.allows() {
                debug!("Condition not met; skipping run");
                ctx.skip();
                return Outcome::skipped();
            }
        }

        let emit = descriptor.events_enabled && self.policy.events_enabled;
        self.publish(
            emit,
            AttemptEvent::Started {
                max_attempts: ctx.max_attempts(),
            },
            ctx,
        );

        let mut calculator = DelayCalculator::new(&descriptor.delay);

        while ctx.attempt() < ctx.max_attempts() {
            let attempt = ctx.advance();

            if attempt > 1 {
                let previous = ctx.last_error().cloned();
                self.publish(
                    emit,
                    AttemptEvent::Retrying {
                        attempt,
                        error: previous.as_ref().map(|e| e.to_string()),
                    },
                    ctx,
                );
                for hook in &descriptor.hooks.on_retry {
                    isolate(self.reporter.as_ref(), "on_retry", || {
                        hook(&*ctx, previous.as_deref())
                    });
                }
            }

            debug!(attempt, max_attempts = ctx.max_attempts(), "Executing attempt");

            let error = match descriptor.primary.invoke(descriptor.input.clone(), None).await {
                Ok(value) => {
                    let resolution = if attempt == 1 {
                        Resolution::Primary
                    } else {
                        Resolution::Retry(attempt)
                    };
                    return self.succeed(descriptor, ctx, value, resolution, emit);
                }
                Err(error) => Arc::new(error),
            };

            ctx.fail(format!("attempt:{}", attempt), Arc::clone(&error));
            self.handle_error(descriptor, ctx, &error);
            self.publish(
                emit,
                AttemptEvent::Failed {
                    attempt,
                    error: format!("{:#}", error),
                },
                ctx,
            );

            if attempt >= ctx.max_attempts() || !self.should_retry(descriptor, &calculator, &error, attempt) {
                debug!(attempt, error = %error, "Not retrying");
                break;
            }

            let delay_ms = calculator.calculate(attempt, Some(std_error(&error)));
            if delay_ms > 0 {
                debug!(attempt, delay_ms, "Waiting before next attempt");
                self.sleeper.sleep(Duration::from_millis(delay_ms)).await;
            }
        }

        for (label, fallback) in &descriptor.fallbacks {
            let trigger: SharedError = ctx
                .last_error()
                .cloned()
                .unwrap_or_else(|| Arc::new(anyhow::anyhow!(ALL_FAILED_MESSAGE)));

            self.publish(
                emit,
                AttemptEvent::FallbackTriggered {
                    fallback: label.clone(),
                    error: format!("{:#}", trigger),
                },
                ctx,
            );
            for hook in &descriptor.hooks.on_fallback {
                isolate(self.reporter.as_ref(), "on_fallback", || {
                    hook(&*ctx, label, &trigger)
                });
            }

            if fallback.skips(&trigger) {
                debug!(fallback = %label, "Fallback declined the error; skipping");
                continue;
            }

            debug!(fallback = %label, "Executing fallback");
            match fallback.invoke(descriptor.input.clone(), Some(&trigger)).await {
                Ok(value) => {
                    return self.succeed(
                        descriptor,
                        ctx,
                        value,
                        Resolution::Fallback(label.clone()),
                        emit,
                    )
                }
                Err(error) => ctx.fail(format!("fallback:{}", label), Arc::new(error)),
            }
        }

        let last_error = ctx.last_error().cloned();
        self.publish(
            emit,
            AttemptEvent::AllFailed {
                attempts: ctx.attempt(),
                error: last_error.as_ref().map(|e| format!("{:#}", e)),
            },
            ctx,
        );
        let message = last_error
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "none".to_string());
        warn!(attempts = ctx.attempt(), error = %message, "All attempts and fallbacks failed");

        Outcome::failure(last_error, ctx.attempt(), ctx.log().to_vec())
    }

    fn succeed<T: Payload, I: Payload>(
        &self,
        descriptor: &Descriptor<T, I>,
        ctx: &mut AttemptContext,
        value: T,
        resolution: Resolution,
        emit: bool,
    ) -> Outcome<T> {
        ctx.succeed(resolution.clone());

        for hook in &descriptor.hooks.on_success {
            isolate(self.reporter.as_ref(), "on_success", || hook(&*ctx, &value));
        }
        self.publish(
            emit,
            AttemptEvent::Succeeded {
                attempts: ctx.attempt(),
                resolved_by: resolution.clone(),
            },
            ctx,
        );
        info!(
            attempts = ctx.attempt(),
            resolved_by = %resolution,
            elapsed_ms = ctx.elapsed().as_millis() as u64,
            "Run succeeded"
        );

        Outcome::success(value, ctx.attempt(), resolution, ctx.log().to_vec())
    }

    /// Exception handler first, then every matching catch handler. Not isolated.
    fn handle_error<T, I>(&self, descriptor: &Descriptor<T, I>, ctx: &AttemptContext, error: &anyhow::Error) {
        if let Some(handler) = &descriptor.exception_handler {
            handler.handle(error, ctx);
        }
        for handler in descriptor.catch.iter().filter(|h| h.applies_to(error)) {
            (handler.callback)(error, ctx);
        }
    }

    /// First decisive rule wins: never-retry, always-retry, `retry_if`,
    /// `retry_unless`, the strategy's own verdict, then retry.
    fn should_retry<T, I>(
        &self,
        descriptor: &Descriptor<T, I>,
        calculator: &DelayCalculator,
        error: &anyhow::Error,
        attempt: u32,
    ) -> bool {
        let mut never = self.policy.never_retry.iter().chain(&descriptor.never_retry);
        if never.any(|matcher| matcher.matches(error)) {
            return false;
        }

        let mut always = self.policy.always_retry.iter().chain(&descriptor.always_retry);
        if always.any(|matcher| matcher.matches(error)) {
            return true;
        }

        if let Some(predicate) = &descriptor.retry_if {
            return predicate(error, attempt);
        }
        if let Some(predicate) = &descriptor.retry_unless {
            return !predicate(error, attempt);
        }

        calculator
            .strategy_allows_retry(std_error(error), attempt, descriptor.max_attempts)
            .unwrap_or(true)
    }

    /// Failure hooks (any non-successful exit), then `finally`, then `defer`
    fn finalize<T, I>(&self, descriptor: &Descriptor<T, I>, ctx: &AttemptContext) {
        if !ctx.succeeded() {
            let last_error = ctx.last_error();
            for hook in &descriptor.hooks.on_failure {
                isolate(self.reporter.as_ref(), "on_failure", || {
                    hook(ctx, last_error.map(|e| &**e))
                });
            }
        }

        for hook in &descriptor.hooks.finally {
            isolate(self.reporter.as_ref(), "finally", || hook(ctx));
        }

        if descriptor.hooks.defer.is_empty() {
            return;
        }

        match &self.deferred {
            Some(sink) => {
                for hook in &descriptor.hooks.defer {
                    let hook = Arc::clone(hook);
                    let snapshot = ctx.clone();
                    sink.defer(Box::new(move || hook(&snapshot)));
                }
            }
            None => {
                for hook in &descriptor.hooks.defer {
                    isolate(self.reporter.as_ref(), "defer", || hook(ctx));
                }
            }
        }
    }

    fn publish(&self, enabled: bool, event: AttemptEvent, ctx: &AttemptContext) {
        if enabled {
            self.events.publish(&event, ctx);
        }
    }
}

/// Owns the run context and finalizes it exactly once, on completion or on drop
struct Finalization<'a, T, I> {
    engine: &'a Engine,
    descriptor: &'a Descriptor<T, I>,
    ctx: AttemptContext,
    pending: bool,
}

impl<T, I> Finalization<'_, T, I> {
    fn finish(&mut self) {
        if std::mem::take(&mut self.pending) {
            self.engine.finalize(self.descriptor, &self.ctx);
        }
    }
}

impl<T, I> Drop for Finalization<'_, T, I> {
    fn drop(&mut self) {
        if self.pending {
            warn!(attempt = self.ctx.attempt(), "Run dropped before completion; finalizing");
        }
        self.finish();
    }
}
