/*!
 * Frozen unit-of-work descriptors
 *
 * [`AttemptBuilder::build`](crate::builder::AttemptBuilder::build) resolves
 * every unit reference and freezes the configuration into a [`Descriptor`].
 * An [`Attempt`] pairs that descriptor with an engine and memoizes the single
 * outcome it ever produces.
 */

use std::fmt;
use std::panic::resume_unwind;
use std::sync::Arc;

use attempt_core_backoff::{Delay, DelayPlan};
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{warn, Instrument};

use crate::dispatch::AsyncAttempt;
use crate::engine::Engine;
use crate::error::AttemptError;
use crate::hooks::{CatchHandler, Condition, ExceptionHandler, Hooks, RetryPredicate};
use crate::outcome::Outcome;
use crate::policy::ErrorMatcher;
use crate::unit::{Payload, Resolved};

/// Condition gate: the run proceeds when the condition differs from `negated`
#[derive(Clone)]
pub(crate) struct Gate {
    pub condition: Condition,
    pub negated: bool,
}

impl Gate {
    pub fn allows(&self) -> bool {
        (self.condition)() != self.negated
    }
}

/// Immutable configuration of one unit of work
pub(crate) struct Descriptor<T, I> {
    pub input: I,
    pub primary: Resolved<T, I>,
    /// `(label, unit)` in execution order
    pub fallbacks: Vec<(String, Resolved<T, I>)>,
    pub max_attempts: u32,
    pub delay: DelayPlan,
    pub retry_if: Option<RetryPredicate>,
    pub retry_unless: Option<RetryPredicate>,
    pub never_retry: Vec<ErrorMatcher>,
    pub always_retry: Vec<ErrorMatcher>,
    pub gate: Option<Gate>,
    pub catch: Vec<CatchHandler>,
    pub exception_handler: Option<Arc<dyn ExceptionHandler>>,
    pub hooks: Hooks<T>,
    pub throw: bool,
    pub quiet: bool,
    pub events_enabled: bool,
}

impl<T, I> Descriptor<T, I> {
    pub fn configuration(&self) -> AttemptConfiguration {
        let delay = match &self.delay.delay {
            Delay::Fixed(ms) => DelaySetting::Fixed { ms: *ms },
            Delay::List(delays) => DelaySetting::List {
                delays_ms: delays.clone(),
            },
        };

        AttemptConfiguration {
            primary: self.primary.label.clone(),
            max_attempts: self.max_attempts,
            delay,
            strategy: self.delay.strategy.as_ref().map(|s| format!("{:?}", s)),
            custom_delay: self.delay.callback.is_some(),
            jitter: self.delay.jitter(),
            fallbacks: self.fallbacks.iter().map(|(label, _)| label.clone()).collect(),
            never_retry: self.never_retry.iter().map(|m| format!("{:?}", m)).collect(),
            always_retry: self.always_retry.iter().map(|m| format!("{:?}", m)).collect(),
            retry_predicate: self.retry_if.is_some() || self.retry_unless.is_some(),
            conditional: self.gate.is_some(),
            throw_on_failure: self.throw,
            quiet: self.quiet,
            events_enabled: self.events_enabled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DelaySetting {
    Fixed { ms: u64 },
    List { delays_ms: Vec<u64> },
}

/// Serializable view of a descriptor, for hand-off to external workers and diagnostics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptConfiguration {
    pub primary: Option<String>,
    pub max_attempts: u32,
    pub delay: DelaySetting,
    pub strategy: Option<String>,
    pub custom_delay: bool,
    pub jitter: f64,
    pub fallbacks: Vec<String>,
    pub never_retry: Vec<String>,
    pub always_retry: Vec<String>,
    pub retry_predicate: bool,
    pub conditional: bool,
    pub throw_on_failure: bool,
    pub quiet: bool,
    pub events_enabled: bool,
}

/// A built, runnable unit of work.
///
/// The first call to [`Attempt::run`] executes the unit; every later call
/// (including calls on clones) returns the same memoized [`Outcome`] without
/// touching the unit again.
pub struct Attempt<T, I = ()> {
    descriptor: Arc<Descriptor<T, I>>,
    engine: Engine,
    outcome: Arc<OnceCell<Outcome<T>>>,
}

impl<T, I> Clone for Attempt<T, I> {
    fn clone(&self) -> Self {
        Self {
            descriptor: Arc::clone(&self.descriptor),
            engine: self.engine.clone(),
            outcome: Arc::clone(&self.outcome),
        }
    }
}

impl<T, I> fmt::Debug for Attempt<T, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attempt")
            .field("primary", &self.descriptor.primary.label)
            .field("max_attempts", &self.descriptor.max_attempts)
            .field("fallbacks", &self.descriptor.fallbacks.len())
            .field("executed", &self.outcome.initialized())
            .finish()
    }
}

impl<T: Payload, I: Payload> Attempt<T, I> {
    pub(crate) fn new(descriptor: Descriptor<T, I>, engine: Engine) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            engine,
            outcome: Arc::new(OnceCell::new()),
        }
    }

    /// The outcome of the run, executing it on first use. Never propagates failures.
    ///
    /// The run itself lives on its own task: a caller that stops waiting
    /// (timeout, fail-fast, abort) abandons the wait, not the run, so the
    /// outcome is still memoized and finalization still happens.
    pub async fn outcome(&self) -> Outcome<T> {
        if let Some(outcome) = self.outcome.get() {
            return outcome.clone();
        }

        let attempt = self.clone();
        let run = tokio::spawn(
            async move {
                attempt
                    .outcome
                    .get_or_init(|| attempt.engine.drive(&attempt.descriptor))
                    .await
                    .clone()
            }
            .in_current_span(),
        );

        match run.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => resume_unwind(e.into_panic()),
            Err(_) => {
                warn!("Run task was cancelled before completing");
                Outcome::failure(
                    Some(Arc::new(anyhow::anyhow!("run was cancelled"))),
                    0,
                    Vec::new(),
                )
            }
        }
    }

    /// Run the unit, re-raising the terminal error when `throw_on_failure` is set without `quiet`
    pub async fn run(&self) -> Result<Outcome<T>, AttemptError> {
        let outcome = self.outcome().await;
        if outcome.failed() && self.descriptor.throw && !self.descriptor.quiet {
            return Err(AttemptError::from_terminal(outcome.error()));
        }
        Ok(outcome)
    }

    /// The produced value, or `None` when the run failed or was skipped
    pub async fn value(&self) -> Result<Option<T>, AttemptError> {
        Ok(self.run().await?.into_value())
    }

    pub async fn then<U, F>(&self, f: F) -> Result<U, AttemptError>
    where
        F: FnOnce(Option<T>) -> U,
    {
        Ok(f(self.value().await?))
    }

    /// The produced value, or the terminal error regardless of `quiet`
    pub async fn value_or_fail(&self) -> Result<T, AttemptError> {
        match self.outcome().await.get_or_throw()? {
            Some(value) => Ok(value),
            None => Err(AttemptError::AllFailed(
                "run was skipped and produced no value".to_string(),
            )),
        }
    }

    pub fn has_run(&self) -> bool {
        self.outcome.initialized()
    }

    pub fn configuration(&self) -> AttemptConfiguration {
        self.descriptor.configuration()
    }

    /// Hand the attempt off to a background task
    pub fn into_async(self) -> AsyncAttempt<T, I> {
        let timeout = self.engine.policy().dispatch_timeout;
        AsyncAttempt::new(self, Some(timeout))
    }
}
