/*!
 * Lifecycle hooks, catch handlers and error reporting
 *
 * Lifecycle hooks are observers: whatever they return or however they fail,
 * the failure is handed to an [`ErrorReporter`] and the run carries on. Catch
 * handlers are plain callbacks and are not isolated.
 */

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::context::AttemptContext;
use crate::policy::ErrorMatcher;
use crate::unit::panic_message;

pub type RetryHook = Arc<dyn Fn(&AttemptContext, Option<&anyhow::Error>) -> anyhow::Result<()> + Send + Sync>;
pub type FallbackHook = Arc<dyn Fn(&AttemptContext, &str, &anyhow::Error) -> anyhow::Result<()> + Send + Sync>;
pub type SuccessHook<T> = Arc<dyn Fn(&AttemptContext, &T) -> anyhow::Result<()> + Send + Sync>;
pub type FailureHook = Arc<dyn Fn(&AttemptContext, Option<&anyhow::Error>) -> anyhow::Result<()> + Send + Sync>;
pub type FinallyHook = Arc<dyn Fn(&AttemptContext) -> anyhow::Result<()> + Send + Sync>;

/// Catch handler callback
pub type CatchFn = Arc<dyn Fn(&anyhow::Error, &AttemptContext) + Send + Sync>;

/// `(error, attempt) -> bool` predicate for `retry_if` / `retry_unless`
pub type RetryPredicate = Arc<dyn Fn(&anyhow::Error, u32) -> bool + Send + Sync>;

/// Condition gate evaluated once at the start of a run
pub type Condition = Arc<dyn Fn() -> bool + Send + Sync>;

/// Handler object run before the registered catch handlers on every failed attempt
pub trait ExceptionHandler: Send + Sync {
    fn handle(&self, error: &anyhow::Error, context: &AttemptContext);
}

/// A catch handler, optionally restricted to matching errors
#[derive(Clone)]
pub struct CatchHandler {
    pub(crate) matcher: Option<ErrorMatcher>,
    pub(crate) callback: CatchFn,
}

impl CatchHandler {
    pub(crate) fn applies_to(&self, error: &anyhow::Error) -> bool {
        match &self.matcher {
            Some(matcher) => matcher.matches(error),
            None => true,
        }
    }
}

/// All lifecycle hooks of one descriptor
pub struct Hooks<T> {
    pub(crate) on_retry: Vec<RetryHook>,
    pub(crate) on_fallback: Vec<FallbackHook>,
    pub(crate) on_success: Vec<SuccessHook<T>>,
    pub(crate) on_failure: Vec<FailureHook>,
    pub(crate) finally: Vec<FinallyHook>,
    pub(crate) defer: Vec<FinallyHook>,
}

impl<T> Default for Hooks<T> {
    fn default() -> Self {
        Self {
            on_retry: Vec::new(),
            on_fallback: Vec::new(),
            on_success: Vec::new(),
            on_failure: Vec::new(),
            finally: Vec::new(),
            defer: Vec::new(),
        }
    }
}

impl<T> Clone for Hooks<T> {
    fn clone(&self) -> Self {
        Self {
            on_retry: self.on_retry.clone(),
            on_fallback: self.on_fallback.clone(),
            on_success: self.on_success.clone(),
            on_failure: self.on_failure.clone(),
            finally: self.finally.clone(),
            defer: self.defer.clone(),
        }
    }
}

/// Sink for errors raised by isolated hooks
pub trait ErrorReporter: Send + Sync {
    fn report(&self, origin: &str, error: &anyhow::Error);
}

/// Reports hook failures as `warn!` events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, origin: &str, error: &anyhow::Error) {
        warn!(hook = origin, error = %format!("{:#}", error), "Hook failed; continuing");
    }
}

/// Keeps reported errors in memory
#[derive(Debug, Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<(String, String)>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(origin, message)` pairs in report order
    pub fn reports(&self) -> Vec<(String, String)> {
        self.reports
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl ErrorReporter for RecordingReporter {
    fn report(&self, origin: &str, error: &anyhow::Error) {
        self.reports
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((origin.to_string(), error.to_string()));
    }
}

/// Run a hook so that neither its error nor its panic escapes
pub(crate) fn isolate<F>(reporter: &dyn ErrorReporter, origin: &str, hook: F)
where
    F: FnOnce() -> anyhow::Result<()>,
{
    match catch_unwind(AssertUnwindSafe(hook)) {
        Ok(Ok(())) => {}
        Ok(Err(error)) => reporter.report(origin, &error),
        Err(panic) => reporter.report(
            origin,
            &anyhow::anyhow!("hook panicked: {}", panic_message(&*panic)),
        ),
    }
}
