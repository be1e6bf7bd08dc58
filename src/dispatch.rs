/*!
 * Async hand-off of a built attempt
 *
 * [`AsyncAttempt`] moves an [`Attempt`] onto a tokio task. The caller either
 * drops the returned [`DispatchHandle`] (fire-and-forget) or awaits it later
 * (poll-for-completion). This is a one-way hand-off: there is no queue and no
 * persistence behind it.
 */

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::descriptor::Attempt;
use crate::error::AttemptError;
use crate::outcome::Outcome;
use crate::unit::Payload;

type ValueCallback<T> = Box<dyn FnOnce(Option<T>) + Send>;
type ErrorCallback = Box<dyn FnOnce(&AttemptError) + Send>;

/// A built attempt prepared for background execution
pub struct AsyncAttempt<T, I = ()> {
    attempt: Attempt<T, I>,
    timeout: Option<Duration>,
    on_value: Option<ValueCallback<T>>,
    on_error: Option<ErrorCallback>,
}

impl<T: Payload, I: Payload> AsyncAttempt<T, I> {
    pub(crate) fn new(attempt: Attempt<T, I>, timeout: Option<Duration>) -> Self {
        Self {
            attempt,
            timeout,
            on_value: None,
            on_error: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn no_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    /// Called with the value when the run succeeds
    pub fn then<F>(mut self, f: F) -> Self
    where
        F: FnOnce(Option<T>) + Send + 'static,
    {
        self.on_value = Some(Box::new(f));
        self
    }

    /// Called when the run fails, times out, or re-raises its error
    pub fn catch<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&AttemptError) + Send + 'static,
    {
        self.on_error = Some(Box::new(f));
        self
    }

    /// Spawn the run onto the current tokio runtime
    pub fn dispatch(self) -> DispatchHandle<T> {
        debug!(timeout_ms = self.timeout.map(|t| t.as_millis() as u64), "Dispatching attempt");
        DispatchHandle {
            handle: tokio::spawn(self.await_now()),
        }
    }

    /// Run inline on the calling task, with the same timeout and callbacks
    pub async fn await_now(self) -> Result<Outcome<T>, AttemptError> {
        let AsyncAttempt {
            attempt,
            timeout,
            on_value,
            on_error,
        } = self;

        let result = match timeout {
            Some(limit) => match tokio::time::timeout(limit, attempt.run()).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(timeout_ms = limit.as_millis() as u64, "Dispatched attempt timed out");
                    Err(AttemptError::Timeout(limit))
                }
            },
            None => attempt.run().await,
        };

        match &result {
            Ok(outcome) if outcome.succeeded() => {
                if let Some(callback) = on_value {
                    callback(outcome.value().cloned());
                }
            }
            Ok(outcome) => {
                if let Some(callback) = on_error {
                    callback(&AttemptError::from_terminal(outcome.error()));
                }
            }
            Err(error) => {
                if let Some(callback) = on_error {
                    callback(error);
                }
            }
        }

        result
    }
}

/// Handle to a dispatched run
#[derive(Debug)]
pub struct DispatchHandle<T> {
    handle: JoinHandle<Result<Outcome<T>, AttemptError>>,
}

impl<T> DispatchHandle<T> {
    /// Wait for the dispatched run to finish
    pub async fn wait(self) -> Result<Outcome<T>, AttemptError> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(AttemptError::Dispatch("task was aborted".to_string())),
            Err(e) => Err(AttemptError::Dispatch(format!("task panicked: {}", e))),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn abort(&self) {
        self.handle.abort();
    }
}
