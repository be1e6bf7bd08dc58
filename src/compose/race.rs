//! First success wins

use std::future::Future;
use std::sync::Arc;

use tracing::debug;

use super::{Entry, RunAttempt};
use crate::descriptor::Attempt;
use crate::engine::Engine;
use crate::error::{AttemptError, SharedError};
use crate::outcome::Outcome;
use crate::unit::Payload;

pub const ALL_RACERS_FAILED: &str = "All race attempts failed";

/// Runs entries in list order and returns the first successful outcome.
///
/// Entries after the winner are never started. When every entry fails the
/// result is a failed outcome carrying the last error; its attempt count is
/// the number of entries that ran.
pub struct Race<T> {
    engine: Engine,
    entries: Vec<Entry<T>>,
    retries: u32,
    delay_ms: u64,
}

impl<T: Payload> Race<T> {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            entries: Vec::new(),
            retries: 0,
            delay_ms: 0,
        }
    }

    pub fn add<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.entries.push(Entry::closure(f));
        self
    }

    pub fn add_attempt<I: Payload>(mut self, attempt: Attempt<T, I>) -> Self {
        self.entries.push(Entry::Prebuilt(Arc::new(attempt)));
        self
    }

    pub fn add_runnable(mut self, run: Arc<dyn RunAttempt<T>>) -> Self {
        self.entries.push(Entry::Prebuilt(run));
        self
    }

    pub fn retry(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    pub async fn run(self) -> Outcome<T> {
        let total = self.entries.len();
        let mut ran = 0u32;
        let mut last_error: Option<SharedError> = None;

        for (position, entry) in self.entries.into_iter().enumerate() {
            let outcome = entry
                .prepare(&self.engine, self.retries, self.delay_ms)
                .execute()
                .await;
            ran += 1;

            if outcome.succeeded() {
                debug!(winner = position + 1, total, "Race won");
                return outcome;
            }
            last_error = outcome.error().cloned().or(last_error);
        }

        let error = last_error.unwrap_or_else(|| Arc::new(anyhow::anyhow!(ALL_RACERS_FAILED)));
        Outcome::failure(Some(error), ran, Vec::new())
    }

    pub async fn value(self) -> Option<T> {
        self.run().await.into_value()
    }

    pub async fn value_or_fail(self) -> Result<T, AttemptError> {
        match self.run().await.get_or_throw()? {
            Some(value) => Ok(value),
            None => Err(AttemptError::AllFailed(
                "race winner produced no value".to_string(),
            )),
        }
    }
}
