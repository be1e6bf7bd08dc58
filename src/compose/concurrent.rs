//! Run a list of attempts and collect one outcome per entry

use std::future::Future;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::debug;

use super::{Entry, RunAttempt};
use crate::descriptor::Attempt;
use crate::engine::Engine;
use crate::outcome::Outcome;
use crate::unit::Payload;

/// Runs every entry through the engine.
///
/// Outcomes come back in input order. With `fail_fast`, nothing after the
/// first failed outcome is started and the result list simply ends there.
pub struct Concurrent<T> {
    engine: Engine,
    entries: Vec<Entry<T>>,
    retries: u32,
    delay_ms: u64,
    fail_fast: bool,
    limit: usize,
}

impl<T: Payload> Concurrent<T> {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            entries: Vec::new(),
            retries: 0,
            delay_ms: 0,
            fail_fast: false,
            limit: 1,
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

    /// Add a built attempt; it keeps its own retry and delay settings
    pub fn add_attempt<I: Payload>(mut self, attempt: Attempt<T, I>) -> Self {
        self.entries.push(Entry::Prebuilt(Arc::new(attempt)));
        self
    }

    pub fn add_runnable(mut self, run: Arc<dyn RunAttempt<T>>) -> Self {
        self.entries.push(Entry::Prebuilt(run));
        self
    }

    /// Retries for closure entries
    pub fn retry(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Fixed delay between retries of closure entries
    pub fn delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    pub fn fail_fast(mut self) -> Self {
        self.fail_fast = true;
        self
    }

    /// Run up to `limit` entries at once; 1 runs them one after another
    pub fn parallel(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub async fn run(self) -> Vec<Outcome<T>> {
        let Concurrent {
            engine,
            entries,
            retries,
            delay_ms,
            fail_fast,
            limit,
        } = self;

        debug!(entries = entries.len(), limit, fail_fast, "Running concurrent attempts");

        let runs: Vec<Arc<dyn RunAttempt<T>>> = entries
            .into_iter()
            .map(|entry| entry.prepare(&engine, retries, delay_ms))
            .collect();

        let mut outcomes = Vec::with_capacity(runs.len());

        if limit == 1 {
            for run in runs {
                let outcome = run.execute().await;
                let failed = outcome.failed();
                outcomes.push(outcome);
                if failed && fail_fast {
                    break;
                }
            }
            return outcomes;
        }

        // `buffered` yields in input order. Dropping the stream abandons in-flight
        // runs; each still completes and finalizes on its own task.
        let mut pending = stream::iter(runs)
            .map(|run| async move { run.execute().await })
            .buffered(limit);

        while let Some(outcome) = pending.next().await {
            let failed = outcome.failed();
            outcomes.push(outcome);
            if failed && fail_fast {
                break;
            }
        }
        outcomes
    }

    /// Values of every outcome, `None` for failures
    pub async fn values(self) -> Vec<Option<T>> {
        self.run()
            .await
            .into_iter()
            .map(Outcome::into_value)
            .collect()
    }

    pub async fn successful(self) -> Vec<Outcome<T>> {
        self.run()
            .await
            .into_iter()
            .filter(Outcome::succeeded)
            .collect()
    }

    pub async fn failed(self) -> Vec<Outcome<T>> {
        self.run().await.into_iter().filter(Outcome::failed).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_preserves_order() {
        let outcomes = Engine::default()
            .concurrent()
            .add(|| async { Ok(1) })
            .add(|| async { anyhow::bail!("second failed") })
            .add(|| async { Ok(3) })
            .run()
            .await;

        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].value(), Some(&1));
        assert!(outcomes[1].failed());
        assert_eq!(outcomes[2].value(), Some(&3));
    }

    #[tokio::test]
    async fn test_fail_fast_truncates() {
        let third = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&third);

        let outcomes = Engine::default()
            .concurrent()
            .add(|| async { Ok(1) })
            .add(|| async { anyhow::bail!("stop here") })
            .add(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(3)
                }
            })
            .fail_fast()
            .run()
            .await;

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[1].failed());
        assert_eq!(third.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_retry_applies_to_closures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let values = Engine::default()
            .concurrent()
            .add(move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        anyhow::bail!("flaky");
                    }
                    Ok("done")
                }
            })
            .retry(2)
            .values()
            .await;

        assert_eq!(values, vec![Some("done")]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_parallel_keeps_input_order() {
        let engine = Engine::default();
        let mut concurrent = engine.concurrent().parallel(3);
        for i in 0..6u64 {
            concurrent = concurrent.add(move || async move {
                tokio::time::sleep(std::time::Duration::from_millis(30 - i * 5)).await;
                Ok(i)
            });
        }

        let values = concurrent.values().await;
        assert_eq!(values, (0..6).map(Some).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_successful_and_failed_filters() {
        let engine = Engine::default();
        let build = || {
            engine
                .concurrent()
                .add(|| async { Ok(1) })
                .add(|| async { anyhow::bail!("nope") })
        };

        assert_eq!(build().successful().await.len(), 1);
        assert_eq!(build().failed().await.len(), 1);
    }
}
