/*!
 * Composition over the engine
 *
 * - [`Concurrent`]: run every entry, in order or bounded-parallel, collecting outcomes
 * - [`Race`]: first success in list order wins; later entries never start
 * - [`Pipeline`]: a chain of stages run as one retryable unit
 */

pub mod concurrent;
pub mod pipeline;
pub mod race;

pub use concurrent::Concurrent;
pub use pipeline::{stage, Next, Pipeline, RetryStage, Stage};
pub use race::Race;

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::descriptor::Attempt;
use crate::engine::Engine;
use crate::outcome::Outcome;
use crate::unit::{unit_fn, Payload, UnitFn, UnitRef};

/// Anything that can be run to an [`Outcome`] without propagating failures
pub trait RunAttempt<T>: Send + Sync {
    fn execute(&self) -> BoxFuture<'_, Outcome<T>>;
}

impl<T: Payload, I: Payload> RunAttempt<T> for Attempt<T, I> {
    fn execute(&self) -> BoxFuture<'_, Outcome<T>> {
        Box::pin(self.outcome())
    }
}

/// One entry of a composition
pub(crate) enum Entry<T> {
    /// Built at run time with the composition's retry/delay settings
    Closure(UnitFn<T, ()>),
    /// Runs with its own settings
    Prebuilt(Arc<dyn RunAttempt<T>>),
}

impl<T: Payload> Entry<T> {
    pub fn closure<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Entry::Closure(unit_fn(move |()| f()))
    }

    /// Turn the entry into something runnable, applying shared settings to closures
    pub fn prepare(self, engine: &Engine, retries: u32, delay_ms: u64) -> Arc<dyn RunAttempt<T>> {
        match self {
            Entry::Prebuilt(run) => run,
            Entry::Closure(call) => {
                let built = engine
                    .attempt_unit(UnitRef::call(call))
                    .retry(retries)
                    .delay(delay_ms)
                    .build();
                match built {
                    Ok(attempt) => Arc::new(attempt),
                    Err(error) => Arc::new(Unbuildable(Arc::new(anyhow::Error::new(error)))),
                }
            }
        }
    }
}

/// An entry whose configuration failed; it runs to a failed outcome
struct Unbuildable(crate::error::SharedError);

impl<T: Payload> RunAttempt<T> for Unbuildable {
    fn execute(&self) -> BoxFuture<'_, Outcome<T>> {
        let error = Arc::clone(&self.0);
        Box::pin(async move { Outcome::failure(Some(error), 0, Vec::new()) })
    }
}
