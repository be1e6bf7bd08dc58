/*!
 * attempt - Retry, backoff and fallback execution engine
 *
 * Runs a unit of work with:
 * - Bounded retries with pluggable backoff strategies and jitter
 * - Ordered fallback chains tried after retries are exhausted
 * - Typed retry policy (never/always-retry lists, predicates, catch handlers)
 * - Lifecycle hooks, events and deferred callbacks
 * - Concurrent, race and pipeline composition
 * - Async hand-off onto the tokio runtime
 *
 * ```no_run
 * # async fn demo() -> attempt::Result<()> {
 * let value = attempt::attempt(|| async { Ok(21 * 2) })
 *     .retry(3)
 *     .backoff("exponential")
 *     .fallback(|()| async { Ok(0) })
 *     .value()
 *     .await?;
 * assert_eq!(value, Some(42));
 * # Ok(())
 * # }
 * ```
 */

pub mod builder;
pub mod cli_style;
pub mod command;
pub mod compose;
pub mod config;
pub mod context;
pub mod defer;
pub mod descriptor;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod events;
pub mod hooks;
pub mod logging;
pub mod outcome;
pub mod policy;
pub mod sleep;
pub mod unit;

use std::future::Future;

// Re-export commonly used types
pub use builder::AttemptBuilder;
pub use command::{CommandFailed, CommandOutput, ShellCommand};
pub use compose::{stage, Concurrent, Next, Pipeline, Race, RetryStage, RunAttempt, Stage};
pub use config::{Defaults, EngineConfig};
pub use context::{AttemptContext, LogEntry, Resolution};
pub use defer::{DeferQueue, DeferredSink};
pub use descriptor::{Attempt, AttemptConfiguration};
pub use dispatch::{AsyncAttempt, DispatchHandle};
pub use engine::Engine;
pub use error::{AttemptError, Result, SharedError};
pub use events::{AttemptEvent, EventSink, NullEventSink, RecordingEventSink, TracingEventSink};
pub use hooks::{ErrorReporter, ExceptionHandler, RecordingReporter, TracingReporter};
pub use outcome::{Outcome, OutcomeSummary};
pub use policy::{ErrorMatcher, PolicyTable};
pub use sleep::{RecordingSleeper, Sleeper, TokioSleeper};
pub use unit::{Attemptable, Configures, Fallbackable, Payload, UnitRef, UnitRegistry};

pub use attempt_core_backoff::{Backoff, RetryStrategy};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Start configuring a unit of work on a default engine
pub fn attempt<T, F, Fut>(f: F) -> AttemptBuilder<T, ()>
where
    T: Payload,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    Engine::default().attempt(f)
}
