//! Stage chains run as a single retryable unit
//!
//! Each stage receives the current value and a [`Next`] continuation. The
//! whole chain is handed to the engine as one primary unit, so a retry
//! replays every stage from the first.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::builder::AttemptBuilder;
use crate::context::AttemptContext;
use crate::engine::Engine;
use crate::error::AttemptError;
use crate::outcome::Outcome;
use crate::unit::{unit_fn, Payload, UnitFn, UnitRef};

/// Continuation into the rest of the pipeline
pub type Next<T> = Box<dyn FnOnce(T) -> BoxFuture<'static, anyhow::Result<T>> + Send>;

/// One transformation step
pub trait Stage<T>: Send + Sync {
    fn handle(&self, value: T, next: Next<T>) -> BoxFuture<'static, anyhow::Result<T>>;
}

struct FnStage<F>(F);

impl<T, F, Fut> Stage<T> for FnStage<F>
where
    F: Fn(T, Next<T>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    fn handle(&self, value: T, next: Next<T>) -> BoxFuture<'static, anyhow::Result<T>> {
        (self.0)(value, next).boxed()
    }
}

/// Wrap a closure as a stage
pub fn stage<T, F, Fut>(f: F) -> Arc<dyn Stage<T>>
where
    T: Payload,
    F: Fn(T, Next<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    Arc::new(FnStage(f))
}

fn dispatch<T: Payload>(
    stages: Arc<Vec<Arc<dyn Stage<T>>>>,
    index: usize,
    value: T,
) -> BoxFuture<'static, anyhow::Result<T>> {
    match stages.get(index).cloned() {
        None => async move { Ok(value) }.boxed(),
        Some(current) => {
            let next: Next<T> = Box::new(move |value| dispatch(stages, index + 1, value));
            current.handle(value, next)
        }
    }
}

type Setting<T> = Box<dyn FnOnce(AttemptBuilder<T, T>) -> AttemptBuilder<T, T> + Send>;

/// A value sent through stages inside one engine run
pub struct Pipeline<T> {
    engine: Engine,
    input: Option<T>,
    stages: Vec<Arc<dyn Stage<T>>>,
    settings: Vec<Setting<T>>,
}

impl<T: Payload> Pipeline<T> {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            input: None,
            stages: Vec::new(),
            settings: Vec::new(),
        }
    }

    pub fn send(mut self, value: T) -> Self {
        self.input = Some(value);
        self
    }

    /// Replace the stage list
    pub fn through(mut self, stages: Vec<Arc<dyn Stage<T>>>) -> Self {
        self.stages = stages;
        self
    }

    /// Append one stage
    pub fn pipe(mut self, stage: Arc<dyn Stage<T>>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Append a closure stage
    pub fn pipe_fn<F, Fut>(self, f: F) -> Self
    where
        F: Fn(T, Next<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.pipe(stage(f))
    }

    /// Adjust the engine run that wraps the pipeline
    pub fn configure<F>(mut self, f: F) -> Self
    where
        F: FnOnce(AttemptBuilder<T, T>) -> AttemptBuilder<T, T> + Send + 'static,
    {
        self.settings.push(Box::new(f));
        self
    }

    pub fn retry(self, retries: u32) -> Self {
        self.configure(move |builder| builder.retry(retries))
    }

    pub fn delay(self, ms: u64) -> Self {
        self.configure(move |builder| builder.delay(ms))
    }

    pub fn delays(self, delays_ms: Vec<u64>) -> Self {
        self.configure(move |builder| builder.delays(delays_ms))
    }

    pub fn backoff(self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.configure(move |builder| builder.backoff(&name))
    }

    pub fn with_jitter(self, factor: f64) -> Self {
        self.configure(move |builder| builder.with_jitter(factor))
    }

    /// Fallback receiving the original input
    pub fn fallback<F, Fut>(self, f: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.configure(move |builder| builder.fallback(f))
    }

    pub fn on_success<F>(self, hook: F) -> Self
    where
        F: Fn(&AttemptContext, &T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.configure(move |builder| builder.on_success(hook))
    }

    pub fn on_failure<F>(self, hook: F) -> Self
    where
        F: Fn(&AttemptContext, Option<&anyhow::Error>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.configure(move |builder| builder.on_failure(hook))
    }

    pub fn finally<F>(self, hook: F) -> Self
    where
        F: Fn(&AttemptContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.configure(move |builder| builder.finally(hook))
    }

    pub fn throw_on_failure(self) -> Self {
        self.configure(|builder| builder.throw_on_failure())
    }

    pub fn without_events(self) -> Self {
        self.configure(|builder| builder.without_events())
    }

    pub async fn run(self) -> Result<Outcome<T>, AttemptError> {
        let input = self.input.ok_or_else(|| {
            AttemptError::Resolution("pipeline has no input; call send() first".to_string())
        })?;

        let stages = Arc::new(self.stages);
        let mut builder = self
            .engine
            .attempt_with(input, move |value| dispatch(Arc::clone(&stages), 0, value));
        for setting in self.settings {
            builder = setting(builder);
        }
        builder.run().await
    }

    pub async fn value(self) -> Result<Option<T>, AttemptError> {
        Ok(self.run().await?.into_value())
    }
}

type Adjust<T> = Arc<dyn Fn(AttemptBuilder<T, T>) -> AttemptBuilder<T, T> + Send + Sync>;

/// A stage that runs its function through its own engine run, then continues.
///
/// A failure that survives the stage's retries and fallbacks fails the
/// surrounding pipeline with the same message.
pub struct RetryStage<T> {
    engine: Engine,
    call: UnitFn<T, T>,
    adjustments: Vec<Adjust<T>>,
}

impl<T: Payload> RetryStage<T> {
    pub fn new<F, Fut>(engine: Engine, f: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            engine,
            call: unit_fn(f),
            adjustments: Vec::new(),
        }
    }

    pub fn configure<F>(mut self, f: F) -> Self
    where
        F: Fn(AttemptBuilder<T, T>) -> AttemptBuilder<T, T> + Send + Sync + 'static,
    {
        self.adjustments.push(Arc::new(f));
        self
    }

    pub fn retry(self, retries: u32) -> Self {
        self.configure(move |builder| builder.retry(retries))
    }

    pub fn delay(self, ms: u64) -> Self {
        self.configure(move |builder| builder.delay(ms))
    }

    pub fn into_stage(self) -> Arc<dyn Stage<T>> {
        Arc::new(self)
    }
}

impl<T: Payload> Stage<T> for RetryStage<T> {
    fn handle(&self, value: T, next: Next<T>) -> BoxFuture<'static, anyhow::Result<T>> {
        let engine = self.engine.clone();
        let call = Arc::clone(&self.call);
        let adjustments = self.adjustments.clone();

        async move {
            let mut builder = engine.attempt_unit_with(value, UnitRef::call(call));
            for adjust in &adjustments {
                builder = adjust(builder);
            }

            let outcome = builder.quiet().run().await?;
            match outcome.get_or_throw()? {
                Some(value) => next(value).await,
                None => anyhow::bail!("retry stage was skipped and produced no value"),
            }
        }
        .boxed()
    }
}
