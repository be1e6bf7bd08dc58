/*!
 * Units of work and their resolution
 *
 * A [`UnitRef`] is what callers hand to the builder: a closure, a
 * capability-implementing object, or a name to look up in a [`UnitRegistry`].
 * References are resolved exactly once, when the builder is frozen, into a
 * closed set of executable forms.
 */

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::builder::AttemptBuilder;
use crate::error::AttemptError;

/// Bound shared by values and inputs flowing through the engine
pub trait Payload: Clone + Send + Sync + 'static {}

impl<X: Clone + Send + Sync + 'static> Payload for X {}

/// Type-erased unit closure: input in, value or domain error out
pub type UnitFn<T, I> = Arc<dyn Fn(I) -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync>;

/// Erase an async closure into a [`UnitFn`]
pub fn unit_fn<T, I, F, Fut>(f: F) -> UnitFn<T, I>
where
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    Arc::new(move |input| f(input).boxed())
}

/// A unit usable as a primary (retryable) unit of work
#[async_trait]
pub trait Attemptable<T, I>: Send + Sync {
    async fn handle(&self, input: I) -> anyhow::Result<T>;
}

/// A unit usable only inside a fallback chain
#[async_trait]
pub trait Fallbackable<T, I>: Send + Sync {
    /// Produce a value from the error that triggered the fallback
    async fn handle_fallback(&self, error: &anyhow::Error, input: I) -> anyhow::Result<T>;

    /// Skip this fallback for the given error without executing it
    fn should_skip(&self, _error: &anyhow::Error) -> bool {
        false
    }
}

/// A unit that adjusts its own descriptor before the first execution
pub trait Configures<T, I>: Send + Sync {
    fn configure(&self, builder: AttemptBuilder<T, I>) -> AttemptBuilder<T, I>;
}

enum Source<T, I> {
    Function(UnitFn<T, I>),
    Attemptable(Arc<dyn Attemptable<T, I>>),
    Fallbackable(Arc<dyn Fallbackable<T, I>>),
    Configured {
        unit: Arc<dyn Attemptable<T, I>>,
        configure: Arc<dyn Configures<T, I>>,
    },
    Named(String),
}

impl<T, I> Clone for Source<T, I> {
    fn clone(&self) -> Self {
        match self {
            Source::Function(call) => Source::Function(Arc::clone(call)),
            Source::Attemptable(unit) => Source::Attemptable(Arc::clone(unit)),
            Source::Fallbackable(unit) => Source::Fallbackable(Arc::clone(unit)),
            Source::Configured { unit, configure } => Source::Configured {
                unit: Arc::clone(unit),
                configure: Arc::clone(configure),
            },
            Source::Named(name) => Source::Named(name.clone()),
        }
    }
}

/// Reference to a unit of work, resolved when the builder is frozen
pub struct UnitRef<T, I = ()> {
    label: Option<String>,
    source: Source<T, I>,
}

impl<T, I> Clone for UnitRef<T, I> {
    fn clone(&self) -> Self {
        Self {
            label: self.label.clone(),
            source: self.source.clone(),
        }
    }
}

impl<T, I> fmt::Debug for UnitRef<T, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.source {
            Source::Function(_) => "function",
            Source::Attemptable(_) => "attemptable",
            Source::Fallbackable(_) => "fallbackable",
            Source::Configured { .. } => "configured",
            Source::Named(_) => "named",
        };
        f.debug_struct("UnitRef")
            .field("kind", &kind)
            .field("label", &self.label)
            .finish()
    }
}

impl<T: Payload, I: Payload> UnitRef<T, I> {
    /// Wrap an async closure taking the unit's input
    pub fn function<F, Fut>(f: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::call(unit_fn(f))
    }

    /// Wrap an already type-erased closure
    pub fn call(call: UnitFn<T, I>) -> Self {
        Self {
            label: None,
            source: Source::Function(call),
        }
    }

    pub fn attemptable(unit: Arc<dyn Attemptable<T, I>>) -> Self {
        Self {
            label: None,
            source: Source::Attemptable(unit),
        }
    }

    pub fn fallbackable(unit: Arc<dyn Fallbackable<T, I>>) -> Self {
        Self {
            label: None,
            source: Source::Fallbackable(unit),
        }
    }

    /// An attemptable unit that also configures its own descriptor
    pub fn configured<U>(unit: Arc<U>) -> Self
    where
        U: Attemptable<T, I> + Configures<T, I> + 'static,
    {
        Self {
            label: None,
            source: Source::Configured {
                unit: unit.clone(),
                configure: unit,
            },
        }
    }

    /// A name resolved through the builder's registry
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            label: Some(name.clone()),
            source: Source::Named(name),
        }
    }
}

impl<T, I> UnitRef<T, I> {
    /// Name used in resolution tags and attempt logs
    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Resolve to an executable form, looking names up in `registry`
    pub(crate) fn resolve(
        self,
        registry: Option<&UnitRegistry<T, I>>,
    ) -> Result<Resolved<T, I>, AttemptError> {
        let UnitRef { label, source } = self;

        let (label, source) = match source {
            Source::Named(name) => {
                let registry = registry.ok_or_else(|| {
                    AttemptError::Resolution(format!(
                        "cannot resolve unit '{}': no registry configured",
                        name
                    ))
                })?;
                let entry = registry.get(&name).ok_or_else(|| {
                    AttemptError::Resolution(format!("unknown unit '{}'", name))
                })?;
                if let Source::Named(alias) = &entry.source {
                    return Err(AttemptError::Resolution(format!(
                        "unit '{}' is registered as an alias of '{}'; aliases are not supported",
                        name, alias
                    )));
                }
                (label.or(Some(name)), entry.source.clone())
            }
            other => (label, other),
        };

        let (executable, configure) = match source {
            Source::Function(call) => (Executable::Call(call), None),
            Source::Attemptable(unit) => (Executable::Attemptable(unit), None),
            Source::Fallbackable(unit) => (Executable::Fallbackable(unit), None),
            Source::Configured { unit, configure } => (Executable::Attemptable(unit), Some(configure)),
            Source::Named(name) => {
                return Err(AttemptError::Resolution(format!(
                    "unit '{}' could not be resolved",
                    name
                )))
            }
        };

        Ok(Resolved {
            label,
            executable,
            configure,
        })
    }
}

/// Named units available for resolution
pub struct UnitRegistry<T, I = ()> {
    units: HashMap<String, UnitRef<T, I>>,
}

impl<T, I> Default for UnitRegistry<T, I> {
    fn default() -> Self {
        Self {
            units: HashMap::new(),
        }
    }
}

impl<T: Payload, I: Payload> UnitRegistry<T, I> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, unit: UnitRef<T, I>) -> &mut Self {
        self.units.insert(name.into(), unit);
        self
    }

    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.register(name, UnitRef::function(f))
    }

    pub fn register_attemptable(
        &mut self,
        name: impl Into<String>,
        unit: Arc<dyn Attemptable<T, I>>,
    ) -> &mut Self {
        self.register(name, UnitRef::attemptable(unit))
    }

    pub fn register_fallbackable(
        &mut self,
        name: impl Into<String>,
        unit: Arc<dyn Fallbackable<T, I>>,
    ) -> &mut Self {
        self.register(name, UnitRef::fallbackable(unit))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.units.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.units.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl<T, I> UnitRegistry<T, I> {
    fn get(&self, name: &str) -> Option<&UnitRef<T, I>> {
        self.units.get(name)
    }
}

/// The closed set of executable forms
pub(crate) enum Executable<T, I> {
    Call(UnitFn<T, I>),
    Attemptable(Arc<dyn Attemptable<T, I>>),
    Fallbackable(Arc<dyn Fallbackable<T, I>>),
}

/// A unit after resolution
pub(crate) struct Resolved<T, I> {
    pub label: Option<String>,
    pub executable: Executable<T, I>,
    pub configure: Option<Arc<dyn Configures<T, I>>>,
}

impl<T: Payload, I: Payload> Resolved<T, I> {
    pub fn is_fallback_only(&self) -> bool {
        matches!(self.executable, Executable::Fallbackable(_))
    }

    /// Label for an unnamed unit at a 1-based chain position
    pub fn default_label(&self, position: usize) -> String {
        match self.executable {
            Executable::Call(_) => format!("closure:{}", position),
            _ => format!("unit:{}", position),
        }
    }

    /// True when this fallback declines to handle `error`
    pub fn skips(&self, error: &anyhow::Error) -> bool {
        match &self.executable {
            Executable::Fallbackable(unit) => unit.should_skip(error),
            _ => false,
        }
    }

    /// Execute once. Panics inside the unit become domain errors.
    pub async fn invoke(&self, input: I, trigger: Option<&anyhow::Error>) -> anyhow::Result<T> {
        let future: BoxFuture<'_, anyhow::Result<T>> = match (&self.executable, trigger) {
            (Executable::Call(call), _) => call(input),
            (Executable::Attemptable(unit), _) => unit.handle(input),
            (Executable::Fallbackable(unit), Some(error)) => unit.handle_fallback(error, input),
            (Executable::Fallbackable(_), None) => {
                return Err(anyhow::anyhow!(
                    "fallback-only unit invoked without a triggering error"
                ))
            }
        };

        match AssertUnwindSafe(future).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(anyhow::anyhow!("unit panicked: {}", panic_message(&*panic))),
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Doubler;

    #[async_trait]
    impl Attemptable<i32, i32> for Doubler {
        async fn handle(&self, input: i32) -> anyhow::Result<i32> {
            Ok(input * 2)
        }
    }

    struct CachedValue;

    #[async_trait]
    impl Fallbackable<i32, i32> for CachedValue {
        async fn handle_fallback(&self, error: &anyhow::Error, _input: i32) -> anyhow::Result<i32> {
            anyhow::ensure!(!error.to_string().contains("fatal"), "cache cannot help");
            Ok(-1)
        }

        fn should_skip(&self, error: &anyhow::Error) -> bool {
            error.to_string().contains("skip")
        }
    }

    #[tokio::test]
    async fn test_function_unit() {
        let resolved = UnitRef::<i32, i32>::function(|x| async move { Ok(x + 1) })
            .resolve(None)
            .unwrap();
        assert_eq!(resolved.invoke(41, None).await.unwrap(), 42);
        assert!(resolved.label.is_none());
    }

    #[tokio::test]
    async fn test_attemptable_unit() {
        let resolved = UnitRef::attemptable(Arc::new(Doubler)).resolve(None).unwrap();
        assert_eq!(resolved.invoke(21, None).await.unwrap(), 42);
        assert!(!resolved.is_fallback_only());
    }

    #[tokio::test]
    async fn test_fallbackable_needs_trigger() {
        let resolved = UnitRef::<i32, i32>::fallbackable(Arc::new(CachedValue))
            .resolve(None)
            .unwrap();
        assert!(resolved.is_fallback_only());
        assert!(resolved.invoke(0, None).await.is_err());

        let trigger = anyhow::anyhow!("timeout");
        assert_eq!(resolved.invoke(0, Some(&trigger)).await.unwrap(), -1);
        assert!(resolved.skips(&anyhow::anyhow!("please skip")));
        assert!(!resolved.skips(&trigger));
    }

    #[tokio::test]
    async fn test_named_resolution() {
        let mut registry = UnitRegistry::<i32, i32>::new();
        registry.register_attemptable("doubler", Arc::new(Doubler));

        let resolved = UnitRef::named("doubler").resolve(Some(&registry)).unwrap();
        assert_eq!(resolved.label.as_deref(), Some("doubler"));
        assert_eq!(resolved.invoke(5, None).await.unwrap(), 10);

        let missing = UnitRef::<i32, i32>::named("tripler").resolve(Some(&registry));
        assert!(matches!(missing, Err(AttemptError::Resolution(_))));

        let no_registry = UnitRef::<i32, i32>::named("doubler").resolve(None);
        assert!(matches!(no_registry, Err(AttemptError::Resolution(_))));
    }

    #[test]
    fn test_aliases_are_rejected() {
        let mut registry = UnitRegistry::<i32, i32>::new();
        registry.register("alias", UnitRef::named("doubler"));
        let result = UnitRef::<i32, i32>::named("alias").resolve(Some(&registry));
        assert!(matches!(result, Err(AttemptError::Resolution(_))));
    }

    #[tokio::test]
    async fn test_panics_become_errors() {
        let resolved = UnitRef::<i32, ()>::function(|_| async {
            let missing: Option<i32> = None;
            Ok(missing.expect("kaboom"))
        })
            .resolve(None)
            .unwrap();
        let err = resolved.invoke((), None).await.unwrap_err();
        assert_eq!(err.to_string(), "unit panicked: kaboom");
    }

    #[test]
    fn test_registry_names_sorted() {
        let mut registry = UnitRegistry::<i32, i32>::new();
        registry
            .register_fn("b", |x| async move { Ok(x) })
            .register_fn("a", |x| async move { Ok(x) });
        assert_eq!(registry.names(), vec!["a", "b"]);
        assert!(registry.contains("a"));
    }
}
