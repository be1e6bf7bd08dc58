/*!
 * Injected policy table
 *
 * Everything the engine would otherwise read from ambient configuration
 * (named backoff presets, never/always-retry lists, the events switch, run
 * defaults) lives here and is handed to the engine explicitly.
 */

use std::any::type_name;
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::time::Duration;

use attempt_core_backoff::Backoff;
use regex::Regex;

use crate::command::CommandFailed;
use crate::config::Defaults;
use crate::error::AttemptError;

/// Predicate over domain errors, used by never/always-retry lists and catch handlers
#[derive(Clone)]
pub enum ErrorMatcher {
    /// The error, or any error in its cause chain, is of a given Rust type
    Type {
        name: &'static str,
        check: fn(&anyhow::Error) -> bool,
    },
    /// An `io::Error` of the given kind somewhere in the cause chain
    Io(io::ErrorKind),
    /// The rendered error chain matches the pattern
    Message(Regex),
    /// A failed shell command exited with this code
    ExitCode(i32),
}

fn is_type<E>(error: &anyhow::Error) -> bool
where
    E: std::error::Error + Send + Sync + 'static,
{
    error.chain().any(|cause| cause.is::<E>())
}

impl ErrorMatcher {
    /// Match errors of type `E` anywhere in the cause chain
    pub fn of<E>() -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ErrorMatcher::Type {
            name: type_name::<E>(),
            check: is_type::<E>,
        }
    }

    pub fn io(kind: io::ErrorKind) -> Self {
        ErrorMatcher::Io(kind)
    }

    pub fn message(pattern: &str) -> Result<Self, AttemptError> {
        Ok(ErrorMatcher::Message(Regex::new(pattern)?))
    }

    pub fn exit_code(code: i32) -> Self {
        ErrorMatcher::ExitCode(code)
    }

    pub fn matches(&self, error: &anyhow::Error) -> bool {
        match self {
            ErrorMatcher::Type { check, .. } => check(error),
            ErrorMatcher::Io(kind) => error
                .chain()
                .filter_map(|cause| cause.downcast_ref::<io::Error>())
                .any(|io_error| io_error.kind() == *kind),
            ErrorMatcher::Message(pattern) => pattern.is_match(&format!("{:#}", error)),
            ErrorMatcher::ExitCode(code) => error
                .chain()
                .filter_map(|cause| cause.downcast_ref::<CommandFailed>())
                .any(|failed| failed.code == Some(*code)),
        }
    }
}

impl fmt::Debug for ErrorMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorMatcher::Type { name, .. } => write!(f, "Type({})", name),
            ErrorMatcher::Io(kind) => write!(f, "Io({:?})", kind),
            ErrorMatcher::Message(pattern) => write!(f, "Message({:?})", pattern.as_str()),
            ErrorMatcher::ExitCode(code) => write!(f, "ExitCode({})", code),
        }
    }
}

/// Parse an `io::ErrorKind` from its name (`NotFound`, `timed_out`, ...)
pub fn parse_io_kind(name: &str) -> Option<io::ErrorKind> {
    use io::ErrorKind::*;

    let normalized: String = name
        .chars()
        .filter(|c| *c != '_' && *c != '-')
        .collect::<String>()
        .to_ascii_lowercase();

    let kind = match normalized.as_str() {
        "notfound" => NotFound,
        "permissiondenied" => PermissionDenied,
        "connectionrefused" => ConnectionRefused,
        "connectionreset" => ConnectionReset,
        "connectionaborted" => ConnectionAborted,
        "notconnected" => NotConnected,
        "addrinuse" => AddrInUse,
        "addrnotavailable" => AddrNotAvailable,
        "brokenpipe" => BrokenPipe,
        "alreadyexists" => AlreadyExists,
        "wouldblock" => WouldBlock,
        "invalidinput" => InvalidInput,
        "invaliddata" => InvalidData,
        "timedout" => TimedOut,
        "writezero" => WriteZero,
        "interrupted" => Interrupted,
        "unsupported" => Unsupported,
        "unexpectedeof" => UnexpectedEof,
        "outofmemory" => OutOfMemory,
        "other" => Other,
        _ => return None,
    };
    Some(kind)
}

/// Policy handed to the engine at construction
#[derive(Debug, Clone)]
pub struct PolicyTable {
    /// Named backoff presets for `backoff(name)`
    pub presets: BTreeMap<String, Backoff>,
    /// Errors that are never retried
    pub never_retry: Vec<ErrorMatcher>,
    /// Errors that are always retried while attempts remain
    pub always_retry: Vec<ErrorMatcher>,
    /// Global switch for lifecycle notifications
    pub events_enabled: bool,
    /// Values applied by `apply_defaults`
    pub defaults: Defaults,
    /// Default timeout for async hand-off
    pub dispatch_timeout: Duration,
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self {
            presets: Backoff::presets()
                .into_iter()
                .map(|(name, backoff)| (name.to_string(), backoff))
                .collect(),
            never_retry: Vec::new(),
            always_retry: Vec::new(),
            events_enabled: true,
            defaults: Defaults::default(),
            dispatch_timeout: Duration::from_secs(60),
        }
    }
}

impl PolicyTable {
    pub fn preset(&self, name: &str) -> Option<&Backoff> {
        self.presets
            .get(name)
            .or_else(|| self.presets.get(&name.replace('-', "_")))
    }

    pub fn with_preset(mut self, name: impl Into<String>, backoff: Backoff) -> Self {
        self.presets.insert(name.into(), backoff);
        self
    }

    pub fn never_retry(mut self, matcher: ErrorMatcher) -> Self {
        self.never_retry.push(matcher);
        self
    }

    pub fn always_retry(mut self, matcher: ErrorMatcher) -> Self {
        self.always_retry.push(matcher);
        self
    }

    pub fn with_events(mut self, enabled: bool) -> Self {
        self.events_enabled = enabled;
        self
    }

    pub fn with_defaults(mut self, defaults: Defaults) -> Self {
        self.defaults = defaults;
        self
    }
}
