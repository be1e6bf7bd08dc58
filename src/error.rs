/*!
 * Error types for the attempt engine
 */

use std::io;
use std::sync::Arc;
use std::time::Duration;

use attempt_core_backoff::BackoffError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AttemptError>;

/// A domain error raised by a unit of work, shared between contexts and outcomes
pub type SharedError = Arc<anyhow::Error>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

/// Message used when a failure has to be raised but no error was captured
pub const ALL_FAILED_MESSAGE: &str = "All attempts and fallbacks failed";

#[derive(Debug, Error)]
pub enum AttemptError {
    /// A unit reference could not be turned into something executable
    #[error("Resolution error: {0}")]
    Resolution(String),

    /// The terminal error of a failed run, re-raised at the call site
    #[error("{0}")]
    Failed(SharedError),

    /// Failure with no concrete error captured
    #[error("{0}")]
    AllFailed(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// An async hand-off exceeded its timeout
    #[error("Attempt timed out after {0:?}")]
    Timeout(Duration),

    /// The async hand-off could not complete (task panicked or was aborted)
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// I/O error outside of a unit of work (config files, log files)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl AttemptError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            AttemptError::Resolution(_) | AttemptError::Config(_) => EXIT_FATAL,
            AttemptError::Failed(_)
            | AttemptError::AllFailed(_)
            | AttemptError::Timeout(_)
            | AttemptError::Dispatch(_)
            | AttemptError::Io(_) => EXIT_FAILURE,
        }
    }

    /// Configuration-phase errors are never retried and never reach a fallback
    pub fn is_resolution(&self) -> bool {
        matches!(self, AttemptError::Resolution(_) | AttemptError::Config(_))
    }

    /// The underlying domain error, when this wraps one
    pub fn domain(&self) -> Option<&anyhow::Error> {
        match self {
            AttemptError::Failed(error) => Some(&**error),
            _ => None,
        }
    }

    /// Convert into a shared domain error, unwrapping `Failed` instead of nesting it
    pub fn into_shared(self) -> SharedError {
        match self {
            AttemptError::Failed(error) => error,
            other => Arc::new(anyhow::Error::new(other)),
        }
    }

    /// Re-raise a terminal failure, or the synthetic all-failed error if none was captured
    pub(crate) fn from_terminal(error: Option<&SharedError>) -> Self {
        match error {
            Some(error) => AttemptError::Failed(Arc::clone(error)),
            None => AttemptError::AllFailed(ALL_FAILED_MESSAGE.to_string()),
        }
    }
}

impl From<BackoffError> for AttemptError {
    fn from(err: BackoffError) -> Self {
        AttemptError::Config(err.to_string())
    }
}

impl From<toml::de::Error> for AttemptError {
    fn from(err: toml::de::Error) -> Self {
        AttemptError::Config(format!("TOML parse error: {}", err))
    }
}

impl From<toml::ser::Error> for AttemptError {
    fn from(err: toml::ser::Error) -> Self {
        AttemptError::Config(format!("TOML write error: {}", err))
    }
}

impl From<serde_json::Error> for AttemptError {
    fn from(err: serde_json::Error) -> Self {
        AttemptError::Config(format!("JSON error: {}", err))
    }
}

impl From<regex::Error> for AttemptError {
    fn from(err: regex::Error) -> Self {
        AttemptError::Config(format!("Invalid pattern: {}", err))
    }
}

/// View a domain error through the standard error trait
pub(crate) fn std_error(error: &anyhow::Error) -> &(dyn std::error::Error + 'static) {
    &**error
}
