/*!
 * Immutable result of one run
 */

use serde::Serialize;

use crate::context::{LogEntry, Resolution};
use crate::error::{AttemptError, SharedError};

/// Terminal result of a run.
///
/// A successful outcome never carries an error; a failed one never carries a
/// value. Outcomes are never mutated: [`Outcome::map`] builds a new one.
#[derive(Debug, Clone)]
pub struct Outcome<T> {
    value: Option<T>,
    success: bool,
    error: Option<SharedError>,
    attempts: u32,
    resolved_by: Option<Resolution>,
    log: Vec<LogEntry>,
}

impl<T> Outcome<T> {
    pub(crate) fn success(value: T, attempts: u32, resolved_by: Resolution, log: Vec<LogEntry>) -> Self {
        Self {
            value: Some(value),
            success: true,
            error: None,
            attempts,
            resolved_by: Some(resolved_by),
            log,
        }
    }

    pub(crate) fn failure(error: Option<SharedError>, attempts: u32, log: Vec<LogEntry>) -> Self {
        Self {
            value: None,
            success: false,
            error,
            attempts,
            resolved_by: None,
            log,
        }
    }

    pub(crate) fn skipped() -> Self {
        Self {
            value: None,
            success: true,
            error: None,
            attempts: 0,
            resolved_by: Some(Resolution::Skipped),
            log: Vec::new(),
        }
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn into_value(self) -> Option<T> {
        self.value
    }

    pub fn succeeded(&self) -> bool {
        self.success
    }

    pub fn failed(&self) -> bool {
        !self.success
    }

    pub fn error(&self) -> Option<&SharedError> {
        self.error.as_ref()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn resolved_by(&self) -> Option<&Resolution> {
        self.resolved_by.as_ref()
    }

    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    /// Transform the value of a successful outcome; failures pass through unchanged
    pub fn map<U, F>(self, f: F) -> Outcome<U>
    where
        F: FnOnce(T) -> U,
    {
        Outcome {
            value: self.value.map(f),
            success: self.success,
            error: self.error,
            attempts: self.attempts,
            resolved_by: self.resolved_by,
            log: self.log,
        }
    }

    /// The value, or `default` when the run failed or produced nothing
    pub fn get_or_else(self, default: T) -> T {
        match (self.success, self.value) {
            (true, Some(value)) => value,
            _ => default,
        }
    }

    /// The value of a successful run, or the terminal error of a failed one
    pub fn get_or_throw(self) -> Result<Option<T>, AttemptError> {
        if self.success {
            Ok(self.value)
        } else {
            Err(AttemptError::from_terminal(self.error.as_ref()))
        }
    }

    pub fn on_success<F>(self, f: F) -> Self
    where
        F: FnOnce(Option<&T>),
    {
        if self.success {
            f(self.value.as_ref());
        }
        self
    }

    pub fn on_failure<F>(self, f: F) -> Self
    where
        F: FnOnce(Option<&SharedError>),
    {
        if !self.success {
            f(self.error.as_ref());
        }
        self
    }

    /// Serializable view without the value
    pub fn summary(&self) -> OutcomeSummary {
        OutcomeSummary {
            succeeded: self.success,
            attempts: self.attempts,
            resolved_by: self.resolved_by.as_ref().map(ToString::to_string),
            error: self.error.as_ref().map(|e| format!("{:#}", e)),
            log: self.log.clone(),
        }
    }
}

/// Value-free description of an outcome, for logs and CLI output
#[derive(Debug, Clone, Serialize)]
pub struct OutcomeSummary {
    pub succeeded: bool,
    pub attempts: u32,
    pub resolved_by: Option<String>,
    pub error: Option<String>,
    pub log: Vec<LogEntry>,
}
