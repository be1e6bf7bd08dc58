/*!
 * Execution context for one logical run
 *
 * A context is created fresh for every run, mutated by the engine while
 * attempts and fallbacks execute, and handed to hooks by reference. Once the
 * run reaches a terminal state the engine stops touching it.
 */

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SharedError;

/// How a run reached its terminal state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Resolution {
    /// First attempt of the primary unit succeeded
    Primary,
    /// The primary unit succeeded on the given attempt (> 1)
    Retry(u32),
    /// A fallback succeeded
    Fallback(String),
    /// The condition gate prevented the run
    Skipped,
}

impl Resolution {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Resolution::Fallback(_))
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Primary => write!(f, "primary"),
            Resolution::Retry(attempt) => write!(f, "retry:{}", attempt),
            Resolution::Fallback(name) => write!(f, "fallback:{}", name),
            Resolution::Skipped => write!(f, "skipped"),
        }
    }
}

impl From<Resolution> for String {
    fn from(resolution: Resolution) -> Self {
        resolution.to_string()
    }
}

impl TryFrom<String> for Resolution {
    type Error = String;

    fn try_from(tag: String) -> Result<Self, Self::Error> {
        match tag.as_str() {
            "primary" => return Ok(Resolution::Primary),
            "skipped" => return Ok(Resolution::Skipped),
            _ => {}
        }

        if let Some(attempt) = tag.strip_prefix("retry:") {
            return attempt
                .parse()
                .map(Resolution::Retry)
                .map_err(|_| format!("invalid retry tag: {}", tag));
        }

        match tag.strip_prefix("fallback:") {
            Some(name) => Ok(Resolution::Fallback(name.to_string())),
            None => Err(format!("unknown resolution tag: {}", tag)),
        }
    }
}

/// One entry of the append-only attempt log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// `attempt:<n>`, `fallback:<name>`, or the resolution tag on success
    pub stage: String,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Mutable record of one run's progress
#[derive(Debug, Clone)]
pub struct AttemptContext {
    started_at: DateTime<Utc>,
    max_attempts: u32,
    attempt: u32,
    succeeded: bool,
    last_error: Option<SharedError>,
    resolved_by: Option<Resolution>,
    log: Vec<LogEntry>,
}

impl AttemptContext {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            started_at: Utc::now(),
            max_attempts,
            attempt: 0,
            succeeded: false,
            last_error: None,
            resolved_by: None,
            log: Vec::new(),
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Time since the run started
    pub fn elapsed(&self) -> Duration {
        (Utc::now() - self.started_at).to_std().unwrap_or_default()
    }

    /// Current attempt number (1-based, 0 before the first attempt)
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn succeeded(&self) -> bool {
        self.succeeded
    }

    pub fn last_error(&self) -> Option<&SharedError> {
        self.last_error.as_ref()
    }

    pub fn resolved_by(&self) -> Option<&Resolution> {
        self.resolved_by.as_ref()
    }

    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    pub fn is_retry(&self) -> bool {
        self.attempt > 1
    }

    pub fn is_fallback(&self) -> bool {
        self.resolved_by
            .as_ref()
            .is_some_and(Resolution::is_fallback)
    }

    /// Append an entry to the attempt log
    pub fn record(&mut self, stage: impl Into<String>, success: bool, error: Option<&anyhow::Error>) {
        self.log.push(LogEntry {
            stage: stage.into(),
            success,
            error: error.map(|e| e.to_string()),
            timestamp: Utc::now(),
        });
    }

    /// Move to the next attempt and return its number
    pub(crate) fn advance(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }

    /// Record a failed stage and keep its error as the last observed one
    pub(crate) fn fail(&mut self, stage: String, error: SharedError) {
        self.record(stage, false, Some(&*error));
        self.last_error = Some(error);
    }

    /// Terminal success: the resolution tag is set here and nowhere else
    pub(crate) fn succeed(&mut self, resolution: Resolution) {
        debug_assert!(self.resolved_by.is_none(), "resolution set twice");
        self.succeeded = true;
        self.record(resolution.to_string(), true, None);
        self.resolved_by = Some(resolution);
    }

    /// Terminal skip by the condition gate
    pub(crate) fn skip(&mut self) {
        self.succeeded = true;
        self.resolved_by = Some(Resolution::Skipped);
    }
}
