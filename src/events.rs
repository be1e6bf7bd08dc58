/*!
 * Lifecycle notifications
 *
 * The engine publishes an [`AttemptEvent`] at fixed points of a run. Where the
 * events go is up to the [`EventSink`] the engine was built with.
 */

use std::sync::Mutex;

use serde::Serialize;
use tracing::debug;

use crate::context::{AttemptContext, Resolution};

/// A lifecycle notification
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AttemptEvent {
    Started {
        max_attempts: u32,
    },
    Failed {
        attempt: u32,
        error: String,
    },
    Retrying {
        attempt: u32,
        error: Option<String>,
    },
    FallbackTriggered {
        fallback: String,
        error: String,
    },
    Succeeded {
        attempts: u32,
        resolved_by: Resolution,
    },
    AllFailed {
        attempts: u32,
        error: Option<String>,
    },
}

impl AttemptEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AttemptEvent::Started { .. } => "started",
            AttemptEvent::Failed { .. } => "failed",
            AttemptEvent::Retrying { .. } => "retrying",
            AttemptEvent::FallbackTriggered { .. } => "fallback_triggered",
            AttemptEvent::Succeeded { .. } => "succeeded",
            AttemptEvent::AllFailed { .. } => "all_failed",
        }
    }
}

/// Receiver of lifecycle notifications
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &AttemptEvent, context: &AttemptContext);
}

/// Writes events through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn publish(&self, event: &AttemptEvent, context: &AttemptContext) {
        match event {
            AttemptEvent::Started { max_attempts } => {
                debug!(max_attempts, "Run started");
            }
            AttemptEvent::Failed { attempt, error } => {
                debug!(attempt, error = %error, "Attempt failed");
            }
            AttemptEvent::Retrying { attempt, .. } => {
                debug!(attempt, max_attempts = context.max_attempts(), "Retrying");
            }
            AttemptEvent::FallbackTriggered { fallback, error } => {
                debug!(fallback = %fallback, error = %error, "Falling back");
            }
            AttemptEvent::Succeeded {
                attempts,
                resolved_by,
            } => {
                debug!(attempts, resolved_by = %resolved_by, "Run resolved");
            }
            AttemptEvent::AllFailed { attempts, .. } => {
                debug!(attempts, "Run exhausted");
            }
        }
    }
}

/// Drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn publish(&self, _event: &AttemptEvent, _context: &AttemptContext) {}
}

/// Keeps published events in memory
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<AttemptEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AttemptEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Event names in publish order
    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(AttemptEvent::name).collect()
    }
}

impl EventSink for RecordingEventSink {
    fn publish(&self, event: &AttemptEvent, _context: &AttemptContext) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.clone());
    }
}
