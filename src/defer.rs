/*!
 * Deferred callbacks
 *
 * `defer` hooks are handed to a [`DeferredSink`] after a run completes. A
 * request/response host would flush its queue once the response is written;
 * without a sink the engine runs them immediately.
 */

use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::hooks::{isolate, ErrorReporter, TracingReporter};

/// A callback postponed until the surrounding unit of work completes
pub type DeferredTask = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

/// Collaborator that takes ownership of deferred callbacks
pub trait DeferredSink: Send + Sync {
    fn defer(&self, task: DeferredTask);
}

/// In-memory queue of deferred callbacks, drained by [`DeferQueue::flush`]
pub struct DeferQueue {
    tasks: Mutex<Vec<DeferredTask>>,
    reporter: Arc<dyn ErrorReporter>,
}

impl Default for DeferQueue {
    fn default() -> Self {
        Self::new(Arc::new(TracingReporter))
    }
}

impl DeferQueue {
    pub fn new(reporter: Arc<dyn ErrorReporter>) -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
            reporter,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every queued task in the order it was deferred; returns how many ran
    pub fn flush(&self) -> usize {
        let tasks = std::mem::take(&mut *self.lock());
        let count = tasks.len();
        debug!(count, "Flushing deferred callbacks");

        for task in tasks {
            isolate(self.reporter.as_ref(), "defer", task);
        }
        count
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<DeferredTask>> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DeferredSink for DeferQueue {
    fn defer(&self, task: DeferredTask) {
        self.lock().push(task);
    }
}
