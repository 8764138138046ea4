//! Dispatch contexts: where completion callbacks run.
//!
//! The worker never runs the user callback itself when a context is
//! supplied; it posts a task and moves on. A [`tokio::runtime::Handle`] runs
//! the task on whichever thread drives that runtime.

use tokio::runtime::Handle;
use tracing::trace;

/// A unit of work posted from the transfer worker.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// An executor that accepts tasks from other threads.
pub trait Dispatch: Send + Sync + 'static {
    /// Schedules `task` to run on this context.
    fn post(&self, task: Task);
}

impl Dispatch for Handle {
    fn post(&self, task: Task) {
        trace!("posting task to runtime");
        // Detached: the transfer does not wait for its callback.
        drop(self.spawn(async move { task() }));
    }
}

/// Runs tasks immediately on the posting thread (the transfer worker).
#[derive(Debug, Clone, Copy, Default)]
pub struct Inline;

impl Dispatch for Inline {
    fn post(&self, task: Task) {
        task();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[test]
    fn test_inline_runs_immediately() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        Inline.post(Box::new(move || flag.store(true, Ordering::SeqCst)));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_handle_runs_task_on_runtime() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let handle = Handle::current();
        std::thread::spawn(move || {
            handle.post(Box::new(move || {
                let _ = tx.send(std::thread::current().name().map(str::to_string));
            }));
        });
        assert!(rx.await.is_ok());
    }
}
