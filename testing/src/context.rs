//! Execution context driven by the test.

use impulse_core::{ExecutionContext, Job};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
struct Inner {
    queue: Mutex<VecDeque<Job>>,
    running: AtomicBool,
}

/// Serial execution context whose jobs run only when the test says so.
///
/// `is_current` is true exactly while [`run_pending`](Self::run_pending) is
/// executing jobs, which lets tests exercise both the inline and the queued
/// paths of `observe_on`.
///
/// # Example
///
/// ```
/// use impulse_core::{ExecutionContext, ObservableExt, OperatorsExt, Publisher};
/// use impulse_testing::ManualExecutionContext;
/// use std::sync::{Arc, Mutex};
///
/// let context = ManualExecutionContext::new();
/// let publisher = Publisher::new();
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = Arc::clone(&seen);
/// let _sub = publisher
///     .clone()
///     .observe_on(context.clone())
///     .subscribe(move |v: u32| sink.lock().unwrap().push(v));
///
/// publisher.emit(1);
/// assert!(seen.lock().unwrap().is_empty());
///
/// assert_eq!(context.run_pending(), 1);
/// assert_eq!(*seen.lock().unwrap(), vec![1]);
/// ```
#[derive(Clone, Default)]
pub struct ManualExecutionContext {
    inner: Arc<Inner>,
}

/// Clears the running flag even if a job panics.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ManualExecutionContext {
    /// Create a context with nothing queued.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs waiting to run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Run queued jobs, including ones queued while running, until the
    /// queue is empty. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let was_running = self.inner.running.swap(true, Ordering::SeqCst);
        let _guard = (!was_running).then(|| RunningGuard(&self.inner.running));

        let mut ran = 0;
        loop {
            let job = self.inner.queue.lock().pop_front();
            let Some(job) = job else {
                break;
            };
            job();
            ran += 1;
        }
        ran
    }

    /// Run at most one queued job. Returns whether one ran.
    pub fn run_one(&self) -> bool {
        let job = self.inner.queue.lock().pop_front();
        let Some(job) = job else {
            return false;
        };
        let was_running = self.inner.running.swap(true, Ordering::SeqCst);
        let _guard = (!was_running).then(|| RunningGuard(&self.inner.running));
        job();
        true
    }
}

impl ExecutionContext for ManualExecutionContext {
    fn is_current(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    fn execute(&self, job: Job) {
        tracing::trace!("queueing job on manual context");
        self.inner.queue.lock().push_back(job);
    }
}

impl fmt::Debug for ManualExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualExecutionContext")
            .field("pending", &self.pending())
            .field("running", &self.inner.running.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn is_current_only_while_running() {
        let context = ManualExecutionContext::new();
        let observed = Arc::new(AtomicBool::new(false));

        let handle = context.clone();
        let flag = Arc::clone(&observed);
        context.execute(Box::new(move || flag.store(handle.is_current(), Ordering::SeqCst)));

        assert!(!context.is_current());
        assert_eq!(context.pending(), 1);
        assert_eq!(context.run_pending(), 1);
        assert!(observed.load(Ordering::SeqCst));
        assert!(!context.is_current());
    }

    #[test]
    fn jobs_queued_while_running_run_in_the_same_pass() {
        let context = ManualExecutionContext::new();
        let count = Arc::new(AtomicUsize::new(0));

        let nested = context.clone();
        let c = Arc::clone(&count);
        context.execute(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
            let c = Arc::clone(&c);
            nested.execute(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }));
        }));

        assert_eq!(context.run_pending(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn run_one_runs_a_single_job() {
        let context = ManualExecutionContext::new();
        context.execute(Box::new(|| {}));
        context.execute(Box::new(|| {}));

        assert!(context.run_one());
        assert_eq!(context.pending(), 1);
        assert!(context.run_one());
        assert!(!context.run_one());
    }
}
