//! Serial execution contexts for thread-hopping observations.
//!
//! The engine has no global scheduler. When a consumer needs values on a
//! particular context it uses [`observe_on`](crate::operators::OperatorsExt::observe_on)
//! with an [`ExecutionContext`]. The context itself says whether the caller
//! is already running on it; there is no thread-local lookup.

use std::fmt;
use std::sync::Arc;

/// Unit of work handed to an execution context.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// A serial executor: jobs run one at a time, in submission order.
pub trait ExecutionContext: Send + Sync {
    /// Whether the calling thread is currently running a job of this context.
    fn is_current(&self) -> bool;

    /// Schedule `job` to run after every previously scheduled job.
    fn execute(&self, job: Job);
}

impl<C> ExecutionContext for Arc<C>
where
    C: ExecutionContext + ?Sized,
{
    fn is_current(&self) -> bool {
        (**self).is_current()
    }

    fn execute(&self, job: Job) {
        (**self).execute(job);
    }
}

/// Runs every job inline on the calling thread.
///
/// Useful where an API wants a context but the caller does not need a hop.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateContext;

impl ExecutionContext for ImmediateContext {
    fn is_current(&self) -> bool {
        true
    }

    fn execute(&self, job: Job) {
        job();
    }
}

/// Shared, type-erased execution context.
#[derive(Clone)]
pub struct SharedContext(Arc<dyn ExecutionContext>);

impl SharedContext {
    /// Erase a concrete context.
    pub fn new<C>(context: C) -> Self
    where
        C: ExecutionContext + 'static,
    {
        Self(Arc::new(context))
    }
}

impl ExecutionContext for SharedContext {
    fn is_current(&self) -> bool {
        self.0.is_current()
    }

    fn execute(&self, job: Job) {
        self.0.execute(job);
    }
}

impl fmt::Debug for SharedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedContext(<context>)")
    }
}
