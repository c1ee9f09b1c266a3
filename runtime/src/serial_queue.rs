//! A serial execution context backed by a dedicated thread.
//!
//! Jobs submitted to a [`SerialQueue`] run one at a time, in submission
//! order, on a named OS thread owned by the queue. The queue implements
//! [`ExecutionContext`], so it can be handed to
//! [`observe_on`](impulse_core::OperatorsExt::observe_on) to move deliveries
//! onto that thread.
//!
//! Whether the caller already runs on the queue is answered by comparing
//! thread ids against the id recorded when the thread was spawned.
//!
//! The thread stops once every handle to the queue is dropped and the jobs
//! already submitted have run.

use crate::config::QueueConfig;
use crate::error::{Result, RuntimeError};
use impulse_core::{ExecutionContext, Job};
use parking_lot::Mutex;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use tokio::sync::mpsc;

struct Shared {
    name: String,
    sender: Option<mpsc::UnboundedSender<Job>>,
    thread_id: ThreadId,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        // Closing the channel lets the worker finish the backlog and exit.
        self.sender.take();
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        if thread::current().id() == self.thread_id {
            // The last handle was dropped by a job on the worker itself.
            return;
        }
        if worker.join().is_err() {
            tracing::warn!(queue = %self.name, "serial queue worker terminated abnormally");
        }
    }
}

/// Serial execution context running jobs on its own thread.
///
/// Cloning yields another handle to the same queue.
///
/// # Example
///
/// ```
/// use impulse_core::ExecutionContext;
/// use impulse_runtime::serial_queue::SerialQueue;
/// use std::sync::mpsc;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let queue = SerialQueue::new("example")?;
/// let (tx, rx) = mpsc::channel();
///
/// let on_queue = queue.clone();
/// queue.submit(Box::new(move || {
///     let _ = tx.send(on_queue.is_current());
/// }))?;
///
/// assert!(rx.recv()?);
/// assert!(!queue.is_current());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SerialQueue {
    shared: Arc<Shared>,
}

impl SerialQueue {
    /// Start a queue whose worker thread is called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::QueueSpawn`] if the thread cannot be started.
    #[tracing::instrument(skip_all, fields(queue = %name.as_ref()))]
    pub fn new(name: impl AsRef<str>) -> Result<Self> {
        let name = name.as_ref().to_string();
        let (sender, receiver) = mpsc::unbounded_channel::<Job>();

        let worker = thread::Builder::new()
            .name(name.clone())
            .spawn({
                let name = name.clone();
                move || run_jobs(&name, receiver)
            })
            .map_err(RuntimeError::QueueSpawn)?;

        tracing::info!("serial queue started");
        Ok(Self {
            shared: Arc::new(Shared {
                name,
                sender: Some(sender),
                thread_id: worker.thread().id(),
                worker: Mutex::new(Some(worker)),
            }),
        })
    }

    /// Start a queue as described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::QueueSpawn`] if the thread cannot be started.
    pub fn from_config(config: &QueueConfig) -> Result<Self> {
        Self::new(&config.name)
    }

    /// Name of the worker thread.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Queue `job` behind everything submitted before it.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::QueueClosed`] if the worker has stopped.
    pub fn submit(&self, job: Job) -> Result<()> {
        let sender = self.shared.sender.as_ref().ok_or(RuntimeError::QueueClosed)?;
        sender.send(job).map_err(|_| RuntimeError::QueueClosed)
    }
}

fn run_jobs(name: &str, mut receiver: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = receiver.blocking_recv() {
        metrics::counter!("impulse.serial_queue.jobs").increment(1);
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            tracing::error!(queue = %name, "job panicked on serial queue");
        }
    }
    tracing::info!(queue = %name, "serial queue stopped");
}

impl ExecutionContext for SerialQueue {
    fn is_current(&self) -> bool {
        thread::current().id() == self.shared.thread_id
    }

    fn execute(&self, job: Job) {
        if let Err(error) = self.submit(job) {
            tracing::warn!(queue = %self.shared.name, %error, "dropping job");
        }
    }
}

impl fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialQueue")
            .field("name", &self.shared.name)
            .field("thread_id", &self.shared.thread_id)
            .finish()
    }
}
