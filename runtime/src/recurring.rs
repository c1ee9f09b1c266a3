//! Load impulse emitter with a refresh timer.
//!
//! [`RecurringLoadImpulseEmitter`] behaves like
//! [`DefaultLoadImpulseEmitter`] and additionally re-emits the most recent
//! impulse on a fixed interval, as a [`Background`](LoadImpulseType::Background)
//! impulse. The timer:
//!
//! - is created lazily, when the emitter is first observed;
//! - restarts its interval whenever an impulse is emitted, so a refresh
//!   never follows a manual load more closely than the interval;
//! - is cancelled and recreated when the timer mode changes, and the last
//!   impulse is re-emitted right away;
//! - is cancelled when the last handle to the emitter is dropped.
//!
//! Ticks run as a task on a tokio runtime, away from whatever thread the
//! consumers observe on. Mode changes and rescheduling are serialized by one
//! lock, taken in the same step as the emission it belongs to.

use crate::error::{Result, RuntimeError};
use impulse_core::{
    DefaultLoadImpulseEmitter, Disposable, LoadImpulse, LoadImpulseEmitter, LoadImpulseType, Observable,
    Observer, Parameters,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Refresh policy of a [`RecurringLoadImpulseEmitter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TimerMode {
    /// Never refresh on a timer.
    #[default]
    None,
    /// Re-emit the last impulse every given interval.
    Repeating(Duration),
}

struct TimerState<P> {
    mode: TimerMode,
    last: Option<LoadImpulse<P>>,
    task: Option<AbortHandle>,
    started: bool,
}

struct Shared<P> {
    inner: DefaultLoadImpulseEmitter<P>,
    timer: Mutex<TimerState<P>>,
    handle: Handle,
}

impl<P> Drop for Shared<P> {
    fn drop(&mut self) {
        if let Some(task) = self.timer.get_mut().task.take() {
            task.abort();
        }
    }
}

impl<P: Parameters> Shared<P> {
    fn reschedule(this: &Arc<Self>, timer: &mut TimerState<P>) {
        if let Some(task) = timer.task.take() {
            task.abort();
        }
        let TimerMode::Repeating(interval) = timer.mode else {
            return;
        };
        if !timer.started {
            return;
        }

        tracing::debug!(?interval, "scheduling refresh timer");
        let weak: Weak<Self> = Arc::downgrade(this);
        let task = this.handle.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                shared.tick();
            }
        });
        timer.task = Some(task.abort_handle());
    }

    fn tick(&self) {
        self.inner.emit_with(|| {
            let last = self.timer.lock().last.clone()?;
            metrics::counter!("impulse.timer.ticks").increment(1);
            tracing::trace!(parameters = ?last.parameters, "refresh timer fired");
            Some(LoadImpulse::new(last.parameters, LoadImpulseType::Background))
        });
    }
}

/// Emitter that periodically re-emits its last impulse.
///
/// Cloning yields another handle to the same emitter and timer.
///
/// # Example
///
/// ```
/// use impulse_core::{LoadImpulse, LoadImpulseEmitter, ObservableExt};
/// use impulse_runtime::recurring::{RecurringLoadImpulseEmitter, TimerMode};
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let emitter = RecurringLoadImpulseEmitter::new(
///     Some(LoadImpulse::initial("feed")),
///     TimerMode::Repeating(Duration::from_secs(30)),
/// )?;
///
/// let subscription = emitter.subscribe(|impulse: LoadImpulse<&str>| {
///     println!("load {}", impulse.parameters);
/// });
/// assert!(emitter.is_timer_running());
///
/// emitter.set_timer_mode(TimerMode::None);
/// assert!(!emitter.is_timer_running());
/// subscription.dispose();
/// # Ok(())
/// # }
/// ```
pub struct RecurringLoadImpulseEmitter<P> {
    shared: Arc<Shared<P>>,
}

impl<P> Clone for RecurringLoadImpulseEmitter<P> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<P: Parameters> RecurringLoadImpulseEmitter<P> {
    /// Create an emitter whose timer runs on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::NoTokioRuntime`] when called outside a tokio
    /// runtime.
    pub fn new(initial: Option<LoadImpulse<P>>, mode: TimerMode) -> Result<Self> {
        let handle = Handle::try_current().map_err(|_| RuntimeError::NoTokioRuntime)?;
        Ok(Self::with_handle(initial, mode, handle))
    }

    /// Create an emitter whose timer runs on the runtime behind `handle`.
    #[must_use]
    pub fn with_handle(initial: Option<LoadImpulse<P>>, mode: TimerMode, handle: Handle) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: DefaultLoadImpulseEmitter::new(initial.clone()),
                timer: Mutex::new(TimerState {
                    mode,
                    last: initial,
                    task: None,
                    started: false,
                }),
                handle,
            }),
        }
    }

    /// The current timer mode.
    #[must_use]
    pub fn timer_mode(&self) -> TimerMode {
        self.shared.timer.lock().mode
    }

    /// Switch timer mode, restart the timer and re-emit the last impulse.
    pub fn set_timer_mode(&self, mode: TimerMode) {
        self.shared.inner.emit_with(|| {
            let mut timer = self.shared.timer.lock();
            tracing::debug!(from = ?timer.mode, to = ?mode, "changing timer mode");
            timer.mode = mode;
            Shared::reschedule(&self.shared, &mut timer);
            timer.last.clone()
        });
    }

    /// The impulse the timer would re-emit.
    #[must_use]
    pub fn last_impulse(&self) -> Option<LoadImpulse<P>> {
        self.shared.timer.lock().last.clone()
    }

    /// Whether a timer task is currently scheduled.
    #[must_use]
    pub fn is_timer_running(&self) -> bool {
        self.shared.timer.lock().task.is_some()
    }

    /// Number of current subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.shared.inner.subscriber_count()
    }
}

impl<P: Parameters> Observable<LoadImpulse<P>> for RecurringLoadImpulseEmitter<P> {
    fn observe(&self, observer: Observer<LoadImpulse<P>>) -> Disposable {
        let subscription = self.shared.inner.observe(observer);
        let mut timer = self.shared.timer.lock();
        if !timer.started {
            timer.started = true;
            Shared::reschedule(&self.shared, &mut timer);
        }
        subscription
    }
}

impl<P: Parameters> LoadImpulseEmitter<P> for RecurringLoadImpulseEmitter<P> {
    fn emit(&self, impulse: LoadImpulse<P>) {
        // Recorded in the same step as the emission, so the timer always
        // repeats the impulse subscribers saw last.
        self.shared.inner.emit_with(|| {
            let mut timer = self.shared.timer.lock();
            timer.last = Some(impulse.clone());
            Shared::reschedule(&self.shared, &mut timer);
            Some(impulse)
        });
    }
}

impl<P: fmt::Debug> fmt::Debug for RecurringLoadImpulseEmitter<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let timer = self.shared.timer.lock();
        f.debug_struct("RecurringLoadImpulseEmitter")
            .field("mode", &timer.mode)
            .field("last", &timer.last)
            .field("running", &timer.task.is_some())
            .finish_non_exhaustive()
    }
}
