//! Ownership tokens for active observations and scheduled resources.
//!
//! A [`Disposable`] is the only way an observation is torn down. Disposing is
//! idempotent and safe from any thread: the teardown closure runs at most once.
//!
//! Dropping a `Disposable` does **not** dispose it. Observations live until
//! someone explicitly calls [`Disposable::dispose`].
//!
//! # Example
//!
//! ```
//! use impulse_core::disposable::{CompositeDisposable, Disposable};
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! let count = Arc::new(AtomicUsize::new(0));
//! let c = Arc::clone(&count);
//! let first = Disposable::new(move || {
//!     c.fetch_add(1, Ordering::SeqCst);
//! });
//!
//! let composite = CompositeDisposable::new();
//! composite.add(first);
//! composite.dispose();
//! composite.dispose();
//! assert_eq!(count.load(Ordering::SeqCst), 1);
//! ```

use parking_lot::Mutex;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

type Teardown = Box<dyn FnOnce() + Send>;

/// Handle to an active observation or scheduled resource.
///
/// Clones share the same underlying teardown, so disposing any clone disposes
/// all of them.
#[derive(Clone)]
#[must_use = "an observation stays active until it is disposed"]
pub struct Disposable {
    inner: Arc<DisposableInner>,
}

struct DisposableInner {
    disposed: AtomicBool,
    teardown: Mutex<Option<Teardown>>,
}

impl Disposable {
    /// Create a disposable that runs `teardown` the first time it is disposed.
    pub fn new<F>(teardown: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            inner: Arc::new(DisposableInner {
                disposed: AtomicBool::new(false),
                teardown: Mutex::new(Some(Box::new(teardown))),
            }),
        }
    }

    /// A disposable with nothing to tear down.
    pub fn empty() -> Self {
        Self {
            inner: Arc::new(DisposableInner {
                disposed: AtomicBool::new(false),
                teardown: Mutex::new(None),
            }),
        }
    }

    /// Dispose the resource. Subsequent calls are no-ops.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Take the closure out before running it so the lock is not held
        // while arbitrary teardown code executes.
        let teardown = self.inner.teardown.lock().take();
        if let Some(teardown) = teardown {
            teardown();
        }
    }

    /// Whether [`dispose`](Self::dispose) has been called on this handle or a clone.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }
}

impl Default for Disposable {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Disposable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposable")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// A group of disposables torn down together.
///
/// Adding to a composite that was already disposed disposes the new member
/// immediately.
#[derive(Clone, Default)]
pub struct CompositeDisposable {
    inner: Arc<Mutex<CompositeState>>,
}

#[derive(Default)]
struct CompositeState {
    disposed: bool,
    members: SmallVec<[Disposable; 4]>,
}

impl CompositeDisposable {
    /// Create an empty composite.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a composite holding all of `members`.
    #[must_use]
    pub fn from_iter_disposables<I>(members: I) -> Self
    where
        I: IntoIterator<Item = Disposable>,
    {
        let composite = Self::new();
        for member in members {
            composite.add(member);
        }
        composite
    }

    /// Add a member.
    pub fn add(&self, disposable: Disposable) {
        let mut state = self.inner.lock();
        if state.disposed {
            drop(state);
            disposable.dispose();
            return;
        }
        state.members.push(disposable);
    }

    /// Dispose every member. Idempotent.
    pub fn dispose(&self) {
        let members = {
            let mut state = self.inner.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            std::mem::take(&mut state.members)
        };
        for member in members {
            member.dispose();
        }
    }

    /// Whether the composite has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.lock().disposed
    }

    /// Wrap this composite in a plain [`Disposable`].
    pub fn into_disposable(self) -> Disposable {
        Disposable::new(move || self.dispose())
    }
}

impl fmt::Debug for CompositeDisposable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("CompositeDisposable")
            .field("disposed", &state.disposed)
            .field("members", &state.members.len())
            .finish()
    }
}

/// Holds at most one inner disposable at a time.
///
/// Replacing the inner disposable disposes the previous one first. Once the
/// serial disposable itself is disposed, any replacement is disposed on arrival.
#[derive(Clone, Default)]
pub struct SerialDisposable {
    inner: Arc<Mutex<SerialState>>,
}

#[derive(Default)]
struct SerialState {
    disposed: bool,
    current: Option<Disposable>,
}

impl SerialDisposable {
    /// Create an empty serial disposable.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispose the current inner disposable, if any, and install `next`.
    pub fn replace(&self, next: Disposable) {
        let previous = {
            let mut state = self.inner.lock();
            if state.disposed {
                drop(state);
                next.dispose();
                return;
            }
            state.current.replace(next)
        };
        if let Some(previous) = previous {
            previous.dispose();
        }
    }

    /// Dispose the current inner disposable without installing a new one.
    pub fn clear(&self) {
        let previous = self.inner.lock().current.take();
        if let Some(previous) = previous {
            previous.dispose();
        }
    }

    /// Dispose the inner disposable and refuse any future replacement.
    pub fn dispose(&self) {
        let previous = {
            let mut state = self.inner.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.current.take()
        };
        if let Some(previous) = previous {
            previous.dispose();
        }
    }

    /// Whether the serial disposable has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.lock().disposed
    }

    /// Wrap this serial disposable in a plain [`Disposable`].
    pub fn into_disposable(self) -> Disposable {
        Disposable::new(move || self.dispose())
    }
}

impl fmt::Debug for SerialDisposable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("SerialDisposable")
            .field("disposed", &state.disposed)
            .field("has_current", &state.current.is_some())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::AtomicUsize;

    fn counting() -> (Disposable, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let disposable = Disposable::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (disposable, count)
    }

    #[test]
    fn dispose_runs_teardown_once() {
        let (disposable, count) = counting();
        assert!(!disposable.is_disposed());
        disposable.dispose();
        disposable.dispose();
        assert!(disposable.is_disposed());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clones_share_teardown() {
        let (disposable, count) = counting();
        let clone = disposable.clone();
        clone.dispose();
        assert!(disposable.is_disposed());
        disposable.dispose();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_does_not_dispose() {
        let (disposable, count) = counting();
        drop(disposable);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn composite_disposes_late_members_immediately() {
        let composite = CompositeDisposable::new();
        composite.dispose();
        let (late, count) = counting();
        composite.add(late.clone());
        assert!(late.is_disposed());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn serial_replace_disposes_previous_first() {
        let serial = SerialDisposable::new();
        let (first, first_count) = counting();
        let (second, second_count) = counting();

        serial.replace(first);
        serial.replace(second);
        assert_eq!(first_count.load(Ordering::SeqCst), 1);
        assert_eq!(second_count.load(Ordering::SeqCst), 0);

        serial.dispose();
        assert_eq!(second_count.load(Ordering::SeqCst), 1);

        let (third, third_count) = counting();
        serial.replace(third);
        assert_eq!(third_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispose_from_many_threads_runs_once() {
        let (disposable, count) = counting();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let d = disposable.clone();
                std::thread::spawn(move || d.dispose())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    proptest! {
        #[test]
        fn any_disposal_sequence_runs_each_teardown_once(
            members in 1usize..8,
            order in proptest::collection::vec(0usize..16, 0..32),
        ) {
            let composite = CompositeDisposable::new();
            let mut handles = Vec::new();
            let mut counters = Vec::new();
            for _ in 0..members {
                let (d, c) = counting();
                composite.add(d.clone());
                handles.push(d);
                counters.push(c);
            }
            for index in order {
                if index < members {
                    handles[index].dispose();
                } else {
                    composite.dispose();
                }
            }
            composite.dispose();
            for counter in counters {
                prop_assert_eq!(counter.load(Ordering::SeqCst), 1);
            }
        }
    }
}
