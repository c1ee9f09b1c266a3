//! Load impulse emitters.
//!
//! An emitter is an observable of [`LoadImpulse`]s that can also be told to
//! emit. Datasources subscribe to one and run a load for each impulse.
//!
//! [`DefaultLoadImpulseEmitter`] optionally holds an initial impulse, which
//! it replays synchronously to every new subscriber before any live impulse.
//! Late subscribers do not see impulses emitted before they subscribed.
//!
//! ```
//! use impulse_core::impulse::{DefaultLoadImpulseEmitter, LoadImpulseEmitter};
//! use impulse_core::observable::ObservableExt;
//! use impulse_core::state::LoadImpulse;
//! use std::sync::{Arc, Mutex};
//!
//! let emitter = DefaultLoadImpulseEmitter::new(Some(LoadImpulse::initial(1)));
//! emitter.emit(LoadImpulse::initial(2));
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&seen);
//! let _sub = emitter.subscribe(move |impulse: LoadImpulse<u32>| {
//!     sink.lock().unwrap().push(impulse.parameters);
//! });
//! emitter.emit(LoadImpulse::initial(3));
//!
//! assert_eq!(*seen.lock().unwrap(), vec![1, 3]);
//! ```

use crate::disposable::Disposable;
use crate::observable::{Observable, Observer, Publisher};
use crate::state::{LoadImpulse, Parameters};
use std::fmt;
use std::sync::Arc;

/// Observable source of load impulses that can be asked to emit.
pub trait LoadImpulseEmitter<P>: Observable<LoadImpulse<P>> {
    /// Broadcast `impulse` to every current subscriber.
    fn emit(&self, impulse: LoadImpulse<P>);
}

impl<P, E> LoadImpulseEmitter<P> for Arc<E>
where
    E: LoadImpulseEmitter<P> + ?Sized,
{
    fn emit(&self, impulse: LoadImpulse<P>) {
        (**self).emit(impulse);
    }
}

/// Emitter replaying an optional initial impulse to each new subscriber.
///
/// Clones share subscribers: emitting through one clone reaches observers
/// registered through any other.
pub struct DefaultLoadImpulseEmitter<P> {
    initial: Option<LoadImpulse<P>>,
    publisher: Publisher<LoadImpulse<P>>,
}

impl<P: Parameters> DefaultLoadImpulseEmitter<P> {
    /// Create an emitter, optionally with an impulse replayed to subscribers.
    #[must_use]
    pub fn new(initial: Option<LoadImpulse<P>>) -> Self {
        Self {
            initial,
            publisher: Publisher::new(),
        }
    }

    /// The impulse replayed to new subscribers.
    #[must_use]
    pub const fn initial_impulse(&self) -> Option<&LoadImpulse<P>> {
        self.initial.as_ref()
    }

    /// Number of current subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.publisher.subscriber_count()
    }

    /// Pick the impulse to emit and emit it in one step.
    ///
    /// Emissions through this emitter are ordered by the lock `choose` runs
    /// under, so state recorded by `choose` always describes the newest
    /// impulse subscribers will see. `choose` must not emit on this emitter.
    pub fn emit_with<F>(&self, choose: F)
    where
        F: FnOnce() -> Option<LoadImpulse<P>>,
    {
        self.publisher.emit_with(|| {
            let impulse = choose()?;
            tracing::trace!(parameters = ?impulse.parameters, "emitting load impulse");
            Some(impulse)
        });
    }
}

impl<P> Clone for DefaultLoadImpulseEmitter<P>
where
    P: Clone,
{
    fn clone(&self) -> Self {
        Self {
            initial: self.initial.clone(),
            publisher: self.publisher.clone(),
        }
    }
}

impl<P: Parameters> Observable<LoadImpulse<P>> for DefaultLoadImpulseEmitter<P> {
    fn observe(&self, observer: Observer<LoadImpulse<P>>) -> Disposable {
        self.publisher
            .subscribe_with_initial(observer, self.initial.clone())
    }
}

impl<P: Parameters> LoadImpulseEmitter<P> for DefaultLoadImpulseEmitter<P> {
    fn emit(&self, impulse: LoadImpulse<P>) {
        tracing::trace!(parameters = ?impulse.parameters, "emitting load impulse");
        self.publisher.emit(impulse);
    }
}

impl<P: fmt::Debug> fmt::Debug for DefaultLoadImpulseEmitter<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultLoadImpulseEmitter")
            .field("initial", &self.initial)
            .field("publisher", &self.publisher)
            .finish()
    }
}
