//! Datasources: load impulses in, [`State`]s out.
//!
//! A [`Datasource`] subscribes to a [`LoadImpulseEmitter`] and runs a load
//! function for every impulse. The load function sends states through the
//! observer it is given and returns a [`Disposable`] that cancels its work.
//!
//! # Guarantees
//!
//! - Observing delivers [`current_value`](StateDatasource::current_value)
//!   synchronously before anything else (`NotReady` until a state is sent).
//! - However many observers there are, the datasource holds one
//!   subscription to the emitter. It is made when the first observer arrives
//!   and torn down when the last one leaves.
//! - A new impulse disposes the load that was running for the previous one.
//!   States that a superseded load still sends are dropped.
//! - When the last observer leaves, the running load is disposed too.
//!
//! # Example
//!
//! ```
//! use impulse_core::datasource::{Datasource, StateDatasource};
//! use impulse_core::disposable::Disposable;
//! use impulse_core::error::DatasourceError;
//! use impulse_core::impulse::{DefaultLoadImpulseEmitter, LoadImpulseEmitter};
//! use impulse_core::observable::ObservableExt;
//! use impulse_core::state::{LoadImpulse, State};
//!
//! let emitter = DefaultLoadImpulseEmitter::new(Some(LoadImpulse::initial(2_u32)));
//! let datasource: Datasource<u32, u32, DatasourceError> =
//!     Datasource::new(emitter.clone(), |impulse, send| {
//!         send.send(State::success(impulse.clone(), impulse.parameters * 2));
//!         Disposable::empty()
//!     });
//!
//! let subscription = datasource.subscribe(|_| {});
//! assert_eq!(datasource.current_value().value(), Some(&4));
//!
//! emitter.emit(LoadImpulse::initial(5));
//! assert_eq!(datasource.current_value().value(), Some(&10));
//! subscription.dispose();
//! ```

use crate::disposable::{CompositeDisposable, Disposable, SerialDisposable};
use crate::error::LoadError;
use crate::impulse::LoadImpulseEmitter;
use crate::last_result::LastResultRetainingDatasource;
use crate::multicast::{Multicast, Sink};
use crate::observable::{Observable, Observer};
use crate::state::{LoadImpulse, Parameters, State, StateValue};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Function performing the work for one impulse.
///
/// Sends zero or more states and returns a disposable that cancels any
/// outstanding work.
pub type LoadFn<V, P, E> =
    dyn Fn(LoadImpulse<P>, Observer<State<V, P, E>>) -> Disposable + Send + Sync;

/// An observable of [`State`]s whose latest state can be read at any time.
pub trait StateDatasource<V, P, E>: Observable<State<V, P, E>> {
    /// The most recently emitted state, or `NotReady` if none yet.
    fn current_value(&self) -> State<V, P, E>;

    /// Wrap this datasource so loading and failed states keep showing the
    /// last known value and error.
    fn retaining_last_result(self) -> LastResultRetainingDatasource<V, P, E>
    where
        Self: Sized + 'static,
        V: StateValue,
        P: Parameters,
        E: LoadError,
    {
        LastResultRetainingDatasource::new(self)
    }
}

impl<V, P, E, D> StateDatasource<V, P, E> for Arc<D>
where
    D: StateDatasource<V, P, E> + ?Sized,
{
    fn current_value(&self) -> State<V, P, E> {
        (**self).current_value()
    }
}

/// Runs a load function for every impulse and shares the resulting states.
///
/// Cloning yields another handle to the same datasource.
pub struct Datasource<V, P, E> {
    multicast: Multicast<State<V, P, E>>,
}

impl<V, P, E> Clone for Datasource<V, P, E> {
    fn clone(&self) -> Self {
        Self {
            multicast: self.multicast.clone(),
        }
    }
}

impl<V, P, E> Datasource<V, P, E>
where
    V: StateValue,
    P: Parameters,
    E: LoadError,
{
    /// Create a datasource running `load` for every impulse from `emitter`.
    pub fn new<Em, F>(emitter: Em, load: F) -> Self
    where
        Em: LoadImpulseEmitter<P> + 'static,
        F: Fn(LoadImpulse<P>, Observer<State<V, P, E>>) -> Disposable + Send + Sync + 'static,
    {
        const LABEL: &str = "datasource";
        let load: Arc<LoadFn<V, P, E>> = Arc::new(load);
        let emitter = Arc::new(emitter);
        let connect = move |sink: Sink<State<V, P, E>>| {
            let in_flight = SerialDisposable::new();
            let generation = Arc::new(AtomicU64::new(0));

            let load = Arc::clone(&load);
            let running = in_flight.clone();
            let impulses = emitter.observe(Observer::new(move |impulse: LoadImpulse<P>| {
                let current = generation.fetch_add(1, Ordering::SeqCst) + 1;
                running.clear();
                tracing::debug!(
                    datasource = LABEL,
                    parameters = ?impulse.parameters,
                    generation = current,
                    "starting load"
                );

                let generation = Arc::clone(&generation);
                let sink = sink.clone();
                // Checked under the fan-out's lock, so a superseded load can
                // never publish after its successor has.
                let send = Observer::new(move |state: State<V, P, E>| {
                    sink.send_if(state, |_| {
                        let live = generation.load(Ordering::SeqCst) == current;
                        if !live {
                            tracing::trace!(datasource = LABEL, "dropping state from superseded load");
                        }
                        live
                    });
                });
                running.replace(load(impulse, send));
            }));

            CompositeDisposable::from_iter_disposables([impulses, in_flight.into_disposable()])
                .into_disposable()
        };

        Self {
            multicast: Multicast::new(LABEL, State::NotReady, Box::new(connect)),
        }
    }

    /// Number of current observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.multicast.observer_count()
    }
}

impl<V, P, E> Observable<State<V, P, E>> for Datasource<V, P, E>
where
    V: StateValue,
    P: Parameters,
    E: LoadError,
{
    fn observe(&self, observer: Observer<State<V, P, E>>) -> Disposable {
        self.multicast.observe(observer)
    }
}

impl<V, P, E> StateDatasource<V, P, E> for Datasource<V, P, E>
where
    V: StateValue,
    P: Parameters,
    E: LoadError,
{
    fn current_value(&self) -> State<V, P, E> {
        self.multicast.current()
    }
}

impl<V, P, E> fmt::Debug for Datasource<V, P, E>
where
    V: StateValue,
    P: Parameters,
    E: LoadError,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Datasource")
            .field("observers", &self.observer_count())
            .finish_non_exhaustive()
    }
}
