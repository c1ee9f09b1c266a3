//! Carrying the last known value and error across loads.
//!
//! While a new load runs, or after it fails, consumers usually want to keep
//! showing what they had. [`LastResultRetainer`] is the state machine doing
//! that: it remembers the most recent value and the most recent error (each
//! tagged with the impulse it belongs to) and fills them in as fallbacks of
//! later `Loading` and `Failure` states.
//!
//! Fallbacks are only ever taken from data that is cache-compatible with the
//! impulse being shown. A result that does not belong to the impulse of the
//! most recent `Loading` state is stale: instead of surfacing it, the
//! retainer forgets everything and emits `NotReady`. That keeps data loaded
//! for one set of parameters (say, one signed-in user) from showing up under
//! another.
//!
//! [`LastResultRetainingDatasource`] applies the retainer to a datasource it
//! owns and fans the adjusted states out to its own observers.

use crate::datasource::StateDatasource;
use crate::disposable::Disposable;
use crate::error::LoadError;
use crate::multicast::{Multicast, Sink};
use crate::observable::{Observable, Observer};
use crate::state::{LoadImpulse, Parameters, State, StateValue};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct Retained<P, T> {
    impulse: LoadImpulse<P>,
    content: T,
}

/// State machine computing fallbacks from earlier results.
///
/// # Example
///
/// ```
/// use impulse_core::error::{DatasourceError, LoadError};
/// use impulse_core::last_result::LastResultRetainer;
/// use impulse_core::state::{LoadImpulse, State};
///
/// let p1 = LoadImpulse::initial(1_u32);
/// let mut retainer: LastResultRetainer<&str, u32, DatasourceError> = LastResultRetainer::new();
///
/// retainer.apply(State::loading(p1.clone()));
/// retainer.apply(State::success(p1.clone(), "V"));
///
/// let reloading = retainer.apply(State::loading(p1.clone()));
/// assert_eq!(reloading.value(), Some(&"V"));
///
/// let failed = retainer.apply(State::failure(p1, DatasourceError::from_message("offline")));
/// assert_eq!(failed.value(), Some(&"V"));
///
/// // A result for other parameters than the pending load is stale.
/// let stale = retainer.apply(State::success(LoadImpulse::initial(2), "W"));
/// assert_eq!(stale, State::NotReady);
/// ```
#[derive(Debug, Clone)]
pub struct LastResultRetainer<V, P, E> {
    last_value: Option<Retained<P, V>>,
    last_error: Option<Retained<P, E>>,
    pending: Option<LoadImpulse<P>>,
}

impl<V, P, E> Default for LastResultRetainer<V, P, E> {
    fn default() -> Self {
        Self {
            last_value: None,
            last_error: None,
            pending: None,
        }
    }
}

impl<V: Clone, P: Parameters, E: Clone> LastResultRetainer<V, P, E> {
    /// Create a retainer that remembers nothing yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next state from the source and get the state to emit.
    pub fn apply(&mut self, state: State<V, P, E>) -> State<V, P, E> {
        match state {
            State::NotReady => {
                self.reset();
                State::NotReady
            },
            State::Loading {
                impulse,
                fallback_value,
                fallback_error,
            } => {
                let fallback_value = fallback_value.or_else(|| self.retained_value(&impulse).cloned());
                let fallback_error = fallback_error.or_else(|| self.retained_error(&impulse).cloned());
                self.pending = Some(impulse.clone());
                State::Loading {
                    impulse,
                    fallback_value,
                    fallback_error,
                }
            },
            State::Success { impulse, value } => {
                if self.is_stale(&impulse) {
                    return self.purge();
                }
                self.pending = None;
                self.last_value = Some(Retained {
                    impulse: impulse.clone(),
                    content: value.clone(),
                });
                self.last_error = None;
                State::Success { impulse, value }
            },
            State::Failure {
                impulse,
                error,
                fallback_value,
            } => {
                if self.is_stale(&impulse) {
                    return self.purge();
                }
                self.pending = None;
                let fallback_value = fallback_value.or_else(|| self.retained_value(&impulse).cloned());
                self.last_error = Some(Retained {
                    impulse: impulse.clone(),
                    content: error.clone(),
                });
                State::Failure {
                    impulse,
                    error,
                    fallback_value,
                }
            },
        }
    }

    /// The remembered value, if it belongs to `impulse`'s parameters.
    #[must_use]
    pub fn retained_value(&self, impulse: &LoadImpulse<P>) -> Option<&V> {
        self.last_value
            .as_ref()
            .filter(|retained| retained.impulse.is_cache_compatible(impulse))
            .map(|retained| &retained.content)
    }

    /// The remembered error, if it belongs to `impulse`'s parameters.
    #[must_use]
    pub fn retained_error(&self, impulse: &LoadImpulse<P>) -> Option<&E> {
        self.last_error
            .as_ref()
            .filter(|retained| retained.impulse.is_cache_compatible(impulse))
            .map(|retained| &retained.content)
    }

    /// Forget everything.
    pub fn reset(&mut self) {
        self.last_value = None;
        self.last_error = None;
        self.pending = None;
    }

    fn is_stale(&self, impulse: &LoadImpulse<P>) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|pending| !pending.is_cache_compatible(impulse))
    }

    fn purge(&mut self) -> State<V, P, E> {
        tracing::debug!(
            pending = ?self.pending.as_ref().map(|impulse| &impulse.parameters),
            "result does not match pending load, purging retained results"
        );
        self.reset();
        State::NotReady
    }
}

/// Datasource decorator applying a [`LastResultRetainer`] to its source.
///
/// The decorator owns its source. It subscribes to it once while it has
/// observers and forwards the adjusted states to all of them.
pub struct LastResultRetainingDatasource<V, P, E> {
    multicast: Multicast<State<V, P, E>>,
}

impl<V, P, E> Clone for LastResultRetainingDatasource<V, P, E> {
    fn clone(&self) -> Self {
        Self {
            multicast: self.multicast.clone(),
        }
    }
}

impl<V, P, E> LastResultRetainingDatasource<V, P, E>
where
    V: StateValue,
    P: Parameters,
    E: LoadError,
{
    /// Wrap `source`, taking ownership of it.
    pub fn new<D>(source: D) -> Self
    where
        D: StateDatasource<V, P, E> + 'static,
    {
        let source = Arc::new(source);
        let connect = move |sink: Sink<State<V, P, E>>| {
            // Every activation starts from a clean slate; the source replays
            // its current state right away.
            let retainer = Mutex::new(LastResultRetainer::new());
            source.observe(Observer::new(move |state| {
                let adjusted = retainer.lock().apply(state);
                sink.send(adjusted);
            }))
        };

        Self {
            multicast: Multicast::over_replaying("last_result_retaining", State::NotReady, Box::new(connect)),
        }
    }

    /// Number of current observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.multicast.observer_count()
    }
}

impl<V, P, E> Observable<State<V, P, E>> for LastResultRetainingDatasource<V, P, E>
where
    V: StateValue,
    P: Parameters,
    E: LoadError,
{
    fn observe(&self, observer: Observer<State<V, P, E>>) -> Disposable {
        self.multicast.observe(observer)
    }
}

impl<V, P, E> StateDatasource<V, P, E> for LastResultRetainingDatasource<V, P, E>
where
    V: StateValue,
    P: Parameters,
    E: LoadError,
{
    fn current_value(&self) -> State<V, P, E> {
        self.multicast.current()
    }
}

impl<V, P, E> fmt::Debug for LastResultRetainingDatasource<V, P, E>
where
    V: StateValue,
    P: Parameters,
    E: LoadError,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LastResultRetainingDatasource")
            .field("observers", &self.observer_count())
            .finish_non_exhaustive()
    }
}
