//! Persistence-backed caching datasource.
//!
//! [`CachedDatasource`] wraps another datasource. For each impulse it first
//! asks a [`StatePersister`] for a state stored under the impulse's
//! parameters and, depending on the [`CachePolicy`], sends it ahead of (or
//! instead of) what the wrapped datasource produces. Successful results of
//! the wrapped datasource are written back to the persister, overwriting
//! whatever was stored for the same parameters.
//!
//! Persister calls are synchronous and happen on whichever thread delivers
//! the impulse. A persister that cannot read an entry reports a miss; it
//! never fails loudly.
//!
//! ```
//! use impulse_core::cache::{CachedDatasource, StatePersister};
//! use impulse_core::datasource::StateDatasource;
//! use impulse_core::error::DatasourceError;
//! use impulse_core::impulse::DefaultLoadImpulseEmitter;
//! use impulse_core::observable::ObservableExt;
//! use impulse_core::state::{LoadImpulse, State};
//! use std::sync::Arc;
//!
//! struct Fixed;
//!
//! impl StatePersister<&'static str, u32, DatasourceError> for Fixed {
//!     fn load(&self, parameters: &u32) -> Option<State<&'static str, u32, DatasourceError>> {
//!         (*parameters == 1).then(|| State::success(LoadImpulse::initial(1), "cached"))
//!     }
//!
//!     fn persist(&self, _state: &State<&'static str, u32, DatasourceError>) {}
//! }
//!
//! let emitter = DefaultLoadImpulseEmitter::new(Some(LoadImpulse::initial(1)));
//! let persister: Arc<dyn StatePersister<&'static str, u32, DatasourceError>> = Arc::new(Fixed);
//! let cached = CachedDatasource::cache_only(emitter, persister, DatasourceError::CacheLoad("no entry".into()));
//!
//! let _sub = cached.subscribe(|_| {});
//! assert_eq!(cached.current_value().value(), Some(&"cached"));
//! ```

use crate::datasource::StateDatasource;
use crate::disposable::{CompositeDisposable, Disposable};
use crate::error::LoadError;
use crate::impulse::LoadImpulseEmitter;
use crate::multicast::{Multicast, Sink};
use crate::observable::{AnyObservable, Observable, Observer};
use crate::state::{LoadImpulse, Parameters, State, StateValue};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Key-value store of states, keyed by request parameters.
pub trait StatePersister<V, P, E>: Send + Sync {
    /// The state stored for `parameters`, or `None` if there is none or it
    /// could not be read.
    fn load(&self, parameters: &P) -> Option<State<V, P, E>>;

    /// Store `state` under its parameters, replacing any previous entry.
    fn persist(&self, state: &State<V, P, E>);

    /// Remove every stored entry.
    fn purge(&self) {}
}

impl<V, P, E, S> StatePersister<V, P, E> for Arc<S>
where
    S: StatePersister<V, P, E> + ?Sized,
{
    fn load(&self, parameters: &P) -> Option<State<V, P, E>> {
        (**self).load(parameters)
    }

    fn persist(&self, state: &State<V, P, E>) {
        (**self).persist(state);
    }

    fn purge(&self) {
        (**self).purge();
    }
}

/// How cached states and real loads are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// Send the cached state if there is one, then load anyway.
    #[default]
    ReturnCacheThenLoad,
    /// Send the cached state if there is one; load only on a miss.
    ReturnCacheElseLoad,
    /// Never load. A miss is reported as a failure holding the cache error.
    CacheOnly,
}

impl CachePolicy {
    /// Whether `impulse` should bypass the cache under this policy.
    #[must_use]
    pub const fn bypasses_cache<P>(self, impulse: &LoadImpulse<P>) -> bool {
        !matches!(self, Self::CacheOnly) && impulse.request_type.forces_refresh()
    }
}

/// Which source states may pass for the impulse being served.
struct Gate<P> {
    impulse: Option<LoadImpulse<P>>,
    served_from_cache: bool,
}

impl<P: Parameters> Gate<P> {
    const fn closed() -> Self {
        Self {
            impulse: None,
            served_from_cache: false,
        }
    }

    fn admits<V, E>(&self, state: &State<V, P, E>) -> bool {
        match (&self.impulse, state.load_impulse()) {
            (Some(current), Some(impulse)) => !self.served_from_cache && current.is_cache_compatible(impulse),
            _ => false,
        }
    }
}

/// Datasource decorator reading from and writing to a [`StatePersister`].
///
/// Observing yields `NotReady` first. When the current impulse has a stored
/// state, that state follows synchronously, before the wrapped source has
/// started any work for it. On a miss the caller-supplied cache error is
/// reported: as the terminal failure under [`CachePolicy::CacheOnly`], and
/// as the fallback error of a loading state otherwise, so the source's own
/// result stays the one terminal state for the impulse.
///
/// The decorator subscribes to `emitter` before it subscribes to the
/// source, so the emitter must be the one driving the source and the
/// source must not be observed elsewhere ahead of the decorator. Source
/// states belonging to any other impulse than the latest one are dropped.
pub struct CachedDatasource<V, P, E> {
    multicast: Multicast<State<V, P, E>>,
    persister: Arc<dyn StatePersister<V, P, E>>,
    policy: CachePolicy,
}

impl<V, P, E> Clone for CachedDatasource<V, P, E> {
    fn clone(&self) -> Self {
        Self {
            multicast: self.multicast.clone(),
            persister: Arc::clone(&self.persister),
            policy: self.policy,
        }
    }
}

impl<V, P, E> CachedDatasource<V, P, E>
where
    V: StateValue,
    P: Parameters,
    E: LoadError,
{
    /// Wrap `source`, which loads for impulses from `emitter`.
    ///
    /// `cache_load_error` is reported whenever the persister has no usable
    /// state for an impulse. Under [`CachePolicy::CacheOnly`] the source is
    /// never observed.
    pub fn new<D, Em>(
        source: D,
        emitter: Em,
        persister: Arc<dyn StatePersister<V, P, E>>,
        cache_load_error: E,
        policy: CachePolicy,
    ) -> Self
    where
        D: StateDatasource<V, P, E> + 'static,
        Em: LoadImpulseEmitter<P> + 'static,
    {
        let source = (policy != CachePolicy::CacheOnly).then(|| AnyObservable::from_observable(source));
        Self::build(emitter, source, persister, cache_load_error, policy)
    }

    /// Create a datasource that only ever serves stored states.
    pub fn cache_only<Em>(emitter: Em, persister: Arc<dyn StatePersister<V, P, E>>, cache_load_error: E) -> Self
    where
        Em: LoadImpulseEmitter<P> + 'static,
    {
        Self::build(emitter, None, persister, cache_load_error, CachePolicy::CacheOnly)
    }

    fn build<Em>(
        emitter: Em,
        source: Option<AnyObservable<State<V, P, E>>>,
        persister: Arc<dyn StatePersister<V, P, E>>,
        cache_load_error: E,
        policy: CachePolicy,
    ) -> Self
    where
        Em: LoadImpulseEmitter<P> + 'static,
    {
        let emitter = Arc::new(emitter);
        let store = Arc::clone(&persister);
        let connect = move |sink: Sink<State<V, P, E>>| {
            let gate = Arc::new(Mutex::new(Gate::closed()));
            let subscriptions = CompositeDisposable::new();
            subscriptions.add(emitter.observe(read_through(
                Arc::clone(&store),
                cache_load_error.clone(),
                policy,
                Arc::clone(&gate),
                sink.clone(),
            )));
            if let Some(source) = &source {
                subscriptions.add(source.observe(write_through(Arc::clone(&store), gate, sink)));
            }
            subscriptions.into_disposable()
        };

        Self {
            multicast: Multicast::new("cached_datasource", State::NotReady, Box::new(connect)),
            persister,
            policy,
        }
    }

    /// The policy this datasource was built with.
    #[must_use]
    pub const fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// Remove every entry from the underlying persister.
    pub fn purge_cache(&self) {
        tracing::debug!("purging cache");
        self.persister.purge();
    }

    /// Number of current observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.multicast.observer_count()
    }
}

fn read_through<V, P, E>(
    persister: Arc<dyn StatePersister<V, P, E>>,
    cache_load_error: E,
    policy: CachePolicy,
    gate: Arc<Mutex<Gate<P>>>,
    sink: Sink<State<V, P, E>>,
) -> Observer<LoadImpulse<P>>
where
    V: StateValue,
    P: Parameters,
    E: LoadError,
{
    Observer::new(move |impulse: LoadImpulse<P>| {
        if policy.bypasses_cache(&impulse) {
            tracing::debug!(parameters = ?impulse.parameters, "refresh requested, skipping cache");
            *gate.lock() = Gate {
                impulse: Some(impulse),
                served_from_cache: false,
            };
            return;
        }

        let cached = persister
            .load(&impulse.parameters)
            .filter(|state| state.is_cache_compatible(&impulse));
        *gate.lock() = Gate {
            impulse: Some(impulse.clone()),
            served_from_cache: cached.is_some() && policy != CachePolicy::ReturnCacheThenLoad,
        };

        match cached {
            Some(cached) => {
                tracing::debug!(parameters = ?impulse.parameters, ?policy, "cache hit");
                sink.send(cached);
            },
            None if policy == CachePolicy::CacheOnly => {
                tracing::debug!(parameters = ?impulse.parameters, "cache miss, no load allowed");
                sink.send(State::failure(impulse, cache_load_error.clone()));
            },
            None => {
                tracing::debug!(parameters = ?impulse.parameters, "cache miss");
                sink.send(State::loading(impulse).with_fallback_error(Some(cache_load_error.clone())));
            },
        }
    })
}

fn write_through<V, P, E>(
    persister: Arc<dyn StatePersister<V, P, E>>,
    gate: Arc<Mutex<Gate<P>>>,
    sink: Sink<State<V, P, E>>,
) -> Observer<State<V, P, E>>
where
    V: StateValue,
    P: Parameters,
    E: LoadError,
{
    Observer::new(move |state: State<V, P, E>| {
        if !gate.lock().admits(&state) {
            tracing::trace!("dropping source state for another impulse");
            return;
        }
        if state.has_loaded_successfully() {
            persister.persist(&state);
        }
        // The gate may have moved on while persisting.
        sink.send_if(state, |state| gate.lock().admits(state));
    })
}

impl<V, P, E> Observable<State<V, P, E>> for CachedDatasource<V, P, E>
where
    V: StateValue,
    P: Parameters,
    E: LoadError,
{
    fn observe(&self, observer: Observer<State<V, P, E>>) -> Disposable {
        self.multicast.observe(observer)
    }
}

impl<V, P, E> StateDatasource<V, P, E> for CachedDatasource<V, P, E>
where
    V: StateValue,
    P: Parameters,
    E: LoadError,
{
    fn current_value(&self) -> State<V, P, E> {
        self.multicast.current()
    }
}

impl<V, P, E> fmt::Debug for CachedDatasource<V, P, E>
where
    V: StateValue,
    P: Parameters,
    E: LoadError,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedDatasource")
            .field("policy", &self.policy)
            .field("observers", &self.observer_count())
            .finish_non_exhaustive()
    }
}
