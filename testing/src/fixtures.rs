//! Load functions for tests.
//!
//! [`letter_load`] answers synchronously from a fixed table.
//! [`ControlledLoad`] captures every request and lets the test decide when
//! and how each one completes.

use impulse_core::{DatasourceError, Disposable, LoadError, LoadImpulse, Observer, State};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// State type produced by [`letter_load`].
pub type LetterState = State<String, String, DatasourceError>;

/// Maps `"1"` to `"A"` and `"2"` to `"B"`; anything else fails with
/// `unknown`.
pub fn letter_load(impulse: LoadImpulse<String>, send: Observer<LetterState>) -> Disposable {
    let state = match impulse.parameters.as_str() {
        "1" => State::success(impulse, "A".to_string()),
        "2" => State::success(impulse, "B".to_string()),
        _ => State::failure(impulse, DatasourceError::from_message("unknown")),
    };
    send.send(state);
    Disposable::empty()
}

/// Shorthand for an [`Initial`](impulse_core::LoadImpulseType::Initial)
/// impulse with string parameters.
#[must_use]
pub fn impulse(parameters: &str) -> LoadImpulse<String> {
    LoadImpulse::initial(parameters.to_string())
}

/// A request captured by [`ControlledLoad`].
pub struct PendingLoad<V, P, E> {
    /// The impulse the load was started for.
    pub impulse: LoadImpulse<P>,
    /// Where the load's states go.
    pub send: Observer<State<V, P, E>>,
    /// Disposed when the datasource cancels the load.
    pub cancellation: Disposable,
}

impl<V, P, E> Clone for PendingLoad<V, P, E>
where
    P: Clone,
{
    fn clone(&self) -> Self {
        Self {
            impulse: self.impulse.clone(),
            send: self.send.clone(),
            cancellation: self.cancellation.clone(),
        }
    }
}

impl<V, P: Clone, E> PendingLoad<V, P, E> {
    /// Complete with a value.
    pub fn succeed(&self, value: V) {
        self.send.send(State::success(self.impulse.clone(), value));
    }

    /// Complete with an error.
    pub fn fail(&self, error: E) {
        self.send.send(State::failure(self.impulse.clone(), error));
    }

    /// Whether the datasource cancelled this load.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_disposed()
    }
}

impl<V, P: Clone + fmt::Debug, E> fmt::Debug for PendingLoad<V, P, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingLoad")
            .field("impulse", &self.impulse)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Load function whose requests are completed by the test.
///
/// Every request sends `Loading` immediately and is then recorded. Nothing
/// else happens until the test calls [`PendingLoad::succeed`] or
/// [`PendingLoad::fail`].
///
/// # Example
///
/// ```
/// use impulse_core::{Datasource, DefaultLoadImpulseEmitter, ObservableExt, StateDatasource};
/// use impulse_testing::fixtures::{ControlledLoad, impulse};
///
/// let load = ControlledLoad::<String, String, impulse_core::DatasourceError>::new();
/// let emitter = DefaultLoadImpulseEmitter::new(Some(impulse("1")));
/// let datasource = Datasource::new(emitter, load.load_fn());
/// let _sub = datasource.subscribe(|_| {});
///
/// assert!(datasource.current_value().is_loading());
/// load.latest().unwrap().succeed("done".to_string());
/// assert!(datasource.current_value().has_loaded_successfully());
/// ```
pub struct ControlledLoad<V, P, E> {
    requests: Arc<Mutex<Vec<PendingLoad<V, P, E>>>>,
}

impl<V, P, E> Clone for ControlledLoad<V, P, E> {
    fn clone(&self) -> Self {
        Self {
            requests: Arc::clone(&self.requests),
        }
    }
}

impl<V, P, E> Default for ControlledLoad<V, P, E> {
    fn default() -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<V, P, E> ControlledLoad<V, P, E>
where
    V: Send + 'static,
    P: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    /// Create a load with no requests yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The load function to hand to a datasource.
    pub fn load_fn(&self) -> impl Fn(LoadImpulse<P>, Observer<State<V, P, E>>) -> Disposable + Send + Sync + 'static {
        let requests = Arc::clone(&self.requests);
        move |impulse: LoadImpulse<P>, send: Observer<State<V, P, E>>| {
            send.send(State::loading(impulse.clone()));
            let cancellation = Disposable::empty();
            requests.lock().push(PendingLoad {
                impulse,
                send,
                cancellation: cancellation.clone(),
            });
            cancellation
        }
    }

    /// Every request so far, oldest first.
    #[must_use]
    pub fn requests(&self) -> Vec<PendingLoad<V, P, E>> {
        self.requests.lock().clone()
    }

    /// The most recent request.
    #[must_use]
    pub fn latest(&self) -> Option<PendingLoad<V, P, E>> {
        self.requests.lock().last().cloned()
    }

    /// Number of requests so far.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

impl<V, P, E> fmt::Debug for ControlledLoad<V, P, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlledLoad")
            .field("requests", &self.requests.lock().len())
            .finish()
    }
}
