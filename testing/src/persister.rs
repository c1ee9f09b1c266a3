//! In-memory [`StatePersister`] with call counters.

use impulse_core::{Parameters, State, StatePersister};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// `HashMap`-backed persister for tests.
///
/// Counts loads and writes, and can be switched into a failing mode in
/// which every read reports a miss, like a persister whose storage broke.
///
/// # Example
///
/// ```
/// use impulse_core::{DatasourceError, LoadImpulse, State, StatePersister};
/// use impulse_testing::InMemoryPersister;
///
/// let persister: InMemoryPersister<&str, u32, DatasourceError> = InMemoryPersister::new();
/// persister.persist(&State::success(LoadImpulse::initial(1), "A"));
///
/// assert!(persister.load(&1).is_some());
/// persister.set_failing(true);
/// assert!(persister.load(&1).is_none());
/// assert_eq!(persister.load_count(), 2);
/// ```
pub struct InMemoryPersister<V, P, E> {
    entries: Mutex<HashMap<P, State<V, P, E>>>,
    loads: AtomicUsize,
    writes: AtomicUsize,
    failing: AtomicBool,
}

impl<V, P, E> Default for InMemoryPersister<V, P, E> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            loads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }
}

impl<V: Clone, P: Parameters, E: Clone> InMemoryPersister<V, P, E> {
    /// Create an empty persister.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a persister pre-filled with `states`.
    #[must_use]
    pub fn with_states(states: impl IntoIterator<Item = State<V, P, E>>) -> Self {
        let persister = Self::new();
        {
            let mut entries = persister.entries.lock();
            for state in states {
                if let Some(parameters) = state.parameters().cloned() {
                    entries.insert(parameters, state);
                }
            }
        }
        persister
    }

    /// Make every read report a miss (`true`) or behave normally (`false`).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of `load` calls so far.
    #[must_use]
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Number of `persist` calls that stored something.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// The stored state for `parameters`, without counting a load.
    #[must_use]
    pub fn peek(&self, parameters: &P) -> Option<State<V, P, E>> {
        self.entries.lock().get(parameters).cloned()
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<V, P, E> StatePersister<V, P, E> for InMemoryPersister<V, P, E>
where
    V: Clone + Send + Sync,
    P: Parameters,
    E: Clone + Send + Sync,
{
    fn load(&self, parameters: &P) -> Option<State<V, P, E>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            tracing::debug!(?parameters, "in-memory persister failing read");
            return None;
        }
        self.entries.lock().get(parameters).cloned()
    }

    fn persist(&self, state: &State<V, P, E>) {
        if let Some(parameters) = state.parameters() {
            self.entries.lock().insert(parameters.clone(), state.clone());
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn purge(&self) {
        self.entries.lock().clear();
    }
}

impl<V, P, E> fmt::Debug for InMemoryPersister<V, P, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryPersister")
            .field("entries", &self.entries.lock().len())
            .field("loads", &self.loads.load(Ordering::SeqCst))
            .field("writes", &self.writes.load(Ordering::SeqCst))
            .field("failing", &self.failing.load(Ordering::SeqCst))
            .finish()
    }
}
