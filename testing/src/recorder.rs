//! Recording observed states and asserting on them.

#![allow(clippy::module_name_repetitions)]

use impulse_core::{Disposable, Observable, Observer, ProvisioningState, State};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Records every state an observable delivers.
///
/// # Example
///
/// ```
/// use impulse_core::{DatasourceError, Publisher, State};
/// use impulse_testing::StateRecorder;
///
/// let publisher: Publisher<State<u8, u8, DatasourceError>> = Publisher::new();
/// let recorder = StateRecorder::observe(&publisher);
/// publisher.emit(State::NotReady);
/// assert_eq!(recorder.states(), vec![State::NotReady]);
/// ```
pub struct StateRecorder<V, P, E> {
    states: Arc<Mutex<Vec<State<V, P, E>>>>,
    subscription: Disposable,
}

impl<V, P, E> StateRecorder<V, P, E>
where
    V: Clone + Send + 'static,
    P: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Start recording `observable`.
    pub fn observe<O>(observable: &O) -> Self
    where
        O: Observable<State<V, P, E>> + ?Sized,
    {
        let states = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&states);
        let subscription = observable.observe(Observer::new(move |state| sink.lock().push(state)));
        Self { states, subscription }
    }

    /// Everything recorded so far.
    #[must_use]
    pub fn states(&self) -> Vec<State<V, P, E>> {
        self.states.lock().clone()
    }

    /// The most recently recorded state.
    #[must_use]
    pub fn last(&self) -> Option<State<V, P, E>> {
        self.states.lock().last().cloned()
    }

    /// Number of recorded states.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.lock().is_empty()
    }

    /// Provisioning state of each recorded state.
    #[must_use]
    pub fn provisioning_states(&self) -> Vec<ProvisioningState> {
        self.states.lock().iter().map(State::provisioning_state).collect()
    }

    /// Displayed value of each recorded state.
    #[must_use]
    pub fn values(&self) -> Vec<Option<V>> {
        self.states.lock().iter().map(|s| s.value().cloned()).collect()
    }

    /// Forget what was recorded, keep recording.
    pub fn clear(&self) {
        self.states.lock().clear();
    }

    /// The subscription feeding this recorder.
    #[must_use]
    pub const fn subscription(&self) -> &Disposable {
        &self.subscription
    }

    /// Stop recording.
    pub fn stop(&self) {
        self.subscription.dispose();
    }
}

impl<V, P, E> Drop for StateRecorder<V, P, E> {
    fn drop(&mut self) {
        self.subscription.dispose();
    }
}

impl<V, P, E> fmt::Debug for StateRecorder<V, P, E>
where
    V: fmt::Debug,
    P: fmt::Debug,
    E: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateRecorder")
            .field("states", &*self.states.lock())
            .field("subscription", &self.subscription)
            .finish()
    }
}

/// Assertions over recorded states.
pub mod assertions {
    use impulse_core::{ProvisioningState, State};
    use std::fmt::Debug;

    /// Assert the provisioning state of every recorded state, in order.
    ///
    /// # Panics
    ///
    /// Panics if the sequences differ.
    #[allow(clippy::panic)] // Test assertion
    #[track_caller]
    pub fn assert_provisioning<V: Debug, P: Debug, E: Debug>(states: &[State<V, P, E>], expected: &[ProvisioningState]) {
        let actual: Vec<_> = states.iter().map(State::provisioning_state).collect();
        assert_eq!(actual, expected, "Unexpected provisioning sequence in {states:?}");
    }

    /// Assert that no recorded state surfaces a value or error belonging to
    /// other parameters than its own impulse's.
    ///
    /// `owner` maps a value to the parameters it was loaded for.
    ///
    /// # Panics
    ///
    /// Panics on the first state showing foreign data.
    #[allow(clippy::panic)] // Test assertion
    #[track_caller]
    pub fn assert_no_foreign_values<V, P, E, F>(states: &[State<V, P, E>], owner: F)
    where
        V: Debug,
        P: Debug + PartialEq,
        E: Debug,
        F: Fn(&V) -> P,
    {
        for state in states {
            if let Some(value) = state.value() {
                assert_eq!(
                    Some(&owner(value)),
                    state.parameters(),
                    "State {state:?} shows a value loaded for other parameters"
                );
            }
        }
    }

    /// Assert that the last recorded state is a success holding `expected`.
    ///
    /// # Panics
    ///
    /// Panics if there are no states or the last one is not that success.
    #[allow(clippy::panic)] // Test assertion
    #[track_caller]
    pub fn assert_last_success<V: Debug + PartialEq, P: Debug, E: Debug>(states: &[State<V, P, E>], expected: &V) {
        match states.last() {
            Some(State::Success { value, .. }) => assert_eq!(value, expected),
            other => panic!("Expected a success holding {expected:?}, found {other:?}"),
        }
    }
}
