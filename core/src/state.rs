//! The loading state model.
//!
//! A [`State`] says how far a load has come for a given [`LoadImpulse`], and
//! carries the value or error it produced, plus an optional fallback kept
//! from earlier loads so consumers can keep showing something useful while a
//! new load runs or after it fails.
//!
//! States are immutable values. Decorators build new states from old ones;
//! they never mutate a state in place.
//!
//! # Cache compatibility
//!
//! A value or error stored in a state only counts for an impulse when the
//! state's own impulse has equal parameters. Data that belongs to other
//! parameters must never be surfaced as current.
//!
//! ```
//! use impulse_core::error::DatasourceError;
//! use impulse_core::state::{LoadImpulse, ProvisioningState, State};
//!
//! let first = LoadImpulse::initial("user-1");
//! let state: State<u32, &str, DatasourceError> = State::success(first.clone(), 7);
//!
//! assert_eq!(state.provisioning_state(), ProvisioningState::Result);
//! assert_eq!(state.cache_compatible_value(&first), Some(&7));
//! assert_eq!(state.cache_compatible_value(&LoadImpulse::initial("user-2")), None);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::hash::{Hash, Hasher};

/// Identifies what to load: a query, a resource id, a user.
///
/// Implemented for every type with the right bounds. Equality and hashing
/// must stay stable while parameters are being compared, since they are used
/// as cache keys and to detect stale results.
pub trait Parameters: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T> Parameters for T where T: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

/// Requirements on loaded values.
pub trait StateValue: Clone + Send + Sync + 'static {}

impl<T> StateValue for T where T: Clone + Send + Sync + 'static {}

/// Why an impulse was issued. Informs cache policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadImpulseType {
    /// First load for a consumer; cached data is welcome.
    #[default]
    Initial,
    /// The user explicitly asked for fresh data.
    UserInitiated,
    /// Issued without user involvement, e.g. by a refresh timer.
    Background,
}

impl LoadImpulseType {
    /// Whether cached data should be bypassed for this impulse.
    #[must_use]
    pub const fn forces_refresh(self) -> bool {
        matches!(self, Self::UserInitiated)
    }
}

/// A request to (re)load data for the given parameters.
///
/// Equality and hashing only consider the parameters: two impulses for the
/// same parameters are the same impulse regardless of their type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadImpulse<P> {
    /// What to load.
    pub parameters: P,
    /// Why the load was requested.
    pub request_type: LoadImpulseType,
}

impl<P> LoadImpulse<P> {
    /// Create an impulse.
    #[must_use]
    pub const fn new(parameters: P, request_type: LoadImpulseType) -> Self {
        Self {
            parameters,
            request_type,
        }
    }

    /// Create an [`Initial`](LoadImpulseType::Initial) impulse.
    #[must_use]
    pub const fn initial(parameters: P) -> Self {
        Self::new(parameters, LoadImpulseType::Initial)
    }

    /// Create a [`UserInitiated`](LoadImpulseType::UserInitiated) impulse.
    #[must_use]
    pub const fn user_initiated(parameters: P) -> Self {
        Self::new(parameters, LoadImpulseType::UserInitiated)
    }

    /// Create a [`Background`](LoadImpulseType::Background) impulse.
    #[must_use]
    pub const fn background(parameters: P) -> Self {
        Self::new(parameters, LoadImpulseType::Background)
    }
}

impl<P: PartialEq> LoadImpulse<P> {
    /// Whether data loaded for `self` may be shown for `other`.
    #[must_use]
    pub fn is_cache_compatible(&self, other: &Self) -> bool {
        self.parameters == other.parameters
    }
}

impl<P: PartialEq> PartialEq for LoadImpulse<P> {
    fn eq(&self, other: &Self) -> bool {
        self.parameters == other.parameters
    }
}

impl<P: Eq> Eq for LoadImpulse<P> {}

impl<P: Hash> Hash for LoadImpulse<P> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.parameters.hash(state);
    }
}

/// Coarse lifecycle stage of a load, ordered by how far along it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningState {
    /// Nothing has been requested yet.
    NotReady,
    /// Work is in progress.
    Loading,
    /// Work finished with a value or an error.
    Result,
}

/// Discrete state of a datasource.
///
/// `Success` and `Failure` are the two flavours of a finished load: exactly
/// one of value or error is the current result for the impulse. A failure
/// may additionally carry a fallback value kept from an earlier success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State<V, P, E> {
    /// No impulse processed yet.
    NotReady,

    /// Work for `impulse` is in progress.
    Loading {
        /// The impulse being loaded.
        impulse: LoadImpulse<P>,
        /// Earlier value kept for display continuity.
        fallback_value: Option<V>,
        /// Earlier error kept for display continuity.
        fallback_error: Option<E>,
    },

    /// Work for `impulse` produced `value`.
    Success {
        /// The impulse that was loaded.
        impulse: LoadImpulse<P>,
        /// The loaded value.
        value: V,
    },

    /// Work for `impulse` failed with `error`.
    Failure {
        /// The impulse that was loaded.
        impulse: LoadImpulse<P>,
        /// What went wrong.
        error: E,
        /// Earlier value kept for display continuity.
        fallback_value: Option<V>,
    },
}

impl<V, P, E> Default for State<V, P, E> {
    fn default() -> Self {
        Self::NotReady
    }
}

impl<V, P, E> State<V, P, E> {
    /// Work in progress with no fallbacks.
    #[must_use]
    pub const fn loading(impulse: LoadImpulse<P>) -> Self {
        Self::Loading {
            impulse,
            fallback_value: None,
            fallback_error: None,
        }
    }

    /// A successful result.
    #[must_use]
    pub const fn success(impulse: LoadImpulse<P>, value: V) -> Self {
        Self::Success { impulse, value }
    }

    /// A failed result with no fallback value.
    #[must_use]
    pub const fn failure(impulse: LoadImpulse<P>, error: E) -> Self {
        Self::Failure {
            impulse,
            error,
            fallback_value: None,
        }
    }

    /// Replace the fallback value of a loading or failed state.
    ///
    /// Other states are returned unchanged.
    #[must_use]
    pub fn with_fallback_value(self, fallback: Option<V>) -> Self {
        match self {
            Self::Loading {
                impulse,
                fallback_error,
                ..
            } => Self::Loading {
                impulse,
                fallback_value: fallback,
                fallback_error,
            },
            Self::Failure { impulse, error, .. } => Self::Failure {
                impulse,
                error,
                fallback_value: fallback,
            },
            other @ (Self::NotReady | Self::Success { .. }) => other,
        }
    }

    /// Replace the fallback error of a loading state.
    ///
    /// Other states are returned unchanged.
    #[must_use]
    pub fn with_fallback_error(self, fallback: Option<E>) -> Self {
        match self {
            Self::Loading {
                impulse,
                fallback_value,
                ..
            } => Self::Loading {
                impulse,
                fallback_value,
                fallback_error: fallback,
            },
            other @ (Self::NotReady | Self::Success { .. } | Self::Failure { .. }) => other,
        }
    }

    /// How far along the load is.
    #[must_use]
    pub const fn provisioning_state(&self) -> ProvisioningState {
        match self {
            Self::NotReady => ProvisioningState::NotReady,
            Self::Loading { .. } => ProvisioningState::Loading,
            Self::Success { .. } | Self::Failure { .. } => ProvisioningState::Result,
        }
    }

    /// The impulse this state belongs to.
    #[must_use]
    pub const fn load_impulse(&self) -> Option<&LoadImpulse<P>> {
        match self {
            Self::NotReady => None,
            Self::Loading { impulse, .. }
            | Self::Success { impulse, .. }
            | Self::Failure { impulse, .. } => Some(impulse),
        }
    }

    /// The parameters this state belongs to.
    #[must_use]
    pub fn parameters(&self) -> Option<&P> {
        self.load_impulse().map(|impulse| &impulse.parameters)
    }

    /// The value to display: the loaded value, or else the fallback value.
    #[must_use]
    pub const fn value(&self) -> Option<&V> {
        match self {
            Self::NotReady => None,
            Self::Success { value, .. } => Some(value),
            Self::Loading { fallback_value, .. } | Self::Failure { fallback_value, .. } => {
                fallback_value.as_ref()
            },
        }
    }

    /// The error to display: the load's error, or else the fallback error.
    #[must_use]
    pub const fn error(&self) -> Option<&E> {
        match self {
            Self::NotReady | Self::Success { .. } => None,
            Self::Failure { error, .. } => Some(error),
            Self::Loading { fallback_error, .. } => fallback_error.as_ref(),
        }
    }

    /// Whether this state is a successful result.
    #[must_use]
    pub const fn has_loaded_successfully(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Whether work is in progress.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(self, Self::Loading { .. })
    }
}

impl<V, P: PartialEq, E> State<V, P, E> {
    /// Whether this state belongs to parameters equal to `impulse`'s.
    #[must_use]
    pub fn is_cache_compatible(&self, impulse: &LoadImpulse<P>) -> bool {
        self.load_impulse()
            .is_some_and(|own| own.is_cache_compatible(impulse))
    }

    /// [`value`](Self::value), but only if it may be shown for `impulse`.
    #[must_use]
    pub fn cache_compatible_value(&self, impulse: &LoadImpulse<P>) -> Option<&V> {
        if self.is_cache_compatible(impulse) {
            self.value()
        } else {
            None
        }
    }

    /// [`error`](Self::error), but only if it may be shown for `impulse`.
    #[must_use]
    pub fn cache_compatible_error(&self, impulse: &LoadImpulse<P>) -> Option<&E> {
        if self.is_cache_compatible(impulse) {
            self.error()
        } else {
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::error::{DatasourceError, LoadError};
    use std::collections::HashSet;

    type TestState = State<String, u32, DatasourceError>;

    #[test]
    fn impulses_compare_on_parameters_only() {
        let initial = LoadImpulse::initial(1);
        let user = LoadImpulse::user_initiated(1);
        assert_eq!(initial, user);
        assert_ne!(initial, LoadImpulse::initial(2));

        let set: HashSet<_> = [initial, user].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn only_user_initiated_forces_refresh() {
        assert!(LoadImpulseType::UserInitiated.forces_refresh());
        assert!(!LoadImpulseType::Initial.forces_refresh());
        assert!(!LoadImpulseType::Background.forces_refresh());
    }

    #[test]
    fn provisioning_states_are_ordered() {
        assert!(ProvisioningState::NotReady < ProvisioningState::Loading);
        assert!(ProvisioningState::Loading < ProvisioningState::Result);
    }

    #[test]
    fn value_and_error_fall_back() {
        let impulse = LoadImpulse::initial(1);
        let loading = TestState::loading(impulse.clone())
            .with_fallback_value(Some("old".into()))
            .with_fallback_error(Some(DatasourceError::from_message("earlier")));
        assert_eq!(loading.value().map(String::as_str), Some("old"));
        assert_eq!(loading.error(), Some(&DatasourceError::from_message("earlier")));
        assert!(loading.is_loading());

        let failure = TestState::failure(impulse.clone(), DatasourceError::from_message("now"))
            .with_fallback_value(Some("old".into()));
        assert_eq!(failure.value().map(String::as_str), Some("old"));
        assert_eq!(failure.error(), Some(&DatasourceError::from_message("now")));
        assert!(!failure.has_loaded_successfully());

        let success = TestState::success(impulse, "new".into());
        assert_eq!(success.error(), None);
        assert!(success.has_loaded_successfully());
        assert_eq!(success.provisioning_state(), ProvisioningState::Result);
    }

    #[test]
    fn fallback_setters_leave_other_states_alone() {
        let success = TestState::success(LoadImpulse::initial(1), "v".into());
        assert_eq!(
            success.clone().with_fallback_error(Some(DatasourceError::from_message("x"))),
            success
        );
        assert_eq!(TestState::NotReady.with_fallback_value(Some("v".into())), TestState::NotReady);
    }

    #[test]
    fn stale_parameters_are_not_cache_compatible() {
        let state = TestState::failure(LoadImpulse::initial(1), DatasourceError::from_message("e"));
        assert!(state.cache_compatible_error(&LoadImpulse::background(1)).is_some());
        assert!(state.cache_compatible_error(&LoadImpulse::initial(2)).is_none());
        assert!(!TestState::NotReady.is_cache_compatible(&LoadImpulse::initial(1)));
    }
}
