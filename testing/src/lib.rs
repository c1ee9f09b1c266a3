//! # Impulse Testing
//!
//! Testing utilities for code built on Impulse datasources.
//!
//! This crate provides:
//! - [`StateRecorder`] and [`assertions`] for checking emitted state sequences
//! - [`InMemoryPersister`] for cache decorators
//! - [`ManualExecutionContext`] for deterministic thread-hop tests
//! - Load function fixtures in [`fixtures`]
//! - [`strategies`] generating states and impulses for proptest
//!
//! ## Example
//!
//! ```
//! use impulse_core::{Datasource, DefaultLoadImpulseEmitter, LoadImpulseEmitter, State};
//! use impulse_testing::fixtures::{impulse, letter_load};
//! use impulse_testing::StateRecorder;
//!
//! let emitter = DefaultLoadImpulseEmitter::new(Some(impulse("1")));
//! let datasource = Datasource::new(emitter.clone(), letter_load);
//! let recorder = StateRecorder::observe(&datasource);
//!
//! emitter.emit(impulse("2"));
//! assert_eq!(
//!     recorder.states(),
//!     vec![
//!         State::NotReady,
//!         State::success(impulse("1"), "A".to_string()),
//!         State::success(impulse("2"), "B".to_string()),
//!     ]
//! );
//! ```

/// Execution context driven by the test.
pub mod context;

/// Load functions for tests.
pub mod fixtures;

/// In-memory state persister.
pub mod persister;

/// Recording observed states and asserting on them.
pub mod recorder;

pub use context::ManualExecutionContext;
pub use persister::InMemoryPersister;
pub use recorder::{StateRecorder, assertions};

/// Install a `tracing` subscriber for tests.
///
/// Honors `RUST_LOG` and defaults to `warn`. Calling it more than once is
/// harmless; only the first call installs anything.
pub fn init_test_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Property-based testing strategies.
pub mod strategies {
    use impulse_core::{DatasourceError, LoadError, LoadImpulse, LoadImpulseType, State};
    use proptest::prelude::*;

    /// Any impulse type.
    pub fn impulse_type() -> impl Strategy<Value = LoadImpulseType> {
        prop_oneof![
            Just(LoadImpulseType::Initial),
            Just(LoadImpulseType::UserInitiated),
            Just(LoadImpulseType::Background),
        ]
    }

    /// Impulses over parameters `0..parameters`.
    pub fn impulse(parameters: u8) -> impl Strategy<Value = LoadImpulse<u8>> {
        (0..parameters.max(1), impulse_type()).prop_map(|(p, kind)| LoadImpulse::new(p, kind))
    }

    /// States whose values and errors name the parameters they belong to.
    ///
    /// Values are `(parameters, n)` and error messages are the parameters,
    /// so tests can check that nothing is shown under the wrong parameters.
    pub fn owned_state(parameters: u8) -> impl Strategy<Value = State<(u8, u32), u8, DatasourceError>> {
        prop_oneof![
            1 => Just(State::NotReady),
            3 => impulse(parameters).prop_map(State::loading),
            3 => (impulse(parameters), any::<u32>())
                .prop_map(|(i, n)| {
                    let owner = i.parameters;
                    State::success(i, (owner, n))
                }),
            2 => impulse(parameters).prop_map(|i| {
                let message = i.parameters.to_string();
                State::failure(i, DatasourceError::from_message(message))
            }),
        ]
    }
}
