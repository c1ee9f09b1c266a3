//! Datasource scenarios built from the testing fixtures.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use impulse_core::{
    CachePolicy, CachedDatasource, Datasource, DatasourceError, DefaultLoadImpulseEmitter, LastResultRetainer,
    LoadError, LoadImpulse, LoadImpulseEmitter, ProvisioningState, State, StateDatasource, StatePersister,
};
use impulse_testing::assertions::{assert_last_success, assert_no_foreign_values, assert_provisioning};
use impulse_testing::fixtures::{ControlledLoad, impulse, letter_load};
use impulse_testing::{InMemoryPersister, StateRecorder, strategies};
use proptest::prelude::*;
use std::sync::Arc;

type Owned = (u8, u32);

fn owner(value: &Owned) -> u8 {
    value.0
}

#[test]
fn retention_across_refresh_failure_and_parameter_change() {
    let load = ControlledLoad::<String, String, DatasourceError>::new();
    let emitter = DefaultLoadImpulseEmitter::new(Some(impulse("1")));
    let datasource = Datasource::new(emitter.clone(), load.load_fn()).retaining_last_result();
    let recorder = StateRecorder::observe(&datasource);

    load.latest().unwrap().succeed("A".to_string());
    emitter.emit(LoadImpulse::user_initiated("1".to_string()));
    assert_eq!(datasource.current_value().value(), Some(&"A".to_string()));

    load.latest().unwrap().fail(DatasourceError::from_message("offline"));
    let failed = datasource.current_value();
    assert_eq!(failed.value(), Some(&"A".to_string()));
    assert_eq!(failed.error().map(ToString::to_string), Some("offline".to_string()));

    emitter.emit(impulse("2"));
    let switched = datasource.current_value();
    assert!(switched.is_loading());
    assert_eq!(switched.value(), None);
    assert_eq!(switched.error(), None);

    assert_provisioning(
        &recorder.states(),
        &[
            ProvisioningState::NotReady,
            ProvisioningState::Loading,
            ProvisioningState::Result,
            ProvisioningState::Loading,
            ProvisioningState::Result,
            ProvisioningState::Loading,
        ],
    );
}

#[test]
fn superseded_request_is_cancelled_and_its_result_never_surfaces() {
    let load = ControlledLoad::<String, String, DatasourceError>::new();
    let emitter = DefaultLoadImpulseEmitter::new(Some(impulse("1")));
    let datasource = Datasource::new(emitter.clone(), load.load_fn()).retaining_last_result();
    let recorder = StateRecorder::observe(&datasource);

    let first = load.latest().unwrap();
    emitter.emit(impulse("2"));
    assert!(first.is_cancelled());

    first.succeed("stale".to_string());
    assert!(recorder.values().iter().all(|value| value.as_deref() != Some("stale")));

    load.latest().unwrap().succeed("B".to_string());
    assert_last_success(&recorder.states(), &"B".to_string());
}

#[test]
fn cache_only_serves_exactly_the_persisted_state() {
    let stored = State::success(impulse("1"), "A".to_string());
    let persister = Arc::new(InMemoryPersister::with_states([stored.clone()]));
    let shared: Arc<dyn StatePersister<String, String, DatasourceError>> = persister.clone();

    let emitter = DefaultLoadImpulseEmitter::new(Some(impulse("1")));
    let datasource = CachedDatasource::cache_only(emitter, shared, DatasourceError::from_message("not cached"));
    let recorder = StateRecorder::observe(&datasource);

    assert_eq!(recorder.states(), vec![State::NotReady, stored]);
    assert_eq!(persister.load_count(), 1);
    assert_eq!(persister.write_count(), 0);
}

#[test]
fn cached_value_carries_over_into_the_refreshing_load() {
    let persister = Arc::new(InMemoryPersister::with_states([State::success(impulse("1"), "A".to_string())]));
    let shared: Arc<dyn StatePersister<String, String, DatasourceError>> = persister.clone();
    let load = ControlledLoad::new();

    let emitter = DefaultLoadImpulseEmitter::new(Some(impulse("1")));
    let datasource = CachedDatasource::new(
        Datasource::new(emitter.clone(), load.load_fn()),
        emitter,
        shared,
        DatasourceError::from_message("not cached"),
        CachePolicy::ReturnCacheThenLoad,
    )
    .retaining_last_result();
    let recorder = StateRecorder::observe(&datasource);

    // NotReady, the cached success, then the load with the cached value shown.
    let states = recorder.states();
    assert_eq!(states.len(), 3);
    assert_eq!(states[1].value(), Some(&"A".to_string()));
    assert!(states[2].is_loading());
    assert_eq!(states[2].value(), Some(&"A".to_string()));

    load.latest().unwrap().succeed("A2".to_string());
    assert_last_success(&recorder.states(), &"A2".to_string());
    assert_eq!(persister.peek(&"1".to_string()).and_then(|s| s.value().cloned()), Some("A2".to_string()));
    assert_eq!(persister.write_count(), 1);
}

#[test]
fn failing_persister_reports_the_cache_error_then_loads() {
    let persister = Arc::new(InMemoryPersister::with_states([State::success(impulse("1"), "cached".to_string())]));
    persister.set_failing(true);
    let shared: Arc<dyn StatePersister<String, String, DatasourceError>> = persister.clone();

    let emitter = DefaultLoadImpulseEmitter::new(Some(impulse("1")));
    let datasource = CachedDatasource::new(
        Datasource::new(emitter.clone(), letter_load),
        emitter,
        shared,
        DatasourceError::from_message("not cached"),
        CachePolicy::ReturnCacheElseLoad,
    );
    let recorder = StateRecorder::observe(&datasource);

    assert_eq!(
        recorder.states(),
        vec![
            State::NotReady,
            State::loading(impulse("1")).with_fallback_error(Some(DatasourceError::from_message("not cached"))),
            State::success(impulse("1"), "A".to_string()),
        ]
    );
}

#[derive(Debug, Clone)]
enum Step {
    Emit(u8),
    Succeed { request: usize, n: u32 },
    Fail { request: usize },
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0u8..4).prop_map(Step::Emit),
        (any::<usize>(), any::<u32>()).prop_map(|(request, n)| Step::Succeed { request, n }),
        any::<usize>().prop_map(|request| Step::Fail { request }),
    ]
}

proptest! {
    #[test]
    fn retainer_never_shows_data_of_other_parameters(
        states in proptest::collection::vec(strategies::owned_state(4), 0..64)
    ) {
        let mut retainer = LastResultRetainer::new();
        let output: Vec<_> = states.into_iter().map(|state| retainer.apply(state)).collect();

        assert_no_foreign_values(&output, owner);
        for state in &output {
            if let (Some(error), Some(parameters)) = (state.error(), state.parameters()) {
                prop_assert_eq!(error.to_string(), parameters.to_string());
            }
        }
    }

    #[test]
    fn rapid_parameter_changes_never_leak_results(steps in proptest::collection::vec(step(), 1..48)) {
        let load = ControlledLoad::<Owned, u8, DatasourceError>::new();
        let emitter = DefaultLoadImpulseEmitter::new(Some(LoadImpulse::initial(0u8)));
        let datasource = Datasource::new(emitter.clone(), load.load_fn()).retaining_last_result();
        let recorder = StateRecorder::observe(&datasource);

        for step in steps {
            match step {
                Step::Emit(parameters) => emitter.emit(LoadImpulse::initial(parameters)),
                Step::Succeed { request, n } => {
                    let requests = load.requests();
                    let pending = &requests[request % requests.len()];
                    pending.succeed((pending.impulse.parameters, n));
                },
                Step::Fail { request } => {
                    let requests = load.requests();
                    let pending = &requests[request % requests.len()];
                    pending.fail(DatasourceError::from_message(pending.impulse.parameters.to_string()));
                },
            }
        }

        let states = recorder.states();
        assert_no_foreign_values(&states, owner);
        for state in &states {
            if let (Some(error), Some(parameters)) = (state.error(), state.parameters()) {
                prop_assert_eq!(error.to_string(), parameters.to_string());
            }
        }

        // Only the newest request may still be running.
        let requests = load.requests();
        let running = requests.iter().filter(|r| !r.is_cancelled()).count();
        prop_assert!(running <= 1);
    }
}
