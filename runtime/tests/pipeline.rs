//! End-to-end: recurring emitter, disk cache, last-result retention and the
//! stream bridge working together.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use futures::StreamExt;
use impulse_core::{
    CachePolicy, CachedDatasource, Datasource, DatasourceError, DefaultLoadImpulseEmitter, LoadError,
    LoadImpulseEmitter, State, StateDatasource, StatePersister,
};
use impulse_runtime::{DiskPersister, ObservationStream, RecurringLoadImpulseEmitter, RuntimeConfig, TimerMode};
use impulse_testing::StateRecorder;
use impulse_testing::fixtures::{LetterState, impulse, letter_load};
use std::sync::Arc;
use std::time::Duration;

type Persister = Arc<dyn StatePersister<String, String, DatasourceError>>;

fn disk(dir: &std::path::Path) -> Persister {
    Arc::new(DiskPersister::<String, String, DatasourceError>::new(dir))
}

async fn next(stream: &mut ObservationStream<LetterState>) -> LetterState {
    tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("state within five seconds")
        .expect("stream still open")
}

#[tokio::test(start_paused = true)]
async fn recurring_refresh_flows_through_cache_and_retention() {
    impulse_testing::init_test_tracing();
    let dir = tempfile::tempdir().unwrap();
    let persister = disk(dir.path());

    let emitter =
        RecurringLoadImpulseEmitter::new(Some(impulse("1")), TimerMode::Repeating(Duration::from_millis(100))).unwrap();
    let datasource = CachedDatasource::new(
        Datasource::new(emitter.clone(), letter_load),
        emitter.clone(),
        Arc::clone(&persister),
        DatasourceError::from_message("not cached"),
        CachePolicy::ReturnCacheThenLoad,
    )
    .retaining_last_result();

    let started = tokio::time::Instant::now();
    let mut states = ObservationStream::new(&datasource);

    // Nothing stored yet: the miss is reported while the letter loads.
    assert_eq!(next(&mut states).await, State::NotReady);
    let miss = next(&mut states).await;
    assert!(miss.is_loading());
    assert_eq!(miss.error().map(ToString::to_string), Some("not cached".to_string()));
    assert_eq!(next(&mut states).await, State::success(impulse("1"), "A".to_string()));
    assert!(persister.load(&"1".to_string()).is_some());
    assert!(emitter.is_timer_running());

    // The tick replays "1" from the cache, then reloads it.
    let cached = next(&mut states).await;
    let reloaded = next(&mut states).await;
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(cached.value(), Some(&"A".to_string()));
    assert_eq!(reloaded.value(), Some(&"A".to_string()));
    assert!(reloaded.load_impulse().is_some_and(|i| !i.request_type.forces_refresh()));

    // A failing load for other parameters shows none of the data for "1".
    emitter.emit(impulse("3"));
    let missed = next(&mut states).await;
    assert_eq!(missed.parameters(), Some(&"3".to_string()));
    assert_eq!(missed.value(), None);
    let failed = next(&mut states).await;
    assert_eq!(failed.parameters(), Some(&"3".to_string()));
    assert_eq!(failed.value(), None);
    assert_eq!(failed.error().map(ToString::to_string), Some("unknown".to_string()));
    assert!(persister.load(&"3".to_string()).is_none());

    states.close();
    assert_eq!(datasource.observer_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn switching_the_timer_off_stops_refreshes() {
    let emitter = RecurringLoadImpulseEmitter::new(Some(impulse("2")), TimerMode::Repeating(Duration::from_millis(50))).unwrap();
    let datasource = Datasource::new(emitter.clone(), letter_load);
    let recorder = StateRecorder::observe(&datasource);

    tokio::time::sleep(Duration::from_millis(120)).await;
    let ticked = recorder.len();
    assert!(ticked >= 3, "expected initial state plus ticks, got {ticked}");

    emitter.set_timer_mode(TimerMode::None);
    let after_switch = recorder.len();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(recorder.len(), after_switch);
    assert!(!emitter.is_timer_running());
}

#[test]
fn persisted_state_survives_a_new_datasource() {
    let dir = tempfile::tempdir().unwrap();

    {
        let emitter = DefaultLoadImpulseEmitter::new(Some(impulse("2")));
        let datasource = CachedDatasource::new(
            Datasource::new(emitter.clone(), letter_load),
            emitter,
            disk(dir.path()),
            DatasourceError::from_message("not cached"),
            CachePolicy::default(),
        );
        let recorder = StateRecorder::observe(&datasource);
        assert_eq!(recorder.last(), Some(State::success(impulse("2"), "B".to_string())));
    }

    let emitter = DefaultLoadImpulseEmitter::new(Some(impulse("2")));
    let cache_only = CachedDatasource::cache_only(emitter.clone(), disk(dir.path()), DatasourceError::from_message("not cached"));
    let recorder = StateRecorder::observe(&cache_only);
    assert_eq!(
        recorder.states(),
        vec![State::NotReady, State::success(impulse("2"), "B".to_string())]
    );

    emitter.emit(impulse("1"));
    assert_eq!(
        recorder.last(),
        Some(State::failure(impulse("1"), DatasourceError::from_message("not cached")))
    );
}

#[test]
fn configuration_wires_the_runtime_pieces() {
    let dir = tempfile::tempdir().unwrap();
    let document = format!(
        r#"
        [timer]
        refresh_interval_ms = 250

        [cache]
        policy = "return_cache_else_load"

        [persister]
        directory = {:?}
        "#,
        dir.path().display().to_string()
    );
    let config = RuntimeConfig::from_toml_str(&document).unwrap();

    let persister = DiskPersister::<String, String, DatasourceError>::from_config(&config.persister);
    assert_eq!(persister.directory(), dir.path());
    assert_eq!(config.timer.mode(), TimerMode::Repeating(Duration::from_millis(250)));

    let runtime = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
    let emitter = RecurringLoadImpulseEmitter::with_handle(Some(impulse("1")), config.timer.mode(), runtime.handle().clone());
    let datasource = CachedDatasource::new(
        Datasource::new(emitter.clone(), letter_load),
        emitter,
        Arc::new(persister),
        DatasourceError::from_message("not cached"),
        config.cache.policy,
    );
    assert_eq!(datasource.policy(), CachePolicy::ReturnCacheElseLoad);
    assert_eq!(datasource.current_value(), State::NotReady);
}
