//! # Impulse Core
//!
//! Reactive data loading and caching primitives.
//!
//! A load impulse emitter says *what* to load and *when*. A datasource runs a
//! load function for every impulse and publishes the resulting [`State`]s.
//! Decorators wrap datasources to add caching or to carry the last known
//! value across loads. Consumers observe the outermost datasource.
//!
//! ```text
//! LoadImpulseEmitter ──impulses──▶ Datasource ──states──▶ decorators ──▶ observers
//! ```
//!
//! ## Core Concepts
//!
//! - **Observable**: push-based source of values. `observe` returns a
//!   [`Disposable`], and disposing it is the only way to stop delivery.
//! - **State**: `NotReady`, `Loading`, `Success` or `Failure`, tied to the
//!   [`LoadImpulse`] that produced it, with optional fallbacks for display
//!   continuity.
//! - **Datasource**: observable of states with a synchronously readable
//!   current value, sharing one upstream subscription between all observers.
//! - **Decorators**: [`CachedDatasource`] (read-through / write-through
//!   persistence) and [`LastResultRetainingDatasource`].
//!
//! ## Guarantees
//!
//! - Values reach each observer one at a time and in emission order.
//! - Observing a datasource delivers its current state synchronously.
//! - Failures are states, never panics or `Err` returns crossing an
//!   observable.
//!
//! This crate is synchronous and runtime-agnostic. Timers, dedicated threads
//! and disk persistence live in `impulse-runtime`.
//!
//! ## Example
//!
//! ```
//! use impulse_core::{
//!     Datasource, DatasourceError, DefaultLoadImpulseEmitter, Disposable, LoadError,
//!     LoadImpulse, LoadImpulseEmitter, ObservableExt, State, StateDatasource,
//! };
//! use std::sync::{Arc, Mutex};
//!
//! let emitter = DefaultLoadImpulseEmitter::new(Some(LoadImpulse::initial("1".to_string())));
//! let datasource = Datasource::new(emitter.clone(), |impulse: LoadImpulse<String>, send| {
//!     let state = match impulse.parameters.as_str() {
//!         "1" => State::success(impulse, "A"),
//!         _ => State::failure(impulse, DatasourceError::from_message("unknown")),
//!     };
//!     send.send(state);
//!     Disposable::empty()
//! })
//! .retaining_last_result();
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&seen);
//! let subscription = datasource.subscribe(move |state| sink.lock().unwrap().push(state));
//!
//! emitter.emit(LoadImpulse::initial("2".to_string()));
//! // NotReady, then "1" → "A", then the failure for "2".
//! assert_eq!(seen.lock().unwrap().len(), 3);
//! assert_eq!(datasource.current_value().value(), None);
//! subscription.dispose();
//! ```

pub mod cache;
pub mod context;
pub mod datasource;
pub mod disposable;
pub mod error;
pub mod impulse;
pub mod last_result;
mod multicast;
pub mod observable;
pub mod operators;
pub mod state;

pub use cache::{CachePolicy, CachedDatasource, StatePersister};
pub use context::{ExecutionContext, ImmediateContext, Job, SharedContext};
pub use datasource::{Datasource, LoadFn, StateDatasource};
pub use disposable::{CompositeDisposable, Disposable, SerialDisposable};
pub use error::{DatasourceError, LoadError};
pub use impulse::{DefaultLoadImpulseEmitter, LoadImpulseEmitter};
pub use last_result::{LastResultRetainer, LastResultRetainingDatasource};
pub use observable::{AnyObservable, Observable, ObservableExt, Observer, Publisher};
pub use operators::{OperatorsExt, combine};
pub use state::{LoadImpulse, LoadImpulseType, Parameters, ProvisioningState, State, StateValue};
