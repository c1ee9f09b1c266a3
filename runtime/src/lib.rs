//! # Impulse Runtime
//!
//! The parts of Impulse that need a scheduler, a thread or a file system.
//! `impulse-core` is a synchronous push engine; this crate plugs it into
//! tokio and the operating system.
//!
//! ## Components
//!
//! - **[`SerialQueue`]**: serial execution context on a dedicated thread,
//!   for moving deliveries off the producing thread with `observe_on`.
//! - **[`RecurringLoadImpulseEmitter`]**: load impulse emitter with a tokio
//!   refresh timer.
//! - **[`ObservationStream`]**: any observable as a `futures::Stream`.
//! - **[`DiskPersister`]**: JSON files as the backing store of a
//!   [`CachedDatasource`](impulse_core::CachedDatasource).
//! - **[`RuntimeConfig`]**: TOML / environment configuration for all of the
//!   above.
//!
//! ## Example
//!
//! ```
//! use futures::StreamExt;
//! use impulse_core::{
//!     CachedDatasource, Datasource, DatasourceError, Disposable, LoadImpulse, State, StatePersister,
//! };
//! use impulse_runtime::{DiskPersister, RecurringLoadImpulseEmitter, RuntimeConfig};
//! use impulse_runtime::stream::IntoObservationStream;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RuntimeConfig::from_toml_str("[timer]\nrefresh_interval_ms = 60000")?;
//! let emitter = RecurringLoadImpulseEmitter::new(
//!     Some(LoadImpulse::initial("profile".to_string())),
//!     config.timer.mode(),
//! )?;
//!
//! let dir = std::env::temp_dir().join("impulse-runtime-example");
//! let persister: Arc<dyn StatePersister<String, String, DatasourceError>> =
//!     Arc::new(DiskPersister::new(&dir));
//!
//! let network = Datasource::new(emitter.clone(), |impulse: LoadImpulse<String>, send| {
//!     send.send(State::success(impulse, "fresh".to_string()));
//!     Disposable::empty()
//! });
//! let datasource = CachedDatasource::new(
//!     network,
//!     emitter,
//!     persister,
//!     DatasourceError::CacheLoad("nothing stored".into()),
//!     config.cache.policy,
//! );
//!
//! let mut states = datasource.into_stream();
//! assert_eq!(states.next().await, Some(State::NotReady));
//! # let _ = std::fs::remove_dir_all(dir);
//! # Ok(())
//! # }
//! ```

/// Configuration loaded from TOML and environment variables.
pub mod config;

/// Error types for the runtime.
pub mod error;

/// File-backed state persister.
pub mod persister;

/// Load impulse emitter with a refresh timer.
pub mod recurring;

/// Serial execution context on a dedicated thread.
pub mod serial_queue;

/// Observables as async streams.
pub mod stream;

pub use config::RuntimeConfig;
pub use error::{ConfigError, RuntimeError};
pub use persister::DiskPersister;
pub use recurring::{RecurringLoadImpulseEmitter, TimerMode};
pub use serial_queue::SerialQueue;
pub use stream::{IntoObservationStream, ObservationStream};
