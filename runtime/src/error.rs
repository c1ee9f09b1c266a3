//! Error types for the runtime.

use thiserror::Error;

/// Errors raised while setting up runtime components.
///
/// Loads never fail with these: load failures travel inside
/// [`State`](impulse_core::State) values.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// A component needing a tokio runtime was created outside of one.
    #[error("No tokio runtime is available on this thread")]
    NoTokioRuntime,

    /// The worker thread of a serial queue could not be started.
    #[error("Failed to spawn serial queue thread: {0}")]
    QueueSpawn(#[source] std::io::Error),

    /// The serial queue has shut down and accepts no more jobs.
    #[error("Serial queue is closed")]
    QueueClosed,

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The configuration source could not be read or parsed.
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// The configuration parsed but holds invalid values.
    #[error("Configuration validation failed: {0}")]
    Validation(String),

    /// An environment override holds a value that cannot be used.
    #[error("Invalid value for environment variable {name}: {value}")]
    EnvVar {
        /// Name of the variable.
        name: String,
        /// The offending value.
        value: String,
    },
}

/// Result alias for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;
