//! Error contract for values carried inside [`State`](crate::state::State).
//!
//! Errors never cross the observable boundary as panics or `Err` returns.
//! A load function catches its own failures and sends them as
//! `State::Failure`. Any error type used that way implements [`LoadError`]:
//! it has a human-readable message (`Display`) and can be built from a plain
//! message, which is how generic and cache errors are produced.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Requirements on the error type of a datasource.
pub trait LoadError: std::error::Error + Clone + Send + Sync + 'static {
    /// Build an error from a plain message.
    fn from_message(message: impl Into<String>) -> Self;
}

/// Ready-made error type covering the usual ways a load can fail.
///
/// # Example
///
/// ```
/// use impulse_core::error::{DatasourceError, LoadError};
///
/// let error = DatasourceError::from_message("unknown");
/// assert_eq!(error.to_string(), "unknown");
///
/// let cache = DatasourceError::CacheLoad("no entry".into());
/// assert_eq!(cache.to_string(), "Cache load failed: no entry");
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatasourceError {
    /// The request for the load could not be built.
    #[error("Request construction failed: {0}")]
    RequestConstruction(String),

    /// The work itself failed (transport, I/O, remote error).
    #[error("Transport failed: {0}")]
    Transport(String),

    /// The response could not be decoded.
    #[error("Decoding failed: {0}")]
    Decoding(String),

    /// No usable cached state was found.
    #[error("Cache load failed: {0}")]
    CacheLoad(String),

    /// Anything else, described by its message.
    #[error("{0}")]
    Message(String),
}

impl LoadError for DatasourceError {
    fn from_message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_human_readable() {
        assert_eq!(
            DatasourceError::Transport("timed out".into()).to_string(),
            "Transport failed: timed out"
        );
        assert_eq!(
            DatasourceError::Decoding("bad json".into()).to_string(),
            "Decoding failed: bad json"
        );
        assert_eq!(DatasourceError::from_message("plain").to_string(), "plain");
    }
}
