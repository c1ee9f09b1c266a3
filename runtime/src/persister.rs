//! File-backed [`StatePersister`].
//!
//! [`DiskPersister`] keeps one JSON document per parameters value inside a
//! directory. File names are the SHA-256 of the parameters' JSON encoding, so
//! they are stable across processes and Rust versions.
//!
//! Every I/O or decoding problem is logged and counted, then reported as a
//! cache miss. A broken cache directory therefore degrades to "no cache"
//! instead of breaking loads.

use crate::config::PersisterConfig;
use impulse_core::{State, StatePersister};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::io::{self, Write as _};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const EXTENSION: &str = "json";

/// Persister storing states as JSON files in a directory.
///
/// # Example
///
/// ```
/// use impulse_core::{DatasourceError, LoadImpulse, State, StatePersister};
/// use impulse_runtime::persister::DiskPersister;
///
/// let dir = std::env::temp_dir().join("impulse-doc-example");
/// let persister: DiskPersister<String, u32, DatasourceError> = DiskPersister::new(&dir);
///
/// persister.persist(&State::success(LoadImpulse::initial(1), "A".to_string()));
/// let restored = persister.load(&1);
/// assert_eq!(restored.and_then(|s| s.value().cloned()), Some("A".to_string()));
/// # persister.purge();
/// ```
pub struct DiskPersister<V, P, E> {
    directory: PathBuf,
    _state: PhantomData<fn() -> State<V, P, E>>,
}

impl<V, P, E> DiskPersister<V, P, E> {
    /// Persist into `directory`. It is created on first write.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            _state: PhantomData,
        }
    }

    /// Persist into the directory named by `config`.
    #[must_use]
    pub fn from_config(config: &PersisterConfig) -> Self {
        Self::new(config.directory.clone())
    }

    /// The directory holding the entries.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

impl<V, P: Serialize, E> DiskPersister<V, P, E> {
    /// Path of the entry for `parameters`.
    ///
    /// # Errors
    ///
    /// Returns an error if the parameters cannot be encoded as JSON.
    pub fn entry_path(&self, parameters: &P) -> Result<PathBuf, serde_json::Error> {
        let encoded = serde_json::to_vec(parameters)?;
        let digest = Sha256::digest(&encoded);
        let mut name = String::with_capacity(digest.len() * 2 + EXTENSION.len() + 1);
        for byte in digest {
            let _ = write!(name, "{byte:02x}");
        }
        name.push('.');
        name.push_str(EXTENSION);
        Ok(self.directory.join(name))
    }
}

fn record_failure(operation: &'static str) {
    metrics::counter!("impulse.persister.failures", "operation" => operation).increment(1);
}

/// Stage `bytes` in a uniquely named file next to `path`, then move it into
/// place, so readers and concurrent writers never see a partial entry.
fn write_atomically(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let mut staging = NamedTempFile::new_in(parent)?;
    staging.write_all(bytes)?;
    staging.persist(path).map_err(|error| error.error)?;
    Ok(())
}

impl<V, P, E> StatePersister<V, P, E> for DiskPersister<V, P, E>
where
    V: Serialize + DeserializeOwned,
    P: Serialize + DeserializeOwned,
    E: Serialize + DeserializeOwned,
{
    #[tracing::instrument(skip_all, fields(directory = %self.directory.display()))]
    fn load(&self, parameters: &P) -> Option<State<V, P, E>> {
        let path = match self.entry_path(parameters) {
            Ok(path) => path,
            Err(error) => {
                tracing::warn!(%error, "cannot encode parameters");
                record_failure("load");
                return None;
            },
        };

        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                tracing::trace!(path = %path.display(), "no entry");
                return None;
            },
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "failed to read cache entry");
                record_failure("load");
                return None;
            },
        };

        match serde_json::from_slice(&bytes) {
            Ok(state) => Some(state),
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "failed to decode cache entry");
                record_failure("load");
                None
            },
        }
    }

    #[tracing::instrument(skip_all, fields(directory = %self.directory.display()))]
    fn persist(&self, state: &State<V, P, E>) {
        let Some(parameters) = state.parameters() else {
            tracing::trace!("not persisting a state without parameters");
            return;
        };

        let written = self.entry_path(parameters).map_err(io::Error::other).and_then(|path| {
            let bytes = serde_json::to_vec(state).map_err(io::Error::other)?;
            write_atomically(&path, &bytes)
        });

        match written {
            Ok(()) => {
                metrics::counter!("impulse.persister.writes").increment(1);
            },
            Err(error) => {
                tracing::warn!(%error, "failed to write cache entry");
                record_failure("persist");
            },
        }
    }

    #[tracing::instrument(skip_all, fields(directory = %self.directory.display()))]
    fn purge(&self) {
        let entries = match std::fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return,
            Err(error) => {
                tracing::warn!(%error, "failed to list cache directory");
                record_failure("purge");
                return;
            },
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == EXTENSION) {
                if let Err(error) = std::fs::remove_file(&path) {
                    tracing::warn!(path = %path.display(), %error, "failed to remove cache entry");
                    record_failure("purge");
                }
            }
        }
    }
}

impl<V, P, E> std::fmt::Debug for DiskPersister<V, P, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskPersister")
            .field("directory", &self.directory)
            .finish()
    }
}
