//! Error types for watch registration.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced when the notification mechanism cannot be opened or a
/// directory cannot be registered for watching.
///
/// Only the root directory's registration failure crosses the public
/// boundary; failures for directories discovered mid-walk are logged and
/// tolerated by the registrar.
#[derive(Debug, Error)]
pub enum WatcherError {
    /// The platform watcher could not be created
    #[error("failed to open the platform watcher")]
    Open(#[source] notify::Error),

    /// The registration target exists but is not a directory
    #[error("{} is not a watchable directory", path.display())]
    NotADirectory { path: PathBuf },

    /// The registration target could not be examined
    #[error("failed to inspect {}", path.display())]
    Inspect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The underlying mechanism refused the registration, e.g. because its
    /// watch table is exhausted
    #[error("failed to register {} with the platform watcher", path.display())]
    Register {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    /// Registration was attempted after the backend was closed
    #[error("watch backend is closed")]
    Closed,
}
