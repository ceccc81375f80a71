//! Handle-to-path bookkeeping for the watched directory set.

use crate::backend::WatchHandle;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Association between live watch handles and the directories they monitor.
///
/// Mirrors the backend: a handle appears here exactly while the backend
/// considers it valid, and is forgotten the moment the backend reports it
/// permanently invalid.
#[derive(Debug, Default)]
pub(crate) struct WatchRegistry {
    dirs: HashMap<WatchHandle, PathBuf>,
}

impl WatchRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, handle: WatchHandle, dir: PathBuf) {
        self.dirs.insert(handle, dir);
    }

    pub(crate) fn resolve(&self, handle: WatchHandle) -> Option<&Path> {
        self.dirs.get(&handle).map(PathBuf::as_path)
    }

    pub(crate) fn forget(&mut self, handle: WatchHandle) {
        self.dirs.remove(&handle);
    }

    /// Path-membership query; the registrar uses this to avoid registering
    /// the same directory twice.
    pub(crate) fn is_watched(&self, dir: &Path) -> bool {
        self.dirs.values().any(|watched| watched == dir)
    }

    pub(crate) fn len(&self) -> usize {
        self.dirs.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }
}
