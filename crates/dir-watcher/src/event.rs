//! Event batches delivered by a watch backend.

use crate::backend::WatchHandle;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Kinds of change notifications the service reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// An entry was created
    Create,
    /// An entry was modified
    Modify,
    /// An entry was removed
    Remove,
    /// The mechanism dropped finer-grained events; carries no detail
    Overflow,
}

/// One change notification, named relative to the directory its batch
/// belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEntry {
    /// What happened
    pub kind: EventKind,
    /// Entry name relative to the batch directory; empty when the event
    /// concerns the directory itself
    pub name: PathBuf,
}

impl BatchEntry {
    /// Entry-created notification
    pub fn create(name: impl Into<PathBuf>) -> Self {
        Self {
            kind: EventKind::Create,
            name: name.into(),
        }
    }

    /// Entry-modified notification
    pub fn modify(name: impl Into<PathBuf>) -> Self {
        Self {
            kind: EventKind::Modify,
            name: name.into(),
        }
    }

    /// Entry-removed notification
    pub fn remove(name: impl Into<PathBuf>) -> Self {
        Self {
            kind: EventKind::Remove,
            name: name.into(),
        }
    }

    /// Overflow signal; carries no entry name
    pub fn overflow() -> Self {
        Self {
            kind: EventKind::Overflow,
            name: PathBuf::new(),
        }
    }
}

/// The notifications delivered for one watched directory in one wake-up of
/// the event loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBatch {
    /// Handle of the directory the batch belongs to
    pub handle: WatchHandle,
    /// Entries in delivery order
    pub entries: Vec<BatchEntry>,
}

impl EventBatch {
    pub fn new(handle: WatchHandle, entries: Vec<BatchEntry>) -> Self {
        Self { handle, entries }
    }
}
