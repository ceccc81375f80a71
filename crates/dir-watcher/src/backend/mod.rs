//! Seam to the OS-level filesystem notification mechanism.

mod notify;

pub use self::notify::NotifyBackend;

use crate::event::EventBatch;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Opaque token identifying one directory's active registration with the
/// underlying notification mechanism.
///
/// The service stores and compares handles as keys; it never interprets
/// their value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WatchHandle(u64);

impl WatchHandle {
    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

/// Interface to the underlying notification mechanism.
///
/// The mechanism owns handle validity: a watched directory can vanish
/// without the service initiating it, so the event loop asks
/// [`is_handle_valid`](WatchBackend::is_handle_valid) after each batch
/// instead of trusting its own bookkeeping.
#[async_trait::async_trait]
pub trait WatchBackend: Send + Sync + 'static {
    /// Begin monitoring `dir` for create/modify/remove events.
    ///
    /// Fails when `dir` does not exist, is not a directory, the mechanism's
    /// watch table is exhausted, or the mechanism has been closed.
    async fn register(&self, dir: &Path) -> Result<WatchHandle>;

    /// Block until the next event batch is available.
    ///
    /// Returns `None` once the mechanism has been closed; no further batches
    /// will ever arrive after that.
    async fn next_batch(&self) -> Option<EventBatch>;

    /// Whether `handle` will still deliver events going forward.
    async fn is_handle_valid(&self, handle: WatchHandle) -> bool;

    /// Close the mechanism. A pending [`next_batch`](WatchBackend::next_batch)
    /// call observes the closure after draining already-delivered batches.
    async fn close(&self);
}
