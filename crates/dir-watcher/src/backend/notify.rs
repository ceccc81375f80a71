//! Production backend over the `notify` crate.
//!
//! Registers one **non-recursive** watch per directory so that every watched
//! directory owns its own handle; recursion is the registrar's job, not the
//! OS mechanism's. Raw `notify` events carry absolute paths, so the callback
//! routes each event back to the handle of the directory it belongs to
//! before handing it to the event loop.

use crate::backend::{WatchBackend, WatchHandle};
use crate::event::{BatchEntry, EventBatch, EventKind};
use crate::{Result, WatcherError};
use notify::{Config, Event, EventKind as RawEventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, trace, warn};

/// Handle-to-path bookkeeping, shared with the notify callback thread.
#[derive(Debug, Default)]
struct Watches {
    by_path: HashMap<PathBuf, WatchHandle>,
    by_handle: HashMap<WatchHandle, PathBuf>,
}

impl Watches {
    fn insert(&mut self, handle: WatchHandle, path: PathBuf) {
        self.by_path.insert(path.clone(), handle);
        self.by_handle.insert(handle, path);
    }

    fn remove(&mut self, handle: WatchHandle) -> Option<PathBuf> {
        let path = self.by_handle.remove(&handle)?;
        self.by_path.remove(&path);
        Some(path)
    }
}

/// Watch backend over [`notify::RecommendedWatcher`].
pub struct NotifyBackend {
    watcher: Mutex<Option<RecommendedWatcher>>,
    batches: Mutex<mpsc::UnboundedReceiver<EventBatch>>,
    watches: Arc<StdMutex<Watches>>,
    next_handle: AtomicU64,
}

impl NotifyBackend {
    /// Open a new notification channel.
    pub fn open() -> Result<Self> {
        let (batch_tx, batch_rx) = mpsc::unbounded_channel();
        let watches = Arc::new(StdMutex::new(Watches::default()));

        let watcher = RecommendedWatcher::new(
            {
                let watches = Arc::clone(&watches);
                move |result: notify::Result<Event>| match result {
                    Ok(event) => {
                        let batch = match watches.lock() {
                            Ok(watches) => route_event(&watches, event),
                            Err(_) => None,
                        };
                        if let Some(batch) = batch {
                            if batch_tx.send(batch).is_err() {
                                trace!("Dropping event batch: receiver closed");
                            }
                        }
                    }
                    Err(e) => warn!("Platform watcher error: {e}"),
                }
            },
            Config::default(),
        )
        .map_err(WatcherError::Open)?;

        Ok(Self {
            watcher: Mutex::new(Some(watcher)),
            batches: Mutex::new(batch_rx),
            watches,
            next_handle: AtomicU64::new(0),
        })
    }
}

#[async_trait::async_trait]
impl WatchBackend for NotifyBackend {
    async fn register(&self, dir: &Path) -> Result<WatchHandle> {
        let meta = tokio::fs::symlink_metadata(dir)
            .await
            .map_err(|source| WatcherError::Inspect {
                path: dir.to_path_buf(),
                source,
            })?;
        if !meta.is_dir() {
            return Err(WatcherError::NotADirectory {
                path: dir.to_path_buf(),
            });
        }

        {
            let mut guard = self.watcher.lock().await;
            let watcher = guard.as_mut().ok_or(WatcherError::Closed)?;
            watcher
                .watch(dir, RecursiveMode::NonRecursive)
                .map_err(|source| WatcherError::Register {
                    path: dir.to_path_buf(),
                    source,
                })?;
        }

        let handle = WatchHandle::from_raw(self.next_handle.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut watches) = self.watches.lock() {
            watches.insert(handle, dir.to_path_buf());
        }
        trace!("Registered {} as {:?}", dir.display(), handle);
        Ok(handle)
    }

    async fn next_batch(&self) -> Option<EventBatch> {
        self.batches.lock().await.recv().await
    }

    async fn is_handle_valid(&self, handle: WatchHandle) -> bool {
        let path = match self.watches.lock() {
            Ok(watches) => match watches.by_handle.get(&handle) {
                Some(path) => path.clone(),
                None => return false,
            },
            Err(_) => return false,
        };

        let still_dir = tokio::fs::symlink_metadata(&path)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false);
        if still_dir {
            return true;
        }

        // The directory is gone; tear down our side of the registration.
        if let Ok(mut watches) = self.watches.lock() {
            watches.remove(handle);
        }
        if let Some(watcher) = self.watcher.lock().await.as_mut() {
            if let Err(e) = watcher.unwatch(&path) {
                // notify usually unwatches removed directories by itself
                trace!("Failed to unwatch {}: {e}", path.display());
            }
        }
        false
    }

    async fn close(&self) {
        if self.watcher.lock().await.take().is_some() {
            debug!("Watch backend closed");
        }
    }
}

/// Turn a raw notify event into a batch bound to a registered handle.
///
/// A `Remove` whose path is itself a registered directory becomes an empty
/// self-batch on that directory's handle: its watch just died, and the empty
/// batch makes the event loop run the validity check that retires it. Every
/// other event routes to the handle of its parent directory with the final
/// path component as entry name; events about a watched root itself fall
/// through to the root's own handle with an empty name.
fn route_event(watches: &Watches, event: Event) -> Option<EventBatch> {
    let kind = if event.need_rescan() {
        EventKind::Overflow
    } else {
        match event.kind {
            RawEventKind::Create(_) => EventKind::Create,
            RawEventKind::Modify(_) => EventKind::Modify,
            RawEventKind::Remove(_) => EventKind::Remove,
            ref other => {
                trace!("Ignoring event kind: {:?}", other);
                return None;
            }
        }
    };

    let path = event.paths.first()?;

    if kind == EventKind::Remove {
        if let Some(&handle) = watches.by_path.get(path.as_path()) {
            return Some(EventBatch::new(handle, Vec::new()));
        }
    }

    if let Some(parent) = path.parent() {
        if let Some(&handle) = watches.by_path.get(parent) {
            let name = path.file_name().map(PathBuf::from).unwrap_or_default();
            return Some(EventBatch::new(handle, vec![BatchEntry { kind, name }]));
        }
    }

    if let Some(&handle) = watches.by_path.get(path.as_path()) {
        return Some(EventBatch::new(
            handle,
            vec![BatchEntry {
                kind,
                name: PathBuf::new(),
            }],
        ));
    }

    trace!("Dropping unroutable event for {}", path.display());
    None
}
