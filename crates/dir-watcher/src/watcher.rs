//! The directory watch service: registry ownership, listener dispatch, and
//! the event-processing loop.

use crate::backend::{NotifyBackend, WatchBackend};
use crate::event::EventKind;
use crate::metrics::WatcherMetrics;
use crate::registrar;
use crate::registry::WatchRegistry;
use crate::Result;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

type Listener = Box<dyn FnMut() + Send>;

/// Watches a root directory, and in recursive mode every present and future
/// subdirectory, notifying listeners once per processed event batch.
///
/// The loop terminates when the backend is closed or when the watched set
/// becomes empty (every watched directory was removed). There is no separate
/// stop command: to cancel from outside, keep a clone of the backend `Arc`
/// and call [`WatchBackend::close`] on it.
pub struct DirWatcher<B: WatchBackend = NotifyBackend> {
    backend: Arc<B>,
    registry: WatchRegistry,
    root: PathBuf,
    recursive: bool,
    listeners: Vec<Listener>,
    metrics: Arc<WatcherMetrics>,
}

impl DirWatcher<NotifyBackend> {
    /// Watch `root` with a freshly opened [`NotifyBackend`].
    ///
    /// Fails when `root` cannot be registered: it is missing, not a
    /// directory, or the platform mechanism is exhausted.
    pub async fn new(root: impl AsRef<Path>, recursive: bool) -> Result<Self> {
        Self::with_backend(Arc::new(NotifyBackend::open()?), root, recursive).await
    }
}

impl<B: WatchBackend> DirWatcher<B> {
    /// Watch `root` over a caller-supplied backend.
    ///
    /// In recursive mode the whole tree below `root` is registered up front;
    /// otherwise only `root` itself.
    pub async fn with_backend(
        backend: Arc<B>,
        root: impl AsRef<Path>,
        recursive: bool,
    ) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let metrics = Arc::new(WatcherMetrics::new());
        let mut registry = WatchRegistry::new();

        if recursive {
            registrar::register_tree(backend.as_ref(), &mut registry, &metrics, &root).await?;
        } else {
            registrar::register_dir(backend.as_ref(), &mut registry, &metrics, &root).await?;
        }

        debug!(
            "Watching {} ({} directories)",
            root.display(),
            registry.len()
        );

        Ok(Self {
            backend,
            registry,
            root,
            recursive,
            listeners: Vec::new(),
            metrics,
        })
    }

    /// Append a callback invoked once per processed event batch, in
    /// registration order.
    ///
    /// Listeners learn that a batch was processed, not which entries
    /// changed.
    pub fn add_listener(&mut self, listener: impl FnMut() + Send + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Root directory this service was constructed over.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether newly created subdirectories are registered automatically.
    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    /// Number of directories currently watched.
    pub fn watched_count(&self) -> usize {
        self.registry.len()
    }

    /// Counters for watch activity.
    pub fn metrics(&self) -> Arc<WatcherMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Drive the event loop until the backend closes or the watched set
    /// becomes empty.
    ///
    /// Listener callbacks run synchronously on this task, so a slow listener
    /// delays delivery of subsequent batches.
    pub async fn run(&mut self) {
        info!("Watching {} for changes", self.root.display());

        loop {
            let Some(batch) = self.backend.next_batch().await else {
                debug!("Notification channel closed, stopping");
                break;
            };

            let Some(dir) = self.registry.resolve(batch.handle) else {
                // Stale wake-up for a handle we already forgot.
                self.metrics.record_stale_batch();
                trace!("Discarding batch for unknown handle {:?}", batch.handle);
                continue;
            };
            let dir = dir.to_path_buf();

            self.metrics.record_entries(batch.entries.len());
            for entry in &batch.entries {
                match entry.kind {
                    EventKind::Overflow => {
                        self.metrics.record_overflow();
                        trace!("Overflow reported for {}", dir.display());
                    }
                    EventKind::Create if self.recursive => {
                        let child = dir.join(&entry.name);
                        if is_directory(&child).await {
                            if let Err(e) = registrar::register_tree(
                                self.backend.as_ref(),
                                &mut self.registry,
                                &self.metrics,
                                &child,
                            )
                            .await
                            {
                                // The directory may already be gone again.
                                warn!("Failed to watch new directory {}: {e}", child.display());
                            }
                        }
                    }
                    _ => {}
                }
            }

            if !self.backend.is_handle_valid(batch.handle).await {
                debug!("Retiring watch on {}", dir.display());
                self.registry.forget(batch.handle);

                if self.registry.is_empty() {
                    debug!("Watched set exhausted, stopping");
                    break;
                }
            }

            self.metrics.record_batch_processed();
            self.notify_listeners();
        }

        info!("Stopped watching {}", self.root.display());
    }

    /// One notification pass over all listeners, in registration order.
    ///
    /// A panicking listener is logged and skipped so it cannot stop
    /// monitoring for the remaining listeners.
    fn notify_listeners(&mut self) {
        for listener in &mut self.listeners {
            if catch_unwind(AssertUnwindSafe(|| listener())).is_err() {
                error!("Listener panicked during change notification");
            }
        }
    }
}

impl<B: WatchBackend> fmt::Debug for DirWatcher<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirWatcher")
            .field("root", &self.root)
            .field("recursive", &self.recursive)
            .field("watched", &self.registry.len())
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

/// `true` when `path` is a directory, without following symlinks.
async fn is_directory(path: &Path) -> bool {
    tokio::fs::symlink_metadata(path)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{BatchEntry, EventBatch};
    use crate::{backend::WatchHandle, WatcherError};
    use std::collections::{HashMap, HashSet};
    use std::fs;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use tempfile::tempdir;
    use tokio::sync::{mpsc, Mutex};

    /// Backend whose batches are queued by the test instead of the OS.
    ///
    /// Registration succeeds for any path not marked as failing; validity is
    /// controlled explicitly via `invalidate`.
    struct ScriptedBackend {
        registered: StdMutex<HashMap<PathBuf, WatchHandle>>,
        invalid: StdMutex<HashSet<WatchHandle>>,
        fail_paths: StdMutex<HashSet<PathBuf>>,
        next: AtomicU64,
        tx: StdMutex<Option<mpsc::UnboundedSender<EventBatch>>>,
        rx: Mutex<mpsc::UnboundedReceiver<EventBatch>>,
    }

    impl ScriptedBackend {
        fn new() -> Arc<Self> {
            let (tx, rx) = mpsc::unbounded_channel();
            Arc::new(Self {
                registered: StdMutex::new(HashMap::new()),
                invalid: StdMutex::new(HashSet::new()),
                fail_paths: StdMutex::new(HashSet::new()),
                next: AtomicU64::new(0),
                tx: StdMutex::new(Some(tx)),
                rx: Mutex::new(rx),
            })
        }

        fn push(&self, handle: WatchHandle, entries: Vec<BatchEntry>) {
            let tx = self.tx.lock().unwrap();
            tx.as_ref()
                .expect("backend already closed")
                .send(EventBatch::new(handle, entries))
                .unwrap();
        }

        fn handle_for(&self, path: &Path) -> WatchHandle {
            *self
                .registered
                .lock()
                .unwrap()
                .get(path)
                .expect("path not registered")
        }

        fn invalidate(&self, handle: WatchHandle) {
            self.invalid.lock().unwrap().insert(handle);
        }

        fn fail_registration_for(&self, path: &Path) {
            self.fail_paths.lock().unwrap().insert(path.to_path_buf());
        }
    }

    #[async_trait::async_trait]
    impl WatchBackend for ScriptedBackend {
        async fn register(&self, dir: &Path) -> crate::Result<WatchHandle> {
            if self.fail_paths.lock().unwrap().contains(dir) {
                return Err(WatcherError::Register {
                    path: dir.to_path_buf(),
                    source: notify::Error::generic("watch table exhausted"),
                });
            }

            let handle = WatchHandle::from_raw(self.next.fetch_add(1, Ordering::Relaxed));
            self.registered
                .lock()
                .unwrap()
                .insert(dir.to_path_buf(), handle);
            Ok(handle)
        }

        async fn next_batch(&self) -> Option<EventBatch> {
            self.rx.lock().await.recv().await
        }

        async fn is_handle_valid(&self, handle: WatchHandle) -> bool {
            !self.invalid.lock().unwrap().contains(&handle)
        }

        async fn close(&self) {
            self.tx.lock().unwrap().take();
        }
    }

    #[tokio::test]
    async fn non_recursive_construction_registers_exactly_the_root() {
        let root = tempdir().unwrap();
        fs::create_dir(root.path().join("sub")).unwrap();

        let backend = ScriptedBackend::new();
        let watcher = DirWatcher::with_backend(backend, root.path(), false)
            .await
            .unwrap();

        assert_eq!(watcher.watched_count(), 1);
        assert!(!watcher.is_recursive());
        assert_eq!(watcher.root(), root.path());
    }

    #[tokio::test]
    async fn one_notification_pass_per_batch() {
        let root = tempdir().unwrap();
        let backend = ScriptedBackend::new();
        let mut watcher = DirWatcher::with_backend(Arc::clone(&backend), root.path(), false)
            .await
            .unwrap();

        let passes = Arc::new(AtomicUsize::new(0));
        watcher.add_listener({
            let passes = Arc::clone(&passes);
            move || {
                passes.fetch_add(1, Ordering::SeqCst);
            }
        });

        let handle = backend.handle_for(root.path());
        backend.push(
            handle,
            vec![
                BatchEntry::modify("a.txt"),
                BatchEntry::modify("b.txt"),
                BatchEntry::create("c.txt"),
            ],
        );
        backend.close().await;

        watcher.run().await;

        assert_eq!(passes.load(Ordering::SeqCst), 1);
        assert_eq!(watcher.watched_count(), 1);

        let metrics = watcher.metrics();
        assert_eq!(metrics.batches_processed.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.entries_seen.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn overflow_batch_notifies_without_registry_change() {
        let root = tempdir().unwrap();
        let backend = ScriptedBackend::new();
        let mut watcher = DirWatcher::with_backend(Arc::clone(&backend), root.path(), false)
            .await
            .unwrap();

        let passes = Arc::new(AtomicUsize::new(0));
        watcher.add_listener({
            let passes = Arc::clone(&passes);
            move || {
                passes.fetch_add(1, Ordering::SeqCst);
            }
        });

        backend.push(backend.handle_for(root.path()), vec![BatchEntry::overflow()]);
        backend.close().await;

        watcher.run().await;

        assert_eq!(passes.load(Ordering::SeqCst), 1);
        assert_eq!(watcher.watched_count(), 1);
        assert_eq!(watcher.metrics().overflow_events.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn stale_batch_is_discarded_without_notification() {
        let root = tempdir().unwrap();
        let backend = ScriptedBackend::new();
        let mut watcher = DirWatcher::with_backend(Arc::clone(&backend), root.path(), false)
            .await
            .unwrap();

        let passes = Arc::new(AtomicUsize::new(0));
        watcher.add_listener({
            let passes = Arc::clone(&passes);
            move || {
                passes.fetch_add(1, Ordering::SeqCst);
            }
        });

        backend.push(WatchHandle::from_raw(999), vec![BatchEntry::modify("x")]);
        backend.close().await;

        watcher.run().await;

        assert_eq!(passes.load(Ordering::SeqCst), 0);
        assert_eq!(watcher.metrics().stale_batches.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn created_subdirectory_is_registered_before_notification() {
        let root = tempdir().unwrap();
        let backend = ScriptedBackend::new();
        let mut watcher = DirWatcher::with_backend(Arc::clone(&backend), root.path(), true)
            .await
            .unwrap();
        assert_eq!(watcher.watched_count(), 1);

        // The new subtree exists on disk by the time its create event is
        // processed; the walk must pick up the nested directory too.
        fs::create_dir_all(root.path().join("sub/nested")).unwrap();

        let metrics = watcher.metrics();
        let seen_at_notify = Arc::new(StdMutex::new(Vec::new()));
        watcher.add_listener({
            let metrics = Arc::clone(&metrics);
            let seen_at_notify = Arc::clone(&seen_at_notify);
            move || {
                seen_at_notify
                    .lock()
                    .unwrap()
                    .push(metrics.directories_registered.load(Ordering::Relaxed));
            }
        });

        backend.push(
            backend.handle_for(root.path()),
            vec![BatchEntry::create("sub")],
        );
        backend.close().await;

        watcher.run().await;

        assert_eq!(watcher.watched_count(), 3);
        // Registration completed before the listener pass fired.
        assert_eq!(seen_at_notify.lock().unwrap().as_slice(), &[3]);
    }

    #[tokio::test]
    async fn created_file_does_not_trigger_registration() {
        let root = tempdir().unwrap();
        let backend = ScriptedBackend::new();
        let mut watcher = DirWatcher::with_backend(Arc::clone(&backend), root.path(), true)
            .await
            .unwrap();

        fs::write(root.path().join("plain.txt"), "x").unwrap();
        backend.push(
            backend.handle_for(root.path()),
            vec![BatchEntry::create("plain.txt")],
        );
        backend.close().await;

        watcher.run().await;

        assert_eq!(watcher.watched_count(), 1);
    }

    #[tokio::test]
    async fn loop_stops_when_last_watch_retires() {
        let root = tempdir().unwrap();
        let backend = ScriptedBackend::new();
        let mut watcher = DirWatcher::with_backend(Arc::clone(&backend), root.path(), false)
            .await
            .unwrap();

        let passes = Arc::new(AtomicUsize::new(0));
        watcher.add_listener({
            let passes = Arc::clone(&passes);
            move || {
                passes.fetch_add(1, Ordering::SeqCst);
            }
        });

        let handle = backend.handle_for(root.path());
        backend.invalidate(handle);
        // The backend stays open: exhaustion of the watched set alone must
        // end the loop.
        backend.push(handle, vec![BatchEntry::remove("a.txt")]);

        watcher.run().await;

        assert_eq!(watcher.watched_count(), 0);
        // No listener pass for the batch that emptied the watched set.
        assert_eq!(passes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn panicking_listener_does_not_stop_the_others() {
        let root = tempdir().unwrap();
        let backend = ScriptedBackend::new();
        let mut watcher = DirWatcher::with_backend(Arc::clone(&backend), root.path(), false)
            .await
            .unwrap();

        watcher.add_listener(|| panic!("misbehaving listener"));

        let passes = Arc::new(AtomicUsize::new(0));
        watcher.add_listener({
            let passes = Arc::clone(&passes);
            move || {
                passes.fetch_add(1, Ordering::SeqCst);
            }
        });

        let handle = backend.handle_for(root.path());
        backend.push(handle, vec![BatchEntry::modify("a.txt")]);
        backend.push(handle, vec![BatchEntry::modify("b.txt")]);
        backend.close().await;

        watcher.run().await;

        assert_eq!(passes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn root_registration_failure_surfaces() {
        let root = tempdir().unwrap();
        let backend = ScriptedBackend::new();
        backend.fail_registration_for(root.path());

        let err = DirWatcher::with_backend(backend, root.path(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, WatcherError::Register { .. }));
    }
}
