//! Pre-order subtree registration.

use crate::backend::WatchBackend;
use crate::metrics::WatcherMetrics;
use crate::registry::WatchRegistry;
use crate::Result;
use std::path::Path;
use tracing::{trace, warn};
use walkdir::WalkDir;

/// Register a single directory without descending into it.
///
/// Already-watched directories are skipped, so repeat invocations are safe.
pub(crate) async fn register_dir<B: WatchBackend>(
    backend: &B,
    registry: &mut WatchRegistry,
    metrics: &WatcherMetrics,
    dir: &Path,
) -> Result<()> {
    if registry.is_watched(dir) {
        return Ok(());
    }

    let handle = backend.register(dir).await?;
    registry.insert(handle, dir.to_path_buf());
    metrics.record_registration();
    trace!("Watching {}", dir.display());
    Ok(())
}

/// Register `root` and every directory below it, in pre-order.
///
/// Symbolic links are not descended into. A directory that vanishes or fails
/// to register mid-walk is logged and skipped; the call fails only when the
/// root itself cannot be registered. Each invocation is independent and
/// side-effect-tolerant, so the same walk serves both construction and the
/// reactive registration of directories created at runtime.
pub(crate) async fn register_tree<B: WatchBackend>(
    backend: &B,
    registry: &mut WatchRegistry,
    metrics: &WatcherMetrics,
    root: &Path,
) -> Result<()> {
    register_dir(backend, registry, metrics, root).await?;

    for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {e}", root.display());
                continue;
            }
        };

        if !entry.file_type().is_dir() {
            continue;
        }

        let dir = entry.path();
        if registry.is_watched(dir) {
            continue;
        }

        match backend.register(dir).await {
            Ok(handle) => {
                registry.insert(handle, dir.to_path_buf());
                metrics.record_registration();
                trace!("Watching {}", dir.display());
            }
            // Directories may disappear between discovery and registration.
            Err(e) => warn!("Skipping {}: {e}", dir.display()),
        }
    }

    Ok(())
}
