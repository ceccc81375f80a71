//! Recursive directory-change watcher.
//!
//! Watches a root directory, and in recursive mode every present and future
//! subdirectory, for create/modify/remove events, and notifies registered
//! listeners once per processed event batch.
//!
//! ## Architecture
//!
//! - [`DirWatcher`]: owns the watched-directory registry and the listener
//!   list, and drives the event-processing loop
//! - [`backend::WatchBackend`]: seam to the OS-level notification mechanism
//! - [`backend::NotifyBackend`]: production backend over the `notify` crate,
//!   one non-recursive watch per registered directory
//!
//! Listeners receive no per-file detail: they learn only that some batch of
//! changes was processed for some watched directory. Callers that need
//! per-entry payloads are not served by this interface.
//!
//! ```no_run
//! use dir_watcher::DirWatcher;
//!
//! #[tokio::main]
//! async fn main() -> dir_watcher::Result<()> {
//!     let mut watcher = DirWatcher::new("./data", true).await?;
//!     watcher.add_listener(|| println!("something changed"));
//!     watcher.run().await;
//!     Ok(())
//! }
//! ```

pub mod backend;
mod error;
mod event;
mod metrics;
mod registrar;
mod registry;
mod watcher;

pub use error::WatcherError;
pub use event::{BatchEntry, EventBatch, EventKind};
pub use metrics::WatcherMetrics;
pub use watcher::DirWatcher;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, WatcherError>;
