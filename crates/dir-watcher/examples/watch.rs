//! Watch a directory tree and report each processed change batch.
//!
//! Usage: `cargo run --example watch -- <dir>`

use dir_watcher::DirWatcher;
use std::env;
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let root = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut watcher = DirWatcher::new(&root, true).await?;
    println!(
        "Watching {} ({} directories)",
        root.display(),
        watcher.watched_count()
    );

    let mut batches = 0u64;
    watcher.add_listener(move || {
        batches += 1;
        println!("Change batch #{batches} processed");
    });

    watcher.run().await;
    watcher.metrics().log_metrics();
    Ok(())
}
