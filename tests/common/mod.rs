//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use prosync_core::{
    config::TreeConfig,
    event::{ChannelObserver, TreeEvent},
    text::MemoryTextResource,
    tree::ProjectTree,
};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::mpsc::UnboundedReceiver;

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times, subsequent calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

#[allow(dead_code)]
pub fn test_config() -> TreeConfig {
    TreeConfig {
        coalesce_delay_ms: 10,
        max_workers: 4,
        write_back: true,
    }
}

/// In-memory project made of `(path, text)` pairs.
#[allow(dead_code)]
pub fn memory_project(files: &[(&str, &str)]) -> Arc<MemoryTextResource> {
    let text = MemoryTextResource::new();
    for (path, contents) in files {
        text.insert(path, *contents);
    }
    Arc::new(text)
}

/// Tree over `text` rooted at `root`, with an event stream.
#[allow(dead_code)]
pub fn observed_tree(
    text: Arc<MemoryTextResource>,
    root: &str,
) -> (ProjectTree, UnboundedReceiver<TreeEvent>) {
    let (observer, events) = ChannelObserver::new();
    let tree = ProjectTree::builder(root)
        .config(test_config())
        .text(text)
        .observer(Arc::new(observer))
        .build();
    (tree, events)
}

/// Everything currently queued on `events`.
#[allow(dead_code)]
pub fn drain(events: &mut UnboundedReceiver<TreeEvent>) -> Vec<TreeEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// Write `text` to `dir/rel`, creating parent directories, and return the full path.
#[allow(dead_code)]
pub fn write_file(dir: &Path, rel: &str, text: &str) -> PathBuf {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, text).unwrap();
    path
}
