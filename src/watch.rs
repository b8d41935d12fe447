//! Directory watching for recursively enumerated folders.
//!
//! The reconciler tells a [`FolderWatcher`] which folders to add and remove. Several nodes may
//! enumerate the same folder, so [`FolderRegistry`] reference counts them and only the first
//! acquire and the last release reach the watcher. Change notifications travel the other way
//! and enter the tree as `ProjectTree::on_paths_changed`.
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    path::PathBuf,
};

use crate::tree::NodeId;

pub trait FolderWatcher: Send {
    fn watch_folders(&mut self, folders: &[PathBuf]);
    fn unwatch_folders(&mut self, folders: &[PathBuf]);
}

/// Watcher that ignores every request.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullFolderWatcher;

impl FolderWatcher for NullFolderWatcher {
    fn watch_folders(&mut self, _folders: &[PathBuf]) {}
    fn unwatch_folders(&mut self, _folders: &[PathBuf]) {}
}

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct FolderChanges {
    pub watch: Vec<PathBuf>,
    pub unwatch: Vec<PathBuf>,
}

impl FolderChanges {
    pub fn apply(&self, watcher: &mut dyn FolderWatcher) {
        if !self.watch.is_empty() {
            tracing::debug!("watching {} folder(s)", self.watch.len());
            watcher.watch_folders(&self.watch);
        }
        if !self.unwatch.is_empty() {
            tracing::debug!("unwatching {} folder(s)", self.unwatch.len());
            watcher.unwatch_folders(&self.unwatch);
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct FolderRegistry {
    counts: BTreeMap<PathBuf, usize>,
    by_node: HashMap<NodeId, BTreeSet<PathBuf>>,
}

impl FolderRegistry {
    /// Replace the folders held by `node`.
    pub fn update(&mut self, node: NodeId, folders: BTreeSet<PathBuf>) -> FolderChanges {
        let previous = self.by_node.remove(&node).unwrap_or_default();
        let mut changes = FolderChanges::default();
        for folder in folders.difference(&previous) {
            let count = self.counts.entry(folder.clone()).or_default();
            *count += 1;
            if *count == 1 {
                changes.watch.push(folder.clone());
            }
        }
        for folder in previous.difference(&folders) {
            if self.decrement(folder) {
                changes.unwatch.push(folder.clone());
            }
        }
        if !folders.is_empty() {
            self.by_node.insert(node, folders);
        }
        changes
    }

    pub fn release(&mut self, node: NodeId) -> FolderChanges {
        self.update(node, BTreeSet::new())
    }

    pub fn is_watched(&self, folder: &PathBuf) -> bool {
        self.counts.contains_key(folder)
    }

    fn decrement(&mut self, folder: &PathBuf) -> bool {
        match self.counts.get_mut(folder) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.counts.remove(folder);
                true
            }
            None => false,
        }
    }
}

#[cfg(feature = "service")]
pub use notify_watcher::NotifyFolderWatcher;

#[cfg(feature = "service")]
mod notify_watcher {
    use notify_debouncer_full::{
        new_debouncer,
        notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher},
        DebounceEventResult, Debouncer, FileIdMap,
    };
    use std::{
        path::{Path, PathBuf},
        time::Duration,
    };
    use tokio::sync::mpsc::UnboundedSender;

    use super::FolderWatcher;
    use crate::error::ProjectError;

    type FolderDebouncer = Debouncer<RecommendedWatcher, FileIdMap>;

    /// [`FolderWatcher`] backed by `notify`. Debounced change batches are sent as path lists
    /// on the channel given at construction.
    pub struct NotifyFolderWatcher {
        debouncer: FolderDebouncer,
        /// Recursively watched directories. Folders below them are already covered.
        roots: Vec<PathBuf>,
    }

    impl NotifyFolderWatcher {
        pub fn new(
            changes: UnboundedSender<Vec<PathBuf>>,
            timeout: Duration,
        ) -> Result<Self, ProjectError> {
            let debouncer = new_debouncer(timeout, None, move |result: DebounceEventResult| {
                match result {
                    Ok(events) => {
                        let mut paths: Vec<PathBuf> = Vec::new();
                        for event in events.iter() {
                            match event.event.kind {
                                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {
                                    paths.extend(
                                        event.paths.iter().filter(|p| !is_hidden(p)).cloned(),
                                    );
                                }
                                _ => {}
                            }
                        }
                        paths.sort();
                        paths.dedup();
                        if !paths.is_empty() {
                            tracing::debug!("[Debouncer] {} changed path(s)", paths.len());
                            if changes.send(paths).is_err() {
                                tracing::debug!("[Debouncer] receiver dropped");
                            }
                        }
                    }
                    Err(errors) => {
                        tracing::error!("Notify debouncer returned errors: {:?}", errors);
                    }
                }
            })?;
            Ok(NotifyFolderWatcher {
                debouncer,
                roots: Vec::new(),
            })
        }

        /// Watch the whole project directory, so edits to description files are noticed.
        pub fn watch_root(&mut self, root: &Path) -> Result<(), ProjectError> {
            self.debouncer
                .watcher()
                .watch(root, RecursiveMode::Recursive)?;
            self.roots.push(root.to_path_buf());
            Ok(())
        }
    }

    /// The folders of `folders` not already inside one of `roots`.
    fn outside_roots<'a>(roots: &[PathBuf], folders: &'a [PathBuf]) -> Vec<&'a PathBuf> {
        folders
            .iter()
            .filter(|folder| !roots.iter().any(|root| folder.starts_with(root)))
            .collect()
    }

    fn is_hidden(path: &Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with('.'))
    }

    impl FolderWatcher for NotifyFolderWatcher {
        fn watch_folders(&mut self, folders: &[PathBuf]) {
            for folder in outside_roots(&self.roots, folders) {
                if let Err(e) = self
                    .debouncer
                    .watcher()
                    .watch(folder, RecursiveMode::Recursive)
                {
                    tracing::warn!("could not watch {:?}: {}", folder, e);
                }
            }
        }

        fn unwatch_folders(&mut self, folders: &[PathBuf]) {
            // Unwatching a folder below a root would drop part of the root's watch.
            for folder in outside_roots(&self.roots, folders) {
                let unwatch_res = self.debouncer.watcher().unwatch(folder);
                tracing::debug!("Unwatch_res(path: {:?}) = {:?}", folder, unwatch_res);
            }
        }
    }

}
