//! Access to the text of description files.
//!
//! The Writer is the only component that calls [`TextResource::write`]. Evaluators read
//! through the same trait so tests can run a whole tree against [`MemoryTextResource`].
use parking_lot::Mutex;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use crate::{error::ProjectError, paths::normalize};

pub trait TextResource: Send + Sync {
    fn read(&self, path: &Path) -> Result<String, ProjectError>;
    fn write(&self, path: &Path, text: &str) -> Result<(), ProjectError>;
    fn is_writable(&self, path: &Path) -> bool;
}

/// Description files on the local filesystem.
#[derive(Debug, Default, Clone)]
pub struct FsTextResource;

impl TextResource for FsTextResource {
    fn read(&self, path: &Path) -> Result<String, ProjectError> {
        tracing::trace!("Reading {:?}", path);
        Ok(fs::read_to_string(path)?)
    }

    fn write(&self, path: &Path, text: &str) -> Result<(), ProjectError> {
        tracing::debug!("Writing {:?}", path);
        Ok(fs::write(path, text)?)
    }

    fn is_writable(&self, path: &Path) -> bool {
        match fs::metadata(path) {
            Ok(meta) => meta.is_file() && !meta.permissions().readonly(),
            Err(_) => false,
        }
    }
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    text: String,
    writable: bool,
}

/// In-memory description files, keyed by normalized path.
#[derive(Debug, Default)]
pub struct MemoryTextResource {
    files: Mutex<BTreeMap<PathBuf, MemoryEntry>>,
}

impl MemoryTextResource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, path: impl AsRef<Path>, text: impl Into<String>) -> Self {
        self.insert(path, text);
        self
    }

    pub fn insert(&self, path: impl AsRef<Path>, text: impl Into<String>) {
        self.files.lock().insert(
            normalize(path.as_ref()),
            MemoryEntry {
                text: text.into(),
                writable: true,
            },
        );
    }

    pub fn set_writable(&self, path: impl AsRef<Path>, writable: bool) {
        if let Some(entry) = self.files.lock().get_mut(&normalize(path.as_ref())) {
            entry.writable = writable;
        }
    }

    pub fn remove(&self, path: impl AsRef<Path>) {
        self.files.lock().remove(&normalize(path.as_ref()));
    }

    pub fn contents(&self, path: impl AsRef<Path>) -> Option<String> {
        self.files
            .lock()
            .get(&normalize(path.as_ref()))
            .map(|e| e.text.clone())
    }
}

impl TextResource for MemoryTextResource {
    fn read(&self, path: &Path) -> Result<String, ProjectError> {
        self.files
            .lock()
            .get(&normalize(path))
            .map(|e| e.text.clone())
            .ok_or_else(|| ProjectError::NotFound(format!("{path:?}")))
    }

    fn write(&self, path: &Path, text: &str) -> Result<(), ProjectError> {
        let mut files = self.files.lock();
        match files.get_mut(&normalize(path)) {
            Some(entry) if entry.writable => {
                entry.text = text.to_string();
                Ok(())
            }
            Some(_) => Err(ProjectError::NotWritable(path.to_path_buf())),
            None => Err(ProjectError::NotFound(format!("{path:?}"))),
        }
    }

    fn is_writable(&self, path: &Path) -> bool {
        self.files
            .lock()
            .get(&normalize(path))
            .is_some_and(|e| e.writable)
    }
}
