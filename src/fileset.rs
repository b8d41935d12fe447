//! Per-pass file membership produced by one evaluation.
//!
//! A [`FileSetResult`] maps each [`FileCategory`] to a set of normalized absolute paths. Only
//! membership matters: insertion order is irrelevant and duplicates cannot exist. The
//! reconciler compares two results category by category with [`FileSetResult::diff`] and
//! reports the resulting [`FileSetDelta`]s; replacing the whole set is never an observable
//! event on its own.
use enumset::{EnumSet, EnumSetType};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{Display, Formatter},
    path::{Path, PathBuf},
};

use crate::paths::normalize;

/// Classification of tracked paths within a node.
#[derive(Debug, Serialize, Deserialize, PartialOrd, Ord, Hash, EnumSetType)]
#[enumset(repr = "u32")]
pub enum FileCategory {
    Header,
    Source,
    Form,
    StateChart,
    Resource,
    Qml,
    Other,
    /// Sub-description files; drives child node creation.
    SubProject,
    /// Files referenced by install rules.
    Install,
}

impl FileCategory {
    pub fn all() -> EnumSet<FileCategory> {
        EnumSet::all()
    }

    /// Category a new file is filed under when it is added through the writer.
    pub fn for_path(path: &Path) -> FileCategory {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "h" | "hh" | "hpp" | "hxx" | "h++" => FileCategory::Header,
            "c" | "cc" | "cpp" | "cxx" | "c++" | "m" | "mm" => FileCategory::Source,
            "ui" => FileCategory::Form,
            "scxml" => FileCategory::StateChart,
            "qrc" => FileCategory::Resource,
            "qml" | "js" => FileCategory::Qml,
            "pro" => FileCategory::SubProject,
            _ => FileCategory::Other,
        }
    }

    /// Description-file variable that new entries of this category are appended to.
    pub fn variable_for_adding(&self) -> Option<&'static str> {
        match self {
            FileCategory::Header => Some("HEADERS"),
            FileCategory::Source => Some("SOURCES"),
            FileCategory::Form => Some("FORMS"),
            FileCategory::StateChart => Some("STATECHARTS"),
            FileCategory::Resource => Some("RESOURCES"),
            FileCategory::Qml | FileCategory::Other => Some("DISTFILES"),
            FileCategory::SubProject => Some("SUBDIRS"),
            FileCategory::Install => None,
        }
    }

    /// Every variable an entry may be removed from, regardless of category.
    pub fn variables_for_removing() -> &'static [&'static str] {
        &[
            "HEADERS",
            "OBJECTIVE_HEADERS",
            "PRECOMPILED_HEADER",
            "SOURCES",
            "OBJECTIVE_SOURCES",
            "FORMS",
            "STATECHARTS",
            "RESOURCES",
            "DISTFILES",
            "OTHER_FILES",
            "SUBDIRS",
        ]
    }
}

impl Display for FileCategory {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let name = match self {
            FileCategory::Header => "header",
            FileCategory::Source => "source",
            FileCategory::Form => "form",
            FileCategory::StateChart => "statechart",
            FileCategory::Resource => "resource",
            FileCategory::Qml => "qml",
            FileCategory::Other => "other",
            FileCategory::SubProject => "subproject",
            FileCategory::Install => "install",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSetResult {
    files: BTreeMap<FileCategory, BTreeSet<PathBuf>>,
    /// Folders whose content was enumerated recursively to produce some of the entries
    /// above. Kept in sync with the directory-watch collaborator.
    enumerated_folders: BTreeSet<PathBuf>,
}

impl FileSetResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a path, normalizing it first. Returns false if it was already present.
    pub fn insert(&mut self, category: FileCategory, path: impl AsRef<Path>) -> bool {
        self.files
            .entry(category)
            .or_default()
            .insert(normalize(path.as_ref()))
    }

    pub fn extend<I, P>(&mut self, category: FileCategory, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        for path in paths {
            self.insert(category, path);
        }
    }

    pub fn add_enumerated_folder(&mut self, folder: impl AsRef<Path>) {
        self.enumerated_folders.insert(normalize(folder.as_ref()));
    }

    pub fn enumerated_folders(&self) -> &BTreeSet<PathBuf> {
        &self.enumerated_folders
    }

    /// Paths of one category. Empty for categories the evaluation did not report.
    pub fn get(&self, category: FileCategory) -> &BTreeSet<PathBuf> {
        static EMPTY: BTreeSet<PathBuf> = BTreeSet::new();
        self.files.get(&category).unwrap_or(&EMPTY)
    }

    pub fn contains(&self, category: FileCategory, path: &Path) -> bool {
        self.get(category).contains(&normalize(path))
    }

    /// Category (if any) that lists `path`.
    pub fn category_of(&self, path: &Path) -> Option<FileCategory> {
        let path = normalize(path);
        self.files
            .iter()
            .find(|(_, set)| set.contains(&path))
            .map(|(category, _)| *category)
    }

    pub fn contains_any(&self, path: &Path) -> bool {
        self.category_of(path).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.files.values().all(|set| set.is_empty())
    }

    pub fn len(&self) -> usize {
        self.files.values().map(|set| set.len()).sum()
    }

    /// Iterate all non-empty categories.
    pub fn iter(&self) -> impl Iterator<Item = (FileCategory, &BTreeSet<PathBuf>)> {
        self.files
            .iter()
            .filter(|(_, set)| !set.is_empty())
            .map(|(category, set)| (*category, set))
    }

    /// Membership delta of one category when moving from `old` to `new`.
    pub fn diff(old: &FileSetResult, new: &FileSetResult, category: FileCategory) -> FileSetDelta {
        let old_set = old.get(category);
        let new_set = new.get(category);
        FileSetDelta {
            category,
            added: new_set.difference(old_set).cloned().collect(),
            removed: old_set.difference(new_set).cloned().collect(),
        }
    }

    /// Non-empty deltas for every category, in category order.
    pub fn diff_all(old: &FileSetResult, new: &FileSetResult) -> Vec<FileSetDelta> {
        FileCategory::all()
            .iter()
            .map(|category| FileSetResult::diff(old, new, category))
            .filter(|delta| !delta.is_empty())
            .collect()
    }

    /// Categories whose membership differs between the two results.
    pub fn changed_categories(&self, other: &FileSetResult) -> EnumSet<FileCategory> {
        FileCategory::all()
            .iter()
            .filter(|category| self.get(*category) != other.get(*category))
            .collect()
    }
}

/// Minimal membership change of one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSetDelta {
    pub category: FileCategory,
    pub added: BTreeSet<PathBuf>,
    pub removed: BTreeSet<PathBuf>,
}

impl FileSetDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}
