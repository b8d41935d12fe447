//! Path helpers shared by the tree, the reconciler and the writer.
//!
//! File sets compare paths by their *normalized absolute* form. Normalization here is purely
//! lexical: `.` segments are dropped and `..` segments pop their parent, without touching the
//! filesystem, so paths that no longer (or do not yet) exist still compare correctly.
use std::path::{Component, Path, PathBuf};

use crate::error::ProjectError;

/// Lexically normalize `path`, resolving it against `base` when it is relative.
pub fn normalize_against(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize(path)
    } else {
        normalize(&base.join(path))
    }
}

/// Lexically normalize an absolute or relative path.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // Never pop past a root or prefix.
                let popped = match out.components().next_back() {
                    Some(Component::Normal(_)) => out.pop(),
                    _ => false,
                };
                if !popped && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonical identity of a description file: the resolved filesystem path when the file
/// exists, otherwise its lexical normalization.
pub fn canonical_identity(path: &Path) -> PathBuf {
    match path.canonicalize() {
        Ok(p) => p,
        Err(_) => normalize(path),
    }
}

/// Calculates `full` relative to the directory `base`, inserting `..` segments where the two
/// diverge. Both inputs are normalized first.
///
/// Returns an error when the two paths do not share a root (e.g. different drive prefixes).
pub fn relative_to(full: &Path, base: &Path) -> Result<PathBuf, ProjectError> {
    let full = normalize(full);
    let base = normalize(base);
    if full.has_root() != base.has_root() {
        return Err(ProjectError::NotFound(format!(
            "Path {full:?} is not relative to {base:?}"
        )));
    }
    let full_parts: Vec<Component> = full.components().collect();
    let base_parts: Vec<Component> = base.components().collect();
    if let (Some(Component::Prefix(a)), Some(Component::Prefix(b))) =
        (full_parts.first(), base_parts.first())
    {
        if a != b {
            return Err(ProjectError::NotFound(format!(
                "Path {full:?} is not relative to {base:?}"
            )));
        }
    }
    let common = full_parts
        .iter()
        .zip(base_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut out = PathBuf::new();
    for _ in common..base_parts.len() {
        out.push("..");
    }
    for part in &full_parts[common..] {
        out.push(part.as_os_str());
    }
    Ok(out)
}

/// Description file a `SUBDIRS` entry refers to.
///
/// The entry names either a description file or a directory holding `dir/dir.pro`.
/// `override_of` is asked for the first value of `<entry>.file` and `<entry>.subdir`, which
/// take precedence over the entry itself.
pub fn sub_project_path(
    entry: &str,
    dir: &Path,
    override_of: impl Fn(&str) -> Option<String>,
) -> PathBuf {
    if let Some(file) = override_of(&format!("{entry}.file")) {
        return normalize_against(dir, Path::new(&file));
    }
    let dir_value = override_of(&format!("{entry}.subdir")).unwrap_or_else(|| entry.to_string());
    let sub_dir = normalize_against(dir, Path::new(&dir_value));
    if sub_dir.extension().is_some_and(|e| e == "pro") {
        return sub_dir;
    }
    let stem = sub_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    sub_dir.join(format!("{stem}.pro"))
}

/// Render a path the way description files spell it: forward slashes only.
pub fn to_description_string(path: &Path) -> String {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::RootDir => parts.push(String::new()),
            other => parts.push(other.as_os_str().to_string_lossy().to_string()),
        }
    }
    if parts.len() == 1 && parts[0].is_empty() {
        return "/".to_string();
    }
    parts.join("/")
}
