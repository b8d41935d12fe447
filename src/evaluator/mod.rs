//! The evaluation seam between the tree and whatever understands description files.
//!
//! An [`Evaluator`] turns one description file into two [`PassResult`]s: the *exact* pass,
//! which honours the active scopes and feeds build purposes, and the *cumulative* pass, which
//! takes every branch and feeds editing and navigation. Evaluators run on the blocking pool,
//! receive an owned [`EvalInput`] and must keep any caches local to the call.
//!
//! [`LineEvaluator`] is a small reference implementation over the [`syntax`](crate::syntax)
//! model, used by the CLI and the tests.
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};
use walkdir::WalkDir;

use crate::{
    config::BuildContext, error::ProjectError, fileset::FileSetResult, variables::VariableStore,
};

pub mod diagnostic;
mod line;

pub use diagnostic::{has_fatal, EvalDiagnostic, SourceLocation};
pub use line::LineEvaluator;

/// Everything a job needs, captured at launch time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalInput {
    /// Canonical path of the description file.
    pub path: PathBuf,
    pub project_dir: PathBuf,
    /// Where this node builds, after shadow-build mapping.
    pub build_dir: PathBuf,
    /// Files the previous accepted evaluation pulled in through `include()`.
    pub includes: BTreeSet<PathBuf>,
    pub context: BuildContext,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InstallItem {
    pub name: String,
    pub path: PathBuf,
    pub files: Vec<PathBuf>,
    /// False for rules that only exist in inactive scopes.
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InstallList {
    /// Install path of the build target itself (`target.path`).
    pub target_path: Option<PathBuf>,
    pub items: Vec<InstallItem>,
}

impl InstallList {
    pub fn is_empty(&self) -> bool {
        self.target_path.is_none() && self.items.is_empty()
    }

    pub fn item(&self, name: &str) -> Option<&InstallItem> {
        self.items.iter().find(|i| i.name == name)
    }
}

/// Result of one pass over a description file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PassResult {
    pub variables: VariableStore,
    pub files: FileSetResult,
    pub installs: InstallList,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EvalOutput {
    pub exact: PassResult,
    pub cumulative: PassResult,
    /// Files read through `include()` in any branch.
    pub includes: BTreeSet<PathBuf>,
    pub diagnostics: Vec<EvalDiagnostic>,
}

impl EvalOutput {
    /// An output carrying nothing but a fatal diagnostic.
    pub fn failed(message: impl Into<String>) -> Self {
        EvalOutput {
            diagnostics: vec![EvalDiagnostic::error(message)],
            ..Default::default()
        }
    }

    pub fn is_fatal(&self) -> bool {
        has_fatal(&self.diagnostics)
    }
}

pub trait Evaluator: Send + Sync + 'static {
    fn evaluate(&self, input: &EvalInput) -> EvalOutput;
}

impl<F> Evaluator for F
where
    F: Fn(&EvalInput) -> EvalOutput + Send + Sync + 'static,
{
    fn evaluate(&self, input: &EvalInput) -> EvalOutput {
        self(input)
    }
}

/// Every regular file below `folder`, sorted by path.
pub fn recursive_enumerate(folder: &Path) -> Result<Vec<PathBuf>, ProjectError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(folder).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}
