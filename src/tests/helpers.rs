//! Shared test utilities for tree scheduling tests

use parking_lot::{Condvar, Mutex};
use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use crate::{
    evaluator::{EvalInput, EvalOutput, Evaluator, PassResult},
    fileset::{FileCategory, FileSetResult},
    variables::{Variable, VariableStore},
};

#[derive(Default)]
struct ScriptState {
    outputs: BTreeMap<PathBuf, EvalOutput>,
    closed: BTreeSet<PathBuf>,
    calls: BTreeMap<PathBuf, usize>,
    blocked: BTreeMap<PathBuf, usize>,
}

/// Evaluator returning scripted outputs per description file. Closing a path's gate makes
/// evaluations of that path block on the worker thread until it is opened again.
#[derive(Default)]
pub struct GatedEvaluator {
    state: Mutex<ScriptState>,
    gate: Condvar,
}

impl GatedEvaluator {
    pub fn new() -> Arc<Self> {
        Arc::new(GatedEvaluator::default())
    }

    pub fn set_output(&self, path: impl AsRef<Path>, output: EvalOutput) {
        self.state
            .lock()
            .outputs
            .insert(path.as_ref().to_path_buf(), output);
    }

    pub fn close(&self, path: impl AsRef<Path>) {
        self.state.lock().closed.insert(path.as_ref().to_path_buf());
    }

    pub fn open(&self, path: impl AsRef<Path>) {
        self.state.lock().closed.remove(path.as_ref());
        self.gate.notify_all();
    }

    pub fn open_all(&self) {
        self.state.lock().closed.clear();
        self.gate.notify_all();
    }

    pub fn calls(&self, path: impl AsRef<Path>) -> usize {
        self.state
            .lock()
            .calls
            .get(path.as_ref())
            .copied()
            .unwrap_or(0)
    }

    /// Block until `count` evaluations of `path` are waiting at the gate.
    pub fn wait_blocked(&self, path: impl AsRef<Path>, count: usize) {
        let mut state = self.state.lock();
        while state.blocked.get(path.as_ref()).copied().unwrap_or(0) < count {
            self.gate.wait_for(&mut state, Duration::from_millis(10));
        }
    }
}

impl Evaluator for GatedEvaluator {
    fn evaluate(&self, input: &EvalInput) -> EvalOutput {
        let mut state = self.state.lock();
        *state.calls.entry(input.path.clone()).or_default() += 1;
        if state.closed.contains(&input.path) {
            *state.blocked.entry(input.path.clone()).or_default() += 1;
            self.gate.notify_all();
            while state.closed.contains(&input.path) {
                self.gate.wait(&mut state);
            }
            if let Some(blocked) = state.blocked.get_mut(&input.path) {
                *blocked -= 1;
            }
        }
        state
            .outputs
            .get(&input.path)
            .cloned()
            .unwrap_or_else(|| EvalOutput::failed(format!("no script for {:?}", input.path)))
    }
}

/// Output of an `app` node whose both passes list `sources`.
pub fn app_output(sources: &[&str]) -> EvalOutput {
    pass_output("app", &[(FileCategory::Source, sources)], &[(FileCategory::Source, sources)])
}

/// Output of a `subdirs` node with the given exact and cumulative sub-projects.
pub fn subdirs_output(exact: &[&str], cumulative: &[&str]) -> EvalOutput {
    pass_output(
        "subdirs",
        &[(FileCategory::SubProject, exact)],
        &[(FileCategory::SubProject, cumulative)],
    )
}

pub fn pass_output(
    template: &str,
    exact: &[(FileCategory, &[&str])],
    cumulative: &[(FileCategory, &[&str])],
) -> EvalOutput {
    let pass = |files: &[(FileCategory, &[&str])]| {
        let mut set = FileSetResult::new();
        for (category, paths) in files {
            set.extend(*category, paths.iter().copied());
        }
        PassResult {
            variables: VariableStore::builder()
                .set(Variable::Template, [template])
                .build(),
            files: set,
            ..Default::default()
        }
    };
    EvalOutput {
        exact: pass(exact),
        cumulative: pass(cumulative),
        ..Default::default()
    }
}
