use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    path::{Path, PathBuf},
    sync::Arc,
};

use super::{
    recursive_enumerate, EvalDiagnostic, EvalInput, EvalOutput, Evaluator, InstallItem,
    InstallList, PassResult,
};
use crate::{
    fileset::{FileCategory, FileSetResult},
    paths::{normalize_against, sub_project_path},
    syntax::{DescriptionText, Operator, StatementKind},
    text::TextResource,
    variables::{Variable, VariableStore},
};

const MAX_INCLUDE_DEPTH: usize = 16;

static VAR_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\$(?:\{(?P<braced>[A-Za-z_][A-Za-z0-9_.]*)\}|(?P<bare>[A-Za-z_][A-Za-z0-9_.]*))")
        .expect("variable reference pattern is valid")
});

const FILE_VARIABLES: &[(&str, FileCategory)] = &[
    ("SOURCES", FileCategory::Source),
    ("OBJECTIVE_SOURCES", FileCategory::Source),
    ("HEADERS", FileCategory::Header),
    ("OBJECTIVE_HEADERS", FileCategory::Header),
    ("PRECOMPILED_HEADER", FileCategory::Header),
    ("FORMS", FileCategory::Form),
    ("RESOURCES", FileCategory::Resource),
    ("STATECHARTS", FileCategory::StateChart),
];

const DIST_VARIABLES: &[&str] = &["DISTFILES", "OTHER_FILES"];

/// Reference evaluator for the line-oriented subset described in [`crate::syntax`].
///
/// Reads the node's file and its includes through a [`TextResource`]. Each call builds its
/// own include cache, so concurrent jobs never share reader state.
pub struct LineEvaluator {
    text: Arc<dyn TextResource>,
}

impl LineEvaluator {
    pub fn new(text: Arc<dyn TextResource>) -> Self {
        LineEvaluator { text }
    }
}

impl Evaluator for LineEvaluator {
    fn evaluate(&self, input: &EvalInput) -> EvalOutput {
        let mut job = Job {
            input,
            reader: IncludeReader {
                text: self.text.as_ref(),
                cache: HashMap::new(),
            },
            diagnostics: Vec::new(),
            includes: BTreeSet::new(),
            missing: BTreeSet::new(),
        };

        let Some(root) = job.load(&input.path) else {
            return EvalOutput::failed(format!("cannot read {}", input.path.display()));
        };

        let exact = job.run_pass(&root, false);
        let mut cumulative = job.run_pass(&root, true);
        for item in cumulative.installs.items.iter_mut() {
            item.active = exact.installs.item(&item.name).is_some();
        }

        EvalOutput {
            exact,
            cumulative,
            includes: job.includes,
            diagnostics: job.diagnostics,
        }
    }
}

struct IncludeReader<'a> {
    text: &'a dyn TextResource,
    cache: HashMap<PathBuf, Option<Arc<DescriptionText>>>,
}

struct Job<'a> {
    input: &'a EvalInput,
    reader: IncludeReader<'a>,
    diagnostics: Vec<EvalDiagnostic>,
    includes: BTreeSet<PathBuf>,
    missing: BTreeSet<PathBuf>,
}

struct PassState {
    cumulative: bool,
    vars: BTreeMap<String, Vec<String>>,
}

impl PassState {
    fn values(&self, name: &str) -> &[String] {
        self.vars.get(name).map(|v| v.as_slice()).unwrap_or(&[])
    }

    fn first(&self, name: &str) -> Option<&str> {
        self.values(name).first().map(|s| s.as_str())
    }

    fn apply(&mut self, name: &str, op: Operator, values: Vec<String>) {
        let entry = self.vars.entry(name.to_string()).or_default();
        match (op, self.cumulative) {
            (Operator::Set, false) => *entry = values,
            (Operator::Append, _) => entry.extend(values),
            (Operator::Set, true) | (Operator::AppendUnique, _) => {
                for value in values {
                    if !entry.contains(&value) {
                        entry.push(value);
                    }
                }
            }
            (Operator::Remove, false) => entry.retain(|v| !values.contains(v)),
            (Operator::Remove, true) | (Operator::Replace, _) => {}
        }
    }
}

impl<'a> Job<'a> {
    fn load(&mut self, path: &Path) -> Option<Arc<DescriptionText>> {
        if let Some(cached) = self.reader.cache.get(path) {
            return cached.clone();
        }
        let loaded = match self.reader.text.read(path) {
            Ok(text) => {
                let parsed = DescriptionText::parse(&text);
                for error in parsed.errors() {
                    self.diagnostics.push(EvalDiagnostic::error_at(
                        error.message.clone(),
                        path,
                        error.line,
                    ));
                }
                Some(Arc::new(parsed))
            }
            Err(e) => {
                tracing::debug!("could not read {:?}: {}", path, e);
                None
            }
        };
        self.reader.cache.insert(path.to_path_buf(), loaded.clone());
        loaded
    }

    fn run_pass(&mut self, root: &DescriptionText, cumulative: bool) -> PassResult {
        let mut state = PassState {
            cumulative,
            vars: BTreeMap::new(),
        };
        let mut stack = vec![self.input.path.clone()];
        self.eval_text(root, &mut state, &mut stack);
        self.finish(state)
    }

    fn eval_text(&mut self, text: &DescriptionText, state: &mut PassState, stack: &mut Vec<PathBuf>) {
        let file_dir = stack
            .last()
            .and_then(|p| p.parent())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| self.input.project_dir.clone());

        for stmt in text.statements() {
            if !state.cumulative {
                let mut active = self.input.context.active_scopes();
                active.extend(state.values("CONFIG").iter().cloned());
                if !stmt.is_active(&active) {
                    continue;
                }
            }
            match &stmt.kind {
                StatementKind::Assignment(assignment) => {
                    let values = assignment
                        .values
                        .iter()
                        .flat_map(|t| self.expand(&t.value, state, &file_dir))
                        .collect();
                    state.apply(&assignment.variable, assignment.op, values);
                }
                StatementKind::Include { file } => {
                    let Some(raw) = self.expand(file, state, &file_dir).into_iter().next() else {
                        continue;
                    };
                    let path = normalize_against(&file_dir, Path::new(&raw));
                    if stack.contains(&path) || stack.len() > MAX_INCLUDE_DEPTH {
                        self.diagnostics.push(EvalDiagnostic::warning(format!(
                            "include cycle through {}",
                            path.display()
                        )));
                        continue;
                    }
                    self.includes.insert(path.clone());
                    match self.load(&path) {
                        Some(included) => {
                            stack.push(path);
                            self.eval_text(&included, state, stack);
                            stack.pop();
                        }
                        None => {
                            if self.missing.insert(path.clone()) {
                                self.diagnostics.push(EvalDiagnostic::warning(format!(
                                    "cannot read include file {}",
                                    path.display()
                                )));
                            }
                        }
                    }
                }
            }
        }
    }

    /// Expand `$$VAR`, `$${VAR}` and the built-in path variables. A token that is exactly
    /// one reference splices every value of the referenced variable.
    fn expand(&self, raw: &str, state: &PassState, file_dir: &Path) -> Vec<String> {
        if !raw.contains("$$") {
            return vec![raw.to_string()];
        }
        let lookup = |name: &str| -> Vec<String> {
            match name {
                "PWD" => vec![file_dir.display().to_string()],
                "_PRO_FILE_PWD_" => vec![self.input.project_dir.display().to_string()],
                "_PRO_FILE_" => vec![self.input.path.display().to_string()],
                "OUT_PWD" => vec![self.input.build_dir.display().to_string()],
                other => state.values(other).to_vec(),
            }
        };
        if let Some(caps) = VAR_REF.captures(raw) {
            if caps.get(0).is_some_and(|m| m.start() == 0 && m.end() == raw.len()) {
                return lookup(reference_name(&caps));
            }
        }
        let expanded = VAR_REF.replace_all(raw, |caps: &Captures| lookup(reference_name(caps)).join(" "));
        vec![expanded.into_owned()]
    }

    fn finish(&mut self, state: PassState) -> PassResult {
        let project_dir = self.input.project_dir.clone();
        let resolve = |value: &str| normalize_against(&project_dir, Path::new(value));

        let mut builder = VariableStore::builder();
        for var in Variable::ALL {
            if let Some(values) = state.vars.get(var.name()) {
                builder.insert(var, values.clone());
            }
        }
        if !state.vars.contains_key(Variable::Template.name()) {
            builder.insert(Variable::Template, vec!["app".to_string()]);
        }
        let variables = builder.build();

        let mut files = FileSetResult::new();
        for (name, category) in FILE_VARIABLES {
            files.extend(*category, state.values(name).iter().map(|v| resolve(v)));
        }
        for name in DIST_VARIABLES {
            for value in state.values(name) {
                let path = resolve(value);
                if path.is_dir() {
                    match recursive_enumerate(&path) {
                        Ok(found) => {
                            for file in found {
                                files.insert(dist_category(&file), file);
                            }
                            files.add_enumerated_folder(&path);
                        }
                        Err(e) => self.diagnostics.push(EvalDiagnostic::warning(format!(
                            "cannot enumerate {}: {e}",
                            path.display()
                        ))),
                    }
                } else {
                    files.insert(dist_category(&path), path);
                }
            }
        }

        if variables.single(Variable::Template) == Some("subdirs") {
            for value in state.values("SUBDIRS") {
                let sub_project = sub_project_path(value, &project_dir, |key| {
                    state.first(key).map(|v| v.to_string())
                });
                files.insert(FileCategory::SubProject, sub_project);
            }
        }

        let mut installs = InstallList::default();
        for name in state.values(Variable::Installs.name()) {
            let Some(path) = state.first(&format!("{name}.path")).map(resolve) else {
                continue;
            };
            let item_files: Vec<PathBuf> = state
                .values(&format!("{name}.files"))
                .iter()
                .map(|v| resolve(v))
                .collect();
            files.extend(FileCategory::Install, item_files.iter());
            if name == "target" {
                installs.target_path = Some(path.clone());
            }
            installs.items.push(InstallItem {
                name: name.clone(),
                path,
                files: item_files,
                active: true,
            });
        }

        PassResult {
            variables,
            files,
            installs,
        }
    }
}

fn reference_name<'c>(caps: &'c Captures) -> &'c str {
    caps.name("braced")
        .or_else(|| caps.name("bare"))
        .map(|m| m.as_str())
        .unwrap_or_default()
}

fn dist_category(path: &Path) -> FileCategory {
    match FileCategory::for_path(path) {
        FileCategory::Qml => FileCategory::Qml,
        _ => FileCategory::Other,
    }
}
