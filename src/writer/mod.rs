//! Structural edits to description files.
//!
//! Every edit is checked against [`TextResource::is_writable`] before anything is read, is
//! applied to the text through the [`syntax`](crate::syntax) line model so unrelated lines
//! stay byte-identical, and is followed by an urgent re-evaluation of the node. Until that
//! evaluation settles the tree still shows the pre-edit state; edits submitted in the
//! meantime queue behind it and are applied one at a time as each settles. A queued edit
//! hands out an [`EditTicket`] that resolves with the report it eventually gets.
//!
//! Removals and renames also reach the include files (`.pri`) a node pulled in during its
//! last evaluation, so entries listed there can be edited like the node's own.
//!
//! [`TextResource::is_writable`]: crate::text::TextResource::is_writable
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{Display, Formatter},
    path::{Path, PathBuf},
};
use tokio::sync::oneshot;

use crate::{
    error::ProjectError,
    event::TreeEvent,
    fileset::FileCategory,
    paths::{normalize_against, relative_to, sub_project_path, to_description_string},
    syntax::DescriptionText,
    text::TextResource,
    tree::{NodeId, Pass, ProjectTree, Urgency},
};

/// A pending structural edit of one node's description file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Edit {
    SetVariable {
        variable: String,
        values: Vec<String>,
        scope: Option<String>,
    },
    AddFiles(Vec<PathBuf>),
    RemoveFiles(Vec<PathBuf>),
    RenameFile {
        old: PathBuf,
        new: PathBuf,
    },
    AddSubProjects(Vec<PathBuf>),
    RemoveSubProjects(Vec<PathBuf>),
}

impl Display for Edit {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Edit::SetVariable {
                variable, scope, ..
            } => match scope {
                Some(scope) => write!(f, "SetVariable({scope}:{variable})"),
                None => write!(f, "SetVariable({variable})"),
            },
            Edit::AddFiles(paths) => write!(f, "AddFiles({})", paths.len()),
            Edit::RemoveFiles(paths) => write!(f, "RemoveFiles({})", paths.len()),
            Edit::RenameFile { old, new } => {
                write!(f, "RenameFile({} -> {})", old.display(), new.display())
            }
            Edit::AddSubProjects(paths) => write!(f, "AddSubProjects({})", paths.len()),
            Edit::RemoveSubProjects(paths) => write!(f, "RemoveSubProjects({})", paths.len()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EditStatus {
    /// Text written; the node settles once generation `settles_at` has been evaluated.
    Written { settles_at: u64 },
    /// The edit would not change the text.
    Unchanged,
    /// `write_back` is off; nothing was written. `text` is the first file the edit would
    /// have changed.
    DryRun { text: String },
    /// Waiting behind `position` earlier edits of the same node.
    Queued { position: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditReport {
    pub status: EditStatus,
    /// For additions, paths already listed; for removals, paths that were not found.
    pub not_changed: Vec<PathBuf>,
}

impl EditReport {
    fn new(status: EditStatus) -> Self {
        EditReport {
            status,
            not_changed: Vec::new(),
        }
    }
}

/// What a queued edit ends up with once its turn comes.
pub type EditOutcome = Result<EditReport, ProjectError>;

/// Handed out for an edit that had to queue behind an unsettled one. Resolves with the
/// report the edit gets when it is applied, or with the error that stopped it.
#[derive(Debug)]
pub struct EditTicket(oneshot::Receiver<EditOutcome>);

impl EditTicket {
    pub async fn outcome(self) -> EditOutcome {
        match self.0.await {
            Ok(outcome) => outcome,
            Err(_) => Err(ProjectError::Service(
                "the tree was dropped before the edit was applied".to_string(),
            )),
        }
    }
}

#[derive(Debug)]
pub(crate) struct QueuedEdit {
    pub edit: Edit,
    pub ticket: oneshot::Sender<EditOutcome>,
}

impl QueuedEdit {
    pub fn resolve(self, outcome: EditOutcome) {
        if self.ticket.send(outcome).is_err() {
            tracing::trace!("nobody is waiting for {}", self.edit);
        }
    }
}

impl ProjectTree {
    pub fn set_variable(
        &mut self,
        id: NodeId,
        variable: &str,
        values: &[String],
        scope: Option<&str>,
    ) -> Result<EditReport, ProjectError> {
        self.submit_edit(
            id,
            Edit::SetVariable {
                variable: variable.to_string(),
                values: values.to_vec(),
                scope: scope.map(|s| s.to_string()),
            },
        )
    }

    pub fn add_files(&mut self, id: NodeId, paths: &[PathBuf]) -> Result<EditReport, ProjectError> {
        self.submit_edit(id, Edit::AddFiles(paths.to_vec()))
    }

    pub fn remove_files(
        &mut self,
        id: NodeId,
        paths: &[PathBuf],
    ) -> Result<EditReport, ProjectError> {
        self.submit_edit(id, Edit::RemoveFiles(paths.to_vec()))
    }

    pub fn rename_file(
        &mut self,
        id: NodeId,
        old: &Path,
        new: &Path,
    ) -> Result<EditReport, ProjectError> {
        self.submit_edit(
            id,
            Edit::RenameFile {
                old: old.to_path_buf(),
                new: new.to_path_buf(),
            },
        )
    }

    pub fn add_sub_projects(
        &mut self,
        id: NodeId,
        paths: &[PathBuf],
    ) -> Result<EditReport, ProjectError> {
        self.submit_edit(id, Edit::AddSubProjects(paths.to_vec()))
    }

    pub fn remove_sub_projects(
        &mut self,
        id: NodeId,
        paths: &[PathBuf],
    ) -> Result<EditReport, ProjectError> {
        self.submit_edit(id, Edit::RemoveSubProjects(paths.to_vec()))
    }

    pub fn submit_edit(&mut self, id: NodeId, edit: Edit) -> Result<EditReport, ProjectError> {
        self.submit_edit_tracked(id, edit).map(|(report, _)| report)
    }

    /// Like [`submit_edit`](Self::submit_edit), also returning a ticket when the edit was
    /// queued.
    pub fn submit_edit_tracked(
        &mut self,
        id: NodeId,
        edit: Edit,
    ) -> Result<(EditReport, Option<EditTicket>), ProjectError> {
        let node = self.require(id)?;
        if !self.text.is_writable(&node.path) {
            return Err(ProjectError::NotWritable(node.path.clone()));
        }
        if node.write_barrier.is_some() {
            tracing::debug!("queueing {edit} for {:?} behind an unsettled edit", node.path);
            let position = node.edits.len();
            let (ticket, receiver) = oneshot::channel();
            if let Some(node) = self.nodes.get_mut(id) {
                node.edits.push_back(QueuedEdit { edit, ticket });
            }
            return Ok((
                EditReport::new(EditStatus::Queued { position }),
                Some(EditTicket(receiver)),
            ));
        }
        self.apply_edit(id, &edit).map(|report| (report, None))
    }

    /// Apply queued edits of `id` until one of them raises a new barrier.
    pub(crate) fn release_queued_edits(&mut self, id: NodeId) {
        loop {
            let Some(node) = self.nodes.get_mut(id) else {
                return;
            };
            if node.write_barrier.is_some() {
                return;
            }
            let Some(queued) = node.edits.pop_front() else {
                return;
            };
            let path = node.path.clone();
            let outcome = if self.text.is_writable(&path) {
                self.apply_edit(id, &queued.edit)
            } else {
                Err(ProjectError::NotWritable(path.clone()))
            };
            if let Err(error) = &outcome {
                tracing::warn!("queued {} for {:?} failed: {error}", queued.edit, path);
                self.dispatch(vec![TreeEvent::EditFailed {
                    node: id,
                    path,
                    error: error.clone(),
                }]);
            }
            queued.resolve(outcome);
        }
    }

    #[tracing::instrument(skip_all, fields(node = %id, edit = %edit))]
    fn apply_edit(&mut self, id: NodeId, edit: &Edit) -> Result<EditReport, ProjectError> {
        let node = self.require(id)?;
        let path = node.path.clone();
        let dir = node.dir.clone();
        let state = node.state();

        let mut documents = vec![Document::load(self.text.as_ref(), &path, &dir)?];
        if matches!(edit, Edit::RemoveFiles(_) | Edit::RenameFile { .. }) {
            for include in &state.includes {
                match Document::load(self.text.as_ref(), include, &dir) {
                    Ok(document) => documents.push(document),
                    Err(e) => tracing::debug!("skipping include {:?}: {e}", include),
                }
            }
        }
        let mut not_changed = Vec::new();

        match edit {
            Edit::SetVariable {
                variable,
                values,
                scope,
            } => documents[0].text.set_values(variable, values, scope.as_deref()),
            Edit::AddFiles(paths) => {
                let main = &mut documents[0];
                let listed = main.listed_files();
                let mut by_variable: BTreeMap<&'static str, Vec<String>> = BTreeMap::new();
                for file in unique(paths.iter().map(|p| normalize_against(&dir, p))) {
                    let category = FileCategory::for_path(&file);
                    let variable = match category.variable_for_adding() {
                        Some(variable)
                            if !listed.contains(&file)
                                && !state.cumulative.files.contains_any(&file) =>
                        {
                            variable
                        }
                        _ => {
                            not_changed.push(file);
                            continue;
                        }
                    };
                    by_variable
                        .entry(variable)
                        .or_default()
                        .push(main.spell(&file)?);
                }
                for (variable, values) in by_variable {
                    main.text.append_values(variable, &values, None);
                }
            }
            Edit::RemoveFiles(paths) => {
                let mut remaining = unique(paths.iter().map(|p| normalize_against(&dir, p)));
                for document in documents.iter_mut() {
                    if remaining.is_empty() {
                        break;
                    }
                    let removed = document.remove_files(&remaining);
                    remaining.retain(|t| !removed.contains(t));
                }
                not_changed = remaining;
            }
            Edit::RenameFile { old, new } => {
                let old = normalize_against(&dir, old);
                let new = normalize_against(&dir, new);
                let mut renamed = false;
                for document in documents.iter_mut() {
                    if document.rename_file(&old, &new)? {
                        renamed = true;
                        break;
                    }
                }
                if !renamed {
                    return Err(ProjectError::NotFound(format!(
                        "{} is not listed in {} or its includes",
                        old.display(),
                        path.display()
                    )));
                }
            }
            Edit::AddSubProjects(paths) => {
                let main = &mut documents[0];
                let mut existing: BTreeSet<PathBuf> = main.sub_projects().into_values().collect();
                existing.extend(state.cumulative.files.get(FileCategory::SubProject).iter().cloned());
                let mut values = Vec::new();
                for sub in unique(paths.iter().map(|p| normalize_against(&dir, p))) {
                    if existing.contains(&sub) {
                        not_changed.push(sub);
                    } else {
                        values.push(main.spell(&sub)?);
                    }
                }
                main.text.append_values("SUBDIRS", &values, None);
            }
            Edit::RemoveSubProjects(paths) => {
                let targets = unique(paths.iter().map(|p| normalize_against(&dir, p)));
                let removed = documents[0].remove_sub_projects(&targets);
                not_changed.extend(targets.into_iter().filter(|t| !removed.contains(t)));
            }
        }

        let changed: Vec<&Document> = documents.iter().filter(|d| d.is_changed()).collect();
        let Some(first) = changed.first() else {
            return Ok(EditReport {
                status: EditStatus::Unchanged,
                not_changed,
            });
        };
        if !self.config.write_back {
            return Ok(EditReport {
                status: EditStatus::DryRun {
                    text: first.text.render(),
                },
                not_changed,
            });
        }
        if let Some(locked) = changed.iter().find(|d| !self.text.is_writable(&d.path)) {
            return Err(ProjectError::NotWritable(locked.path.clone()));
        }
        for document in &changed {
            self.text.write(&document.path, &document.text.render())?;
        }
        let includes: Vec<PathBuf> = changed
            .iter()
            .filter(|d| d.path != path)
            .map(|d| d.path.clone())
            .collect();

        let Some(node) = self.nodes.get_mut(id) else {
            return Err(ProjectError::NotFound(format!("node {id}")));
        };
        // The next launch evaluates the written text.
        let settles_at = node.generation + 1;
        node.write_barrier = Some(settles_at);
        tracing::debug!("wrote {:?}, settles at generation {settles_at}", path);
        self.schedule_update(id, Urgency::Now);
        self.schedule_includers(id, &includes);
        Ok(EditReport {
            status: EditStatus::Written { settles_at },
            not_changed,
        })
    }

    /// Re-evaluate every other node that pulls in one of `includes`.
    fn schedule_includers(&mut self, id: NodeId, includes: &[PathBuf]) {
        if includes.is_empty() {
            return;
        }
        let includers: Vec<NodeId> = self
            .walk(self.root)
            .into_iter()
            .filter(|other| {
                *other != id
                    && self
                        .nodes
                        .get(*other)
                        .is_some_and(|n| includes.iter().any(|p| n.state.includes.contains(p)))
            })
            .collect();
        for other in includers {
            self.schedule_update(other, Urgency::Now);
        }
    }

    /// Whether `id` lists `path` in `pass`.
    pub fn lists_file(&self, id: NodeId, pass: Pass, path: &Path) -> bool {
        self.node(id).is_some_and(|n| {
            let path = normalize_against(&n.dir, path);
            n.files(pass).contains_any(&path)
        })
    }
}

/// One file an edit works on: the node's own description file or one of its includes.
struct Document {
    path: PathBuf,
    /// What `$$PWD` expands to inside this file.
    pwd: PathBuf,
    /// Plain relative values resolve against the node's directory, whichever file lists them.
    project_dir: PathBuf,
    original: String,
    text: DescriptionText,
}

impl Document {
    fn load(
        resource: &dyn TextResource,
        path: &Path,
        project_dir: &Path,
    ) -> Result<Document, ProjectError> {
        let original = resource.read(path)?;
        Ok(Document {
            path: path.to_path_buf(),
            pwd: path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| project_dir.to_path_buf()),
            project_dir: project_dir.to_path_buf(),
            text: DescriptionText::parse(&original),
            original,
        })
    }

    fn is_changed(&self) -> bool {
        self.text.render() != self.original
    }

    /// Spelling of `path` inside this file.
    fn spell(&self, path: &Path) -> Result<String, ProjectError> {
        if self.pwd == self.project_dir {
            description_value(path, &self.project_dir)
        } else {
            Ok(format!("$$PWD/{}", description_value(path, &self.pwd)?))
        }
    }

    /// Every file the adding assignments of this file list.
    fn listed_files(&self) -> BTreeSet<PathBuf> {
        let variables = FileCategory::variables_for_removing();
        self.text
            .statements()
            .iter()
            .filter_map(|stmt| stmt.assignment())
            .filter(|a| a.op.adds_values() && variables.contains(&a.variable.as_str()))
            .flat_map(|a| a.values.iter())
            .map(|token| resolve_value(&token.value, &self.pwd, &self.project_dir))
            .collect()
    }

    /// Remove `targets` wherever this file lists them. Returns the ones it listed.
    fn remove_files(&mut self, targets: &[PathBuf]) -> Vec<PathBuf> {
        let (pwd, project_dir) = (&self.pwd, &self.project_dir);
        let removed = self
            .text
            .remove_values(FileCategory::variables_for_removing(), |value| {
                targets.contains(&resolve_value(value, pwd, project_dir))
            });
        removed
            .iter()
            .map(|value| resolve_value(value, pwd, project_dir))
            .collect()
    }

    fn rename_file(&mut self, old: &Path, new: &Path) -> Result<bool, ProjectError> {
        let replacement = self.spell(new)?;
        let (pwd, project_dir) = (&self.pwd, &self.project_dir);
        Ok(self.text.rename_value(
            FileCategory::variables_for_removing(),
            |value| resolve_value(value, pwd, project_dir).as_path() == old,
            &replacement,
        ))
    }

    /// Raw `SUBDIRS` entries of this file and the description files they name.
    fn sub_projects(&self) -> BTreeMap<String, PathBuf> {
        self.text
            .assignments("SUBDIRS")
            .filter(|(_, a)| a.op.adds_values())
            .flat_map(|(_, a)| a.values.iter())
            .map(|token| {
                let entry = strip_pwd(&token.value);
                let path = sub_project_path(entry, &self.project_dir, |key| self.first_value(key));
                (token.value.clone(), path)
            })
            .collect()
    }

    /// First value of the last assignment to `variable`.
    fn first_value(&self, variable: &str) -> Option<String> {
        self.text
            .assignments(variable)
            .filter(|(_, a)| a.op.adds_values())
            .last()
            .and_then(|(_, a)| a.values.first())
            .map(|token| strip_pwd(&token.value).to_string())
    }

    /// Remove the `SUBDIRS` entries naming one of `targets`, together with their `.file` and
    /// `.subdir` overrides. Returns the targets that were listed.
    fn remove_sub_projects(&mut self, targets: &[PathBuf]) -> Vec<PathBuf> {
        let entries = self.sub_projects();
        let removed = self.text.remove_values(&["SUBDIRS"], |value| {
            entries.get(value).is_some_and(|p| targets.contains(p))
        });
        for entry in &removed {
            let entry = strip_pwd(entry);
            let keys = [format!("{entry}.file"), format!("{entry}.subdir")];
            let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
            self.text.remove_values(&keys, |_| true);
        }
        removed
            .iter()
            .filter_map(|value| entries.get(value).cloned())
            .collect()
    }
}

/// Spelling of `path` relative to `dir`.
fn description_value(path: &Path, dir: &Path) -> Result<String, ProjectError> {
    Ok(to_description_string(&relative_to(path, dir)?))
}

fn strip_pwd(value: &str) -> &str {
    value
        .strip_prefix("$$PWD/")
        .or_else(|| value.strip_prefix("$$_PRO_FILE_PWD_/"))
        .unwrap_or(value)
}

/// Absolute path a written value refers to. `$$PWD` is the directory of the file holding the
/// value; everything else is relative to the node.
fn resolve_value(value: &str, pwd: &Path, project_dir: &Path) -> PathBuf {
    if let Some(rest) = value.strip_prefix("$$PWD/") {
        return normalize_against(pwd, Path::new(rest));
    }
    let rest = value.strip_prefix("$$_PRO_FILE_PWD_/").unwrap_or(value);
    normalize_against(project_dir, Path::new(rest))
}

fn unique(paths: impl Iterator<Item = PathBuf>) -> Vec<PathBuf> {
    let mut seen = BTreeSet::new();
    paths.filter(|p| seen.insert(p.clone())).collect()
}
