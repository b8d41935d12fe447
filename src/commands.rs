use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter},
    path::PathBuf,
};

use crate::{
    tree::{NodeId, TreeSnapshot, Urgency},
    writer::EditReport,
};

/// Command interface between a `ProjectHandle` and the task that owns the tree. Nodes are
/// addressed by their description file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Op {
    ScheduleUpdate {
        project: PathBuf,
        urgency: Urgency,
    },
    AddFiles {
        project: PathBuf,
        files: Vec<PathBuf>,
    },
    RemoveFiles {
        project: PathBuf,
        files: Vec<PathBuf>,
    },
    RenameFile {
        project: PathBuf,
        old: PathBuf,
        new: PathBuf,
    },
    SetVariable {
        project: PathBuf,
        variable: String,
        values: Vec<String>,
        scope: Option<String>,
    },
    AddSubProjects {
        project: PathBuf,
        sub_projects: Vec<PathBuf>,
    },
    RemoveSubProjects {
        project: PathBuf,
        sub_projects: Vec<PathBuf>,
    },
    /// Directory-watch callback.
    PathsChanged(Vec<PathBuf>),
    BuildSettingsChanged,
    /// Return a snapshot of the whole tree.
    Describe,
    /// Return the settled-generation channel of a node.
    Subscribe(PathBuf),
}

impl Op {
    /// The node this command addresses, if any.
    pub fn project(&self) -> Option<&PathBuf> {
        match self {
            Op::ScheduleUpdate { project, .. }
            | Op::AddFiles { project, .. }
            | Op::RemoveFiles { project, .. }
            | Op::RenameFile { project, .. }
            | Op::SetVariable { project, .. }
            | Op::AddSubProjects { project, .. }
            | Op::RemoveSubProjects { project, .. } => Some(project),
            Op::Subscribe(project) => Some(project),
            Op::PathsChanged(_) | Op::BuildSettingsChanged | Op::Describe => None,
        }
    }
}

impl Display for Op {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Op::ScheduleUpdate { project, urgency } => {
                write!(f, "ScheduleUpdate({}, {:?})", project.display(), urgency)
            }
            Op::AddFiles { project, files } => {
                write!(f, "AddFiles({}: {})", project.display(), join(files))
            }
            Op::RemoveFiles { project, files } => {
                write!(f, "RemoveFiles({}: {})", project.display(), join(files))
            }
            Op::RenameFile { project, old, new } => write!(
                f,
                "RenameFile({}: {} -> {})",
                project.display(),
                old.display(),
                new.display()
            ),
            Op::SetVariable {
                project,
                variable,
                values,
                scope,
            } => match scope {
                Some(scope) => write!(
                    f,
                    "SetVariable({}: {scope}:{variable} = {})",
                    project.display(),
                    values.join(" ")
                ),
                None => write!(
                    f,
                    "SetVariable({}: {variable} = {})",
                    project.display(),
                    values.join(" ")
                ),
            },
            Op::AddSubProjects {
                project,
                sub_projects,
            } => write!(
                f,
                "AddSubProjects({}: {})",
                project.display(),
                join(sub_projects)
            ),
            Op::RemoveSubProjects {
                project,
                sub_projects,
            } => write!(
                f,
                "RemoveSubProjects({}: {})",
                project.display(),
                join(sub_projects)
            ),
            Op::PathsChanged(paths) => write!(f, "PathsChanged({})", paths.len()),
            Op::BuildSettingsChanged => write!(f, "BuildSettingsChanged"),
            Op::Describe => write!(f, "Describe"),
            Op::Subscribe(project) => write!(f, "Subscribe({})", project.display()),
        }
    }
}

fn join(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<String>>()
        .join(", ")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OpResult {
    Ok,
    /// Nodes that received an update request.
    Scheduled(Vec<NodeId>),
    Edit(EditReport),
    Snapshot(TreeSnapshot),
    Subscribed { node: NodeId, settled: u64 },
}
