use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    sync::Arc,
};

use super::{
    AggregateDetails, BuildPaths, CompletionOutcome, LeafDetails, NodeId, NodeKind, NodeState,
    ParseState, Pass, ProjectNode, ProjectTree, TargetInfo, Urgency,
};
use crate::{
    error::ProjectError,
    evaluator::{EvalDiagnostic, EvalOutput},
    event::TreeEvent,
    fileset::{FileCategory, FileSetResult},
    variables::{ProjectType, Variable},
};

impl ProjectTree {
    /// Merge an accepted evaluation into node `id`.
    #[tracing::instrument(skip_all, fields(node = %id, generation = generation))]
    pub(crate) fn apply_evaluation(
        &mut self,
        id: NodeId,
        generation: u64,
        build_dir: &Path,
        sysroot: Option<&Path>,
        output: EvalOutput,
    ) -> CompletionOutcome {
        let project_type = ProjectType::from_variables(&output.exact.variables);
        let Some(node) = self.nodes.get_mut(id) else {
            return CompletionOutcome::Orphaned;
        };

        if output.is_fatal() || !project_type.is_valid() {
            let mut diagnostics = output.diagnostics;
            if !project_type.is_valid() && !diagnostics.iter().any(|d| d.is_fatal()) {
                diagnostics.push(EvalDiagnostic::error(format!(
                    "unrecognized {} value {:?}",
                    Variable::Template,
                    output.exact.variables.single(Variable::Template).unwrap_or_default()
                )));
            }
            tracing::debug!(
                "evaluation of {:?} is invalid: {}",
                node.path,
                diagnostics
                    .iter()
                    .map(|d| d.to_string())
                    .collect::<Vec<_>>()
                    .join("; ")
            );
            node.diagnostics = diagnostics;
            node.parse_state = ParseState::Invalid;
            self.dispatch(vec![TreeEvent::ParseStateChanged {
                node: id,
                state: ParseState::Invalid,
            }]);
            self.settle(id, generation);
            return CompletionOutcome::Invalid;
        }

        let kind = if project_type == ProjectType::Subdirs {
            NodeKind::Aggregate(AggregateDetails {
                active_sub_projects: output.exact.files.get(FileCategory::SubProject).clone(),
            })
        } else {
            NodeKind::Leaf(LeafDetails {
                target_info: TargetInfo::derive(
                    &output.exact.variables,
                    project_type,
                    &node.path,
                    build_dir,
                ),
                build_paths: BuildPaths::derive(
                    &output.exact.variables,
                    &node.dir,
                    build_dir,
                    sysroot,
                ),
            })
        };
        let new_state = NodeState {
            exact: output.exact,
            cumulative: output.cumulative,
            includes: output.includes,
            project_type,
            kind,
            build_dir: build_dir.to_path_buf(),
        };

        let mut events = Vec::new();
        for pass in [Pass::Exact, Pass::Cumulative] {
            for delta in FileSetResult::diff_all(&node.state.pass(pass).files, &new_state.pass(pass).files)
            {
                events.push(TreeEvent::FileSetChanged {
                    node: id,
                    pass,
                    delta,
                });
            }
        }
        let folders = new_state.enumerated_folders();
        node.state = Arc::new(new_state);
        node.diagnostics = output.diagnostics;

        let changes = self.folders.update(id, folders);
        changes.apply(self.watcher.as_mut());

        let created = self.reconcile_children(id, &mut events);
        let included = self.is_included(id);
        self.refresh_inclusion(id, included);

        if let Some(node) = self.nodes.get_mut(id) {
            if node.parse_state != ParseState::Valid {
                node.parse_state = ParseState::Valid;
                events.push(TreeEvent::ParseStateChanged {
                    node: id,
                    state: ParseState::Valid,
                });
            }
        }
        self.dispatch(events);
        for child in created {
            self.schedule_update(child, Urgency::Now);
        }
        self.settle(id, generation);
        CompletionOutcome::Accepted
    }

    /// Create and destroy children so they match the cumulative `SubProject` set. Returns
    /// the newly created children.
    fn reconcile_children(&mut self, id: NodeId, events: &mut Vec<TreeEvent>) -> Vec<NodeId> {
        let Some(node) = self.nodes.get(id) else {
            return Vec::new();
        };
        let wanted: BTreeSet<PathBuf> = node.sub_projects(Pass::Cumulative).clone();
        let existing: Vec<(NodeId, PathBuf)> = node
            .children
            .iter()
            .filter_map(|c| self.nodes.get(*c).map(|n| (*c, n.path.clone())))
            .collect();

        for (child, path) in &existing {
            if !wanted.contains(path) {
                self.destroy_subtree(*child, events);
            }
        }

        let ancestors = self.ancestor_paths(id);
        let mut created = Vec::new();
        for path in wanted {
            if existing.iter().any(|(_, p)| *p == path) {
                continue;
            }
            if ancestors.contains(&path) {
                tracing::warn!("{:?} includes its own ancestor {:?}, not creating a child", self.node_path(id), path);
                continue;
            }
            let child = self.nodes.insert(ProjectNode::new(path.clone(), Some(id)));
            if let Some(node) = self.nodes.get_mut(id) {
                node.children.push(child);
            }
            events.push(TreeEvent::NodeCreated {
                node: child,
                parent: Some(id),
                path,
            });
            created.push(child);
        }
        created
    }

    fn ancestor_paths(&self, id: NodeId) -> BTreeSet<PathBuf> {
        let mut paths = BTreeSet::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let Some(node) = self.nodes.get(current) else {
                break;
            };
            paths.insert(node.path.clone());
            cursor = node.parent;
        }
        paths
    }

    /// Remove `id` and everything below it. Running jobs become orphans; queued edits fail.
    pub(crate) fn destroy_subtree(&mut self, id: NodeId, events: &mut Vec<TreeEvent>) {
        let subtree = self.walk(id);
        if let Some(parent) = self.nodes.get(id).and_then(|n| n.parent) {
            if let Some(parent) = self.nodes.get_mut(parent) {
                parent.children.retain(|c| *c != id);
            }
        }
        // Deepest first, so a NodeDestroyed event never refers to a node with live children.
        for node_id in subtree.into_iter().rev() {
            let Some(node) = self.nodes.remove(node_id) else {
                continue;
            };
            self.later.remove(node_id);
            self.folders.release(node_id).apply(self.watcher.as_mut());
            if node.job.running.is_some() {
                tracing::debug!("{:?} destroyed with a job in flight", node.path);
            }
            for queued in node.edits {
                let error = ProjectError::NotFound(format!("{:?} was removed from the tree", node.path));
                events.push(TreeEvent::EditFailed {
                    node: node_id,
                    path: node.path.clone(),
                    error: error.clone(),
                });
                queued.resolve(Err(error));
            }
            events.push(TreeEvent::NodeDestroyed {
                node: node_id,
                path: node.path,
            });
        }
    }

    fn is_included(&self, id: NodeId) -> bool {
        self.nodes
            .get(id)
            .map(|n| n.included_in_exact_parse)
            .unwrap_or(false)
    }

    /// Set `id`'s flag and recompute it for the whole subtree: a child is included when its
    /// parent is and the parent's exact pass lists it.
    fn refresh_inclusion(&mut self, id: NodeId, included: bool) {
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        node.included_in_exact_parse = included;
        let exact_subs = node.sub_projects(Pass::Exact).clone();
        let children = node.children.clone();
        for child in children {
            let child_included = included
                && self
                    .nodes
                    .get(child)
                    .is_some_and(|c| exact_subs.contains(&c.path));
            self.refresh_inclusion(child, child_included);
        }
    }

    /// Publish `generation` as settled and release queued edits whose barrier it meets.
    pub(crate) fn settle(&mut self, id: NodeId, generation: u64) {
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        node.settled.send_if_modified(|current| {
            if generation > *current {
                *current = generation;
                true
            } else {
                false
            }
        });
        if node.write_barrier.is_some_and(|barrier| generation >= barrier) {
            node.write_barrier = None;
        }
        self.release_queued_edits(id);
    }
}
