//! The live project tree.
//!
//! A [`ProjectTree`] owns every [`ProjectNode`] in an epoch-checked arena and is driven from a
//! single owner context through `&mut self`. Evaluation jobs run on the blocking pool and
//! report back over a channel; the owner drains completions with
//! [`ProjectTree::process_next`] (or [`ProjectTree::run_until_idle`]) and only then does any
//! node state change.
//!
//! ```no_run
//! # async fn demo() -> Result<(), prosync_core::ProjectError> {
//! use prosync_core::tree::{ProjectTree, Pass};
//! use prosync_core::fileset::FileCategory;
//!
//! let mut tree = ProjectTree::builder("/src/app/app.pro").build();
//! tree.parse_all().await;
//! let root = tree.root_node();
//! for source in root.files(Pass::Exact).get(FileCategory::Source) {
//!     println!("{}", source.display());
//! }
//! # Ok(())
//! # }
//! ```
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    watch, Semaphore,
};

use crate::{
    config::{BuildSettingsProvider, StaticBuildSettings, TreeConfig},
    error::ProjectError,
    evaluator::{EvalDiagnostic, Evaluator, LineEvaluator},
    event::{TreeEvent, TreeObserver},
    fileset::FileSetResult,
    paths::{canonical_identity, normalize, relative_to},
    text::{FsTextResource, TextResource},
    variables::ProjectType,
    watch::{FolderRegistry, FolderWatcher, NullFolderWatcher},
};

pub(crate) mod arena;
mod node;
mod reconcile;
mod scheduler;

pub use arena::NodeId;
pub use node::{
    AggregateDetails, BuildPaths, LeafDetails, NodeKind, NodeState, ParseState, Pass, ProjectNode,
    TargetInfo,
};
pub use scheduler::{CompletionOutcome, Urgency};

use arena::Arena;
use scheduler::{JobCompletion, LaterBatch};

pub struct TreeBuilder {
    root: PathBuf,
    config: TreeConfig,
    text: Arc<dyn TextResource>,
    evaluator: Option<Arc<dyn Evaluator>>,
    settings: Arc<dyn BuildSettingsProvider>,
    watcher: Box<dyn FolderWatcher>,
    observers: Vec<Arc<dyn TreeObserver>>,
}

impl TreeBuilder {
    pub fn root_path(&self) -> &Path {
        &self.root
    }

    pub fn config(mut self, config: TreeConfig) -> Self {
        self.config = config;
        self
    }

    /// Text source for the Writer, and for the default evaluator.
    pub fn text(mut self, text: Arc<dyn TextResource>) -> Self {
        self.text = text;
        self
    }

    pub fn evaluator(mut self, evaluator: impl Evaluator) -> Self {
        self.evaluator = Some(Arc::new(evaluator));
        self
    }

    pub fn shared_evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn settings(mut self, settings: Arc<dyn BuildSettingsProvider>) -> Self {
        self.settings = settings;
        self
    }

    pub fn watcher(mut self, watcher: impl FolderWatcher + 'static) -> Self {
        self.watcher = Box::new(watcher);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn TreeObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn build(self) -> ProjectTree {
        let root_path = canonical_identity(&self.root);
        let root_dir = root_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        let evaluator = self
            .evaluator
            .unwrap_or_else(|| Arc::new(LineEvaluator::new(self.text.clone())));
        let (completions_tx, completions_rx) = unbounded_channel();
        let mut nodes = Arena::default();
        let root = nodes.insert(ProjectNode::new(root_path.clone(), None));
        tracing::debug!("project tree rooted at {:?}", root_path);

        let tree = ProjectTree {
            workers: Arc::new(Semaphore::new(self.config.max_workers.max(1))),
            config: self.config,
            nodes,
            root,
            root_dir,
            evaluator,
            settings: self.settings,
            text: self.text,
            watcher: self.watcher,
            observers: self.observers,
            folders: FolderRegistry::default(),
            later: LaterBatch::default(),
            completions_tx,
            completions_rx,
            in_flight: 0,
        };
        tree.dispatch(vec![TreeEvent::NodeCreated {
            node: root,
            parent: None,
            path: root_path,
        }]);
        tree
    }
}

pub struct ProjectTree {
    pub(crate) config: TreeConfig,
    pub(crate) nodes: Arena<ProjectNode>,
    pub(crate) root: NodeId,
    root_dir: PathBuf,
    evaluator: Arc<dyn Evaluator>,
    settings: Arc<dyn BuildSettingsProvider>,
    pub(crate) text: Arc<dyn TextResource>,
    watcher: Box<dyn FolderWatcher>,
    observers: Vec<Arc<dyn TreeObserver>>,
    folders: FolderRegistry,
    later: LaterBatch,
    workers: Arc<Semaphore>,
    completions_tx: UnboundedSender<JobCompletion>,
    completions_rx: UnboundedReceiver<JobCompletion>,
    in_flight: usize,
}

impl ProjectTree {
    /// Start building a tree for the description file at `root`. Defaults: filesystem text,
    /// the reference [`LineEvaluator`], empty build settings, no directory watching.
    pub fn builder(root: impl Into<PathBuf>) -> TreeBuilder {
        TreeBuilder {
            root: root.into(),
            config: TreeConfig::default(),
            text: Arc::new(FsTextResource),
            evaluator: None,
            settings: Arc::new(StaticBuildSettings::default()),
            watcher: Box::new(NullFolderWatcher),
            observers: Vec::new(),
        }
    }

    pub fn add_observer(&mut self, observer: Arc<dyn TreeObserver>) {
        self.observers.push(observer);
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn root_node(&self) -> &ProjectNode {
        // The root is created with the tree and never destroyed.
        match self.nodes.get(self.root) {
            Some(node) => node,
            None => unreachable!("root node is never removed"),
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&ProjectNode> {
        self.nodes.get(id)
    }

    pub(crate) fn require(&self, id: NodeId) -> Result<&ProjectNode, ProjectError> {
        self.nodes
            .get(id)
            .ok_or_else(|| ProjectError::NotFound(format!("node {id}")))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 0
    }

    /// Pre-order walk starting at `id`.
    pub fn walk(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            let Some(node) = self.nodes.get(next) else {
                continue;
            };
            out.push(next);
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }

    /// Node whose description file is `path`.
    pub fn find_node_for_path(&self, path: &Path) -> Option<NodeId> {
        let path = normalize(path);
        self.walk(self.root)
            .into_iter()
            .find(|id| self.nodes.get(*id).is_some_and(|n| n.path == path))
    }

    /// Nodes whose file sets (either pass) list `path`.
    pub fn nodes_for_file(&self, path: &Path) -> Vec<NodeId> {
        self.walk(self.root)
            .into_iter()
            .filter(|id| self.nodes.get(*id).is_some_and(|n| n.references(path)))
            .collect()
    }

    pub fn source_dir(&self, id: NodeId) -> Option<&Path> {
        self.nodes.get(id).map(|n| n.source_dir())
    }

    /// Where `id` builds: its source directory mapped under the shadow build root, or the
    /// source directory itself when building in-tree.
    pub fn build_dir(&self, id: NodeId) -> Option<PathBuf> {
        let dir = self.nodes.get(id)?.dir.clone();
        Some(self.map_build_dir(&dir))
    }

    pub(crate) fn map_build_dir(&self, source_dir: &Path) -> PathBuf {
        match self.settings.context().build_dir {
            Some(build_root) => match relative_to(source_dir, &self.root_dir) {
                Ok(rel) => normalize(&build_root.join(rel)),
                Err(_) => source_dir.to_path_buf(),
            },
            None => source_dir.to_path_buf(),
        }
    }

    pub fn diagnostics(&self, id: NodeId) -> &[EvalDiagnostic] {
        self.nodes.get(id).map(|n| n.diagnostics()).unwrap_or(&[])
    }

    pub fn settled(&self, id: NodeId) -> Option<watch::Receiver<u64>> {
        self.nodes.get(id).map(|n| n.subscribe_settled())
    }

    /// Serializable dump of the whole tree.
    pub fn describe(&self) -> TreeSnapshot {
        TreeSnapshot {
            root: self.describe_node(self.root),
        }
    }

    fn describe_node(&self, id: NodeId) -> Option<NodeSnapshot> {
        let node = self.nodes.get(id)?;
        Some(NodeSnapshot {
            id,
            path: node.path.clone(),
            project_type: node.project_type(),
            parse_state: node.parse_state,
            included_in_exact_parse: node.included_in_exact_parse,
            generation: node.generation,
            exact: node.state.exact.files.clone(),
            cumulative: node.state.cumulative.files.clone(),
            includes: node.state.includes.clone(),
            diagnostics: node.diagnostics.iter().map(|d| d.to_string()).collect(),
            children: node
                .children
                .iter()
                .filter_map(|child| self.describe_node(*child))
                .collect(),
        })
    }

    pub(crate) fn dispatch(&self, events: Vec<TreeEvent>) {
        for event in events {
            tracing::trace!("{event}");
            for observer in &self.observers {
                observer.on_event(&event);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    pub root: Option<NodeSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub path: PathBuf,
    pub project_type: ProjectType,
    pub parse_state: ParseState,
    pub included_in_exact_parse: bool,
    pub generation: u64,
    pub exact: FileSetResult,
    pub cumulative: FileSetResult,
    pub includes: BTreeSet<PathBuf>,
    pub diagnostics: Vec<String>,
    pub children: Vec<NodeSnapshot>,
}

impl NodeSnapshot {
    /// Depth-first search for the snapshot of `path`.
    pub fn find(&self, path: &Path) -> Option<&NodeSnapshot> {
        if self.path == path {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(path))
    }
}
