use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    fmt::{Display, Formatter},
    path::{Path, PathBuf},
};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::{
    error::ProjectError,
    fileset::{FileCategory, FileSetDelta},
    tree::{NodeId, ParseState, Pass},
};

/// Change notifications emitted by a `ProjectTree`, always after the mutation they describe
/// has been applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TreeEvent {
    /// Minimal membership change of one category in one pass
    FileSetChanged {
        node: NodeId,
        pass: Pass,
        delta: FileSetDelta,
    },
    ParseStateChanged {
        node: NodeId,
        state: ParseState,
    },
    NodeCreated {
        node: NodeId,
        parent: Option<NodeId>,
        path: PathBuf,
    },
    NodeDestroyed {
        node: NodeId,
        path: PathBuf,
    },
    /// A queued edit could not be applied once its turn came
    EditFailed {
        node: NodeId,
        path: PathBuf,
        error: ProjectError,
    },
}

impl TreeEvent {
    pub fn node(&self) -> NodeId {
        match self {
            TreeEvent::FileSetChanged { node, .. }
            | TreeEvent::ParseStateChanged { node, .. }
            | TreeEvent::NodeCreated { node, .. }
            | TreeEvent::NodeDestroyed { node, .. }
            | TreeEvent::EditFailed { node, .. } => *node,
        }
    }
}

impl Display for TreeEvent {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            TreeEvent::FileSetChanged { node, pass, delta } => write!(
                f,
                "FileSetChanged({node}, {pass:?}, {}: +{} -{})",
                delta.category,
                delta.added.len(),
                delta.removed.len()
            ),
            TreeEvent::ParseStateChanged { node, state } => {
                write!(f, "ParseStateChanged({node}, {state})")
            }
            TreeEvent::NodeCreated { node, path, .. } => {
                write!(f, "NodeCreated({node}, {})", path.display())
            }
            TreeEvent::NodeDestroyed { node, path } => {
                write!(f, "NodeDestroyed({node}, {})", path.display())
            }
            TreeEvent::EditFailed { node, path, error } => {
                write!(f, "EditFailed({node}, {}: {error})", path.display())
            }
        }
    }
}

/// Receiver of tree changes. Every method defaults to doing nothing; [`on_event`] fans the
/// tree's events out to them and can be overridden to take events whole.
///
/// [`on_event`]: TreeObserver::on_event
pub trait TreeObserver: Send + Sync {
    fn on_file_set_changed(
        &self,
        _node: NodeId,
        _pass: Pass,
        _category: FileCategory,
        _added: &BTreeSet<PathBuf>,
        _removed: &BTreeSet<PathBuf>,
    ) {
    }

    fn on_parse_state_changed(&self, _node: NodeId, _state: ParseState) {}

    fn on_node_created(&self, _node: NodeId, _parent: Option<NodeId>, _path: &Path) {}

    fn on_node_destroyed(&self, _node: NodeId, _path: &Path) {}

    fn on_edit_failed(&self, _node: NodeId, _path: &Path, _error: &ProjectError) {}

    fn on_event(&self, event: &TreeEvent) {
        match event {
            TreeEvent::FileSetChanged { node, pass, delta } => self.on_file_set_changed(
                *node,
                *pass,
                delta.category,
                &delta.added,
                &delta.removed,
            ),
            TreeEvent::ParseStateChanged { node, state } => {
                self.on_parse_state_changed(*node, *state)
            }
            TreeEvent::NodeCreated { node, parent, path } => {
                self.on_node_created(*node, *parent, path)
            }
            TreeEvent::NodeDestroyed { node, path } => self.on_node_destroyed(*node, path),
            TreeEvent::EditFailed { node, path, error } => self.on_edit_failed(*node, path, error),
        }
    }
}

/// Streams every event into an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: UnboundedSender<TreeEvent>,
}

impl ChannelObserver {
    pub fn new() -> (ChannelObserver, UnboundedReceiver<TreeEvent>) {
        let (tx, rx) = unbounded_channel();
        (ChannelObserver { tx }, rx)
    }
}

impl TreeObserver for ChannelObserver {
    fn on_event(&self, event: &TreeEvent) {
        if self.tx.send(event.clone()).is_err() {
            tracing::trace!("event receiver dropped, discarding {event}");
        }
    }
}
