//! Owner-task service around a [`ProjectTree`].
//!
//! The tree is moved into a spawned task and only that task touches it. Callers talk to it
//! through a cloneable [`ProjectHandle`], sending [`Op`] commands and receiving [`OpResult`]s,
//! and listen to [`TreeEvent`]s on a broadcast channel. With
//! [`ProjectService::spawn_watching`] debounced filesystem changes arrive on the same task
//! as `Op::PathsChanged` would.
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{
    sync::{
        broadcast,
        mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
        oneshot, watch,
    },
    task::JoinHandle,
};

use crate::{
    commands::{Op, OpResult},
    error::ProjectError,
    event::{TreeEvent, TreeObserver},
    paths::canonical_identity,
    tree::{NodeId, ProjectTree, TreeBuilder, TreeSnapshot, Urgency},
    watch::NotifyFolderWatcher,
    writer::{Edit, EditReport, EditStatus, EditTicket},
};

const EVENT_CAPACITY: usize = 1024;

#[derive(Debug)]
struct Reply {
    result: Result<OpResult, ProjectError>,
    settled: Option<watch::Receiver<u64>>,
    /// Set when an edit had to queue.
    ticket: Option<EditTicket>,
}

#[derive(Debug)]
struct Envelope {
    op: Op,
    reply: oneshot::Sender<Reply>,
}

struct BroadcastObserver(broadcast::Sender<TreeEvent>);

impl TreeObserver for BroadcastObserver {
    fn on_event(&self, event: &TreeEvent) {
        if self.0.send(event.clone()).is_err() {
            tracing::trace!("[ProjectService] no event subscribers for {event}");
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProjectHandle {
    ops: UnboundedSender<Envelope>,
    events: broadcast::Sender<TreeEvent>,
}

impl ProjectHandle {
    async fn send(&self, op: Op) -> Result<Reply, ProjectError> {
        let (reply, rx) = oneshot::channel();
        self.ops.send(Envelope { op, reply })?;
        Ok(rx.await?)
    }

    pub async fn request(&self, op: Op) -> Result<OpResult, ProjectError> {
        self.send(op).await?.result
    }

    pub fn events(&self) -> broadcast::Receiver<TreeEvent> {
        self.events.subscribe()
    }

    pub async fn describe(&self) -> Result<TreeSnapshot, ProjectError> {
        match self.request(Op::Describe).await? {
            OpResult::Snapshot(snapshot) => Ok(snapshot),
            other => Err(unexpected(&other)),
        }
    }

    /// Wait until the node for `project` has settled at `generation` or later, and return
    /// the settled generation.
    pub async fn wait_settled(&self, project: &Path, generation: u64) -> Result<u64, ProjectError> {
        let reply = self.send(Op::Subscribe(project.to_path_buf())).await?;
        reply.result?;
        let Some(mut settled) = reply.settled else {
            return Err(ProjectError::Service(format!(
                "no settled channel for {}",
                project.display()
            )));
        };
        let current = settled
            .wait_for(|settled| *settled >= generation)
            .await
            .map_err(|_| {
                ProjectError::Service(format!("{} left the tree", project.display()))
            })?;
        Ok(*current)
    }

    /// Run a Writer command and, when it wrote text, wait for the resulting evaluation. An
    /// edit that queued behind another is awaited until it has been applied as well.
    pub async fn apply(&self, op: Op) -> Result<EditReport, ProjectError> {
        let project = op
            .project()
            .cloned()
            .ok_or_else(|| ProjectError::Command(format!("{op} is not an edit")))?;
        let reply = self.send(op).await?;
        let mut report = match reply.result? {
            OpResult::Edit(report) => report,
            other => return Err(unexpected(&other)),
        };
        if let EditStatus::Queued { position } = report.status {
            if let Some(ticket) = reply.ticket {
                tracing::debug!(
                    "[ProjectService] edit of {} queued at {position}",
                    project.display()
                );
                report = ticket.outcome().await?;
            }
        }
        if let EditStatus::Written { settles_at } = report.status {
            self.wait_settled(&project, settles_at).await?;
        }
        Ok(report)
    }
}

fn unexpected(result: &OpResult) -> ProjectError {
    ProjectError::Service(format!("unexpected reply {result:?}"))
}

pub struct ProjectService {
    handle: ProjectHandle,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ProjectService {
    /// Build the tree and start its owner task. Must be called inside a tokio runtime.
    pub fn spawn(builder: TreeBuilder) -> ProjectService {
        let (_changes_tx, changes_rx) = unbounded_channel();
        Self::start(builder, changes_rx)
    }

    /// Like [`spawn`](Self::spawn), additionally watching the project directory and every
    /// enumerated folder through `notify`.
    pub fn spawn_watching(
        builder: TreeBuilder,
        debounce: Duration,
    ) -> Result<ProjectService, ProjectError> {
        let (changes_tx, changes_rx) = unbounded_channel();
        let mut watcher = NotifyFolderWatcher::new(changes_tx, debounce)?;
        let root = canonical_identity(builder.root_path());
        if let Some(dir) = root.parent() {
            watcher.watch_root(dir)?;
        }
        Ok(Self::start(builder.watcher(watcher), changes_rx))
    }

    fn start(builder: TreeBuilder, changes: UnboundedReceiver<Vec<PathBuf>>) -> ProjectService {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (ops_tx, ops_rx) = unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let tree = builder
            .observer(std::sync::Arc::new(BroadcastObserver(events.clone())))
            .build();
        let task = tokio::spawn(run(tree, ops_rx, changes, shutdown_rx));
        ProjectService {
            handle: ProjectHandle {
                ops: ops_tx,
                events,
            },
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    pub fn handle(&self) -> ProjectHandle {
        self.handle.clone()
    }

    /// Stop the owner task. Jobs still running are abandoned.
    pub async fn shutdown(mut self) -> Result<(), ProjectError> {
        if let Some(shutdown) = self.shutdown.take() {
            // The task may already have stopped on its own.
            let _ = shutdown.send(());
        }
        self.task
            .await
            .map_err(|e| ProjectError::Service(format!("owner task failed: {e}")))
    }
}

async fn run(
    mut tree: ProjectTree,
    mut ops: UnboundedReceiver<Envelope>,
    mut changes: UnboundedReceiver<Vec<PathBuf>>,
    mut shutdown: oneshot::Receiver<()>,
) {
    tracing::info!(
        "[ProjectService] owner task started for {:?}",
        tree.root_node().path()
    );
    tree.schedule_update(tree.root(), Urgency::Now);
    loop {
        let pending = tree.has_pending_work();
        tokio::select! {
            _ = &mut shutdown => break,
            envelope = ops.recv() => match envelope {
                Some(Envelope { op, reply }) => {
                    let response = handle_op(&mut tree, op);
                    if reply.send(response).is_err() {
                        tracing::debug!("[ProjectService] requester went away");
                    }
                }
                None => break,
            },
            Some(paths) = changes.recv() => {
                let affected = tree.on_paths_changed(&paths);
                tracing::debug!(
                    "[ProjectService] {} changed path(s) touch {} node(s)",
                    paths.len(),
                    affected.len()
                );
            }
            outcome = tree.process_next(), if pending => {
                tracing::trace!("[ProjectService] completion: {outcome:?}");
            }
        }
    }
    tracing::info!("[ProjectService] owner task stopped");
}

fn resolve(tree: &ProjectTree, project: &Path) -> Result<NodeId, ProjectError> {
    tree.find_node_for_path(&canonical_identity(project))
        .ok_or_else(|| ProjectError::NotFound(format!("no node for {}", project.display())))
}

fn handle_op(tree: &mut ProjectTree, op: Op) -> Reply {
    tracing::debug!("[ProjectService] {op}");
    let mut settled = None;
    let mut ticket = None;
    let result = execute(tree, op, &mut settled, &mut ticket);
    if let Err(e) = &result {
        tracing::debug!("[ProjectService] request failed: {e}");
    }
    Reply {
        result,
        settled,
        ticket,
    }
}

fn submit(
    tree: &mut ProjectTree,
    id: NodeId,
    edit: Edit,
    ticket: &mut Option<EditTicket>,
) -> Result<OpResult, ProjectError> {
    let (report, queued) = tree.submit_edit_tracked(id, edit)?;
    *ticket = queued;
    Ok(OpResult::Edit(report))
}

fn execute(
    tree: &mut ProjectTree,
    op: Op,
    settled: &mut Option<watch::Receiver<u64>>,
    ticket: &mut Option<EditTicket>,
) -> Result<OpResult, ProjectError> {
    match op {
        Op::ScheduleUpdate { project, urgency } => {
            let id = resolve(tree, &project)?;
            tree.schedule_update(id, urgency);
            Ok(OpResult::Scheduled(vec![id]))
        }
        Op::AddFiles { project, files } => {
            let id = resolve(tree, &project)?;
            submit(tree, id, Edit::AddFiles(files), ticket)
        }
        Op::RemoveFiles { project, files } => {
            let id = resolve(tree, &project)?;
            submit(tree, id, Edit::RemoveFiles(files), ticket)
        }
        Op::RenameFile { project, old, new } => {
            let id = resolve(tree, &project)?;
            submit(tree, id, Edit::RenameFile { old, new }, ticket)
        }
        Op::SetVariable {
            project,
            variable,
            values,
            scope,
        } => {
            let id = resolve(tree, &project)?;
            let edit = Edit::SetVariable {
                variable,
                values,
                scope,
            };
            submit(tree, id, edit, ticket)
        }
        Op::AddSubProjects {
            project,
            sub_projects,
        } => {
            let id = resolve(tree, &project)?;
            submit(tree, id, Edit::AddSubProjects(sub_projects), ticket)
        }
        Op::RemoveSubProjects {
            project,
            sub_projects,
        } => {
            let id = resolve(tree, &project)?;
            submit(tree, id, Edit::RemoveSubProjects(sub_projects), ticket)
        }
        Op::PathsChanged(paths) => Ok(OpResult::Scheduled(tree.on_paths_changed(&paths))),
        Op::BuildSettingsChanged => {
            tree.on_build_settings_changed();
            Ok(OpResult::Ok)
        }
        Op::Describe => Ok(OpResult::Snapshot(tree.describe())),
        Op::Subscribe(project) => {
            let id = resolve(tree, &project)?;
            let receiver = tree
                .settled(id)
                .ok_or_else(|| ProjectError::NotFound(format!("node {id}")))?;
            let current = *receiver.borrow();
            *settled = Some(receiver);
            Ok(OpResult::Subscribed {
                node: id,
                settled: current,
            })
        }
    }
}
