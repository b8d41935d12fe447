use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::time::Instant;

use super::{NodeId, ParseState, ProjectTree};
use crate::{
    evaluator::{EvalInput, EvalOutput},
    event::TreeEvent,
    paths::normalize,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Urgency {
    /// Launch immediately.
    Now,
    /// Batch behind the coalescing delay.
    Later,
}

/// What happened to one completed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionOutcome {
    /// Result reconciled into the tree.
    Accepted,
    /// Result was current but unusable; the node is now `Invalid`.
    Invalid,
    /// A newer generation exists; the result was dropped.
    Stale,
    /// The node was destroyed while the job ran; the result was dropped.
    Orphaned,
}

#[derive(Debug)]
pub(crate) struct JobCompletion {
    pub node: NodeId,
    pub generation: u64,
    pub build_dir: PathBuf,
    pub sysroot: Option<PathBuf>,
    pub output: EvalOutput,
}

/// `Later` requests waiting for their deadline.
#[derive(Debug, Default)]
pub(crate) struct LaterBatch {
    nodes: BTreeSet<NodeId>,
    deadline: Option<Instant>,
}

impl LaterBatch {
    pub fn remove(&mut self, id: NodeId) {
        self.nodes.remove(&id);
        if self.nodes.is_empty() {
            self.deadline = None;
        }
    }

    fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

enum Wake {
    Completion(Option<JobCompletion>),
    Deadline,
}

impl ProjectTree {
    /// Request a re-evaluation of `id`. Never blocks and never starts a second job for a
    /// node that already has one running.
    pub fn schedule_update(&mut self, id: NodeId, urgency: Urgency) {
        let Some(node) = self.nodes.get_mut(id) else {
            tracing::debug!("schedule_update on missing node {id}");
            return;
        };
        if node.job.running.is_some() {
            node.job.dirty = true;
            if urgency == Urgency::Now {
                node.job.dirty_now = true;
                self.later.remove(id);
            }
            return;
        }
        match urgency {
            Urgency::Now => {
                self.later.remove(id);
                self.launch(id);
            }
            Urgency::Later => {
                self.later.nodes.insert(id);
                if self.later.deadline.is_none() {
                    self.later.deadline = Some(Instant::now() + self.config.coalesce_delay());
                }
            }
        }
    }

    /// Reschedule the root and every live node. Running jobs are invalidated: their
    /// generation moves on, so their results are dropped and one fresh job follows each.
    pub fn on_build_settings_changed(&mut self) {
        tracing::debug!("build settings changed, rescheduling {} node(s)", self.nodes.len());
        for id in self.walk(self.root) {
            let Some(node) = self.nodes.get_mut(id) else {
                continue;
            };
            if node.job.running.is_some() {
                node.generation += 1;
                node.job.dirty = true;
                node.job.dirty_now = true;
            } else {
                self.schedule_update(id, Urgency::Now);
            }
        }
    }

    /// Entry point for directory-watch callbacks. Schedules a `Later` update for every node
    /// whose description file, includes or enumerated folders cover one of `paths`, and
    /// returns those nodes.
    pub fn on_paths_changed(&mut self, paths: &[PathBuf]) -> Vec<NodeId> {
        let paths: Vec<PathBuf> = paths.iter().map(|p| normalize(p)).collect();
        let affected: Vec<NodeId> = self
            .walk(self.root)
            .into_iter()
            .filter(|id| {
                self.nodes.get(*id).is_some_and(|node| {
                    let folders = node.state.enumerated_folders();
                    paths.iter().any(|p| {
                        *p == node.path
                            || node.state.includes.contains(p)
                            || folders.iter().any(|f| p.starts_with(f))
                    })
                })
            })
            .collect();
        for id in &affected {
            self.schedule_update(*id, Urgency::Later);
        }
        affected
    }

    /// Evaluate the whole tree from the root and wait until no work remains.
    pub async fn parse_all(&mut self) -> Vec<CompletionOutcome> {
        self.schedule_update(self.root, Urgency::Now);
        self.run_until_idle().await
    }

    /// Whether any job is running or any `Later` request is waiting.
    pub fn has_pending_work(&self) -> bool {
        self.in_flight > 0 || !self.later.is_empty()
    }

    /// Handle the next completion, launching due `Later` batches on the way. Returns `None`
    /// once nothing is running or waiting.
    pub async fn process_next(&mut self) -> Option<CompletionOutcome> {
        loop {
            if !self.has_pending_work() {
                return None;
            }
            let wake = match self.later.deadline {
                Some(deadline) if self.in_flight > 0 => {
                    tokio::select! {
                        completion = self.completions_rx.recv() => Wake::Completion(completion),
                        _ = tokio::time::sleep_until(deadline) => Wake::Deadline,
                    }
                }
                Some(deadline) => {
                    tokio::time::sleep_until(deadline).await;
                    Wake::Deadline
                }
                None => Wake::Completion(self.completions_rx.recv().await),
            };
            match wake {
                Wake::Completion(Some(completion)) => {
                    return Some(self.handle_completion(completion));
                }
                // The tree holds a sender, so the channel never closes while it lives.
                Wake::Completion(None) => return None,
                Wake::Deadline => self.flush_later(),
            }
        }
    }

    pub async fn run_until_idle(&mut self) -> Vec<CompletionOutcome> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.process_next().await {
            outcomes.push(outcome);
        }
        outcomes
    }

    fn flush_later(&mut self) {
        let due = std::mem::take(&mut self.later.nodes);
        self.later.deadline = None;
        for id in due {
            self.schedule_update(id, Urgency::Now);
        }
    }

    #[tracing::instrument(skip_all, fields(node = %id))]
    fn launch(&mut self, id: NodeId) {
        let context = self.settings.context();
        let sysroot = context.sysroot.clone();
        let Some(dir) = self.nodes.get(id).map(|n| n.dir.clone()) else {
            return;
        };
        let build_dir = self.map_build_dir(&dir);
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        node.generation += 1;
        let generation = node.generation;
        node.job.running = Some(generation);
        node.job.dirty = false;
        node.job.dirty_now = false;

        let input = EvalInput {
            path: node.path.clone(),
            project_dir: dir,
            build_dir: build_dir.clone(),
            includes: node.state.includes.clone(),
            context,
        };
        tracing::debug!("launching generation {generation} for {:?}", input.path);
        let changed = node.parse_state != ParseState::InProgress;
        node.parse_state = ParseState::InProgress;

        let evaluator = self.evaluator.clone();
        let workers = self.workers.clone();
        let tx = self.completions_tx.clone();
        self.in_flight += 1;
        tokio::spawn(async move {
            let output = match workers.acquire_owned().await {
                Ok(_permit) => run_evaluator(evaluator, input).await,
                Err(_) => EvalOutput::failed("worker pool closed"),
            };
            let completion = JobCompletion {
                node: id,
                generation,
                build_dir,
                sysroot,
                output,
            };
            if tx.send(completion).is_err() {
                tracing::debug!("tree dropped before job {id} completed");
            }
        });

        if changed {
            self.dispatch(vec![TreeEvent::ParseStateChanged {
                node: id,
                state: ParseState::InProgress,
            }]);
        }
    }

    fn handle_completion(&mut self, completion: JobCompletion) -> CompletionOutcome {
        self.in_flight = self.in_flight.saturating_sub(1);
        let id = completion.node;
        let Some(node) = self.nodes.get_mut(id) else {
            tracing::debug!(
                "dropping orphaned result for {id} (generation {})",
                completion.generation
            );
            return CompletionOutcome::Orphaned;
        };
        node.job.running = None;
        let dirty = node.job.dirty;
        let dirty_now = node.job.dirty_now;
        node.job.dirty = false;
        node.job.dirty_now = false;

        let outcome = if completion.generation != node.generation {
            tracing::debug!(
                "discarding stale result for {:?}: generation {} < {}",
                node.path,
                completion.generation,
                node.generation
            );
            CompletionOutcome::Stale
        } else {
            self.apply_evaluation(
                id,
                completion.generation,
                &completion.build_dir,
                completion.sysroot.as_deref(),
                completion.output,
            )
        };

        // Settling may already have launched the next job for a released edit.
        if dirty && self.nodes.get(id).is_some_and(|n| n.job.running.is_none()) {
            let urgency = if dirty_now { Urgency::Now } else { Urgency::Later };
            self.schedule_update(id, urgency);
        }
        outcome
    }

    /// Path of a live node, for logging.
    pub(crate) fn node_path(&self, id: NodeId) -> Option<&Path> {
        self.nodes.get(id).map(|n| n.path.as_path())
    }
}

async fn run_evaluator(
    evaluator: Arc<dyn crate::evaluator::Evaluator>,
    input: EvalInput,
) -> EvalOutput {
    let path = input.path.clone();
    match tokio::task::spawn_blocking(move || evaluator.evaluate(&input)).await {
        Ok(output) => output,
        Err(e) => {
            tracing::warn!("evaluator failed for {:?}: {}", path, e);
            EvalOutput::failed(format!("evaluator panicked: {e}"))
        }
    }
}
