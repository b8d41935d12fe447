use std::path::PathBuf;
use test_log::test;

use super::{app_output, subdirs_output, GatedEvaluator};
use crate::{
    config::TreeConfig,
    event::ChannelObserver,
    event::TreeEvent,
    fileset::FileCategory,
    tree::{CompletionOutcome, ParseState, Pass, ProjectTree, Urgency},
};

fn config() -> TreeConfig {
    TreeConfig {
        coalesce_delay_ms: 10,
        max_workers: 4,
        write_back: true,
    }
}

fn tree_with(evaluator: &std::sync::Arc<GatedEvaluator>) -> ProjectTree {
    ProjectTree::builder("/p/app.pro")
        .config(config())
        .shared_evaluator(evaluator.clone())
        .build()
}

#[test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn later_requests_during_a_job_cause_one_follow_up() {
    let evaluator = GatedEvaluator::new();
    evaluator.set_output("/p/app.pro", app_output(&["/p/a.cc"]));
    evaluator.close("/p/app.pro");
    let mut tree = tree_with(&evaluator);
    let root = tree.root();

    tree.schedule_update(root, Urgency::Now);
    evaluator.wait_blocked("/p/app.pro", 1);
    tree.schedule_update(root, Urgency::Later);
    tree.schedule_update(root, Urgency::Later);
    tree.schedule_update(root, Urgency::Now);
    assert!(tree.root_node().is_evaluating());

    evaluator.open("/p/app.pro");
    let outcomes = tree.run_until_idle().await;
    assert_eq!(
        outcomes,
        vec![CompletionOutcome::Accepted, CompletionOutcome::Accepted]
    );
    assert_eq!(evaluator.calls("/p/app.pro"), 2);
    assert_eq!(tree.root_node().generation(), 2);
    assert_eq!(tree.root_node().settled_generation(), 2);
}

#[test(tokio::test)]
async fn later_requests_coalesce_into_one_launch() {
    let evaluator = GatedEvaluator::new();
    evaluator.set_output("/p/app.pro", app_output(&["/p/a.cc"]));
    let mut tree = tree_with(&evaluator);
    let root = tree.root();
    tree.parse_all().await;
    assert_eq!(evaluator.calls("/p/app.pro"), 1);

    for _ in 0..3 {
        tree.schedule_update(root, Urgency::Later);
    }
    assert!(tree.has_pending_work());
    assert!(!tree.root_node().is_evaluating());
    let outcomes = tree.run_until_idle().await;
    assert_eq!(outcomes, vec![CompletionOutcome::Accepted]);
    assert_eq!(evaluator.calls("/p/app.pro"), 2);
}

#[test(tokio::test)]
async fn now_request_supersedes_a_pending_later_one() {
    let evaluator = GatedEvaluator::new();
    evaluator.set_output("/p/app.pro", app_output(&[]));
    let mut tree = tree_with(&evaluator);
    let root = tree.root();

    tree.schedule_update(root, Urgency::Later);
    tree.schedule_update(root, Urgency::Now);
    assert!(tree.root_node().is_evaluating());
    let outcomes = tree.run_until_idle().await;
    assert_eq!(outcomes, vec![CompletionOutcome::Accepted]);
    assert_eq!(evaluator.calls("/p/app.pro"), 1);
}

#[test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn build_settings_change_discards_the_in_flight_result() {
    let evaluator = GatedEvaluator::new();
    evaluator.set_output("/p/app.pro", app_output(&["/p/a.cc"]));
    evaluator.close("/p/app.pro");
    let mut tree = tree_with(&evaluator);
    let root = tree.root();

    tree.schedule_update(root, Urgency::Now);
    evaluator.wait_blocked("/p/app.pro", 1);
    tree.on_build_settings_changed();
    // The result of generation 1 must not land once the shape of the output changes.
    evaluator.set_output("/p/app.pro", app_output(&["/p/b.cc"]));
    evaluator.open("/p/app.pro");

    let outcomes = tree.run_until_idle().await;
    assert_eq!(
        outcomes,
        vec![CompletionOutcome::Stale, CompletionOutcome::Accepted]
    );
    let node = tree.root_node();
    assert_eq!(node.generation(), 3);
    assert_eq!(node.parse_state(), ParseState::Valid);
    let sources = node.files(Pass::Exact).get(FileCategory::Source);
    assert!(sources.contains(&PathBuf::from("/p/b.cc")));
    assert!(!sources.contains(&PathBuf::from("/p/a.cc")));
}

#[test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn result_for_a_destroyed_node_is_orphaned() {
    let evaluator = GatedEvaluator::new();
    evaluator.set_output(
        "/p/app.pro",
        subdirs_output(&["/p/a/a.pro", "/p/b/b.pro"], &["/p/a/a.pro", "/p/b/b.pro"]),
    );
    evaluator.set_output("/p/a/a.pro", app_output(&["/p/a/a.cc"]));
    evaluator.set_output("/p/b/b.pro", app_output(&["/p/b/b.cc"]));
    evaluator.close("/p/b/b.pro");
    let (observer, mut events) = ChannelObserver::new();
    let mut tree = ProjectTree::builder("/p/app.pro")
        .config(config())
        .shared_evaluator(evaluator.clone())
        .observer(std::sync::Arc::new(observer))
        .build();
    let root = tree.root();

    tree.schedule_update(root, Urgency::Now);
    assert_eq!(tree.process_next().await, Some(CompletionOutcome::Accepted));
    assert_eq!(tree.len(), 3);
    let b = tree
        .find_node_for_path(std::path::Path::new("/p/b/b.pro"))
        .unwrap();
    evaluator.wait_blocked("/p/b/b.pro", 1);
    assert_eq!(tree.process_next().await, Some(CompletionOutcome::Accepted));

    evaluator.set_output("/p/app.pro", subdirs_output(&["/p/a/a.pro"], &["/p/a/a.pro"]));
    tree.schedule_update(root, Urgency::Now);
    assert_eq!(tree.process_next().await, Some(CompletionOutcome::Accepted));
    assert!(!tree.contains(b));
    assert_eq!(tree.len(), 2);

    evaluator.open("/p/b/b.pro");
    assert_eq!(tree.process_next().await, Some(CompletionOutcome::Orphaned));
    assert_eq!(tree.process_next().await, None);

    let mut destroyed = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let TreeEvent::NodeDestroyed { node, path } = event {
            destroyed.push((node, path));
        }
    }
    assert_eq!(destroyed, vec![(b, PathBuf::from("/p/b/b.pro"))]);
}

#[test(tokio::test)]
async fn cumulative_only_children_are_excluded_from_the_exact_parse() {
    let evaluator = GatedEvaluator::new();
    evaluator.set_output(
        "/p/app.pro",
        subdirs_output(&["/p/a/a.pro"], &["/p/a/a.pro", "/p/win/win.pro"]),
    );
    evaluator.set_output("/p/a/a.pro", app_output(&[]));
    evaluator.set_output("/p/win/win.pro", app_output(&[]));
    let mut tree = tree_with(&evaluator);

    let outcomes = tree.parse_all().await;
    assert_eq!(outcomes.len(), 3);
    let a = tree.find_node_for_path(std::path::Path::new("/p/a/a.pro")).unwrap();
    let win = tree
        .find_node_for_path(std::path::Path::new("/p/win/win.pro"))
        .unwrap();
    assert!(tree.node(a).unwrap().included_in_exact_parse());
    assert!(!tree.node(win).unwrap().included_in_exact_parse());
}

#[test(tokio::test)]
async fn unscripted_evaluation_marks_the_node_invalid() {
    let evaluator = GatedEvaluator::new();
    let mut tree = tree_with(&evaluator);
    let outcomes = tree.parse_all().await;
    assert_eq!(outcomes, vec![CompletionOutcome::Invalid]);
    let node = tree.root_node();
    assert_eq!(node.parse_state(), ParseState::Invalid);
    assert!(node.diagnostics().iter().any(|d| d.is_fatal()));
    // Invalid evaluations still settle, so waiters are released.
    assert_eq!(node.settled_generation(), 1);
}
