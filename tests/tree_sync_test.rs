//! End-to-end synchronization tests: evaluation, reconciliation and the event stream, using
//! the reference evaluator over in-memory description files.

use prosync_core::{
    config::{BuildContext, StaticBuildSettings},
    event::TreeEvent,
    fileset::FileCategory,
    tree::{CompletionOutcome, ParseState, Pass, ProjectTree, Urgency},
    variables::ProjectType,
};
use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    sync::Arc,
};
use test_log::test;

mod common;
use common::{drain, memory_project, observed_tree, test_config};

fn paths(items: &[&str]) -> BTreeSet<PathBuf> {
    items.iter().map(PathBuf::from).collect()
}

/// `(pass, category, added, removed)` of every file-set event.
fn deltas(events: &[TreeEvent]) -> Vec<(Pass, FileCategory, BTreeSet<PathBuf>, BTreeSet<PathBuf>)> {
    events
        .iter()
        .filter_map(|event| match event {
            TreeEvent::FileSetChanged { pass, delta, .. } => Some((
                *pass,
                delta.category,
                delta.added.clone(),
                delta.removed.clone(),
            )),
            _ => None,
        })
        .collect()
}

#[test(tokio::test)]
async fn initial_parse_reports_every_category_once() {
    let text = memory_project(&[(
        "/p/app.pro",
        "SOURCES += main.cc util.cc\nHEADERS += util.h\nFORMS += dialog.ui\n",
    )]);
    let (mut tree, mut events) = observed_tree(text, "/p/app.pro");

    let outcomes = tree.parse_all().await;
    assert_eq!(outcomes, vec![CompletionOutcome::Accepted]);

    let root = tree.root_node();
    assert_eq!(root.parse_state(), ParseState::Valid);
    assert_eq!(root.project_type(), ProjectType::Application);
    assert_eq!(
        root.files(Pass::Exact).get(FileCategory::Source),
        &paths(&["/p/main.cc", "/p/util.cc"])
    );

    let events = drain(&mut events);
    assert!(matches!(events.first(), Some(TreeEvent::NodeCreated { parent: None, .. })));
    let exact: Vec<FileCategory> = deltas(&events)
        .into_iter()
        .filter(|(pass, ..)| *pass == Pass::Exact)
        .map(|(_, category, ..)| category)
        .collect();
    assert_eq!(
        exact,
        vec![FileCategory::Header, FileCategory::Source, FileCategory::Form]
    );
}

#[test(tokio::test)]
async fn add_then_remove_round_trips_the_text_and_the_sets() {
    let original = "TARGET = demo\nSOURCES += a.cc\n";
    let text = memory_project(&[("/p/app.pro", original)]);
    let (mut tree, mut events) = observed_tree(text.clone(), "/p/app.pro");
    let root = tree.root();
    tree.parse_all().await;
    drain(&mut events);

    tree.add_files(root, &[PathBuf::from("/p/b.cc")]).unwrap();
    tree.run_until_idle().await;
    assert_eq!(
        text.contents("/p/app.pro").unwrap(),
        "TARGET = demo\nSOURCES += a.cc \\\n    b.cc\n"
    );
    let added = deltas(&drain(&mut events));
    assert_eq!(
        added,
        vec![
            (Pass::Exact, FileCategory::Source, paths(&["/p/b.cc"]), BTreeSet::new()),
            (Pass::Cumulative, FileCategory::Source, paths(&["/p/b.cc"]), BTreeSet::new()),
        ]
    );
    assert!(tree
        .root_node()
        .files(Pass::Exact)
        .contains(FileCategory::Source, Path::new("/p/b.cc")));

    tree.remove_files(root, &[PathBuf::from("/p/b.cc")]).unwrap();
    tree.run_until_idle().await;
    assert_eq!(text.contents("/p/app.pro").unwrap(), original);
    let removed = deltas(&drain(&mut events));
    assert_eq!(
        removed,
        vec![
            (Pass::Exact, FileCategory::Source, BTreeSet::new(), paths(&["/p/b.cc"])),
            (Pass::Cumulative, FileCategory::Source, BTreeSet::new(), paths(&["/p/b.cc"])),
        ]
    );
}

#[test(tokio::test)]
async fn removing_one_of_two_sources_leaves_the_other() {
    let text = memory_project(&[("/p/app.pro", "SOURCES += a.cc b.cc\n")]);
    let (mut tree, mut events) = observed_tree(text.clone(), "/p/app.pro");
    let root = tree.root();
    tree.parse_all().await;
    drain(&mut events);

    let report = tree.remove_files(root, &[PathBuf::from("b.cc")]).unwrap();
    assert!(report.not_changed.is_empty());
    tree.run_until_idle().await;

    assert_eq!(text.contents("/p/app.pro").unwrap(), "SOURCES += a.cc\n");
    let exact: Vec<_> = deltas(&drain(&mut events))
        .into_iter()
        .filter(|(pass, ..)| *pass == Pass::Exact)
        .collect();
    assert_eq!(
        exact,
        vec![(Pass::Exact, FileCategory::Source, BTreeSet::new(), paths(&["/p/b.cc"]))]
    );
    assert_eq!(
        tree.root_node().files(Pass::Exact).get(FileCategory::Source),
        &paths(&["/p/a.cc"])
    );
}

#[test(tokio::test)]
async fn re_evaluating_unchanged_text_emits_no_deltas() {
    let text = memory_project(&[("/p/app.pro", "SOURCES += a.cc\nHEADERS += a.h\n")]);
    let (mut tree, mut events) = observed_tree(text, "/p/app.pro");
    let root = tree.root();
    tree.parse_all().await;
    drain(&mut events);

    tree.schedule_update(root, Urgency::Now);
    assert_eq!(tree.run_until_idle().await, vec![CompletionOutcome::Accepted]);
    let events = drain(&mut events);
    assert!(deltas(&events).is_empty());
    assert_eq!(
        events,
        vec![
            TreeEvent::ParseStateChanged {
                node: root,
                state: ParseState::InProgress
            },
            TreeEvent::ParseStateChanged {
                node: root,
                state: ParseState::Valid
            },
        ]
    );
}

#[test(tokio::test)]
async fn configuration_flip_moves_files_into_the_exact_pass_only() {
    let text = memory_project(&[(
        "/p/app.pro",
        "SOURCES += main.cc\nwin32 {\n    SOURCES += win.cc\n}\n",
    )]);
    let settings = Arc::new(StaticBuildSettings::default());
    let (observer, mut events) = prosync_core::event::ChannelObserver::new();
    let mut tree = ProjectTree::builder("/p/app.pro")
        .config(test_config())
        .text(text)
        .settings(settings.clone())
        .observer(Arc::new(observer))
        .build();
    let root = tree.root();
    tree.parse_all().await;

    let node = tree.root_node();
    let win = Path::new("/p/win.cc");
    assert!(!node.files(Pass::Exact).contains(FileCategory::Source, win));
    assert!(node.files(Pass::Cumulative).contains(FileCategory::Source, win));
    drain(&mut events);

    settings.set_context(BuildContext {
        scopes: ["win32".to_string()].into(),
        ..Default::default()
    });
    tree.on_build_settings_changed();
    tree.run_until_idle().await;

    assert_eq!(
        deltas(&drain(&mut events)),
        vec![(Pass::Exact, FileCategory::Source, paths(&["/p/win.cc"]), BTreeSet::new())]
    );
    let node = tree.node(root).unwrap();
    assert!(node.files(Pass::Exact).contains(FileCategory::Source, win));
    assert!(node.files(Pass::Cumulative).contains(FileCategory::Source, win));
}

#[test(tokio::test)]
async fn build_paths_follow_the_sysroot_and_build_directory() {
    let text = memory_project(&[(
        "/p/app.pro",
        "FORMS += main.ui\nINCLUDEPATH += /usr/include/foo ../shared\nLIBS += -L/opt/lib -lfoo\nUI_DIR = ui\n",
    )]);
    let settings = Arc::new(StaticBuildSettings::new(BuildContext {
        build_dir: Some(PathBuf::from("/build")),
        sysroot: Some(PathBuf::from("/sdk")),
        ..Default::default()
    }));
    let mut tree = ProjectTree::builder("/p/app.pro")
        .config(test_config())
        .text(text)
        .settings(settings.clone())
        .build();
    let root = tree.root();
    tree.parse_all().await;

    let node = tree.root_node();
    assert_eq!(
        node.include_paths(),
        [
            PathBuf::from("/sdk/usr/include/foo"),
            PathBuf::from("/shared"),
            PathBuf::from("/build/ui"),
            PathBuf::from("/build"),
        ]
    );
    assert_eq!(node.library_directories(), [PathBuf::from("/sdk/opt/lib")]);
    assert_eq!(
        node.generated_files(Path::new("/p/main.ui")),
        vec![PathBuf::from("/build/ui/ui_main.h")]
    );

    settings.set_context(BuildContext::default());
    tree.on_build_settings_changed();
    tree.run_until_idle().await;
    let node = tree.node(root).unwrap();
    assert_eq!(node.include_paths()[0], PathBuf::from("/usr/include/foo"));
    assert_eq!(node.library_directories(), [PathBuf::from("/opt/lib")]);
    assert_eq!(
        node.generated_files(Path::new("/p/main.ui")),
        vec![PathBuf::from("/p/ui/ui_main.h")]
    );
}

#[test(tokio::test)]
async fn sub_projects_are_created_and_destroyed_with_subdirs() {
    let text = memory_project(&[
        ("/p/top.pro", "TEMPLATE = subdirs\nSUBDIRS += core app\n"),
        ("/p/core/core.pro", "TEMPLATE = lib\nSOURCES += core.cc\n"),
        ("/p/app/app.pro", "SOURCES += main.cc\n"),
    ]);
    let (mut tree, mut events) = observed_tree(text.clone(), "/p/top.pro");
    let root = tree.root();

    let outcomes = tree.parse_all().await;
    assert_eq!(outcomes.len(), 3);
    assert_eq!(tree.len(), 3);
    assert_eq!(tree.root_node().project_type(), ProjectType::Subdirs);

    let core = tree.find_node_for_path(Path::new("/p/core/core.pro")).unwrap();
    let app = tree.find_node_for_path(Path::new("/p/app/app.pro")).unwrap();
    assert_eq!(tree.node(core).unwrap().parent(), Some(root));
    assert_eq!(tree.walk(root), vec![root, app, core]);
    assert_eq!(tree.nodes_for_file(Path::new("/p/core/core.cc")), vec![core]);

    // Children are announced before their first evaluation starts.
    let events_seen = drain(&mut events);
    let created = events_seen
        .iter()
        .position(|e| matches!(e, TreeEvent::NodeCreated { node, .. } if *node == core))
        .unwrap();
    let started = events_seen
        .iter()
        .position(|e| {
            matches!(e, TreeEvent::ParseStateChanged { node, state: ParseState::InProgress } if *node == core)
        })
        .unwrap();
    assert!(created < started);

    tree.remove_sub_projects(root, &[PathBuf::from("/p/app/app.pro")])
        .unwrap();
    tree.run_until_idle().await;
    assert_eq!(
        text.contents("/p/top.pro").unwrap(),
        "TEMPLATE = subdirs\nSUBDIRS += core\n"
    );
    assert!(!tree.contains(app));
    assert_eq!(tree.len(), 2);
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, TreeEvent::NodeDestroyed { node, .. } if *node == app)));

    tree.add_sub_projects(root, &[PathBuf::from("/p/app/app.pro")])
        .unwrap();
    tree.run_until_idle().await;
    assert_eq!(tree.len(), 3);
    let app = tree.find_node_for_path(Path::new("/p/app/app.pro")).unwrap();
    assert_eq!(tree.node(app).unwrap().parse_state(), ParseState::Valid);
}

#[test(tokio::test)]
async fn include_changes_reschedule_the_including_node() {
    let text = memory_project(&[
        ("/p/app.pro", "include(common.pri)\nSOURCES += a.cc\n"),
        ("/p/common.pri", "HEADERS += a.h\n"),
    ]);
    let (mut tree, mut events) = observed_tree(text.clone(), "/p/app.pro");
    let root = tree.root();
    tree.parse_all().await;
    assert!(tree.root_node().includes().contains(Path::new("/p/common.pri")));
    drain(&mut events);

    text.insert("/p/common.pri", "HEADERS += a.h b.h\n");
    assert_eq!(tree.on_paths_changed(&[PathBuf::from("/p/common.pri")]), vec![root]);
    assert!(tree.on_paths_changed(&[PathBuf::from("/p/unrelated.txt")]).is_empty());
    tree.run_until_idle().await;

    let exact: Vec<_> = deltas(&drain(&mut events))
        .into_iter()
        .filter(|(pass, ..)| *pass == Pass::Exact)
        .collect();
    assert_eq!(
        exact,
        vec![(Pass::Exact, FileCategory::Header, paths(&["/p/b.h"]), BTreeSet::new())]
    );
}

#[test(tokio::test)]
async fn invalid_evaluation_keeps_the_last_good_file_sets() {
    let text = memory_project(&[("/p/app.pro", "SOURCES += a.cc\n")]);
    let (mut tree, _events) = observed_tree(text.clone(), "/p/app.pro");
    let root = tree.root();
    tree.parse_all().await;

    text.insert("/p/app.pro", "unix {\nSOURCES += a.cc b.cc\n");
    tree.schedule_update(root, Urgency::Now);
    assert_eq!(tree.run_until_idle().await, vec![CompletionOutcome::Invalid]);

    let node = tree.root_node();
    assert_eq!(node.parse_state(), ParseState::Invalid);
    assert!(!tree.diagnostics(root).is_empty());
    assert_eq!(
        node.files(Pass::Exact).get(FileCategory::Source),
        &paths(&["/p/a.cc"])
    );

    text.insert("/p/app.pro", "SOURCES += a.cc b.cc\n");
    tree.schedule_update(root, Urgency::Now);
    assert_eq!(tree.run_until_idle().await, vec![CompletionOutcome::Accepted]);
    assert_eq!(tree.root_node().parse_state(), ParseState::Valid);
}

#[test(tokio::test)]
async fn shadow_builds_map_under_the_build_root() {
    let text = memory_project(&[
        ("/p/top.pro", "TEMPLATE = subdirs\nSUBDIRS += core\n"),
        (
            "/p/core/core.pro",
            "TEMPLATE = lib\nTARGET = core\nOBJECTS_DIR = obj\nDEFINES += CORE_LIB\n",
        ),
    ]);
    let settings = Arc::new(StaticBuildSettings::new(BuildContext {
        build_dir: Some(PathBuf::from("/build")),
        ..Default::default()
    }));
    let mut tree = ProjectTree::builder("/p/top.pro")
        .config(test_config())
        .text(text)
        .settings(settings)
        .build();
    tree.parse_all().await;

    let core = tree.find_node_for_path(Path::new("/p/core/core.pro")).unwrap();
    assert_eq!(tree.source_dir(core), Some(Path::new("/p/core")));
    assert_eq!(tree.build_dir(core), Some(PathBuf::from("/build/core")));
    let node = tree.node(core).unwrap();
    assert_eq!(node.objects_directory(), Some(PathBuf::from("/build/core/obj")));
    assert_eq!(node.cxx_defines(), vec!["CORE_LIB".to_string()]);
    assert_eq!(node.makefile(), "Makefile");
    let target = node.target_info().unwrap();
    assert_eq!(target.target, "core");
    assert_eq!(target.build_dir, PathBuf::from("/build/core"));
}

#[test(tokio::test)]
async fn snapshot_serializes_the_whole_tree() {
    let text = memory_project(&[
        ("/p/top.pro", "TEMPLATE = subdirs\nSUBDIRS += app\n"),
        ("/p/app/app.pro", "SOURCES += main.cc\n"),
    ]);
    let (mut tree, _events) = observed_tree(text, "/p/top.pro");
    tree.parse_all().await;

    let snapshot = tree.describe();
    let json = serde_json::to_string(&snapshot).unwrap();
    let back: prosync_core::tree::TreeSnapshot = serde_json::from_str(&json).unwrap();
    assert_eq!(back, snapshot);

    let root = snapshot.root.unwrap();
    let app = root.find(Path::new("/p/app/app.pro")).unwrap();
    assert_eq!(app.parse_state, ParseState::Valid);
    assert!(app.exact.contains(FileCategory::Source, Path::new("/p/app/main.cc")));
}
