//! Writer behaviour: rejection before any change, edit queuing behind an unsettled write,
//! dry runs, include files and format preservation.

use prosync_core::{
    config::TreeConfig,
    event::TreeEvent,
    fileset::FileCategory,
    tree::{CompletionOutcome, Pass, ProjectTree, Urgency},
    writer::{Edit, EditStatus},
    ProjectError,
};
use std::path::{Path, PathBuf};
use test_log::test;

mod common;
use common::{drain, memory_project, observed_tree, test_config, write_file};

#[test(tokio::test)]
async fn read_only_files_are_rejected_before_any_change() {
    let text = memory_project(&[("/p/app.pro", "SOURCES += a.cc\n")]);
    let (mut tree, mut events) = observed_tree(text.clone(), "/p/app.pro");
    let root = tree.root();
    tree.parse_all().await;
    drain(&mut events);

    text.set_writable("/p/app.pro", false);
    let err = tree.add_files(root, &[PathBuf::from("/p/b.cc")]).unwrap_err();
    assert_eq!(err, ProjectError::NotWritable(PathBuf::from("/p/app.pro")));
    assert_eq!(text.contents("/p/app.pro").unwrap(), "SOURCES += a.cc\n");
    assert!(!tree.has_pending_work());
    assert!(drain(&mut events).is_empty());
}

#[test(tokio::test)]
async fn edits_queue_behind_an_unsettled_write() {
    let text = memory_project(&[("/p/app.pro", "SOURCES += a.cc\n")]);
    let (mut tree, _events) = observed_tree(text.clone(), "/p/app.pro");
    let root = tree.root();
    tree.parse_all().await;

    let first = tree.add_files(root, &[PathBuf::from("/p/b.cc")]).unwrap();
    assert_eq!(first.status, EditStatus::Written { settles_at: 2 });
    let second = tree.add_files(root, &[PathBuf::from("/p/c.h")]).unwrap();
    assert_eq!(second.status, EditStatus::Queued { position: 0 });
    // The queued edit has not touched the text yet.
    assert_eq!(
        text.contents("/p/app.pro").unwrap(),
        "SOURCES += a.cc \\\n    b.cc\n"
    );

    let outcomes = tree.run_until_idle().await;
    assert_eq!(
        outcomes,
        vec![CompletionOutcome::Accepted, CompletionOutcome::Accepted]
    );
    assert_eq!(
        text.contents("/p/app.pro").unwrap(),
        "SOURCES += a.cc \\\n    b.cc\n\nHEADERS += c.h\n"
    );
    let node = tree.root_node();
    assert_eq!(node.settled_generation(), 3);
    assert!(node
        .files(Pass::Exact)
        .contains(FileCategory::Header, Path::new("/p/c.h")));
}

#[test(tokio::test)]
async fn queued_edit_failures_are_reported_as_events() {
    let text = memory_project(&[("/p/app.pro", "SOURCES += a.cc\n")]);
    let (mut tree, mut events) = observed_tree(text.clone(), "/p/app.pro");
    let root = tree.root();
    tree.parse_all().await;

    tree.add_files(root, &[PathBuf::from("/p/b.cc")]).unwrap();
    tree.rename_file(root, Path::new("/p/gone.cc"), Path::new("/p/new.cc"))
        .unwrap();
    tree.run_until_idle().await;

    let failures: Vec<ProjectError> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            TreeEvent::EditFailed { error, .. } => Some(error),
            _ => None,
        })
        .collect();
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0], ProjectError::NotFound(_)));
}

#[test(tokio::test)]
async fn queued_edits_hand_out_tickets_that_resolve_once_applied() {
    let text = memory_project(&[("/p/app.pro", "SOURCES += a.cc\n")]);
    let (mut tree, _events) = observed_tree(text.clone(), "/p/app.pro");
    let root = tree.root();
    tree.parse_all().await;

    let (first, ticket) = tree
        .submit_edit_tracked(root, Edit::AddFiles(vec![PathBuf::from("/p/b.cc")]))
        .unwrap();
    assert_eq!(first.status, EditStatus::Written { settles_at: 2 });
    assert!(ticket.is_none());

    let (queued, ticket) = tree
        .submit_edit_tracked(root, Edit::AddFiles(vec![PathBuf::from("/p/c.h")]))
        .unwrap();
    assert_eq!(queued.status, EditStatus::Queued { position: 0 });
    let (failing, failing_ticket) = tree
        .submit_edit_tracked(
            root,
            Edit::RenameFile {
                old: PathBuf::from("/p/gone.cc"),
                new: PathBuf::from("/p/new.cc"),
            },
        )
        .unwrap();
    assert_eq!(failing.status, EditStatus::Queued { position: 1 });

    tree.run_until_idle().await;
    let applied = ticket.unwrap().outcome().await.unwrap();
    assert_eq!(applied.status, EditStatus::Written { settles_at: 3 });
    let err = failing_ticket.unwrap().outcome().await.unwrap_err();
    assert!(matches!(err, ProjectError::NotFound(_)));
}

#[test(tokio::test)]
async fn released_edit_absorbs_an_earlier_reschedule() {
    let text = memory_project(&[("/p/app.pro", "SOURCES += a.cc\n")]);
    let (mut tree, _events) = observed_tree(text.clone(), "/p/app.pro");
    let root = tree.root();
    tree.parse_all().await;

    tree.add_files(root, &[PathBuf::from("/p/b.cc")]).unwrap();
    // Arrives while generation 2 is running.
    tree.schedule_update(root, Urgency::Later);
    let queued = tree.add_files(root, &[PathBuf::from("/p/c.h")]).unwrap();
    assert_eq!(queued.status, EditStatus::Queued { position: 0 });

    let outcomes = tree.run_until_idle().await;
    assert_eq!(
        outcomes,
        vec![CompletionOutcome::Accepted, CompletionOutcome::Accepted]
    );
    assert_eq!(tree.root_node().generation(), 3);
    assert_eq!(tree.root_node().settled_generation(), 3);
}

#[test(tokio::test)]
async fn dry_run_returns_the_text_without_writing() {
    let text = memory_project(&[("/p/app.pro", "SOURCES += a.cc\n")]);
    let mut tree = ProjectTree::builder("/p/app.pro")
        .config(TreeConfig {
            write_back: false,
            ..test_config()
        })
        .text(text.clone())
        .build();
    let root = tree.root();
    tree.parse_all().await;

    let report = tree.add_files(root, &[PathBuf::from("/p/b.cc")]).unwrap();
    assert_eq!(
        report.status,
        EditStatus::DryRun {
            text: "SOURCES += a.cc \\\n    b.cc\n".to_string()
        }
    );
    assert_eq!(text.contents("/p/app.pro").unwrap(), "SOURCES += a.cc\n");
    assert!(!tree.has_pending_work());
}

#[test(tokio::test)]
async fn listed_and_missing_paths_are_reported_back() {
    let text = memory_project(&[("/p/app.pro", "SOURCES += a.cc\n")]);
    let (mut tree, _events) = observed_tree(text.clone(), "/p/app.pro");
    let root = tree.root();
    tree.parse_all().await;

    let report = tree.add_files(root, &[PathBuf::from("/p/a.cc")]).unwrap();
    assert_eq!(report.status, EditStatus::Unchanged);
    assert_eq!(report.not_changed, vec![PathBuf::from("/p/a.cc")]);

    let report = tree
        .remove_files(root, &[PathBuf::from("/p/a.cc"), PathBuf::from("/p/x.cc")])
        .unwrap();
    assert!(matches!(report.status, EditStatus::Written { .. }));
    assert_eq!(report.not_changed, vec![PathBuf::from("/p/x.cc")]);
    tree.run_until_idle().await;
    assert_eq!(text.contents("/p/app.pro").unwrap(), "");
}

#[test(tokio::test)]
async fn additions_before_any_evaluation_check_the_text() {
    let text = memory_project(&[("/p/app.pro", "SOURCES += a.cc\n")]);
    let (mut tree, _events) = observed_tree(text.clone(), "/p/app.pro");
    let root = tree.root();

    let report = tree.add_files(root, &[PathBuf::from("/p/a.cc")]).unwrap();
    assert_eq!(report.status, EditStatus::Unchanged);
    assert_eq!(report.not_changed, vec![PathBuf::from("/p/a.cc")]);
    assert_eq!(text.contents("/p/app.pro").unwrap(), "SOURCES += a.cc\n");

    let report = tree
        .add_files(root, &[PathBuf::from("/p/c.cc"), PathBuf::from("/p/c.cc")])
        .unwrap();
    assert!(matches!(report.status, EditStatus::Written { .. }));
    assert!(report.not_changed.is_empty());
    assert_eq!(
        text.contents("/p/app.pro").unwrap(),
        "SOURCES += a.cc \\\n    c.cc\n"
    );
}

#[test(tokio::test)]
async fn sub_projects_named_through_file_overrides_are_removed() {
    let text = memory_project(&[
        (
            "/p/top.pro",
            "TEMPLATE = subdirs\nSUBDIRS = tool\ntool.file = tools/t.pro\n",
        ),
        ("/p/tools/t.pro", "SOURCES += t.cc\n"),
    ]);
    let (mut tree, mut events) = observed_tree(text.clone(), "/p/top.pro");
    let root = tree.root();
    tree.parse_all().await;
    assert_eq!(tree.root_node().children().len(), 1);
    drain(&mut events);

    let report = tree
        .remove_sub_projects(root, &[PathBuf::from("/p/tools/t.pro")])
        .unwrap();
    assert!(matches!(report.status, EditStatus::Written { .. }));
    assert!(report.not_changed.is_empty());
    tree.run_until_idle().await;

    assert_eq!(text.contents("/p/top.pro").unwrap(), "TEMPLATE = subdirs\n");
    assert!(tree.root_node().children().is_empty());
    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        TreeEvent::NodeDestroyed { path, .. } if path == Path::new("/p/tools/t.pro")
    )));
}

#[test(tokio::test)]
async fn removals_and_renames_reach_include_files() {
    let text = memory_project(&[
        ("/p/app.pro", "SOURCES += a.cc\ninclude(common/common.pri)\n"),
        (
            "/p/common/common.pri",
            "SOURCES += $$PWD/shared.cc\nHEADERS += $$PWD/shared.h\n",
        ),
    ]);
    let (mut tree, _events) = observed_tree(text.clone(), "/p/app.pro");
    let root = tree.root();
    tree.parse_all().await;

    let report = tree
        .remove_files(root, &[PathBuf::from("/p/common/shared.cc")])
        .unwrap();
    assert!(matches!(report.status, EditStatus::Written { .. }));
    assert!(report.not_changed.is_empty());
    tree.run_until_idle().await;
    assert_eq!(
        text.contents("/p/app.pro").unwrap(),
        "SOURCES += a.cc\ninclude(common/common.pri)\n"
    );
    assert_eq!(
        text.contents("/p/common/common.pri").unwrap(),
        "HEADERS += $$PWD/shared.h\n"
    );
    let sources = tree.root_node().files(Pass::Exact).get(FileCategory::Source);
    assert!(!sources.contains(Path::new("/p/common/shared.cc")));

    tree.rename_file(
        root,
        Path::new("/p/common/shared.h"),
        Path::new("/p/common/util.h"),
    )
    .unwrap();
    tree.run_until_idle().await;
    assert_eq!(
        text.contents("/p/common/common.pri").unwrap(),
        "HEADERS += $$PWD/util.h\n"
    );
    assert!(tree
        .root_node()
        .files(Pass::Exact)
        .contains(FileCategory::Header, Path::new("/p/common/util.h")));
}

#[test(tokio::test)]
async fn rename_keeps_the_surrounding_text() {
    let original = "# core sources\nSOURCES += \\\n    a.cc \\\n    $$PWD/b.cc   # legacy\n";
    let text = memory_project(&[("/p/app.pro", original)]);
    let (mut tree, _events) = observed_tree(text.clone(), "/p/app.pro");
    let root = tree.root();
    tree.parse_all().await;

    tree.rename_file(root, Path::new("/p/b.cc"), Path::new("/p/src/b2.cc"))
        .unwrap();
    tree.run_until_idle().await;
    assert_eq!(
        text.contents("/p/app.pro").unwrap(),
        "# core sources\nSOURCES += \\\n    a.cc \\\n    src/b2.cc   # legacy\n"
    );
    let sources = tree.root_node().files(Pass::Exact).get(FileCategory::Source);
    assert!(sources.contains(Path::new("/p/src/b2.cc")));
    assert!(!sources.contains(Path::new("/p/b.cc")));

    let err = tree
        .rename_file(root, Path::new("/p/none.cc"), Path::new("/p/other.cc"))
        .unwrap_err();
    assert!(matches!(err, ProjectError::NotFound(_)));
}

#[test(tokio::test)]
async fn set_variable_writes_scoped_assignments() {
    let text = memory_project(&[("/p/app.pro", "SOURCES += a.cc\nDEFINES += OLD\n")]);
    let (mut tree, _events) = observed_tree(text.clone(), "/p/app.pro");
    let root = tree.root();
    tree.parse_all().await;

    tree.set_variable(root, "DEFINES", &["NEW".to_string()], None)
        .unwrap();
    tree.run_until_idle().await;
    assert_eq!(tree.root_node().cxx_defines(), vec!["NEW".to_string()]);

    tree.set_variable(root, "DEFINES", &["UNIX_ONLY".to_string()], Some("unix"))
        .unwrap();
    tree.run_until_idle().await;
    assert_eq!(
        text.contents("/p/app.pro").unwrap(),
        "SOURCES += a.cc\nDEFINES = NEW\n\nunix {\n    DEFINES = UNIX_ONLY\n}\n"
    );
    // `unix` is not active in the default build context.
    assert_eq!(tree.root_node().cxx_defines(), vec!["NEW".to_string()]);
}

#[test(tokio::test)]
async fn files_added_on_disk_are_written_relative_to_the_node() {
    let dir = tempfile::tempdir().unwrap();
    let root_path = write_file(dir.path(), "app/app.pro", "SOURCES += main.cc\n");
    let mut tree = ProjectTree::builder(&root_path)
        .config(test_config())
        .build();
    let root = tree.root();
    tree.parse_all().await;

    let project_dir = tree.source_dir(root).unwrap().to_path_buf();
    tree.add_files(
        root,
        &[project_dir.join("../shared/log.cc"), project_dir.join("ui/main.qml")],
    )
    .unwrap();
    tree.run_until_idle().await;

    let written = std::fs::read_to_string(&root_path).unwrap();
    assert_eq!(
        written,
        "SOURCES += main.cc \\\n    ../shared/log.cc\n\nDISTFILES += ui/main.qml\n"
    );
    let node = tree.root_node();
    assert!(node.files(Pass::Exact).get(FileCategory::Qml).iter().any(|p| p.ends_with("ui/main.qml")));
}
