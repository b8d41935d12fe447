//! # prosync-core
//!
//! An incremental evaluation and synchronization engine for hierarchical build-project trees
//! whose structure lives in editable description files.
//!
//! ## Overview
//!
//! A root description file names its sub-projects, which name theirs, and so on. prosync-core
//! keeps a live [`tree::ProjectTree`] of those files up to date: each node is evaluated in the
//! background by a pluggable [`evaluator::Evaluator`], results are reconciled into the tree as
//! minimal per-category file-set deltas, and the [`writer`] applies structural edits (add,
//! remove or rename a file, set a variable) back to the text while leaving every unrelated
//! line untouched.
//!
//! ### Key Features
//!
//! - **Dual-pass evaluation**: every node carries an *exact* view (the active configuration)
//!   and a *cumulative* view (every branch taken), so inactive files stay visible
//! - **Stale-result safety**: per-node generations discard superseded evaluations, and
//!   epoch-checked node ids drop results for nodes that left the tree
//! - **Coalescing scheduler**: urgent requests launch at once; `Later` requests are batched
//!   behind a configurable delay, with at most one job per node in flight
//! - **Format-preserving writes**: edits go through a line model of the description text
//! - **Event streaming**: observers see creations, destructions, parse-state changes and
//!   file-set deltas after each mutation has been applied
//!
//! ## Architecture
//!
//! - **[`tree`]**: the node arena, scheduler and reconciler (`ProjectTree`, `ProjectNode`)
//! - **[`evaluator`]**: the evaluator trait and the reference `LineEvaluator`
//! - **[`syntax`]**: the line-level model of description text shared by evaluator and writer
//! - **[`writer`]**: structural edits with a write barrier per node
//! - **[`fileset`]**: file categories and per-category file sets with diffing
//! - **[`event`]**: `TreeEvent` and the `TreeObserver` trait
//! - **[`config`]**: tree configuration and build-settings providers
//! - **[`watch`]**: reference-counted folder watching
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use prosync_core::{fileset::FileCategory, tree::{Pass, ProjectTree}};
//! # use std::path::PathBuf;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), prosync_core::ProjectError> {
//!     let mut tree = ProjectTree::builder("./app/app.pro").build();
//!     tree.parse_all().await;
//!
//!     let root = tree.root();
//!     tree.add_files(root, &[PathBuf::from("./app/extra.cc")])?;
//!     tree.run_until_idle().await;
//!
//!     for id in tree.walk(root) {
//!         let node = tree.node(id).unwrap();
//!         println!("{} ({})", node.path().display(), node.parse_state());
//!         for source in node.files(Pass::Exact).get(FileCategory::Source) {
//!             println!("  {}", source.display());
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **default**: the tree, reference evaluator and writer
//! - **service**: owner-task service (`service`), `notify`-backed folder watching
//! - **bin**: the `prosync` command line tool

pub mod commands;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod event;
pub mod fileset;
pub mod paths;
#[cfg(feature = "service")]
pub mod service;
pub mod syntax;
#[cfg(test)]
mod tests;
pub mod text;
pub mod tree;
pub mod variables;
pub mod watch;
pub mod writer;

pub use error::*;
