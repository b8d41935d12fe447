//! prosync CLI tool
//!
//! Command-line interface for inspecting and editing hierarchical project trees with
//! prosync-core.
//!
//! ## Commands
//!
//! - `inspect <project>`: Evaluate the whole tree once and print it (`--json` for a dump)
//! - `add`, `remove`, `rename`, `set`: Apply one structural edit and wait for the resulting
//!   evaluation
//! - `watch <project>`: Keep the tree live and print every change until Ctrl-C (requires the
//!   `service` feature)
//!
//! Build settings and tree tuning are read from `prosync.toml` next to the root description
//! file unless `--config` points elsewhere.

use clap::{Parser, Subcommand};
use prosync_core::{
    config::{ConfigFile, StaticBuildSettings},
    paths::{canonical_identity, normalize_against},
    tree::{NodeId, NodeSnapshot, ProjectTree},
    writer::{EditReport, EditStatus},
    ProjectError,
};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

#[derive(Parser)]
#[command(name = "prosync")]
#[command(author, version, about = "Inspect and edit hierarchical build-project trees", long_about = None)]
struct Cli {
    /// Configuration file (default: prosync.toml next to the project)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate the tree once and print it
    Inspect {
        /// Root description file
        project: PathBuf,

        /// Print the tree snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Add files to a node
    Add {
        project: PathBuf,
        files: Vec<PathBuf>,

        /// Description file of the node to edit (default: the root)
        #[arg(long)]
        node: Option<PathBuf>,
    },

    /// Remove files from a node
    Remove {
        project: PathBuf,
        files: Vec<PathBuf>,

        #[arg(long)]
        node: Option<PathBuf>,
    },

    /// Rename a file referenced by a node
    Rename {
        project: PathBuf,
        old: PathBuf,
        new: PathBuf,

        #[arg(long)]
        node: Option<PathBuf>,
    },

    /// Replace the values of a variable
    Set {
        project: PathBuf,
        variable: String,
        values: Vec<String>,

        /// Scope condition to write the assignment under, e.g. `unix`
        #[arg(long)]
        scope: Option<String>,

        #[arg(long)]
        node: Option<PathBuf>,
    },

    /// Keep the tree live and print changes until Ctrl-C
    Watch {
        project: PathBuf,

        /// Debounce window for filesystem events in milliseconds
        #[arg(long, default_value = "200")]
        debounce_ms: u64,
    },
}

enum EditCommand {
    Add(Vec<PathBuf>),
    Remove(Vec<PathBuf>),
    Rename(PathBuf, PathBuf),
    Set {
        variable: String,
        values: Vec<String>,
        scope: Option<String>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.config;

    match cli.command {
        Commands::Inspect { project, json } => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            runtime.block_on(async {
                let mut tree = build_tree(&project, config.as_deref())?;
                tree.parse_all().await;
                let snapshot = tree.describe();
                if json {
                    println!("{}", serde_json::to_string_pretty(&snapshot)?);
                } else if let Some(root) = &snapshot.root {
                    print_node(root, 0);
                }
                Ok::<(), ProjectError>(())
            })?;
            Ok(())
        }

        Commands::Add {
            project,
            files,
            node,
        } => run_edit(&project, config.as_deref(), node, EditCommand::Add(files)),

        Commands::Remove {
            project,
            files,
            node,
        } => run_edit(&project, config.as_deref(), node, EditCommand::Remove(files)),

        Commands::Rename {
            project,
            old,
            new,
            node,
        } => run_edit(&project, config.as_deref(), node, EditCommand::Rename(old, new)),

        Commands::Set {
            project,
            variable,
            values,
            scope,
            node,
        } => run_edit(
            &project,
            config.as_deref(),
            node,
            EditCommand::Set {
                variable,
                values,
                scope,
            },
        ),

        #[cfg(feature = "service")]
        Commands::Watch {
            project,
            debounce_ms,
        } => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(watch(&project, config.as_deref(), debounce_ms))?;
            Ok(())
        }

        #[cfg(not(feature = "service"))]
        Commands::Watch { .. } => {
            eprintln!("Error: The 'watch' subcommand requires the 'service' feature.");
            eprintln!("Please rebuild with: cargo build --features \"bin service\"");
            std::process::exit(1);
        }
    }
}

fn config_path(project: &Path, config: Option<&Path>) -> PathBuf {
    match config {
        Some(path) => path.to_path_buf(),
        None => project
            .parent()
            .map(|dir| dir.join("prosync.toml"))
            .unwrap_or_else(|| PathBuf::from("prosync.toml")),
    }
}

fn build_tree(project: &Path, config: Option<&Path>) -> Result<ProjectTree, ProjectError> {
    let loaded = ConfigFile::load(&config_path(project, config))?;
    Ok(ProjectTree::builder(project)
        .config(loaded.tree)
        .settings(Arc::new(StaticBuildSettings::new(loaded.build)))
        .build())
}

fn absolute(path: &Path) -> Result<PathBuf, ProjectError> {
    Ok(normalize_against(&std::env::current_dir()?, path))
}

fn run_edit(
    project: &Path,
    config: Option<&Path>,
    node: Option<PathBuf>,
    command: EditCommand,
) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        let mut tree = build_tree(project, config)?;
        tree.parse_all().await;
        let id = match node {
            Some(node) => find_node(&tree, &node)?,
            None => tree.root(),
        };

        let report = match command {
            EditCommand::Add(files) => {
                let files = files.iter().map(|f| absolute(f)).collect::<Result<Vec<_>, _>>()?;
                tree.add_files(id, &files)?
            }
            EditCommand::Remove(files) => {
                let files = files.iter().map(|f| absolute(f)).collect::<Result<Vec<_>, _>>()?;
                tree.remove_files(id, &files)?
            }
            EditCommand::Rename(old, new) => tree.rename_file(id, &absolute(&old)?, &absolute(&new)?)?,
            EditCommand::Set {
                variable,
                values,
                scope,
            } => tree.set_variable(id, &variable, &values, scope.as_deref())?,
        };
        tree.run_until_idle().await;
        print_report(&tree, id, &report);
        Ok::<(), ProjectError>(())
    })?;
    Ok(())
}

fn find_node(tree: &ProjectTree, node: &Path) -> Result<NodeId, ProjectError> {
    let path = canonical_identity(&absolute(node)?);
    tree.find_node_for_path(&path)
        .ok_or_else(|| ProjectError::NotFound(format!("{} is not part of the tree", node.display())))
}

fn print_report(tree: &ProjectTree, id: NodeId, report: &EditReport) {
    let path = tree
        .node(id)
        .map(|n| n.path().display().to_string())
        .unwrap_or_default();
    match &report.status {
        EditStatus::Written { settles_at } => {
            println!("✓ Updated {path} (generation {settles_at})")
        }
        EditStatus::Unchanged => println!("No change to {path}"),
        EditStatus::DryRun { text } => {
            println!("Write-back disabled; {path} would read:\n{text}")
        }
        EditStatus::Queued { position } => println!("Queued behind {position} edit(s)"),
    }
    for path in &report.not_changed {
        println!("  unchanged: {}", path.display());
    }
    for diagnostic in tree.diagnostics(id) {
        println!("  {diagnostic}");
    }
}

fn print_node(node: &NodeSnapshot, depth: usize) {
    let indent = "  ".repeat(depth);
    println!(
        "{indent}{} [{:?}, {}]{}",
        node.path.display(),
        node.project_type,
        node.parse_state,
        if node.included_in_exact_parse {
            ""
        } else {
            " (not in exact parse)"
        }
    );
    for (category, files) in node.exact.iter() {
        if files.is_empty() || category == prosync_core::fileset::FileCategory::SubProject {
            continue;
        }
        println!("{indent}  {category}:");
        for file in files {
            let shown = file.strip_prefix(node.path.parent().unwrap_or(Path::new("")));
            println!("{indent}    {}", shown.unwrap_or(file).display());
        }
    }
    for diagnostic in &node.diagnostics {
        println!("{indent}  ! {diagnostic}");
    }
    for child in &node.children {
        print_node(child, depth + 1);
    }
}

#[cfg(feature = "service")]
async fn watch(project: &Path, config: Option<&Path>, debounce_ms: u64) -> Result<(), ProjectError> {
    use prosync_core::{
        commands::Op, config::TomlBuildSettings, event::TreeEvent, service::ProjectService,
    };
    use std::time::Duration;
    use tokio::sync::{broadcast::error::RecvError, mpsc::unbounded_channel};

    let settings_path = config_path(project, config);
    let loaded = ConfigFile::load(&settings_path)?;
    let settings = Arc::new(TomlBuildSettings::open(settings_path)?);
    let builder = ProjectTree::builder(project)
        .config(loaded.tree)
        .settings(settings.clone());
    let service = ProjectService::spawn_watching(builder, Duration::from_millis(debounce_ms))?;
    let handle = service.handle();
    let mut events = handle.events();

    let (stop_tx, mut stop_rx) = unbounded_channel::<()>();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .map_err(|e| ProjectError::Service(format!("cannot install Ctrl-C handler: {e}")))?;

    println!("Watching {} (Ctrl-C to stop)", project.display());
    let mut reload = tokio::time::interval(Duration::from_secs(2));
    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,
            _ = reload.tick() => match settings.reload() {
                Ok(true) => {
                    println!("Build settings changed, re-evaluating");
                    handle.request(Op::BuildSettingsChanged).await?;
                }
                Ok(false) => {}
                Err(e) => tracing::warn!("cannot reload {:?}: {e}", settings.path()),
            },
            event = events.recv() => match event {
                Ok(TreeEvent::FileSetChanged { node, pass, delta }) => {
                    for added in &delta.added {
                        println!("{node} {pass:?} +{} {}", delta.category, added.display());
                    }
                    for removed in &delta.removed {
                        println!("{node} {pass:?} -{} {}", delta.category, removed.display());
                    }
                }
                Ok(event) => println!("{event}"),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("event stream lagged, {skipped} event(s) skipped")
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    service.shutdown().await
}
