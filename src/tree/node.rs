use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeSet, VecDeque},
    fmt::{Display, Formatter},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::watch;

use crate::{
    evaluator::{EvalDiagnostic, InstallList, PassResult},
    fileset::{FileCategory, FileSetResult},
    paths::normalize_against,
    tree::NodeId,
    variables::{ProjectType, Variable, VariableStore},
    writer::QueuedEdit,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ParseState {
    #[default]
    NotParsed,
    InProgress,
    Valid,
    Invalid,
}

impl Display for ParseState {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let name = match self {
            ParseState::NotParsed => "not parsed",
            ParseState::InProgress => "in progress",
            ParseState::Valid => "valid",
            ParseState::Invalid => "invalid",
        };
        write!(f, "{name}")
    }
}

/// Which of the two evaluation passes a result or delta belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Pass {
    /// Honours active scopes. Feeds build purposes.
    Exact,
    /// Takes every branch. Feeds editing and navigation.
    Cumulative,
}

/// Build target of a node, derived from its exact variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetInfo {
    pub target: String,
    pub dest_dir: PathBuf,
    pub build_dir: PathBuf,
    /// File name the build produces.
    pub build_target: String,
}

impl TargetInfo {
    pub fn derive(
        variables: &VariableStore,
        project_type: ProjectType,
        description: &Path,
        build_dir: &Path,
    ) -> Option<TargetInfo> {
        if !project_type.has_target() {
            return None;
        }
        let target = match variables.single(Variable::Target) {
            Some(target) => target.to_string(),
            None => description
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default(),
        };
        let dest_dir = variables
            .single(Variable::DestDir)
            .map(|d| normalize_against(build_dir, Path::new(d)))
            .unwrap_or_else(|| build_dir.to_path_buf());
        let build_target = match project_type {
            ProjectType::StaticLibrary => format!("lib{target}.a"),
            ProjectType::SharedLibrary => match variables.single(Variable::Version) {
                Some(version) => format!("lib{target}.so.{version}"),
                None => format!("lib{target}.so"),
            },
            _ => format!(
                "{target}{}",
                variables.single(Variable::TargetExt).unwrap_or_default()
            ),
        };
        Some(TargetInfo {
            target,
            dest_dir,
            build_dir: build_dir.to_path_buf(),
            build_target,
        })
    }
}

/// Compiler-facing directories of a leaf, derived from its exact variables and the build
/// context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildPaths {
    /// `INCLUDEPATH` entries followed by the directories generated headers land in.
    pub include_paths: Vec<PathBuf>,
    /// `-L` entries of `LIBS`.
    pub library_directories: Vec<PathBuf>,
    /// Where `uic` writes `ui_<form>.h`.
    pub ui_dir: PathBuf,
}

impl BuildPaths {
    pub fn derive(
        variables: &VariableStore,
        source_dir: &Path,
        build_dir: &Path,
        sysroot: Option<&Path>,
    ) -> BuildPaths {
        let in_build = |var: Variable| {
            variables
                .single(var)
                .map(|d| normalize_against(build_dir, Path::new(d)))
                .unwrap_or_else(|| build_dir.to_path_buf())
        };
        let ui_dir = in_build(Variable::UiDir);
        let moc_dir = in_build(Variable::MocDir);

        let mut include_paths = Vec::new();
        let mut push = |path: PathBuf| {
            if !include_paths.contains(&path) {
                include_paths.push(path);
            }
        };
        for value in variables.values(Variable::IncludePath) {
            push(sysrooted(source_dir, value, sysroot));
        }
        push(ui_dir.clone());
        push(moc_dir);

        let library_directories = variables
            .values(Variable::LibDirectories)
            .iter()
            .filter_map(|value| value.strip_prefix("-L"))
            .filter(|dir| !dir.is_empty())
            .map(|dir| sysrooted(source_dir, dir, sysroot))
            .collect();

        BuildPaths {
            include_paths,
            library_directories,
            ui_dir,
        }
    }

    /// Files the build generates from `source`.
    pub fn generated_files(&self, source: &Path) -> Vec<PathBuf> {
        match FileCategory::for_path(source) {
            FileCategory::Form => source
                .file_stem()
                .map(|stem| vec![self.ui_dir.join(format!("ui_{}.h", stem.to_string_lossy()))])
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }
}

/// Absolute paths are taken to live under `sysroot` unless they already do.
fn sysrooted(source_dir: &Path, value: &str, sysroot: Option<&Path>) -> PathBuf {
    let path = normalize_against(source_dir, Path::new(value));
    let Some(sysroot) = sysroot else {
        return path;
    };
    if !Path::new(value).is_absolute() || path.starts_with(sysroot) {
        return path;
    }
    match path.strip_prefix("/") {
        Ok(rest) => sysroot.join(rest),
        Err(_) => path,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafDetails {
    pub target_info: Option<TargetInfo>,
    pub build_paths: BuildPaths,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateDetails {
    /// Sub-projects listed by the exact pass.
    pub active_sub_projects: BTreeSet<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Leaf(LeafDetails),
    Aggregate(AggregateDetails),
}

impl Default for NodeKind {
    fn default() -> Self {
        NodeKind::Leaf(LeafDetails::default())
    }
}

/// Everything a node learned from its last accepted evaluation. Replaced wholesale.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeState {
    pub exact: PassResult,
    pub cumulative: PassResult,
    pub includes: BTreeSet<PathBuf>,
    pub project_type: ProjectType,
    pub kind: NodeKind,
    pub build_dir: PathBuf,
}

impl NodeState {
    pub fn pass(&self, pass: Pass) -> &PassResult {
        match pass {
            Pass::Exact => &self.exact,
            Pass::Cumulative => &self.cumulative,
        }
    }

    /// Folders enumerated by either pass.
    pub fn enumerated_folders(&self) -> BTreeSet<PathBuf> {
        self.exact
            .files
            .enumerated_folders()
            .union(self.cumulative.files.enumerated_folders())
            .cloned()
            .collect()
    }
}

#[derive(Debug, Default)]
pub(crate) struct JobSlot {
    /// Generation of the job currently running, if any.
    pub running: Option<u64>,
    /// Another evaluation was requested while the job ran.
    pub dirty: bool,
    /// The request was urgent.
    pub dirty_now: bool,
}

#[derive(Debug)]
pub struct ProjectNode {
    pub(crate) path: PathBuf,
    pub(crate) dir: PathBuf,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) parse_state: ParseState,
    pub(crate) state: Arc<NodeState>,
    pub(crate) included_in_exact_parse: bool,
    pub(crate) generation: u64,
    pub(crate) job: JobSlot,
    pub(crate) diagnostics: Vec<EvalDiagnostic>,
    /// Generation whose settling releases the next queued edit.
    pub(crate) write_barrier: Option<u64>,
    pub(crate) edits: VecDeque<QueuedEdit>,
    pub(crate) settled: watch::Sender<u64>,
}

impl ProjectNode {
    pub(crate) fn new(path: PathBuf, parent: Option<NodeId>) -> Self {
        let dir = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        let (settled, _) = watch::channel(0);
        ProjectNode {
            path,
            dir,
            parent,
            children: Vec::new(),
            parse_state: ParseState::NotParsed,
            state: Arc::new(NodeState::default()),
            included_in_exact_parse: true,
            generation: 0,
            job: JobSlot::default(),
            diagnostics: Vec::new(),
            write_barrier: None,
            edits: VecDeque::new(),
            settled,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn source_dir(&self) -> &Path {
        &self.dir
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn parse_state(&self) -> ParseState {
        self.parse_state
    }

    pub fn project_type(&self) -> ProjectType {
        self.state.project_type
    }

    pub fn kind(&self) -> &NodeKind {
        &self.state.kind
    }

    pub fn included_in_exact_parse(&self) -> bool {
        self.included_in_exact_parse
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Last settled generation.
    pub fn settled_generation(&self) -> u64 {
        *self.settled.borrow()
    }

    pub fn subscribe_settled(&self) -> watch::Receiver<u64> {
        self.settled.subscribe()
    }

    pub fn is_evaluating(&self) -> bool {
        self.job.running.is_some()
    }

    /// Shared handle on the last accepted state.
    pub fn state(&self) -> Arc<NodeState> {
        self.state.clone()
    }

    pub fn files(&self, pass: Pass) -> &FileSetResult {
        &self.state.pass(pass).files
    }

    pub fn includes(&self) -> &BTreeSet<PathBuf> {
        &self.state.includes
    }

    pub fn diagnostics(&self) -> &[EvalDiagnostic] {
        &self.diagnostics
    }

    /// Exact-pass values of `var`. Nothing is returned while an evaluation is in progress.
    pub fn variable_value(&self, var: Variable) -> Option<&[String]> {
        if self.parse_state == ParseState::InProgress {
            return None;
        }
        self.state.exact.variables.get(var)
    }

    pub fn single_variable_value(&self, var: Variable) -> Option<&str> {
        self.variable_value(var)
            .and_then(|v| v.first())
            .map(|s| s.as_str())
    }

    pub fn target_info(&self) -> Option<&TargetInfo> {
        match &self.state.kind {
            NodeKind::Leaf(details) => details.target_info.as_ref(),
            NodeKind::Aggregate(_) => None,
        }
    }

    fn build_paths(&self) -> Option<&BuildPaths> {
        match &self.state.kind {
            NodeKind::Leaf(details) => Some(&details.build_paths),
            NodeKind::Aggregate(_) => None,
        }
    }

    /// Include directories for the compiler, sysroot applied. Empty for aggregates.
    pub fn include_paths(&self) -> &[PathBuf] {
        self.build_paths()
            .map(|b| b.include_paths.as_slice())
            .unwrap_or_default()
    }

    pub fn library_directories(&self) -> &[PathBuf] {
        self.build_paths()
            .map(|b| b.library_directories.as_slice())
            .unwrap_or_default()
    }

    pub fn generated_files(&self, source: &Path) -> Vec<PathBuf> {
        self.build_paths()
            .map(|b| b.generated_files(source))
            .unwrap_or_default()
    }

    pub fn install_list(&self) -> &InstallList {
        &self.state.exact.installs
    }

    pub fn cxx_defines(&self) -> Vec<String> {
        self.variable_value(Variable::Defines)
            .map(|v| v.to_vec())
            .unwrap_or_default()
    }

    pub fn makefile(&self) -> String {
        self.single_variable_value(Variable::Makefile)
            .unwrap_or("Makefile")
            .to_string()
    }

    pub fn object_extension(&self) -> String {
        self.single_variable_value(Variable::ObjectExt)
            .unwrap_or(".o")
            .to_string()
    }

    /// `OBJECTS_DIR` resolved against the build directory.
    pub fn objects_directory(&self) -> Option<PathBuf> {
        self.single_variable_value(Variable::ObjectsDir)
            .map(|d| normalize_against(&self.state.build_dir, Path::new(d)))
    }

    pub fn is_debug_and_release(&self) -> bool {
        self.variable_value(Variable::Config)
            .is_some_and(|v| v.iter().any(|c| c == "debug_and_release"))
    }

    /// Whether either pass lists `path` in any category.
    pub fn references(&self, path: &Path) -> bool {
        self.state.exact.files.contains_any(path) || self.state.cumulative.files.contains_any(path)
    }

    pub fn sub_projects(&self, pass: Pass) -> &BTreeSet<PathBuf> {
        self.files(pass).get(FileCategory::SubProject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_info_follows_project_type() {
        let vars = VariableStore::builder()
            .set(Variable::Target, ["core"])
            .set(Variable::DestDir, ["../bin"])
            .set(Variable::Version, ["2"])
            .build();
        let info = TargetInfo::derive(
            &vars,
            ProjectType::SharedLibrary,
            Path::new("/src/core/core.pro"),
            Path::new("/build/core"),
        )
        .unwrap();
        assert_eq!(info.build_target, "libcore.so.2");
        assert_eq!(info.dest_dir, PathBuf::from("/build/bin"));

        let app = TargetInfo::derive(
            &VariableStore::default(),
            ProjectType::Application,
            Path::new("/src/tool/tool.pro"),
            Path::new("/src/tool"),
        )
        .unwrap();
        assert_eq!(app.target, "tool");
        assert_eq!(app.build_target, "tool");

        assert!(TargetInfo::derive(
            &vars,
            ProjectType::Subdirs,
            Path::new("/src/all.pro"),
            Path::new("/src")
        )
        .is_none());
    }

    #[test]
    fn variables_are_hidden_while_in_progress() {
        let mut node = ProjectNode::new(PathBuf::from("/p/a.pro"), None);
        let mut state = NodeState::default();
        state.exact.variables = VariableStore::builder()
            .set(Variable::Defines, ["A"])
            .build();
        node.state = Arc::new(state);
        node.parse_state = ParseState::Valid;
        assert_eq!(node.cxx_defines(), vec!["A".to_string()]);

        node.parse_state = ParseState::InProgress;
        assert!(node.variable_value(Variable::Defines).is_none());
        assert_eq!(node.makefile(), "Makefile");
    }

    #[test]
    fn build_paths_apply_sysroot_and_build_dir() {
        let vars = VariableStore::builder()
            .set(Variable::IncludePath, ["/usr/include/qt", "../shared", "/sdk/include"])
            .set(Variable::LibDirectories, ["-L/opt/lib", "-lz", "-Lthird"])
            .set(Variable::UiDir, ["gen/ui"])
            .build();
        let paths = BuildPaths::derive(
            &vars,
            Path::new("/src/app"),
            Path::new("/build/app"),
            Some(Path::new("/sdk")),
        );
        assert_eq!(
            paths.include_paths,
            vec![
                PathBuf::from("/sdk/usr/include/qt"),
                PathBuf::from("/src/shared"),
                PathBuf::from("/sdk/include"),
                PathBuf::from("/build/app/gen/ui"),
                PathBuf::from("/build/app"),
            ]
        );
        assert_eq!(
            paths.library_directories,
            vec![PathBuf::from("/sdk/opt/lib"), PathBuf::from("/src/app/third")]
        );
        assert_eq!(
            paths.generated_files(Path::new("/src/app/main.ui")),
            vec![PathBuf::from("/build/app/gen/ui/ui_main.h")]
        );
        assert!(paths.generated_files(Path::new("/src/app/main.cc")).is_empty());
    }
}
